//! 熔断器 - 基础设施层
//!
//! 整次运行共享一个实例，保护的是下游依赖而不是某个分片。
//!
//! 状态机：
//! `CLOSED →(连续失败 ≥ threshold)→ OPEN →(冷却结束)→ HALF_OPEN →(成功)→ CLOSED`，
//! `HALF_OPEN →(失败)→ OPEN`

use crate::error::ShardError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// 熔断器状态快照（供报告使用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub state: BreakerState,
    pub cooldown_ms: u64,
}

/// 准入控制
///
/// 分片处理器在每个条目前调用 `admit`，结束后上报结果。
/// 同进程模式下直接由熔断器实现；工作进程中由转发给父进程的实现代替。
#[async_trait]
pub trait AdmissionGate: Send + Sync {
    /// 等待直到允许尝试下一个条目
    async fn admit(&self) -> Result<(), ShardError>;
    async fn record_success(&self);
    async fn record_failure(&self);
}

#[derive(Debug)]
struct Inner {
    consecutive_failures: u32,
    state: BreakerState,
    opened_at: Option<Instant>,
    /// HALF_OPEN 时是否已有试探条目在执行
    trial_in_flight: bool,
}

enum Wait {
    Sleep(Duration),
    TrialOutcome,
}

/// 熔断器
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
    changed: Notify,
}

impl CircuitBreaker {
    /// 创建新的熔断器
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                state: BreakerState::Closed,
                opened_at: None,
                trial_in_flight: false,
            }),
            changed: Notify::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// 熔断器是否处于 OPEN 状态
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.state == BreakerState::Open
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock().await;
        CircuitBreakerState {
            consecutive_failures: inner.consecutive_failures,
            threshold: self.threshold,
            state: inner.state,
            cooldown_ms: self.cooldown.as_millis() as u64,
        }
    }

    /// 记录一次成功：清零失败计数，HALF_OPEN 时关闭熔断器
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
            info!("✅ 熔断器试探成功，恢复为 CLOSED");
        }
        drop(inner);
        self.changed.notify_waiters();
    }

    /// 记录一次失败：达到阈值或试探失败时打开熔断器
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        inner.trial_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("🔴 熔断器试探失败，重新进入 OPEN");
            }
            BreakerState::Closed if inner.consecutive_failures >= self.threshold => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(
                    "🔴 连续失败 {} 次，熔断器打开，冷却 {}ms",
                    inner.consecutive_failures,
                    self.cooldown.as_millis()
                );
            }
            _ => {}
        }
        drop(inner);
        self.changed.notify_waiters();
    }

    /// OPEN → HALF_OPEN
    pub async fn half_open(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == BreakerState::Open {
            inner.state = BreakerState::HalfOpen;
            inner.trial_in_flight = false;
            info!("🟡 熔断器进入 HALF_OPEN");
        }
        drop(inner);
        self.changed.notify_waiters();
    }

    /// 等待准入
    ///
    /// CLOSED 直接放行；OPEN 时睡到冷却结束并转为 HALF_OPEN，由调用方执行唯一的试探条目；
    /// HALF_OPEN 且已有试探在执行时，等待试探结果。
    pub async fn admit(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut inner = self.inner.lock().await;
                match inner.state {
                    BreakerState::Closed => return,
                    BreakerState::Open => {
                        let elapsed = inner
                            .opened_at
                            .map(|at| at.elapsed())
                            .unwrap_or(self.cooldown);
                        if elapsed >= self.cooldown {
                            inner.state = BreakerState::HalfOpen;
                            inner.trial_in_flight = true;
                            info!("🟡 冷却结束，熔断器进入 HALF_OPEN，放行一个试探条目");
                            return;
                        }
                        Wait::Sleep(self.cooldown - elapsed)
                    }
                    BreakerState::HalfOpen => {
                        if !inner.trial_in_flight {
                            inner.trial_in_flight = true;
                            return;
                        }
                        Wait::TrialOutcome
                    }
                }
            };

            match wait {
                Wait::Sleep(remaining) => sleep(remaining).await,
                Wait::TrialOutcome => notified.await,
            }
        }
    }
}

#[async_trait]
impl AdmissionGate for CircuitBreaker {
    async fn admit(&self) -> Result<(), ShardError> {
        CircuitBreaker::admit(self).await;
        Ok(())
    }

    async fn record_success(&self) {
        CircuitBreaker::record_success(self).await
    }

    async fn record_failure(&self) {
        CircuitBreaker::record_failure(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_millis(100));

        cb.record_failure().await;
        cb.record_failure().await;
        assert!(!cb.is_open().await);

        cb.record_failure().await;
        assert!(cb.is_open().await);
        assert_eq!(cb.snapshot().await.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_run() {
        let cb = CircuitBreaker::new(3, Duration::from_millis(100));

        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        cb.record_failure().await;

        assert!(!cb.is_open().await);
        assert_eq!(cb.snapshot().await.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_admission_waits_cooldown_then_trial_closes() {
        let cooldown = Duration::from_millis(80);
        let cb = CircuitBreaker::new(2, cooldown);
        cb.record_failure().await;
        cb.record_failure().await;

        let started = Instant::now();
        cb.admit().await;
        assert!(started.elapsed() >= cooldown);
        assert_eq!(cb.state().await, BreakerState::HalfOpen);

        cb.record_success().await;
        let snapshot = cb.snapshot().await;
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20));
        cb.record_failure().await;

        cb.admit().await;
        assert_eq!(cb.state().await, BreakerState::HalfOpen);

        cb.record_failure().await;
        assert!(cb.is_open().await);
    }

    #[tokio::test]
    async fn test_only_one_trial_in_half_open() {
        let cb = Arc::new(CircuitBreaker::new(1, Duration::from_millis(20)));
        cb.record_failure().await;
        cb.admit().await;

        let second = tokio::spawn({
            let cb = cb.clone();
            async move { cb.admit().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        cb.record_success().await;
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("试探成功后应放行")
            .unwrap();
    }

    #[tokio::test]
    async fn test_explicit_half_open() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure().await;
        cb.half_open().await;
        assert_eq!(cb.state().await, BreakerState::HalfOpen);

        tokio::time::timeout(Duration::from_millis(100), cb.admit())
            .await
            .expect("HALF_OPEN 下第一个条目应立即放行");
    }
}
