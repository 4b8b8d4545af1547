//! 并发控制器 - 编排层
//!
//! ## 职责
//!
//! 维护待处理队列和活动集合，活动集合大小不超过 `max_concurrent`：
//!
//! 1. **填充**：活动集合未满时从队列头部取出分片并启动
//! 2. **回收**：任一分片结束（成功或失败）后移出活动集合，继续填充
//! 3. **隔离失败**：分片级错误只标记该分片失败，不影响其他分片
//! 4. **停止派发**：fail_fast 策略下检查点写入失败时不再启动新分片

use crate::error::ShardError;
use crate::infrastructure::{CircuitBreaker, ShardSnapshot};
use crate::models::{Shard, ShardStatus};
use crate::orchestrator::runner::{ShardRun, ShardRunner};
use crate::services::events::{ProgressEvent, ProgressSink};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{error, info, warn};

/// 一轮处理的结果
#[derive(Debug)]
pub struct PassOutcome {
    /// 按分片序号排序的全部分片（包括因停止派发而未执行的）
    pub shards: Vec<Shard>,
    /// 导致停止派发的错误
    pub halted: Option<ShardError>,
}

/// 并发控制器
pub struct ConcurrencyController {
    max_concurrent: usize,
    runner: Arc<dyn ShardRunner>,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn ProgressSink>,
}

impl ConcurrencyController {
    pub fn new(
        max_concurrent: usize,
        runner: Arc<dyn ShardRunner>,
        breaker: Arc<CircuitBreaker>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            runner,
            breaker,
            sink,
        }
    }

    /// 处理一轮分片，全部结束后返回
    pub async fn run_pass(&self, shards: Vec<Shard>) -> PassOutcome {
        let mut pending: VecDeque<Shard> = shards.into();
        let mut active: JoinSet<ShardRun> = JoinSet::new();
        // 每个任务启动时的分片副本，任务无法回收时用它记录失败
        let mut launched: HashMap<Id, Shard> = HashMap::new();
        let mut finished = Vec::with_capacity(pending.len());
        let mut halted: Option<ShardError> = None;

        loop {
            while active.len() < self.max_concurrent && halted.is_none() {
                let Some(shard) = pending.pop_front() else {
                    break;
                };
                self.dispatch(&mut active, &mut launched, shard);
            }

            let Some(joined) = active.join_next_with_id().await else {
                break;
            };

            let run = match joined {
                Ok((id, run)) => {
                    launched.remove(&id);
                    run
                }
                Err(e) => match launched.remove(&e.id()) {
                    Some(shard) => self.lost(shard, e).await,
                    None => {
                        error!("分片任务无法回收: {}", e);
                        continue;
                    }
                },
            };

            if let Some(e) = self.settle(run, &mut finished) {
                warn!("⛔ 停止派发新分片: {}", e);
                halted = Some(e);
            }
        }

        if !pending.is_empty() {
            warn!("⚠️ {} 个分片未执行", pending.len());
        }
        finished.extend(pending);
        finished.sort_by_key(|s| s.index);

        PassOutcome {
            shards: finished,
            halted,
        }
    }

    /// 启动单个分片
    fn dispatch(&self, active: &mut JoinSet<ShardRun>, launched: &mut HashMap<Id, Shard>, mut shard: Shard) {
        shard.status = if shard.retry_count > 0 {
            ShardStatus::Retrying
        } else {
            ShardStatus::Running
        };
        shard.start_time.get_or_insert_with(Utc::now);

        info!(
            "[分片 {}] 🚀 开始{} ({} 个条目)",
            shard.index,
            if shard.retry_count > 0 {
                format!("第 {} 次重试", shard.retry_count)
            } else {
                "处理".to_string()
            },
            shard.len()
        );
        self.sink.emit(ProgressEvent::ShardStarted {
            shard_id: shard.id.clone(),
            total_items: shard.len(),
            retry_count: shard.retry_count,
        });

        let runner = self.runner.clone();
        let copy = shard.clone();
        let handle = active.spawn(async move { runner.run(shard).await });
        launched.insert(handle.id(), copy);
    }

    /// 任务 panic 或被取消时，用启动时的副本记录分片失败
    async fn lost(&self, mut shard: Shard, e: JoinError) -> ShardRun {
        // 可能有试探条目停在 HALF_OPEN，按失败处理以释放熔断器
        self.breaker.record_failure().await;

        let message = if e.is_panic() {
            "分片任务发生 panic".to_string()
        } else {
            format!("分片任务被取消: {}", e)
        };
        shard.status = ShardStatus::Failed;
        shard.end_time = Some(Utc::now());
        ShardRun {
            outcome: Err(ShardError::Worker {
                shard_id: shard.id.clone(),
                message,
            }),
            shard,
        }
    }

    /// 记录分片结果，返回需要停止派发的错误
    fn settle(&self, run: ShardRun, finished: &mut Vec<Shard>) -> Option<ShardError> {
        let ShardRun { mut shard, outcome } = run;

        let halt = match outcome {
            Ok(()) => None,
            Err(e) => {
                shard.status = ShardStatus::Failed;
                shard.end_time.get_or_insert_with(Utc::now);
                error!("[分片 {}] ❌ 分片失败: {}", shard.index, e);
                e.halts_run().then_some(e)
            }
        };

        self.sink.emit(ProgressEvent::ShardFinished {
            snapshot: ShardSnapshot::from(&shard),
            retry_count: shard.retry_count,
        });
        finished.push(shard);
        halt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItem;
    use crate::services::events::NullSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 记录同时运行分片数的执行策略
    struct CountingRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
        fail_index: Option<usize>,
        halt_index: Option<usize>,
        panic_index: Option<usize>,
    }

    impl CountingRunner {
        fn new() -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_index: None,
                halt_index: None,
                panic_index: None,
            }
        }
    }

    #[async_trait]
    impl ShardRunner for CountingRunner {
        async fn run(&self, mut shard: Shard) -> ShardRun {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if Some(shard.index) == self.panic_index {
                panic!("分片 {} 崩溃", shard.index);
            }

            let outcome = if Some(shard.index) == self.fail_index {
                Err(ShardError::Abort {
                    shard_id: shard.id.clone(),
                    error_count: 1,
                    total: 1,
                    threshold: 0.0,
                })
            } else if Some(shard.index) == self.halt_index {
                Err(ShardError::CheckpointIo {
                    shard_id: shard.id.clone(),
                    message: "磁盘已满".to_string(),
                })
            } else {
                shard.status = ShardStatus::Completed;
                Ok(())
            };
            ShardRun { shard, outcome }
        }
    }

    fn shards(n: usize) -> Vec<Shard> {
        (0..n).map(|i| Shard::new(i, vec![WorkItem::new(format!("i{}", i))])).collect()
    }

    fn controller(max: usize, runner: Arc<CountingRunner>) -> ConcurrencyController {
        ConcurrencyController::new(
            max,
            runner,
            Arc::new(CircuitBreaker::new(5, Duration::from_millis(10))),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_bound() {
        let runner = Arc::new(CountingRunner::new());
        let outcome = controller(3, runner.clone()).run_pass(shards(10)).await;

        assert_eq!(outcome.shards.len(), 10);
        assert!(runner.peak.load(Ordering::SeqCst) <= 3);
        assert!(outcome.shards.iter().all(|s| s.status == ShardStatus::Completed));
    }

    #[tokio::test]
    async fn test_shard_failure_does_not_cascade() {
        let mut runner = CountingRunner::new();
        runner.fail_index = Some(1);
        let outcome = controller(2, Arc::new(runner)).run_pass(shards(4)).await;

        let statuses: Vec<_> = outcome.shards.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                ShardStatus::Completed,
                ShardStatus::Failed,
                ShardStatus::Completed,
                ShardStatus::Completed
            ]
        );
        assert!(outcome.halted.is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_failure_halts_dispatch() {
        let mut runner = CountingRunner::new();
        runner.halt_index = Some(0);
        let outcome = controller(1, Arc::new(runner)).run_pass(shards(3)).await;

        assert!(matches!(outcome.halted, Some(ShardError::CheckpointIo { .. })));
        assert_eq!(outcome.shards[0].status, ShardStatus::Failed);
        assert_eq!(outcome.shards[1].status, ShardStatus::Pending);
        assert_eq!(outcome.shards[2].status, ShardStatus::Pending);
    }

    #[tokio::test]
    async fn test_panicking_shard_is_reported_failed() {
        let mut runner = CountingRunner::new();
        runner.panic_index = Some(2);
        let outcome = controller(2, Arc::new(runner)).run_pass(shards(4)).await;

        assert_eq!(outcome.shards.len(), 4);
        let lost = &outcome.shards[2];
        assert_eq!(lost.id, "shard_2");
        assert_eq!(lost.status, ShardStatus::Failed);
        assert!(lost.end_time.is_some());
        assert_eq!(outcome.shards[3].status, ShardStatus::Completed);
        assert!(outcome.halted.is_none());
    }
}
