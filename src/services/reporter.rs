//! 进度报告 - 服务层
//!
//! 独立任务，唯一持有 `GlobalStats`。分片任务只通过事件通道上报，
//! 报告任务按固定间隔输出进度快照并写入全局快照文件。

use crate::infrastructure::{CheckpointStore, CircuitBreaker, CircuitBreakerState, GlobalSnapshot, ShardSnapshot};
use crate::models::{GlobalStats, Shard, ShardStatus};
use crate::services::events::ProgressEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 单个分片的进度
#[derive(Debug, Clone, PartialEq)]
pub struct ShardProgress {
    pub id: String,
    pub status: ShardStatus,
    pub progress: f64,
    pub error_rate: f64,
}

/// 某一时刻的整体进度
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// 各分片进度的平均值
    pub overall_progress: f64,
    pub processed: usize,
    pub failed: usize,
    /// 条目/秒
    pub throughput: f64,
    pub shards: Vec<ShardProgress>,
    pub breaker: CircuitBreakerState,
}

/// 报告任务内部的分片视图
#[derive(Debug, Clone)]
struct ShardView {
    snapshot: ShardSnapshot,
    total_items: usize,
}

impl ShardView {
    fn error_rate(&self) -> f64 {
        if self.total_items == 0 {
            0.0
        } else {
            self.snapshot.error_count as f64 / self.total_items as f64
        }
    }
}

/// 计算进度快照
pub fn progress_snapshot(stats: &GlobalStats, shards: &[ShardProgress], breaker: CircuitBreakerState) -> ProgressSnapshot {
    let overall_progress = if shards.is_empty() {
        0.0
    } else {
        shards.iter().map(|s| s.progress).sum::<f64>() / shards.len() as f64
    };

    ProgressSnapshot {
        overall_progress,
        processed: stats.processed,
        failed: stats.failed,
        throughput: stats.throughput(),
        shards: shards.to_vec(),
        breaker,
    }
}

/// 进度报告器
pub struct Reporter {
    stats: GlobalStats,
    views: Vec<ShardView>,
    positions: HashMap<String, usize>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<dyn CheckpointStore>,
}

impl Reporter {
    pub fn new(shards: &[Shard], breaker: Arc<CircuitBreaker>, store: Arc<dyn CheckpointStore>) -> Self {
        let total = shards.iter().map(Shard::len).sum();
        let views: Vec<ShardView> = shards
            .iter()
            .map(|s| ShardView {
                snapshot: ShardSnapshot::from(s),
                total_items: s.len(),
            })
            .collect();
        let positions = views
            .iter()
            .enumerate()
            .map(|(pos, v)| (v.snapshot.id.clone(), pos))
            .collect();

        Self {
            stats: GlobalStats::new(total),
            views,
            positions,
            breaker,
            store,
        }
    }

    pub fn stats(&self) -> &GlobalStats {
        &self.stats
    }

    /// 启动报告任务，返回句柄和事件发送端
    pub fn spawn(self, interval: Duration) -> (ReporterHandle, UnboundedSender<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run_loop(rx, shutdown_rx, interval));

        (
            ReporterHandle {
                shutdown: shutdown_tx,
                task,
            },
            tx,
        )
    }

    async fn run_loop(
        mut self,
        mut events: UnboundedReceiver<ProgressEvent>,
        mut shutdown: oneshot::Receiver<()>,
        interval: Duration,
    ) -> Self {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 第一次 tick 立即完成
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.apply(event),
                _ = &mut shutdown => {
                    while let Ok(event) = events.try_recv() {
                        self.apply(event);
                    }
                    break;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.stats.end_time = Some(chrono::Utc::now());
        self
    }

    /// 应用一个进度事件
    pub fn apply(&mut self, event: ProgressEvent) {
        let Some(&pos) = self.positions.get(event.shard_id()) else {
            debug!("忽略未知分片的事件: {}", event.shard_id());
            return;
        };
        let view = &mut self.views[pos];

        match event {
            ProgressEvent::ShardStarted { retry_count, .. } => {
                view.snapshot.status = if retry_count > 0 {
                    ShardStatus::Retrying
                } else {
                    ShardStatus::Running
                };
            }
            ProgressEvent::ItemSucceeded {
                processed_count,
                progress,
                ..
            } => {
                self.stats.processed += 1;
                view.snapshot.processed_count = processed_count;
                view.snapshot.progress = progress;
            }
            ProgressEvent::ItemFailed {
                error_count,
                progress,
                ..
            } => {
                self.stats.failed += 1;
                view.snapshot.error_count = error_count;
                view.snapshot.progress = progress;
            }
            ProgressEvent::CheckpointSaved { .. } => {}
            ProgressEvent::ShardFinished { snapshot, .. } => {
                view.snapshot = snapshot;
            }
        }
    }

    fn shard_progress(&self) -> Vec<ShardProgress> {
        self.views
            .iter()
            .map(|v| ShardProgress {
                id: v.snapshot.id.clone(),
                status: v.snapshot.status,
                progress: v.snapshot.progress,
                error_rate: v.error_rate(),
            })
            .collect()
    }

    /// 当前进度快照
    pub async fn snapshot(&self) -> ProgressSnapshot {
        progress_snapshot(&self.stats, &self.shard_progress(), self.breaker.snapshot().await)
    }

    /// 当前的全局快照
    pub fn global_snapshot(&self) -> GlobalSnapshot {
        GlobalSnapshot::new(&self.stats, self.views.iter().map(|v| v.snapshot.clone()).collect())
    }

    async fn tick(&mut self) {
        let snapshot = self.snapshot().await;
        log_progress_snapshot(&snapshot);

        // 全局快照只供参考，写入失败不影响运行
        if let Err(e) = self.store.save_global_snapshot(&self.global_snapshot()).await {
            warn!("⚠️ 全局快照写入失败: {}", e);
        }
    }
}

/// 报告任务句柄
pub struct ReporterHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Reporter>,
}

impl ReporterHandle {
    /// 停止报告任务，处理完剩余事件后取回报告器
    pub async fn finish(self) -> anyhow::Result<Reporter> {
        let _ = self.shutdown.send(());
        Ok(self.task.await?)
    }
}

fn log_progress_snapshot(snapshot: &ProgressSnapshot) {
    info!(
        "📈 总进度 {:.1}% | 成功 {} | 失败 {} | {:.2} 条/秒 | 熔断器 {:?}",
        snapshot.overall_progress,
        snapshot.processed,
        snapshot.failed,
        snapshot.throughput,
        snapshot.breaker.state
    );
    for shard in snapshot.shards.iter().filter(|s| s.status.is_active()) {
        info!(
            "   {} [{}] {:.1}% 错误率 {:.1}%",
            shard.id,
            shard.status.as_str(),
            shard.progress,
            shard.error_rate * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{BreakerState, MemoryCheckpointStore};
    use crate::models::{ItemErrorRecord, WorkItem};
    use crate::error::ItemErrorKind;
    use chrono::Utc;

    fn shards() -> Vec<Shard> {
        vec![
            Shard::new(0, (0..4).map(|i| WorkItem::new(format!("a{}", i))).collect()),
            Shard::new(1, (0..2).map(|i| WorkItem::new(format!("b{}", i))).collect()),
        ]
    }

    fn reporter(store: Arc<MemoryCheckpointStore>) -> Reporter {
        Reporter::new(
            &shards(),
            Arc::new(CircuitBreaker::new(5, Duration::from_millis(10))),
            store,
        )
    }

    fn breaker_state() -> CircuitBreakerState {
        CircuitBreakerState {
            consecutive_failures: 0,
            threshold: 5,
            state: BreakerState::Closed,
            cooldown_ms: 10,
        }
    }

    #[test]
    fn test_overall_progress_is_mean_of_shards() {
        let stats = GlobalStats::new(6);
        let shards = vec![
            ShardProgress {
                id: "shard_0".to_string(),
                status: ShardStatus::Completed,
                progress: 100.0,
                error_rate: 0.0,
            },
            ShardProgress {
                id: "shard_1".to_string(),
                status: ShardStatus::Running,
                progress: 50.0,
                error_rate: 0.5,
            },
        ];

        let snapshot = progress_snapshot(&stats, &shards, breaker_state());
        assert!((snapshot.overall_progress - 75.0).abs() < 1e-9);
        assert_eq!(snapshot.shards.len(), 2);

        let empty = progress_snapshot(&stats, &[], breaker_state());
        assert_eq!(empty.overall_progress, 0.0);
    }

    #[test]
    fn test_apply_updates_stats_and_views() {
        let mut reporter = reporter(Arc::new(MemoryCheckpointStore::new()));

        reporter.apply(ProgressEvent::ShardStarted {
            shard_id: "shard_1".to_string(),
            total_items: 2,
            retry_count: 0,
        });
        reporter.apply(ProgressEvent::ItemSucceeded {
            shard_id: "shard_1".to_string(),
            item_id: "b0".to_string(),
            processed_count: 1,
            progress: 50.0,
        });
        reporter.apply(ProgressEvent::ItemFailed {
            shard_id: "shard_1".to_string(),
            error: ItemErrorRecord {
                item_id: "b1".to_string(),
                index: 1,
                message: "boom".to_string(),
                timestamp: Utc::now(),
                kind: ItemErrorKind::Execution,
            },
            error_count: 1,
            progress: 100.0,
        });
        reporter.apply(ProgressEvent::ItemSucceeded {
            shard_id: "shard_9".to_string(),
            item_id: "x".to_string(),
            processed_count: 1,
            progress: 1.0,
        });

        assert_eq!(reporter.stats().processed, 1);
        assert_eq!(reporter.stats().failed, 1);

        let progress = reporter.shard_progress();
        assert_eq!(progress[0].status, ShardStatus::Pending);
        assert_eq!(progress[1].status, ShardStatus::Running);
        assert_eq!(progress[1].progress, 100.0);
        assert!((progress[1].error_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_finish_drains_events_and_writes_snapshots() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let (handle, tx) = reporter(store.clone()).spawn(Duration::from_millis(10));

        for i in 0..4 {
            tx.send(ProgressEvent::ItemSucceeded {
                shard_id: "shard_0".to_string(),
                item_id: format!("a{}", i),
                processed_count: i + 1,
                progress: (i + 1) as f64 * 25.0,
            })
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        let reporter = handle.finish().await.unwrap();
        assert_eq!(reporter.stats().processed, 4);
        assert!(reporter.stats().end_time.is_some());

        let snapshot = store.last_snapshot().await.expect("应写入全局快照");
        assert_eq!(snapshot.stats.total, 6);
    }
}
