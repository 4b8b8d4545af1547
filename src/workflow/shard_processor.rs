//! 分片处理器 - 流程层
//!
//! ## 职责
//!
//! 按下标顺序逐个执行分片内的条目，负责：
//!
//! 1. **断点续跑**：从检查点记录的位置开始
//! 2. **准入控制**：每个条目前询问熔断器
//! 3. **超时控制**：单条目硬超时，超时按失败计数
//! 4. **周期检查点**：每成功 `checkpoint_interval` 个条目保存一次
//! 5. **错误阈值**：错误率超过阈值立即终止本分片
//!
//! 条目级错误只记录在分片上，不会离开本模块；只有 `ShardError` 会返回给调用方。

use crate::config::{CheckpointFailurePolicy, Config};
use crate::error::{ItemErrorKind, ShardError};
use crate::infrastructure::{AdmissionGate, CheckpointStore};
use crate::models::{ItemErrorRecord, Shard, ShardStatus, WorkItem};
use crate::services::events::{ProgressEvent, ProgressSink};
use crate::utils::logging::truncate_text;
use crate::workflow::executor::WorkflowExecutor;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// 分片处理参数
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub checkpoint_interval: usize,
    pub error_threshold: f64,
    pub item_timeout: Duration,
    pub checkpoint_policy: CheckpointFailurePolicy,
}

impl From<&Config> for ProcessorSettings {
    fn from(config: &Config) -> Self {
        Self {
            checkpoint_interval: config.checkpoint_interval.max(1),
            error_threshold: config.error_threshold,
            item_timeout: config.item_timeout(),
            checkpoint_policy: config.checkpoint_failure_policy,
        }
    }
}

/// 分片处理器
///
/// - 不持有分片，分片由调用方传入并原地修改
/// - 不关心执行模式（同进程或工作进程），准入和事件都通过接口完成
pub struct ShardProcessor {
    store: Arc<dyn CheckpointStore>,
    gate: Arc<dyn AdmissionGate>,
    sink: Arc<dyn ProgressSink>,
    settings: ProcessorSettings,
}

impl ShardProcessor {
    /// 创建新的分片处理器
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        gate: Arc<dyn AdmissionGate>,
        sink: Arc<dyn ProgressSink>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            gate,
            sink,
            settings,
        }
    }

    /// 处理单个分片
    ///
    /// # 返回
    /// 正常结束返回 `Ok(())`，分片状态为 `completed`；
    /// 错误率超限等分片级错误返回 `Err`，分片状态为 `failed`
    pub async fn process(&self, shard: &mut Shard, executor: &dyn WorkflowExecutor) -> Result<(), ShardError> {
        if !shard.status.is_active() {
            shard.status = ShardStatus::Running;
        }
        shard.start_time.get_or_insert_with(Utc::now);
        shard.end_time = None;

        let total = shard.len();
        let start_index = self.resume_point(shard).await;
        shard.update_progress(start_index);

        if start_index > 0 {
            info!(
                "[分片 {}] ↩️ 从检查点恢复，跳过前 {} 个条目",
                shard.index, start_index
            );
        }

        let mut successes_since_checkpoint = 0;

        for index in start_index..total {
            self.gate.admit().await.map_err(|e| {
                shard.status = ShardStatus::Failed;
                shard.end_time = Some(Utc::now());
                e
            })?;

            match self.attempt(executor, index, &shard.items[index]).await {
                Ok(()) => {
                    shard.processed_count += 1;
                    shard.update_progress(index + 1);
                    self.gate.record_success().await;

                    debug!("[分片 {}] ✓ 条目 {} 完成", shard.index, shard.items[index].id);
                    self.sink.emit(ProgressEvent::ItemSucceeded {
                        shard_id: shard.id.clone(),
                        item_id: shard.items[index].id.clone(),
                        processed_count: shard.processed_count,
                        progress: shard.progress,
                    });

                    successes_since_checkpoint += 1;
                    if successes_since_checkpoint >= self.settings.checkpoint_interval {
                        self.checkpoint(shard, index + 1).await?;
                        successes_since_checkpoint = 0;
                    }
                }
                Err(record) => {
                    // 本次失败会越过阈值时，先把检查点停在这个条目上，重试时会再次尝试它
                    let crosses = (shard.error_count + 1) as f64 / total as f64 > self.settings.error_threshold;
                    let saved = if crosses {
                        self.checkpoint(shard, index).await
                    } else {
                        Ok(())
                    };

                    shard.error_count += 1;
                    shard.update_progress(index + 1);
                    self.gate.record_failure().await;

                    warn!(
                        "[分片 {}] ❌ 条目 {} 失败 ({}): {}",
                        shard.index,
                        record.item_id,
                        record.kind.tag(),
                        truncate_text(&record.message, 120)
                    );
                    shard.errors.push(record.clone());
                    self.sink.emit(ProgressEvent::ItemFailed {
                        shard_id: shard.id.clone(),
                        error: record,
                        error_count: shard.error_count,
                        progress: shard.progress,
                    });

                    if crosses {
                        return Err(self.abort(shard, saved));
                    }
                }
            }
        }

        self.checkpoint(shard, total).await?;
        shard.status = ShardStatus::Completed;
        shard.progress = 100.0;
        shard.end_time = Some(Utc::now());

        info!(
            "[分片 {}] ✅ 完成: 成功 {}, 失败 {}, 共 {}",
            shard.index, shard.processed_count, shard.error_count, total
        );
        Ok(())
    }

    /// 读取检查点确定起始下标
    ///
    /// 计数总是回到检查点记录的值，检查点之后的条目会重新执行，不能重复计数。
    async fn resume_point(&self, shard: &mut Shard) -> usize {
        match self.store.load(&shard.id).await {
            Some(checkpoint) => shard.rewind(
                checkpoint.last_processed_index,
                checkpoint.processed_count,
                checkpoint.error_count,
            ),
            None => shard.rewind(0, 0, 0),
        }
    }

    /// 执行单个条目，带超时
    async fn attempt(
        &self,
        executor: &dyn WorkflowExecutor,
        index: usize,
        item: &WorkItem,
    ) -> Result<(), ItemErrorRecord> {
        let call = AssertUnwindSafe(executor.execute(item)).catch_unwind();

        let (kind, message) = match timeout(self.settings.item_timeout, call).await {
            Ok(Ok(Ok(()))) => return Ok(()),
            Ok(Ok(Err(e))) => (ItemErrorKind::Execution, format!("{:#}", e)),
            Ok(Err(_)) => (ItemErrorKind::Execution, "执行器发生 panic".to_string()),
            Err(_) => (
                ItemErrorKind::Timeout,
                format!("超过 {}ms 未完成", self.settings.item_timeout.as_millis()),
            ),
        };

        Err(ItemErrorRecord {
            item_id: item.id.clone(),
            index,
            message,
            timestamp: Utc::now(),
            kind,
        })
    }

    /// 错误率超限：标记失败
    ///
    /// `saved` 是越过阈值前写入的最终检查点的结果。
    fn abort(&self, shard: &mut Shard, saved: Result<(), ShardError>) -> ShardError {
        shard.status = ShardStatus::Failed;
        shard.end_time = Some(Utc::now());

        if let Err(e) = saved {
            return e;
        }

        error!(
            "[分片 {}] 🛑 错误率 {:.1}% 超过阈值 {:.1}%，终止本分片",
            shard.index,
            shard.error_rate() * 100.0,
            self.settings.error_threshold * 100.0
        );
        ShardError::Abort {
            shard_id: shard.id.clone(),
            error_count: shard.error_count,
            total: shard.len(),
            threshold: self.settings.error_threshold,
        }
    }

    /// 保存检查点，失败时按策略处理
    async fn checkpoint(&self, shard: &mut Shard, last_processed_index: usize) -> Result<(), ShardError> {
        match self.store.save(shard, last_processed_index).await {
            Ok(_) => {
                self.sink.emit(ProgressEvent::CheckpointSaved {
                    shard_id: shard.id.clone(),
                    last_processed_index,
                });
                Ok(())
            }
            Err(e) => match self.settings.checkpoint_policy {
                CheckpointFailurePolicy::BestEffort => {
                    warn!(
                        "[分片 {}] ⚠️ 检查点保存失败，继续处理: {}",
                        shard.index, e
                    );
                    Ok(())
                }
                CheckpointFailurePolicy::FailFast => {
                    error!("[分片 {}] 🛑 检查点保存失败: {}", shard.index, e);
                    shard.status = ShardStatus::Failed;
                    shard.end_time = Some(Utc::now());
                    Err(ShardError::CheckpointIo {
                        shard_id: shard.id.clone(),
                        message: e.to_string(),
                    })
                }
            },
        }
    }
}
