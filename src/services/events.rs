//! 进度事件 - 服务层
//!
//! 分片处理器只负责发出带类型的事件，不关心谁在消费；
//! 报告任务和外部监控都通过 `ProgressSink` 接收。

use crate::models::ItemErrorRecord;
use crate::infrastructure::ShardSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// 进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 分片被派发执行
    ShardStarted {
        shard_id: String,
        total_items: usize,
        retry_count: u32,
    },
    /// 条目成功（`profile:success`）
    ItemSucceeded {
        shard_id: String,
        item_id: String,
        processed_count: usize,
        progress: f64,
    },
    /// 条目失败（`profile:error`）
    ItemFailed {
        shard_id: String,
        error: ItemErrorRecord,
        error_count: usize,
        progress: f64,
    },
    CheckpointSaved {
        shard_id: String,
        last_processed_index: usize,
    },
    /// 分片到达 completed 或 failed
    ShardFinished {
        snapshot: ShardSnapshot,
        retry_count: u32,
    },
}

impl ProgressEvent {
    pub fn shard_id(&self) -> &str {
        match self {
            ProgressEvent::ShardStarted { shard_id, .. }
            | ProgressEvent::ItemSucceeded { shard_id, .. }
            | ProgressEvent::ItemFailed { shard_id, .. }
            | ProgressEvent::CheckpointSaved { shard_id, .. } => shard_id,
            ProgressEvent::ShardFinished { snapshot, .. } => &snapshot.id,
        }
    }
}

/// 进度事件接收方
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // 接收方已退出时丢弃事件，事件不影响正确性
        let _ = self.send(event);
    }
}

/// 丢弃所有事件
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// 把事件同时分发给多个接收方
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: ProgressEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
