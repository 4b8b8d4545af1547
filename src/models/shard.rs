//! 分片数据模型

use crate::error::ItemErrorKind;
use crate::models::item::WorkItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 分片状态
///
/// `pending → running → {completed | failed}`，
/// `failed → retrying → {completed | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl ShardStatus {
    /// 是否正在执行（占用一个并发名额）
    pub fn is_active(&self) -> bool {
        matches!(self, ShardStatus::Running | ShardStatus::Retrying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShardStatus::Pending => "pending",
            ShardStatus::Running => "running",
            ShardStatus::Completed => "completed",
            ShardStatus::Failed => "failed",
            ShardStatus::Retrying => "retrying",
        }
    }
}

/// 条目失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemErrorRecord {
    pub item_id: String,
    /// 条目在分片内的下标
    pub index: usize,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ItemErrorKind,
}

/// 分片
///
/// 条目在规划时分配后不再改变；状态字段由当前持有它的处理器原地修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    pub id: String,
    pub index: usize,
    pub items: Vec<WorkItem>,
    pub status: ShardStatus,
    /// 0-100
    pub progress: f64,
    pub processed_count: usize,
    pub error_count: usize,
    pub errors: Vec<ItemErrorRecord>,
    pub checkpoint_path: Option<PathBuf>,
    pub retry_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Shard {
    /// 创建新的分片，ID 由分片序号决定
    pub fn new(index: usize, items: Vec<WorkItem>) -> Self {
        Self {
            id: Self::id_for(index),
            index,
            items,
            status: ShardStatus::Pending,
            progress: 0.0,
            processed_count: 0,
            error_count: 0,
            errors: Vec::new(),
            checkpoint_path: None,
            retry_count: 0,
            start_time: None,
            end_time: None,
        }
    }

    /// 分片ID只依赖序号，保证重启后检查点仍能对上
    pub fn id_for(index: usize) -> String {
        format!("shard_{}", index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 错误率（相对分片总条目数）
    pub fn error_rate(&self) -> f64 {
        if self.items.is_empty() {
            0.0
        } else {
            self.error_count as f64 / self.items.len() as f64
        }
    }

    /// 回到某个续跑位置
    ///
    /// 计数取该位置记录的值，丢弃该位置及之后的失败记录，返回续跑下标。
    pub fn rewind(&mut self, resume_index: usize, processed_count: usize, error_count: usize) -> usize {
        let resume_index = resume_index.min(self.len());
        self.processed_count = processed_count;
        self.error_count = error_count;
        self.errors.retain(|e| e.index < resume_index);
        self.update_progress(resume_index);
        resume_index
    }

    /// 按已尝试到的位置更新进度
    pub fn update_progress(&mut self, attempted: usize) {
        self.progress = if self.items.is_empty() {
            100.0
        } else {
            attempted as f64 / self.items.len() as f64 * 100.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_of(n: usize) -> Shard {
        Shard::new(2, (0..n).map(|i| WorkItem::new(format!("i{}", i))).collect())
    }

    #[test]
    fn test_new_shard_is_pending() {
        let shard = shard_of(4);
        assert_eq!(shard.id, "shard_2");
        assert_eq!(shard.status, ShardStatus::Pending);
        assert_eq!(shard.processed_count + shard.error_count, 0);
        assert!(!shard.status.is_active());
    }

    #[test]
    fn test_progress_and_error_rate() {
        let mut shard = shard_of(4);
        shard.update_progress(1);
        assert_eq!(shard.progress, 25.0);

        shard.error_count = 1;
        assert_eq!(shard.error_rate(), 0.25);
    }

    #[test]
    fn test_status_classification() {
        assert!(ShardStatus::Retrying.is_active());
        assert!(!ShardStatus::Failed.is_active());
    }

    #[test]
    fn test_rewind_drops_errors_after_resume_point() {
        let mut shard = shard_of(5);
        for index in [1, 3] {
            shard.errors.push(ItemErrorRecord {
                item_id: format!("i{}", index),
                index,
                message: "boom".to_string(),
                timestamp: Utc::now(),
                kind: ItemErrorKind::Execution,
            });
        }
        shard.processed_count = 3;
        shard.error_count = 2;

        let resume = shard.rewind(2, 1, 1);

        assert_eq!(resume, 2);
        assert_eq!(shard.processed_count, 1);
        assert_eq!(shard.error_count, 1);
        assert_eq!(shard.errors.len(), 1);
        assert_eq!(shard.errors[0].index, 1);
        assert_eq!(shard.progress, 40.0);

        assert_eq!(shard.rewind(9, 0, 0), 5);
        assert!(shard.errors.is_empty());
    }
}
