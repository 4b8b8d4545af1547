//! 检查点数据模型

use crate::models::shard::Shard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 分片进度检查点
///
/// `last_processed_index` 表示 `[0, last_processed_index)` 内的条目都已处理完毕。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub shard_id: String,
    pub last_processed_index: usize,
    pub processed_count: usize,
    pub error_count: usize,
    pub timestamp: DateTime<Utc>,
    pub progress: f64,
}

impl Checkpoint {
    /// 从分片当前状态生成检查点
    pub fn from_shard(shard: &Shard, last_processed_index: usize) -> Self {
        Self {
            shard_id: shard.id.clone(),
            last_processed_index,
            processed_count: shard.processed_count,
            error_count: shard.error_count,
            timestamp: Utc::now(),
            progress: shard.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItem;

    #[test]
    fn test_serializes_with_camel_case_keys() {
        let mut shard = Shard::new(0, vec![WorkItem::new("a"), WorkItem::new("b")]);
        shard.processed_count = 1;
        shard.update_progress(1);

        let value = serde_json::to_value(Checkpoint::from_shard(&shard, 1)).unwrap();
        assert_eq!(value["shardId"], "shard_0");
        assert_eq!(value["lastProcessedIndex"], 1);
        assert_eq!(value["processedCount"], 1);
        assert_eq!(value["progress"], 50.0);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}
