//! 运行报告

use crate::error::ItemErrorKind;
use crate::models::shard::{Shard, ShardStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    /// 秒
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardReport {
    pub id: String,
    pub index: usize,
    pub status: ShardStatus,
    pub progress: f64,
    pub total_items: usize,
    pub processed_count: usize,
    pub error_count: usize,
    pub error_rate: f64,
    pub retry_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&Shard> for ShardReport {
    fn from(shard: &Shard) -> Self {
        Self {
            id: shard.id.clone(),
            index: shard.index,
            status: shard.status,
            progress: shard.progress,
            total_items: shard.len(),
            processed_count: shard.processed_count,
            error_count: shard.error_count,
            error_rate: shard.error_rate(),
            retry_count: shard.retry_count,
            start_time: shard.start_time,
            end_time: shard.end_time,
        }
    }
}

/// 展平后的失败条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedProfile {
    pub shard_id: String,
    pub item_id: String,
    pub message: String,
    pub kind: ItemErrorKind,
    pub timestamp: DateTime<Utc>,
}

/// 最终报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub summary: ReportSummary,
    pub shards: Vec<ShardReport>,
    pub failed_profiles: Vec<FailedProfile>,
    /// 重试耗尽后仍失败的分片
    pub failed_shards: Vec<String>,
    pub checkpoint_location: String,
    /// fail_fast 策略下停止派发的原因
    pub halted: Option<String>,
}

impl RunReport {
    /// 由最终的分片状态生成报告，计数以分片为准
    pub fn from_shards(
        shards: &[Shard],
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        checkpoint_location: String,
        halted: Option<String>,
    ) -> Self {
        let summary = ReportSummary {
            total: shards.iter().map(Shard::len).sum(),
            processed: shards.iter().map(|s| s.processed_count).sum(),
            failed: shards.iter().map(|s| s.error_count).sum(),
            duration: (finished_at - started_at).num_milliseconds().max(0) as f64 / 1000.0,
        };

        let failed_profiles = shards
            .iter()
            .flat_map(|shard| {
                shard.errors.iter().map(move |e| FailedProfile {
                    shard_id: shard.id.clone(),
                    item_id: e.item_id.clone(),
                    message: e.message.clone(),
                    kind: e.kind,
                    timestamp: e.timestamp,
                })
            })
            .collect();

        Self {
            summary,
            shards: shards.iter().map(ShardReport::from).collect(),
            failed_profiles,
            failed_shards: shards
                .iter()
                .filter(|s| s.status == ShardStatus::Failed)
                .map(|s| s.id.clone())
                .collect(),
            checkpoint_location,
            halted,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed_shards.is_empty() && self.failed_profiles.is_empty() && self.halted.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemErrorRecord, WorkItem};

    #[test]
    fn test_report_flattens_errors_and_lists_failed_shards() {
        let mut ok = Shard::new(0, vec![WorkItem::new("a"), WorkItem::new("b")]);
        ok.status = ShardStatus::Completed;
        ok.processed_count = 2;

        let mut bad = Shard::new(1, vec![WorkItem::new("c"), WorkItem::new("d")]);
        bad.status = ShardStatus::Failed;
        bad.error_count = 2;
        for (index, id) in ["c", "d"].into_iter().enumerate() {
            bad.errors.push(ItemErrorRecord {
                item_id: id.to_string(),
                index,
                message: "拒绝".to_string(),
                timestamp: Utc::now(),
                kind: ItemErrorKind::Execution,
            });
        }

        let now = Utc::now();
        let report = RunReport::from_shards(&[ok, bad], now, now, "./checkpoints".into(), None);

        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.processed, 2);
        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.failed_shards, vec!["shard_1".to_string()]);
        assert_eq!(report.failed_profiles.len(), 2);
        assert_eq!(report.failed_profiles[1].item_id, "d");
        assert!(!report.is_clean());

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("failedProfiles").is_some());
        assert_eq!(value["checkpointLocation"], "./checkpoints");
    }
}
