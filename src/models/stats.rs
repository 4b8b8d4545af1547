//! 全局统计

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单次运行的全局统计
///
/// 只由报告任务持有和修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total: usize,
    /// 成功处理的条目数
    pub processed: usize,
    /// 失败的条目数
    pub failed: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl GlobalStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            failed: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// 已耗时（秒）
    pub fn elapsed_secs(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// 吞吐量（条目/秒）
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed_secs();
        if elapsed > 0.0 {
            self.processed as f64 / elapsed
        } else {
            0.0
        }
    }
}
