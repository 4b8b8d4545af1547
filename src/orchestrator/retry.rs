//! 重试协调 - 编排层
//!
//! 第一轮全部结束后，对失败且未用完重试次数的分片再跑一轮，直到没有可重试的分片。
//! 重试从分片自己的检查点继续，复用原来的检查点位置。

use crate::models::{Shard, ShardStatus};
use crate::orchestrator::controller::{ConcurrencyController, PassOutcome};
use crate::utils::logging;
use tracing::{info, warn};

/// 重试协调器
pub struct RetryCoordinator {
    max_retries: u32,
}

impl RetryCoordinator {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// 分片是否还能重试
    pub fn is_eligible(&self, shard: &Shard) -> bool {
        shard.status == ShardStatus::Failed && shard.retry_count < self.max_retries
    }

    /// 反复重试失败分片，直到全部成功或用完重试次数
    pub async fn run(&self, controller: &ConcurrencyController, mut shards: Vec<Shard>) -> PassOutcome {
        let mut round = 0;

        loop {
            let (mut retry, mut settled): (Vec<Shard>, Vec<Shard>) =
                shards.into_iter().partition(|s| self.is_eligible(s));

            if retry.is_empty() {
                for shard in settled.iter().filter(|s| s.status == ShardStatus::Failed) {
                    warn!(
                        "[分片 {}] ⚠️ 已重试 {} 次仍失败，不再尝试",
                        shard.index, shard.retry_count
                    );
                }
                settled.sort_by_key(|s| s.index);
                return PassOutcome {
                    shards: settled,
                    halted: None,
                };
            }

            round += 1;
            logging::log_pass_start(&format!("重试第 {} 轮", round), retry.len());

            for shard in &mut retry {
                shard.retry_count += 1;
                info!(
                    "[分片 {}] 🔁 安排重试 {}/{}",
                    shard.index, shard.retry_count, self.max_retries
                );
            }

            let outcome = controller.run_pass(retry).await;
            settled.extend(outcome.shards);
            settled.sort_by_key(|s| s.index);

            if let Some(halt) = outcome.halted {
                return PassOutcome {
                    shards: settled,
                    halted: Some(halt),
                };
            }

            shards = settled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItem;

    #[test]
    fn test_eligibility() {
        let coordinator = RetryCoordinator::new(2);
        let mut shard = Shard::new(0, vec![WorkItem::new("a")]);

        assert!(!coordinator.is_eligible(&shard));

        shard.status = ShardStatus::Failed;
        assert!(coordinator.is_eligible(&shard));

        shard.retry_count = 2;
        assert!(!coordinator.is_eligible(&shard));

        shard.retry_count = 0;
        shard.status = ShardStatus::Completed;
        assert!(!coordinator.is_eligible(&shard));
    }
}
