//! 分片执行策略
//!
//! 并发控制器只依赖 `ShardRunner`，不关心分片是在本进程内执行还是交给子进程。

use crate::error::ShardError;
use crate::models::Shard;
use crate::workflow::{ShardProcessor, WorkflowExecutor};
use async_trait::async_trait;
use std::sync::Arc;

/// 一次分片执行的结果
///
/// 无论成败都带回分片本身，供后续重试和报告使用。
#[derive(Debug)]
pub struct ShardRun {
    pub shard: Shard,
    pub outcome: Result<(), ShardError>,
}

/// 分片执行策略
#[async_trait]
pub trait ShardRunner: Send + Sync {
    async fn run(&self, shard: Shard) -> ShardRun;
}

/// 同进程执行：所有分片共享同一个熔断器和事件通道
pub struct InProcessRunner {
    processor: ShardProcessor,
    executor: Arc<dyn WorkflowExecutor>,
}

impl InProcessRunner {
    pub fn new(processor: ShardProcessor, executor: Arc<dyn WorkflowExecutor>) -> Self {
        Self { processor, executor }
    }
}

#[async_trait]
impl ShardRunner for InProcessRunner {
    async fn run(&self, mut shard: Shard) -> ShardRun {
        let outcome = self.processor.process(&mut shard, self.executor.as_ref()).await;
        ShardRun { shard, outcome }
    }
}
