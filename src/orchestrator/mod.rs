//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责分片调度、重试和整次运行的资源管理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `run` - 批处理运行器
//! - 管理运行生命周期（初始化、运行、报告）
//! - 持有检查点存储、熔断器和报告任务
//!
//! ### `controller` - 并发控制器
//! - 保证同时运行的分片数不超过 `max_concurrent`
//! - 隔离分片失败
//!
//! ### `retry` - 重试协调器
//! - 第一轮结束后重试失败分片
//!
//! ### `runner` / `isolation` - 执行策略
//! - 同进程执行或每个分片一个工作进程
//!
//! ## 层次关系
//!
//! ```text
//! run::Orchestrator (处理 Vec<WorkItem>)
//!     ↓
//! controller / retry (处理 Vec<Shard>)
//!     ↓
//! runner / isolation (处理单个 Shard)
//!     ↓
//! workflow::ShardProcessor (逐个条目)
//!     ↓
//! infrastructure (检查点存储、熔断器)
//! ```

pub mod controller;
pub mod isolation;
pub mod retry;
pub mod run;
pub mod runner;

// 重新导出主要类型
pub use controller::{ConcurrencyController, PassOutcome};
pub use isolation::{run_worker, ProcessRunner, WORKER_ARG};
pub use retry::RetryCoordinator;
pub use run::Orchestrator;
pub use runner::{InProcessRunner, ShardRun, ShardRunner};
