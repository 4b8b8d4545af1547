//! # Batch Shard Runner
//!
//! 一个可恢复的分片批处理器：把大量独立条目切成分片并发处理，
//! 支持断点续跑、错误阈值、熔断和分片级重试
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有需要共享或持久化的资源
//! - `CheckpointStore` - 分片检查点、全局快照和最终报告
//! - `CircuitBreaker` - 整次运行共享的熔断器
//!
//! ### ② 服务层（Services）
//! - `services/` - 进度事件和报告任务
//! - `Reporter` - 唯一持有全局统计，定期输出进度
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个分片"的完整处理流程
//! - `WorkflowExecutor` - 单条目执行器
//! - `ShardProcessor` - 续跑、准入、超时、检查点、错误阈值
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/run` - 整次运行，管理资源和最终报告
//! - `orchestrator/controller` - 并发控制
//! - `orchestrator/retry` - 分片重试
//! - `orchestrator/isolation` - 工作进程隔离
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{CheckpointFailurePolicy, Config, IsolationMode};
pub use error::{AppError, AppResult, ShardError};
pub use infrastructure::{CheckpointStore, CircuitBreaker, FileCheckpointStore, MemoryCheckpointStore};
pub use models::{RunReport, Shard, ShardStatus, WorkItem};
pub use orchestrator::{run_worker, Orchestrator};
pub use planner::create_shards;
pub use services::{ProgressEvent, ProgressSink};
pub use workflow::{executor_fn, CommandExecutor, WorkflowExecutor};
