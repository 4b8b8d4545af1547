pub mod executor;
pub mod shard_processor;

pub use executor::{executor_fn, CommandExecutor, FnExecutor, WorkflowExecutor};
pub use shard_processor::{ProcessorSettings, ShardProcessor};
