//! 基础设施层
//!
//! 持有跨分片共享或需要持久化的资源：检查点存储与熔断器。

pub mod checkpoint_store;
pub mod circuit_breaker;

pub use checkpoint_store::{
    CheckpointStore, FileCheckpointStore, GlobalSnapshot, MemoryCheckpointStore, ShardSnapshot,
};
pub use circuit_breaker::{AdmissionGate, BreakerState, CircuitBreaker, CircuitBreakerState};
