pub mod checkpoint;
pub mod item;
pub mod loaders;
pub mod report;
pub mod shard;
pub mod stats;

pub use checkpoint::Checkpoint;
pub use item::WorkItem;
pub use loaders::load_items_file;
pub use report::{FailedProfile, ReportSummary, RunReport, ShardReport};
pub use shard::{ItemErrorRecord, Shard, ShardStatus};
pub use stats::GlobalStats;
