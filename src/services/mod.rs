pub mod events;
pub mod reporter;

pub use events::{FanoutSink, NullSink, ProgressEvent, ProgressSink};
pub use reporter::{progress_snapshot, ProgressSnapshot, Reporter, ReporterHandle, ShardProgress};
