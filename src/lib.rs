pub mod cli;
pub mod config;
pub mod engine;
pub mod entry;
pub mod lookup;
pub mod refresh;
pub mod sequencer;
pub mod source;
pub mod subscription;
pub mod window;

pub use engine::{LogbookEngine, LogbookHandle, Snapshot, Status};
pub use entry::LogEntry;
pub use subscription::Filter;
pub use window::{TimeSpec, TimeWindow};
