pub mod handle;
pub mod runner;
pub mod state;

pub use handle::{Command, EngineError, LogbookHandle};
pub use runner::{EngineConfig, LogbookEngine};
pub use state::{Snapshot, Status};
