pub mod merge;
pub mod pending;

pub use merge::{newest_first, normalize_descending, MaterializedSequence, MergePath};
pub use pending::{LivePauseBuffer, PendingQueue, PendingStats};
