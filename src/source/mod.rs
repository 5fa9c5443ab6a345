pub mod jsonl;
pub mod tail;

pub use jsonl::{parse_matching, JsonLinesSource};
pub use tail::FileTail;
