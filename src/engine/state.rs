use crate::entry::LogEntry;
use crate::lookup::TraceContexts;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where the logbook view is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// No sequence yet.
    Loading,
    /// A sequence exists; it may be empty.
    Populated,
    /// Opening the feed or fetching history failed.
    Error(String),
    /// Torn down via `stop`.
    Closed,
}

/// Read-only view published on every accepted change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub status: Status,
    pub entries: Option<Arc<Vec<LogEntry>>>,
    pub trace_contexts: Arc<TraceContexts>,
    pub user_names: Arc<HashMap<String, String>>,
    pub live: bool,
    pub pending_batches: usize,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            status: Status::Loading,
            entries: None,
            trace_contexts: Arc::new(TraceContexts::new()),
            user_names: Arc::new(HashMap::new()),
            live: true,
            pending_batches: 0,
        }
    }
}

impl Snapshot {
    pub fn is_loading(&self) -> bool {
        self.status == Status::Loading
    }

    /// The entries, or an empty slice while loading.
    pub fn entries(&self) -> &[LogEntry] {
        self.entries.as_deref().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Populated with a definitive "nothing matched".
    pub fn is_empty_result(&self) -> bool {
        self.status == Status::Populated && self.entries().is_empty()
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            Status::Error(detail) => Some(detail),
            _ => None,
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Status::Loading => write!(f, "Loading logbook entries"),
            Status::Closed => write!(f, "Logbook closed"),
            Status::Error(detail) => write!(f, "Error retrieving logbook entries: {}", detail),
            Status::Populated if self.entries().is_empty() => write!(f, "No logbook entries found"),
            Status::Populated => write!(f, "{} logbook entries", self.entries().len()),
        }
    }
}
