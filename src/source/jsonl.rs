use crate::config::types::SourceConfig;
use crate::entry::LogEntry;
use crate::lookup::{AuxiliarySource, Person, TraceContexts, User};
use crate::source::tail::FileTail;
use crate::subscription::{BatchSink, Filter, LogbookTransport, TransportError, Unsubscribe};
use crate::window::TimeWindow;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Logbook backed by a JSON-lines event file plus optional JSON lookup files.
///
/// Every line of the event file is one [`LogEntry`]. History is answered by
/// scanning the file; live updates come from tailing it.
///
/// Backfill and live feed are split by byte offset, not by timestamp. A
/// subscription records how far it read; the next `fetch` stops there and
/// the follower takes every later line in the whole window. Lines appended
/// late with an old `when` therefore still arrive, exactly once.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    poll_interval: Duration,
    backfill_cut: Arc<Mutex<Option<u64>>>,
    persons: Option<PathBuf>,
    users: Option<PathBuf>,
    traces: Option<PathBuf>,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(250),
            backfill_cut: Arc::default(),
            persons: None,
            users: None,
            traces: None,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            path: config.path.clone(),
            poll_interval: config.poll_interval,
            backfill_cut: Arc::default(),
            persons: config.persons.clone(),
            users: config.users.clone(),
            traces: config.traces.clone(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_persons(mut self, path: impl Into<PathBuf>) -> Self {
        self.persons = Some(path.into());
        self
    }

    pub fn with_users(mut self, path: impl Into<PathBuf>) -> Self {
        self.users = Some(path.into());
        self
    }

    pub fn with_traces(mut self, path: impl Into<PathBuf>) -> Self {
        self.traces = Some(path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the event file. A missing file reads as empty.
    async fn read_events(&self) -> Result<Vec<u8>, TransportError> {
        match tokio::fs::read(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Event file does not exist yet");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_backfill_cut(&self, offset: u64) {
        *self.backfill_cut.lock().unwrap_or_else(PoisonError::into_inner) = Some(offset);
    }

    fn take_backfill_cut(&self) -> Option<u64> {
        self.backfill_cut
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Length of `content` up to and including its last newline.
fn complete_prefix(content: &[u8]) -> usize {
    content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1)
}

/// Parse lines into entries inside `window` that pass `filter`, oldest first.
///
/// Malformed lines are logged and skipped.
pub fn parse_matching<'a, I>(lines: I, window: &TimeWindow, filter: &Filter) -> Vec<LogEntry>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut entries: Vec<LogEntry> = lines
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping malformed event line");
                None
            }
        })
        .filter(|entry| window.contains(entry.when) && filter.matches(entry))
        .collect();

    entries.sort_by(|a, b| a.when.total_cmp(&b.when));
    entries
}

#[async_trait]
impl LogbookTransport for JsonLinesSource {
    async fn fetch(
        &self,
        window: &TimeWindow,
        filter: &Filter,
    ) -> Result<Vec<LogEntry>, TransportError> {
        let content = self.read_events().await?;
        let end = match self.take_backfill_cut() {
            Some(cut) => content.len().min(cut as usize),
            None => content.len(),
        };
        let text = String::from_utf8_lossy(&content[..end]);
        let entries = parse_matching(text.lines(), window, filter);
        debug!(
            path = %self.path.display(),
            bytes = end,
            entries = entries.len(),
            "Fetched history"
        );
        Ok(entries)
    }

    async fn subscribe(
        &self,
        window: &TimeWindow,
        filter: &Filter,
        sink: BatchSink,
    ) -> Result<Box<dyn Unsubscribe>, TransportError> {
        // Lines already on disk are split by `when`: the live half goes out as
        // the first batch and the rest is left to the next fetch. The tail
        // picks up after the last complete line and covers the whole window.
        let content = self.read_events().await?;
        let consumed = complete_prefix(&content);
        let text = String::from_utf8_lossy(&content[..consumed]);
        let (_, live) = window.split_at_now();
        let initial = parse_matching(text.lines(), &live, filter);
        let tail = FileTail::starting_at(&self.path, consumed as u64).await?;
        self.set_backfill_cut(consumed as u64);

        let cancel = CancellationToken::new();
        let follower = Follower {
            tail,
            window: *window,
            filter: filter.clone(),
            sink,
            poll_interval: self.poll_interval,
            cancel: cancel.clone(),
        };

        info!(
            path = %self.path.display(),
            subscription_id = follower.sink.subscription_id(),
            "Following event file"
        );
        let task = tokio::spawn(follower.run(initial));

        Ok(Box::new(TailSubscription {
            cancel,
            task: Some(task),
        }))
    }
}

#[async_trait]
impl AuxiliarySource for JsonLinesSource {
    async fn load_trace_contexts(&self) -> Result<TraceContexts, TransportError> {
        load_json_or_default(self.traces.as_deref()).await
    }

    async fn load_persons(&self) -> Result<Vec<Person>, TransportError> {
        load_json_or_default(self.persons.as_deref()).await
    }

    async fn load_users(&self) -> Result<Vec<User>, TransportError> {
        load_json_or_default(self.users.as_deref()).await
    }
}

async fn load_json_or_default<T>(path: Option<&Path>) -> Result<T, TransportError>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };

    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Lookup file missing");
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}

struct Follower {
    tail: FileTail,
    window: TimeWindow,
    filter: Filter,
    sink: BatchSink,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Follower {
    async fn run(mut self, initial: Vec<LogEntry>) {
        if !initial.is_empty() && !self.deliver(initial).await {
            return;
        }

        loop {
            if self.sink.is_closed() {
                debug!("Engine dropped the batch channel");
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let lines = match self.tail.poll().await {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(path = %self.tail.path().display(), error = %e, "Failed to read event file");
                    continue;
                }
            };

            let entries = parse_matching(lines.iter().map(String::as_str), &self.window, &self.filter);
            if !entries.is_empty() && !self.deliver(entries).await {
                break;
            }
        }

        debug!(
            subscription_id = self.sink.subscription_id(),
            offset = self.tail.offset(),
            "Stopped following event file"
        );
    }

    /// Send one batch. Returns false once the follower should stop.
    async fn deliver(&self, entries: Vec<LogEntry>) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            result = self.sink.send(entries) => match result {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Batch receiver gone");
                    false
                }
            },
        }
    }
}

struct TailSubscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Unsubscribe for TailSubscription {
    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

impl Drop for TailSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
