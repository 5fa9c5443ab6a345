use crate::entry::LogEntry;
use std::sync::Arc;

/// Which branch of the merge produced the new sequence.
///
/// Only [`MergePath::Resort`] does more than linear work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePath {
    /// The sequence was empty; the batch became the sequence.
    Initial,
    /// Empty batch. Nothing changed.
    Unchanged,
    /// Every retained entry had expired; the batch replaced them.
    Replaced,
    /// Every batch entry had expired; only the purge was applied.
    Purged,
    /// The batch was strictly newer and went on top.
    Prepend,
    /// The batch was strictly older and went underneath.
    Append,
    /// The ranges overlapped and the combined sequence was re-sorted.
    Resort,
}

/// The materialized logbook view, newest entry first.
///
/// Entries live behind an `Arc` so snapshots handed to readers are cheap and
/// can never observe a merge in progress.
#[derive(Debug, Clone, Default)]
pub struct MaterializedSequence {
    entries: Arc<Vec<LogEntry>>,
}

impl MaterializedSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries in any order.
    #[cfg(test)]
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            entries: Arc::new(normalize_descending(entries)),
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Arc<Vec<LogEntry>> {
        Arc::clone(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge a newest-first batch, dropping everything at or before
    /// `purge_boundary`.
    ///
    /// Both sides are already sorted, so the common cases (batch entirely
    /// newer or entirely older than what is retained) are plain
    /// concatenations. Only overlapping ranges fall back to a sort.
    pub fn merge(&mut self, batch: Vec<LogEntry>, purge_boundary: Option<f64>) -> MergePath {
        if self.entries.is_empty() {
            let mut batch = batch;
            batch.truncate(retained_len(&batch, purge_boundary));
            self.entries = Arc::new(batch);
            return MergePath::Initial;
        }

        // Empty pushes are a "caught up" signal only.
        if batch.is_empty() {
            return MergePath::Unchanged;
        }

        let mut batch = batch;
        batch.truncate(retained_len(&batch, purge_boundary));

        let keep = retained_len(&self.entries, purge_boundary);
        let mut current = Arc::unwrap_or_clone(std::mem::take(&mut self.entries));
        current.truncate(keep);

        let (merged, path) = if current.is_empty() {
            (batch, MergePath::Replaced)
        } else if batch.is_empty() {
            (current, MergePath::Purged)
        } else if oldest(&batch) > newest(&current) {
            let mut merged = batch;
            merged.extend(current);
            (merged, MergePath::Prepend)
        } else if oldest(&current) > newest(&batch) {
            current.extend(batch);
            (current, MergePath::Append)
        } else {
            current.extend(batch);
            sort_descending(&mut current);
            (current, MergePath::Resort)
        };

        self.entries = Arc::new(merged);
        path
    }
}

/// Turn a transport batch (oldest first) into a newest-first one.
///
/// Reversal is enough for a well-behaved transport; anything still out of
/// order afterwards gets a stable sort.
pub fn newest_first(mut batch: Vec<LogEntry>) -> Vec<LogEntry> {
    batch.reverse();
    if !is_descending(&batch) {
        sort_descending(&mut batch);
    }
    batch
}

/// Accept entries in ascending or descending order and return them descending.
pub fn normalize_descending(entries: Vec<LogEntry>) -> Vec<LogEntry> {
    if is_descending(&entries) {
        entries
    } else {
        newest_first(entries)
    }
}

pub fn is_descending(entries: &[LogEntry]) -> bool {
    entries.windows(2).all(|pair| pair[0].when >= pair[1].when)
}

fn sort_descending(entries: &mut [LogEntry]) {
    entries.sort_by(|a, b| b.when.total_cmp(&a.when));
}

/// Length of the prefix of a descending slice that is strictly newer than
/// the boundary.
fn retained_len(entries: &[LogEntry], purge_boundary: Option<f64>) -> usize {
    match purge_boundary {
        Some(boundary) => entries.partition_point(|e| e.when > boundary),
        None => entries.len(),
    }
}

fn newest(entries: &[LogEntry]) -> f64 {
    entries[0].when
}

fn oldest(entries: &[LogEntry]) -> f64 {
    entries[entries.len() - 1].when
}
