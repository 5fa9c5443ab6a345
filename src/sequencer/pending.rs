use crate::entry::LogEntry;
use std::collections::VecDeque;

/// Raw batches held back while the consumer cannot absorb a reorder.
#[derive(Debug, Default)]
pub struct PendingQueue {
    batches: VecDeque<Vec<LogEntry>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch: Vec<LogEntry>) {
        self.batches.push_back(batch);
    }

    /// Remove every queued batch in arrival order.
    pub fn drain(&mut self) -> Vec<Vec<LogEntry>> {
        self.batches.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn stats(&self) -> PendingStats {
        PendingStats {
            batches: self.batches.len(),
            entries: self.batches.iter().map(Vec::len).sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingStats {
    pub batches: usize,
    pub entries: usize,
}

/// Switches incoming batches between immediate merging and queueing.
///
/// Live by default. While paused, batches are kept verbatim; resuming hands
/// them back in arrival order so the caller can merge them one at a time.
#[derive(Debug)]
pub struct LivePauseBuffer {
    live: bool,
    pending: PendingQueue,
}

impl Default for LivePauseBuffer {
    fn default() -> Self {
        Self {
            live: true,
            pending: PendingQueue::new(),
        }
    }
}

impl LivePauseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Route a batch. Returns it back when it should be merged now.
    pub fn accept(&mut self, batch: Vec<LogEntry>) -> Option<Vec<LogEntry>> {
        if self.live {
            return Some(batch);
        }
        self.pending.push(batch);
        None
    }

    /// Flip the mode. On a paused to live transition, returns the queued
    /// batches that must now be replayed.
    pub fn set_live(&mut self, enable: bool) -> Vec<Vec<LogEntry>> {
        let replay = if enable && !self.live {
            self.pending.drain()
        } else {
            Vec::new()
        };
        self.live = enable;
        replay
    }

    /// Drop anything queued without changing the mode.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::merge::{newest_first, MaterializedSequence};

    fn batch(whens: &[f64]) -> Vec<LogEntry> {
        whens.iter().map(|w| LogEntry::new(*w)).collect()
    }

    #[test]
    fn test_live_passes_through() {
        let mut buffer = LivePauseBuffer::new();
        assert!(buffer.is_live());
        assert_eq!(buffer.accept(batch(&[1.0])), Some(batch(&[1.0])));
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_paused_queues_in_arrival_order() {
        let mut buffer = LivePauseBuffer::new();
        assert!(buffer.set_live(false).is_empty());

        assert_eq!(buffer.accept(batch(&[1.0, 2.0])), None);
        assert_eq!(buffer.accept(batch(&[])), None);
        assert_eq!(buffer.accept(batch(&[3.0])), None);
        assert_eq!(
            buffer.pending().stats(),
            PendingStats {
                batches: 3,
                entries: 3
            }
        );

        let replay = buffer.set_live(true);
        assert_eq!(replay, vec![batch(&[1.0, 2.0]), batch(&[]), batch(&[3.0])]);
        assert!(buffer.pending().is_empty());
        assert!(buffer.is_live());
    }

    #[test]
    fn test_resume_when_already_live_replays_nothing() {
        let mut buffer = LivePauseBuffer::new();
        assert!(buffer.set_live(true).is_empty());
    }

    #[test]
    fn test_clear_keeps_mode() {
        let mut buffer = LivePauseBuffer::new();
        buffer.set_live(false);
        buffer.accept(batch(&[1.0]));
        buffer.clear();

        assert!(!buffer.is_live());
        assert!(buffer.set_live(true).is_empty());
    }

    #[test]
    fn test_pause_resume_matches_live_merging() {
        let incoming = vec![
            batch(&[10.0, 11.0]),
            batch(&[5.0, 12.0]),
            batch(&[13.0, 14.0]),
        ];
        let boundary = Some(4.0);

        let mut live = MaterializedSequence::from_entries(batch(&[9.0, 6.0]));
        for b in incoming.clone() {
            live.merge(newest_first(b), boundary);
        }

        let mut paused = MaterializedSequence::from_entries(batch(&[9.0, 6.0]));
        let mut buffer = LivePauseBuffer::new();
        buffer.set_live(false);
        for b in incoming {
            assert!(buffer.accept(b).is_none());
        }
        for b in buffer.set_live(true) {
            paused.merge(newest_first(b), boundary);
        }

        assert_eq!(paused.entries(), live.entries());
    }
}
