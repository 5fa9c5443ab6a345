use crate::entry::LogEntry;
use crate::subscription::filter::Filter;
use crate::window::TimeWindow;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("transport task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("batch receiver closed")]
    Closed,
}

/// One push delivery from a live subscription.
#[derive(Debug, Clone)]
pub struct StreamBatch {
    pub subscription_id: u64,
    /// Oldest first, as the transport produced them.
    pub entries: Vec<LogEntry>,
}

/// Where a transport delivers batches for one subscription.
///
/// Each sink is stamped with the id of the subscription it was created for,
/// which lets the engine tell a live batch from a straggler of a closed one.
#[derive(Debug, Clone)]
pub struct BatchSink {
    subscription_id: u64,
    tx: mpsc::Sender<StreamBatch>,
}

impl BatchSink {
    pub fn new(subscription_id: u64, tx: mpsc::Sender<StreamBatch>) -> Self {
        Self { subscription_id, tx }
    }

    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    pub async fn send(&self, entries: Vec<LogEntry>) -> Result<(), TransportError> {
        self.tx
            .send(StreamBatch {
                subscription_id: self.subscription_id,
                entries,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle returned by [`LogbookTransport::subscribe`].
#[async_trait]
pub trait Unsubscribe: Send {
    async fn unsubscribe(&mut self) -> Result<(), TransportError>;
}

/// The event source behind the logbook.
#[async_trait]
pub trait LogbookTransport: Send + Sync {
    /// One-shot historical query. Results may be in either order.
    async fn fetch(&self, window: &TimeWindow, filter: &Filter)
        -> Result<Vec<LogEntry>, TransportError>;

    /// Open a push feed for `window`. Batches go to `sink`, oldest entry first.
    ///
    /// The engine follows up with a `fetch` of the history half
    /// (`window.split_at_now().0`). Between them the two calls must deliver
    /// every entry of the window exactly once, including entries that show
    /// up after the subscription opened with a `when` before `window.now`.
    async fn subscribe(
        &self,
        window: &TimeWindow,
        filter: &Filter,
        sink: BatchSink,
    ) -> Result<Box<dyn Unsubscribe>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_stamps_subscription_id() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = BatchSink::new(7, tx);

        sink.send(vec![LogEntry::new(1.0)]).await.unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.subscription_id, 7);
        assert_eq!(batch.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(4);
        let sink = BatchSink::new(1, tx);
        drop(rx);

        assert!(sink.is_closed());
        assert!(matches!(
            sink.send(vec![]).await,
            Err(TransportError::Closed)
        ));
    }
}
