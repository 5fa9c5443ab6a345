use crate::subscription::filter::Filter;
use crate::subscription::transport::{
    BatchSink, LogbookTransport, StreamBatch, TransportError, Unsubscribe,
};
use crate::window::TimeWindow;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("failed to open subscription: {0}")]
    Open(#[source] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened(u64),
    /// A subscription was already active; nothing was done.
    AlreadyActive(u64),
}

struct ActiveSubscription {
    id: u64,
    handle: Box<dyn Unsubscribe>,
}

/// Owns the single live subscription.
///
/// At most one subscription is open at a time. `close` always leaves the
/// manager ready for the next `open`, even when the transport fails to
/// unsubscribe.
pub struct SubscriptionManager {
    transport: Arc<dyn LogbookTransport>,
    batch_tx: mpsc::Sender<StreamBatch>,
    active: Option<ActiveSubscription>,
    next_id: u64,
    opened: u64,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn LogbookTransport>, batch_tx: mpsc::Sender<StreamBatch>) -> Self {
        Self {
            transport,
            batch_tx,
            active: None,
            next_id: 1,
            opened: 0,
        }
    }

    pub async fn open(
        &mut self,
        window: &TimeWindow,
        filter: &Filter,
    ) -> Result<OpenOutcome, SubscriptionError> {
        if let Some(active) = &self.active {
            debug!(subscription_id = active.id, "Subscription already active");
            return Ok(OpenOutcome::AlreadyActive(active.id));
        }

        let id = self.next_id;
        self.next_id += 1;
        let sink = BatchSink::new(id, self.batch_tx.clone());

        match self.transport.subscribe(window, filter, sink).await {
            Ok(handle) => {
                info!(
                    subscription_id = id,
                    start = %window.start_time,
                    end = %window.end_time,
                    "Opened logbook subscription"
                );
                self.active = Some(ActiveSubscription { id, handle });
                self.opened += 1;
                Ok(OpenOutcome::Opened(id))
            }
            Err(e) => {
                error!(subscription_id = id, error = %e, "Failed to open subscription");
                Err(SubscriptionError::Open(e))
            }
        }
    }

    /// Close the active subscription, if any.
    ///
    /// Transport errors are logged and swallowed.
    pub async fn close(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        match active.handle.unsubscribe().await {
            Ok(()) => debug!(subscription_id = active.id, "Closed logbook subscription"),
            Err(e) => error!(
                subscription_id = active.id,
                error = %e,
                "Error unsubscribing"
            ),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_id(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Whether a batch stamped with `subscription_id` belongs to the
    /// currently open subscription.
    pub fn accepts(&self, subscription_id: u64) -> bool {
        self.active_id() == Some(subscription_id)
    }

    /// Total number of subscriptions successfully opened.
    pub fn opened_count(&self) -> u64 {
        self.opened
    }
}
