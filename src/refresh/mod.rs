pub mod throttle;

pub use throttle::{Throttle, ThrottleDecision};

use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Side effects the engine rate-limits independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTask {
    /// Resubscribe and fetch history.
    Load,
    Users,
    TraceContexts,
}

/// The three throttles behind refreshes and auxiliary lookups.
#[derive(Debug, Clone)]
pub struct RefreshThrottles {
    pub load: Throttle,
    pub users: Throttle,
    pub trace_contexts: Throttle,
}

impl RefreshThrottles {
    pub fn new(load_interval: Duration, auxiliary_interval: Duration) -> Self {
        Self {
            load: Throttle::new("load", load_interval),
            users: Throttle::new("users", auxiliary_interval),
            trace_contexts: Throttle::new("trace_contexts", auxiliary_interval),
        }
    }

    pub fn cancel_all(&mut self) {
        self.load.cancel();
        self.users.cancel();
        self.trace_contexts.cancel();
    }

    /// The earliest scheduled trailing call across all throttles.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.load.deadline(),
            self.users.deadline(),
            self.trace_contexts.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Collect every task whose trailing call is due.
    pub fn take_due(&mut self, now: Instant) -> Vec<RefreshTask> {
        [
            (&mut self.load, RefreshTask::Load),
            (&mut self.users, RefreshTask::Users),
            (&mut self.trace_contexts, RefreshTask::TraceContexts),
        ]
        .into_iter()
        .filter_map(|(throttle, task)| {
            throttle.poll_due(now).then(|| {
                trace!(throttle = throttle.name(), "Trailing call due");
                task
            })
        })
        .collect()
    }
}
