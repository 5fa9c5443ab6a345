use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Run it now.
    Fire,
    /// Too soon; a trailing call is now scheduled for the given instant.
    Deferred(Instant),
    /// Too soon, and a trailing call was already scheduled.
    AlreadyPending,
}

/// Rate limiter for side effects: at most one call per `interval`.
///
/// The first call fires immediately. Calls inside the interval collapse into
/// a single trailing call at the end of it. The throttle never runs anything
/// itself; the owner polls [`Throttle::deadline`] and [`Throttle::poll_due`].
#[derive(Debug, Clone)]
pub struct Throttle {
    name: &'static str,
    interval: Duration,
    last_fired: Option<Instant>,
    trailing: Option<Instant>,
}

impl Throttle {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            last_fired: None,
            trailing: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn call(&mut self, now: Instant) -> ThrottleDecision {
        match self.last_fired {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                if self.trailing.is_some() {
                    ThrottleDecision::AlreadyPending
                } else {
                    let at = last + self.interval;
                    self.trailing = Some(at);
                    ThrottleDecision::Deferred(at)
                }
            }
            _ => {
                self.trailing = None;
                self.last_fired = Some(now);
                ThrottleDecision::Fire
            }
        }
    }

    /// When the scheduled trailing call is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.trailing
    }

    /// Consume the trailing call if it is due.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match self.trailing {
            Some(at) if now >= at => {
                self.trailing = None;
                self.last_fired = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Drop any scheduled call and forget the last firing, so the next call
    /// fires immediately.
    pub fn cancel(&mut self) {
        self.trailing = None;
        self.last_fired = None;
    }
}
