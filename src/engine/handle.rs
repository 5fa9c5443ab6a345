use crate::engine::state::Snapshot;
use crate::subscription::Filter;
use crate::window::TimeSpec;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("logbook engine has stopped")]
    Stopped,
}

/// Requests the engine task acts on, one at a time.
#[derive(Debug, Clone)]
pub enum Command {
    Start,
    Stop,
    Refresh { force: bool },
    SetTime(TimeSpec),
    SetFilter(Filter),
    SetLiveUpdates(bool),
    Shutdown,
}

/// Cloneable front end to a spawned [`LogbookEngine`](crate::engine::LogbookEngine).
#[derive(Debug, Clone)]
pub struct LogbookHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl LogbookHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, snapshots: watch::Receiver<Snapshot>) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Attach: load from a clean state and open the live feed.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.send(Command::Start).await
    }

    /// Detach: close the feed and drop the view.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop).await
    }

    /// Resynchronize. `force` skips the throttle and any pending lookups.
    pub async fn refresh(&self, force: bool) -> Result<(), EngineError> {
        self.send(Command::Refresh { force }).await
    }

    pub async fn set_time(&self, time: TimeSpec) -> Result<(), EngineError> {
        self.send(Command::SetTime(time)).await
    }

    pub async fn set_filter(&self, filter: Filter) -> Result<(), EngineError> {
        self.send(Command::SetFilter(filter)).await
    }

    /// Whether the consumer can currently absorb reordering.
    pub async fn set_live_updates(&self, enable: bool) -> Result<(), EngineError> {
        self.send(Command::SetLiveUpdates(enable)).await
    }

    /// Stop and end the engine task.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(Command::Shutdown).await
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<Snapshot, EngineError> {
        self.snapshots
            .changed()
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok(self.snapshots.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<Snapshot, EngineError>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let snapshot = self
            .snapshots
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok(snapshot.clone())
    }
}
