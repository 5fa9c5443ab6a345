use crate::config::types::Config;
use crate::engine::handle::{Command, LogbookHandle};
use crate::engine::state::{Snapshot, Status};
use crate::entry::LogEntry;
use crate::lookup::{build_user_names, AuxiliarySource, TraceContexts};
use crate::refresh::{RefreshTask, RefreshThrottles, ThrottleDecision};
use crate::sequencer::{newest_first, normalize_descending, LivePauseBuffer, MaterializedSequence};
use crate::subscription::{
    Filter, LogbookTransport, OpenOutcome, StreamBatch, SubscriptionManager,
};
use crate::window::{TimeSpec, TimeWindow};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

const COMMAND_BUFFER: usize = 64;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub time: TimeSpec,
    pub filter: Filter,
    /// Admins also get trace contexts and registered user names.
    pub admin: bool,
    pub load_interval: Duration,
    pub auxiliary_interval: Duration,
    pub batch_buffer: usize,
}

impl EngineConfig {
    pub fn new(time: TimeSpec) -> Self {
        Self {
            time,
            filter: Filter::default(),
            admin: false,
            load_interval: Duration::from_secs(1),
            auxiliary_interval: Duration::from_secs(60),
            batch_buffer: 1000,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            time: config.time.clone(),
            filter: config.filter.clone(),
            admin: config.admin,
            load_interval: config.throttle.load,
            auxiliary_interval: config.throttle.auxiliary,
            batch_buffer: config.source.batch_buffer,
        }
    }
}

/// Live logbook aggregation.
///
/// Owns the materialized sequence, the single subscription and the pending
/// queue. Every mutation happens inside one `&mut self` call, so a published
/// snapshot never reflects a half-applied merge.
pub struct LogbookEngine {
    time: TimeSpec,
    filter: Filter,
    admin: bool,
    transport: Arc<dyn LogbookTransport>,
    auxiliary: Arc<dyn AuxiliarySource>,
    subscriptions: SubscriptionManager,
    sequence: Option<MaterializedSequence>,
    error: Option<String>,
    closed: bool,
    gate: LivePauseBuffer,
    throttles: RefreshThrottles,
    trace_contexts: Arc<TraceContexts>,
    user_names: Arc<HashMap<String, String>>,
    snapshots: watch::Sender<Snapshot>,
}

impl LogbookEngine {
    /// Build an engine. The returned receiver carries batches from the
    /// subscriptions it opens and must be fed back through
    /// [`LogbookEngine::handle_batch`] (or handed to [`LogbookEngine::run`]).
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn LogbookTransport>,
        auxiliary: Arc<dyn AuxiliarySource>,
    ) -> (Self, mpsc::Receiver<StreamBatch>) {
        let (batch_tx, batch_rx) = mpsc::channel(config.batch_buffer.max(1));
        let (snapshots, _) = watch::channel(Snapshot::default());

        let engine = Self {
            time: config.time,
            filter: config.filter,
            admin: config.admin,
            subscriptions: SubscriptionManager::new(Arc::clone(&transport), batch_tx),
            transport,
            auxiliary,
            sequence: None,
            error: None,
            closed: false,
            gate: LivePauseBuffer::new(),
            throttles: RefreshThrottles::new(config.load_interval, config.auxiliary_interval),
            trace_contexts: Arc::new(TraceContexts::new()),
            user_names: Arc::new(HashMap::new()),
            snapshots,
        };

        (engine, batch_rx)
    }

    /// Spawn the engine on its own task.
    ///
    /// Nothing is loaded until [`LogbookHandle::start`] is called.
    pub fn spawn(
        config: EngineConfig,
        transport: Arc<dyn LogbookTransport>,
        auxiliary: Arc<dyn AuxiliarySource>,
    ) -> (LogbookHandle, JoinHandle<()>) {
        let (engine, batches) = Self::new(config, transport, auxiliary);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = LogbookHandle::new(command_tx, engine.watch());
        let task = tokio::spawn(engine.run(command_rx, batches));
        (handle, task)
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    pub fn status(&self) -> Status {
        if self.closed {
            Status::Closed
        } else if let Some(error) = &self.error {
            Status::Error(error.clone())
        } else if self.sequence.is_none() {
            Status::Loading
        } else {
            Status::Populated
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status(),
            entries: self.sequence.as_ref().map(MaterializedSequence::snapshot),
            trace_contexts: Arc::clone(&self.trace_contexts),
            user_names: Arc::clone(&self.user_names),
            live: self.gate.is_live(),
            pending_batches: self.gate.pending().len(),
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn time(&self) -> &TimeSpec {
        &self.time
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Earliest pending throttled call, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.throttles.next_deadline()
    }

    /// Event loop: commands, batches and throttle deadlines, one at a time.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut batches: mpsc::Receiver<StreamBatch>,
    ) {
        loop {
            let deadline = self.throttles.next_deadline();

            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("All logbook handles dropped");
                        self.stop().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(batch) = batches.recv() => self.handle_batch(batch),
                _ = sleep_until_deadline(deadline) => self.fire_due().await,
            }
        }

        debug!("Logbook engine task finished");
    }

    /// Apply one command. Returns false once the engine should exit.
    pub async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start => self.start().await,
            Command::Stop => self.stop().await,
            Command::Refresh { force } => self.refresh(force).await,
            Command::SetTime(time) => self.set_time(time).await,
            Command::SetFilter(filter) => self.set_filter(filter).await,
            Command::SetLiveUpdates(enable) => self.set_live_updates(enable),
            Command::Shutdown => {
                self.stop().await;
                return false;
            }
        }
        true
    }

    pub async fn start(&mut self) {
        info!("Starting logbook engine");
        self.closed = false;
        self.refresh(true).await;
    }

    pub async fn stop(&mut self) {
        self.throttles.cancel_all();
        self.unsubscribe_set_loading().await;
        self.closed = true;
        info!(
            subscriptions_opened = self.subscriptions.opened_count(),
            "Logbook engine stopped"
        );
        self.publish();
    }

    /// Resynchronize from scratch.
    ///
    /// Ignored while stopped; only [`LogbookEngine::start`] reattaches. A
    /// non-forced refresh is also ignored while subscribed or still loading.
    /// Otherwise every pending throttled call is dropped and the entries are
    /// reloaded, right away when forced or through the load throttle.
    pub async fn refresh(&mut self, force: bool) {
        if self.closed {
            debug!("Refresh ignored while stopped");
            return;
        }
        if !force && (self.subscriptions.is_active() || self.sequence.is_none()) {
            trace!("Refresh skipped");
            return;
        }

        self.throttles.cancel_all();
        self.unsubscribe_set_loading().await;
        self.gate.set_live(true);

        if force {
            self.load().await;
        } else {
            match self.throttles.load.call(Instant::now()) {
                ThrottleDecision::Fire => self.load().await,
                ThrottleDecision::Deferred(at) => debug!(
                    throttle = self.throttles.load.name(),
                    interval_ms = self.throttles.load.interval().as_millis() as u64,
                    delay_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Load deferred"
                ),
                ThrottleDecision::AlreadyPending => {}
            }
        }
        self.publish();
    }

    pub async fn set_time(&mut self, time: TimeSpec) {
        if time == self.time {
            return;
        }
        debug!(?time, sliding = time.is_sliding(), "Time window changed");
        self.time = time;
        if !self.closed {
            self.refresh(true).await;
        }
    }

    /// Replace the filter, resubscribing only when the id sets changed.
    pub async fn set_filter(&mut self, filter: Filter) {
        let changed = filter.differs_from(&self.filter);
        self.filter = filter;
        if changed && !self.closed {
            debug!(filter = ?self.filter, "Filter changed");
            self.refresh(true).await;
        }
    }

    pub fn set_live_updates(&mut self, enable: bool) {
        let queued = self.gate.pending().stats();
        let replay = self.gate.set_live(enable);
        if !replay.is_empty() {
            let boundary = self.time.purge_boundary(Utc::now());
            debug!(
                batches = queued.batches,
                entries = queued.entries,
                "Replaying batches queued while paused"
            );
            for batch in replay {
                self.merge(batch, boundary);
            }
        }
        self.publish();
    }

    /// Route one pushed batch: drop it if its subscription is gone, queue it
    /// while paused, merge it otherwise.
    pub fn handle_batch(&mut self, batch: StreamBatch) {
        if !self.subscriptions.accepts(batch.subscription_id) {
            debug!(
                subscription_id = batch.subscription_id,
                entries = batch.entries.len(),
                "Dropping batch from closed subscription"
            );
            return;
        }

        match self.gate.accept(batch.entries) {
            Some(entries) => {
                let boundary = self.time.purge_boundary(Utc::now());
                self.merge(entries, boundary);
            }
            None => trace!(
                pending = self.gate.pending().len(),
                "Queued batch while live updates are paused"
            ),
        }
        self.publish();
    }

    /// Run every throttled call whose deadline has passed.
    pub async fn fire_due(&mut self) {
        for task in self.throttles.take_due(Instant::now()) {
            match task {
                RefreshTask::Load => self.load().await,
                RefreshTask::Users => self.update_users().await,
                RefreshTask::TraceContexts => self.update_trace_contexts().await,
            }
        }
        self.publish();
    }

    async fn load(&mut self) {
        self.error = None;

        if self.filter.is_vacuous() {
            debug!("Filter can never match; skipping subscription");
            self.unsubscribe_no_results().await;
            return;
        }

        let window = self.time.window(Utc::now());
        if window.starts_in_future() {
            debug!(start = %window.start_time, "Window starts in the future");
            self.unsubscribe_no_results().await;
            return;
        }

        if self.throttles.users.call(Instant::now()) == ThrottleDecision::Fire {
            self.update_users().await;
        }
        if self.admin
            && self.throttles.trace_contexts.call(Instant::now()) == ThrottleDecision::Fire
        {
            self.update_trace_contexts().await;
        }

        let (history, _) = window.split_at_now();
        match self.subscriptions.open(&window, &self.filter).await {
            Ok(OpenOutcome::Opened(_)) => self.backfill(&history).await,
            Ok(OpenOutcome::AlreadyActive(_)) => {}
            Err(e) => self.error = Some(e.to_string()),
        }
    }

    /// Fetch history up to the instant the live feed took over.
    async fn backfill(&mut self, history: &TimeWindow) {
        match self.transport.fetch(history, &self.filter).await {
            Ok(entries) => {
                info!(entries = entries.len(), "Backfill complete");
                let boundary = self.time.purge_boundary(Utc::now());
                let sequence = self.sequence.get_or_insert_with(MaterializedSequence::new);
                let path = sequence.merge(normalize_descending(entries), boundary);
                trace!(?path, total = sequence.len(), "Merged backfill");
            }
            Err(e) => {
                error!(error = %e, "Backfill failed");
                self.error = Some(e.to_string());
                self.unsubscribe_set_loading().await;
            }
        }
    }

    fn merge(&mut self, entries: Vec<LogEntry>, purge_boundary: Option<f64>) {
        let sequence = self.sequence.get_or_insert_with(MaterializedSequence::new);
        let path = sequence.merge(newest_first(entries), purge_boundary);
        trace!(?path, total = sequence.len(), "Merged batch");
    }

    /// Unsubscribe and go back to the loading state.
    async fn unsubscribe_set_loading(&mut self) {
        self.subscriptions.close().await;
        self.sequence = None;
        self.gate.clear();
    }

    /// Unsubscribe and show a definitive empty result.
    async fn unsubscribe_no_results(&mut self) {
        self.subscriptions.close().await;
        self.sequence = Some(MaterializedSequence::new());
        self.gate.clear();
    }

    async fn update_users(&mut self) {
        let persons = match self.auxiliary.load_persons().await {
            Ok(persons) => persons,
            Err(e) => {
                warn!(error = %e, "Failed to load persons");
                Vec::new()
            }
        };

        let users = if self.admin {
            match self.auxiliary.load_users().await {
                Ok(users) => Some(users),
                Err(e) => {
                    warn!(error = %e, "Failed to load users");
                    None
                }
            }
        } else {
            None
        };

        self.user_names = Arc::new(build_user_names(&persons, users.as_deref()));
        debug!(names = self.user_names.len(), "Updated user names");
    }

    async fn update_trace_contexts(&mut self) {
        match self.auxiliary.load_trace_contexts().await {
            Ok(contexts) => {
                debug!(contexts = contexts.len(), "Updated trace contexts");
                self.trace_contexts = Arc::new(contexts);
            }
            Err(e) => warn!(error = %e, "Failed to load trace contexts"),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{NoAuxiliary, Person, TraceContext, User};
    use crate::subscription::{BatchSink, TransportError, Unsubscribe};
    use crate::window::to_epoch_seconds;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        history: Mutex<Vec<LogEntry>>,
        fail_subscribe: AtomicBool,
        fail_fetch: AtomicBool,
        fetches: AtomicUsize,
        subscribes: AtomicUsize,
        unsubscribes: Arc<AtomicUsize>,
        sinks: Mutex<Vec<BatchSink>>,
        fetch_windows: Mutex<Vec<TimeWindow>>,
    }

    struct MockHandle {
        unsubscribes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Unsubscribe for MockHandle {
        async fn unsubscribe(&mut self) -> Result<(), TransportError> {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl LogbookTransport for MockTransport {
        async fn fetch(
            &self,
            window: &TimeWindow,
            _filter: &Filter,
        ) -> Result<Vec<LogEntry>, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.fetch_windows.lock().unwrap().push(*window);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(TransportError::Rejected("history unavailable".to_string()));
            }
            Ok(self.history.lock().unwrap().clone())
        }

        async fn subscribe(
            &self,
            _window: &TimeWindow,
            _filter: &Filter,
            sink: BatchSink,
        ) -> Result<Box<dyn Unsubscribe>, TransportError> {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(TransportError::Rejected("unknown command".to_string()));
            }
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            self.sinks.lock().unwrap().push(sink);
            Ok(Box::new(MockHandle {
                unsubscribes: self.unsubscribes.clone(),
            }))
        }
    }

    impl MockTransport {
        fn last_sink(&self) -> BatchSink {
            self.sinks.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct StaticAuxiliary;

    #[async_trait]
    impl AuxiliarySource for StaticAuxiliary {
        async fn load_trace_contexts(&self) -> Result<TraceContexts, TransportError> {
            let mut contexts = TraceContexts::new();
            contexts.insert(
                "ctx1".to_string(),
                TraceContext {
                    run_id: "run1".to_string(),
                    domain: "automation".to_string(),
                    item_id: "morning".to_string(),
                },
            );
            Ok(contexts)
        }

        async fn load_persons(&self) -> Result<Vec<Person>, TransportError> {
            Ok(vec![Person {
                user_id: Some("u1".to_string()),
                name: "Alice".to_string(),
            }])
        }

        async fn load_users(&self) -> Result<Vec<User>, TransportError> {
            Ok(vec![User {
                id: "u2".to_string(),
                name: "Supervisor".to_string(),
            }])
        }
    }

    fn now_secs() -> f64 {
        to_epoch_seconds(Utc::now())
    }

    fn entry(when: f64) -> LogEntry {
        LogEntry::new(when)
    }

    fn whens(snapshot: &Snapshot) -> Vec<f64> {
        snapshot.entries().iter().map(|e| e.when).collect()
    }

    fn engine_with(
        transport: Arc<MockTransport>,
        config: EngineConfig,
    ) -> (LogbookEngine, mpsc::Receiver<StreamBatch>) {
        LogbookEngine::new(config, transport, Arc::new(NoAuxiliary))
    }

    fn drain(engine: &mut LogbookEngine, batches: &mut mpsc::Receiver<StreamBatch>) {
        while let Ok(batch) = batches.try_recv() {
            engine.handle_batch(batch);
        }
    }

    fn recent_hour() -> EngineConfig {
        EngineConfig::new(TimeSpec::Recent { seconds: 3600.0 })
    }

    #[tokio::test]
    async fn test_start_backfills_newest_first() {
        let transport = Arc::new(MockTransport::default());
        let base = now_secs() - 100.0;
        *transport.history.lock().unwrap() = vec![entry(base), entry(base + 1.0), entry(base + 2.0)];

        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, Status::Populated);
        assert_eq!(whens(&snapshot), vec![base + 2.0, base + 1.0, base]);
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backfill_stops_where_live_feed_starts() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());
        let before = Utc::now();

        engine.start().await;

        let windows = transport.fetch_windows.lock().unwrap();
        assert_eq!(windows.len(), 1);
        assert!(windows[0].end_time >= before);
        assert!(windows[0].end_time <= Utc::now());
    }

    #[tokio::test]
    async fn test_empty_backfill_is_definitive_empty() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) = engine_with(transport, recent_hour());

        engine.start().await;

        assert!(engine.snapshot().is_empty_result());
    }

    #[tokio::test]
    async fn test_live_batches_merge_on_top() {
        let transport = Arc::new(MockTransport::default());
        let base = now_secs() - 50.0;
        *transport.history.lock().unwrap() = vec![entry(base), entry(base + 1.0)];
        let (mut engine, mut batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;

        let sink = transport.last_sink();
        sink.send(vec![entry(base + 10.0), entry(base + 11.0)]).await.unwrap();
        sink.send(vec![]).await.unwrap();
        drain(&mut engine, &mut batches);

        assert_eq!(
            whens(&engine.snapshot()),
            vec![base + 11.0, base + 10.0, base + 1.0, base]
        );
    }

    #[tokio::test]
    async fn test_sliding_window_purges_expired_entries() {
        let transport = Arc::new(MockTransport::default());
        let now = now_secs();
        *transport.history.lock().unwrap() = vec![entry(now - 120.0), entry(now - 30.0)];
        let config = EngineConfig::new(TimeSpec::Recent { seconds: 60.0 });
        let (mut engine, mut batches) = engine_with(transport.clone(), config);
        engine.start().await;

        assert_eq!(whens(&engine.snapshot()), vec![now - 30.0]);

        transport.last_sink().send(vec![entry(now + 1.0)]).await.unwrap();
        drain(&mut engine, &mut batches);
        assert_eq!(whens(&engine.snapshot()), vec![now + 1.0, now - 30.0]);
    }

    #[tokio::test]
    async fn test_vacuous_filter_short_circuits() {
        let transport = Arc::new(MockTransport::default());
        let mut config = recent_hour();
        config.filter = Filter::entities(Vec::<String>::new());
        let (mut engine, _batches) = engine_with(transport.clone(), config);

        engine.start().await;

        let snapshot = engine.snapshot();
        assert!(snapshot.is_empty_result());
        assert!(!engine.subscriptions().is_active());
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 0);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_future_window_short_circuits() {
        let transport = Arc::new(MockTransport::default());
        let start = Utc::now() + chrono::Duration::hours(1);
        let config = EngineConfig::new(TimeSpec::Range {
            start,
            end: start + chrono::Duration::hours(1),
        });
        let (mut engine, _batches) = engine_with(transport.clone(), config);

        engine.start().await;

        assert!(engine.snapshot().is_empty_result());
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_narrowing_filter_resubscribes_once() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);

        engine.set_filter(Filter::entities(["a"])).await;

        assert_eq!(transport.unsubscribes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 2);
        assert_eq!(engine.subscriptions().opened_count(), 2);

        // Same ids in a different list instance: no change.
        engine.set_filter(Filter::entities(["a"])).await;
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unchanged_time_does_not_resubscribe() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;

        engine.set_time(TimeSpec::Recent { seconds: 3600.0 }).await;
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);

        engine.set_time(TimeSpec::Recent { seconds: 60.0 }).await;
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_load_runs_when_due() {
        let transport = Arc::new(MockTransport::default());
        let mut config = recent_hour();
        config.filter = Filter::entities(Vec::<String>::new());
        let (mut engine, _batches) = engine_with(transport.clone(), config);
        engine.start().await;
        assert!(engine.snapshot().is_empty_result());

        engine.filter = Filter::entities(["a"]);
        let now = Instant::now();
        assert_eq!(engine.throttles.load.call(now), ThrottleDecision::Fire);
        assert!(matches!(
            engine.throttles.load.call(now),
            ThrottleDecision::Deferred(_)
        ));

        let deadline = engine.next_deadline().expect("load should be scheduled");
        tokio::time::sleep_until(deadline).await;
        engine.fire_due().await;

        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(engine.throttles.load.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_preempts_throttle() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;
        engine.throttles.users.call(Instant::now());
        assert!(engine.next_deadline().is_some());

        engine.refresh(true).await;

        assert_eq!(engine.next_deadline(), None);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_forced_refresh_reloads_when_idle() {
        let transport = Arc::new(MockTransport::default());
        let mut config = recent_hour();
        config.filter = Filter::entities(Vec::<String>::new());
        let (mut engine, _batches) = engine_with(transport.clone(), config);
        engine.start().await;

        // Not subscribed, yet showing a result: a plain refresh goes through.
        engine.filter = Filter::entities(["a"]);
        engine.refresh(false).await;

        assert!(engine.subscriptions().is_active());
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(engine.snapshot().status, Status::Populated);
    }

    #[tokio::test]
    async fn test_non_forced_refresh_ignored_while_subscribed() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;

        engine.refresh(false).await;

        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.unsubscribes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pause_queues_and_resume_replays() {
        let transport = Arc::new(MockTransport::default());
        let base = now_secs() - 50.0;
        *transport.history.lock().unwrap() = vec![entry(base)];
        let (mut engine, mut batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;

        engine.set_live_updates(false);
        let sink = transport.last_sink();
        sink.send(vec![entry(base + 1.0)]).await.unwrap();
        sink.send(vec![entry(base + 2.0), entry(base + 3.0)]).await.unwrap();
        drain(&mut engine, &mut batches);

        let paused = engine.snapshot();
        assert!(!paused.live);
        assert_eq!(paused.pending_batches, 2);
        assert_eq!(whens(&paused), vec![base]);

        engine.set_live_updates(true);

        let resumed = engine.snapshot();
        assert!(resumed.live);
        assert_eq!(resumed.pending_batches, 0);
        assert_eq!(whens(&resumed), vec![base + 3.0, base + 2.0, base + 1.0, base]);
    }

    #[tokio::test]
    async fn test_batches_after_stop_are_discarded() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, mut batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;
        let sink = transport.last_sink();

        engine.stop().await;
        sink.send(vec![entry(now_secs())]).await.unwrap();
        drain(&mut engine, &mut batches);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, Status::Closed);
        assert!(snapshot.entries.is_none());
        assert_eq!(transport.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batches_from_superseded_subscription_are_discarded() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, mut batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;
        let old_sink = transport.last_sink();

        engine.set_filter(Filter::entities(["a"])).await;
        old_sink.send(vec![entry(now_secs())]).await.unwrap();
        drain(&mut engine, &mut batches);

        assert!(engine.snapshot().entries().is_empty());
    }

    #[tokio::test]
    async fn test_stop_then_start_reopens_cleanly() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;
        engine.set_live_updates(false);
        engine.stop().await;

        engine.start().await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, Status::Populated);
        assert!(snapshot.live);
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_after_stop_does_not_reattach() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());
        engine.start().await;
        engine.stop().await;

        engine.refresh(true).await;
        engine.refresh(false).await;

        assert_eq!(engine.status(), Status::Closed);
        assert!(!engine.subscriptions().is_active());
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_failure_sets_error() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_subscribe.store(true, Ordering::SeqCst);
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());

        engine.start().await;

        let snapshot = engine.snapshot();
        assert_eq!(
            snapshot.error(),
            Some("failed to open subscription: request rejected: unknown command")
        );
        assert!(snapshot.entries.is_none());
        assert!(!engine.subscriptions().is_active());

        // A forced refresh tries again.
        transport.fail_subscribe.store(false, Ordering::SeqCst);
        engine.refresh(true).await;
        assert_eq!(engine.snapshot().status, Status::Populated);
    }

    #[tokio::test]
    async fn test_fetch_failure_sets_error_and_closes() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_fetch.store(true, Ordering::SeqCst);
        let (mut engine, _batches) = engine_with(transport.clone(), recent_hour());

        engine.start().await;

        assert_eq!(
            engine.snapshot().error(),
            Some("request rejected: history unavailable")
        );
        assert!(!engine.subscriptions().is_active());
        assert_eq!(transport.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_admin_loads_auxiliary_tables() {
        let transport = Arc::new(MockTransport::default());
        let mut config = recent_hour();
        config.admin = true;
        let (mut engine, _batches) =
            LogbookEngine::new(config, transport, Arc::new(StaticAuxiliary));

        engine.start().await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.user_names.len(), 2);
        assert_eq!(snapshot.trace_contexts["ctx1"].item_id, "morning");
    }

    #[tokio::test]
    async fn test_non_admin_skips_users_and_traces() {
        let transport = Arc::new(MockTransport::default());
        let (mut engine, _batches) =
            LogbookEngine::new(recent_hour(), transport, Arc::new(StaticAuxiliary));

        engine.start().await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.user_names.len(), 1);
        assert!(snapshot.trace_contexts.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_engine_publishes_snapshots() {
        let transport = Arc::new(MockTransport::default());
        let now = now_secs();
        *transport.history.lock().unwrap() = vec![entry(now - 5.0)];
        let (mut handle, task) =
            LogbookEngine::spawn(recent_hour(), transport.clone(), Arc::new(NoAuxiliary));

        assert!(handle.snapshot().is_loading());
        handle.start().await.unwrap();
        let populated = handle
            .wait_for(|s| s.status == Status::Populated)
            .await
            .unwrap();
        assert_eq!(whens(&populated), vec![now - 5.0]);

        transport.last_sink().send(vec![entry(now + 1.0)]).await.unwrap();
        let merged = handle.wait_for(|s| s.entries().len() == 2).await.unwrap();
        assert_eq!(whens(&merged), vec![now + 1.0, now - 5.0]);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(handle.snapshot().status, Status::Closed);
        assert!(handle.start().await.is_err());
    }
}
