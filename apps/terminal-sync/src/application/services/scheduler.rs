//! Poll Scheduler
//!
//! Runs one poll task per distinct [`PollKey`], shared by every subscriber
//! of that key.
//!
//! # Task lifecycle
//!
//! - The first subscriber of a key starts its task; the task ticks at a
//!   fixed interval and the first tick fires immediately.
//! - A tick that elapses while the key's previous fetch is still
//!   outstanding is skipped. The in-flight flag belongs to the key, so a
//!   task re-created for a key whose old fetch has not returned yet also
//!   waits for it.
//! - When the last subscriber leaves (or moves to another key) the task is
//!   canceled. A fetch it had in flight is not aborted; its result is
//!   discarded on arrival.
//!
//! Cancellation and result application are serialized per task, so once
//! `rekey` or `unsubscribe` returns no result for the old key can be
//! written.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::GatewayError;
use crate::domain::subscription::{
    DataSource, PollKey, PollRegistry, RegistryStats, SubscriptionId,
};
use crate::infrastructure::metrics;

// =============================================================================
// Feed Handler
// =============================================================================

/// Data returned by one fetch.
#[derive(Debug, Clone)]
pub enum FeedPayload {
    /// Bar series.
    Bars(Vec<crate::domain::market::Bar>),
    /// Raw depth snapshot.
    Depth(crate::domain::market::RawDepth),
    /// Full order list.
    Orders(Vec<crate::domain::order::Order>),
    /// Positions.
    Positions(Vec<crate::domain::market::Position>),
    /// Movers list.
    Movers(Vec<crate::domain::market::Mover>),
}

/// Fetches data for a key and writes it where it belongs.
///
/// The scheduler decides *when* to fetch and whether a result is still
/// wanted; the handler decides *what* to fetch and how to store it.
#[async_trait]
pub trait FeedHandler: Send + Sync {
    /// Perform the remote call for `key`.
    async fn fetch(&self, key: &PollKey) -> Result<FeedPayload, GatewayError>;

    /// Store a successful result.
    fn apply(&self, key: &PollKey, payload: FeedPayload);

    /// Record a failed fetch.
    fn record_error(&self, key: &PollKey, error: &GatewayError);
}

/// What happened to one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Result written.
    Applied,
    /// Fetch failed; error recorded.
    Failed,
    /// Task was canceled while the fetch was in flight; result dropped.
    Stale,
}

// =============================================================================
// Intervals
// =============================================================================

/// Per-source poll intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Bars.
    pub bars: Duration,
    /// Depth.
    pub depth: Duration,
    /// Orders.
    pub orders: Duration,
    /// Positions.
    pub positions: Duration,
    /// Movers.
    pub movers: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            bars: DataSource::Bars.default_interval(),
            depth: DataSource::Depth.default_interval(),
            orders: DataSource::Orders.default_interval(),
            positions: DataSource::Positions.default_interval(),
            movers: DataSource::Movers.default_interval(),
        }
    }
}

impl PollIntervals {
    /// Interval for a data source.
    #[must_use]
    pub const fn for_source(&self, source: DataSource) -> Duration {
        match source {
            DataSource::Bars => self.bars,
            DataSource::Depth => self.depth,
            DataSource::Orders => self.orders,
            DataSource::Positions => self.positions,
            DataSource::Movers => self.movers,
        }
    }
}

// =============================================================================
// Handles and tasks
// =============================================================================

/// A subscriber's claim on a poll key.
///
/// Not `Clone`: each handle is released exactly once through
/// [`PollScheduler::unsubscribe`].
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    key: PollKey,
    interval: Option<Duration>,
}

impl SubscriptionHandle {
    /// Subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Key currently polled for this subscriber.
    #[must_use]
    pub const fn key(&self) -> &PollKey {
        &self.key
    }
}

struct PollTask {
    generation: u64,
    interval: Duration,
    cancel: CancellationToken,
    gate: Arc<ReentrantMutex<()>>,
}

impl PollTask {
    /// Wait for any result application in progress to finish. The token
    /// is already canceled, so nothing can be applied afterwards.
    fn drain(&self) {
        let _gate = self.gate.lock();
    }
}

#[derive(Clone)]
struct TaskContext {
    key: PollKey,
    generation: u64,
    interval: Duration,
    cancel: CancellationToken,
    gate: Arc<ReentrantMutex<()>>,
    in_flight: Arc<AtomicBool>,
}

#[derive(Default)]
struct SchedulerState {
    registry: PollRegistry,
    tasks: HashMap<PollKey, PollTask>,
    in_flight: HashMap<PollKey, Arc<AtomicBool>>,
    next_generation: u64,
}

impl SchedulerState {
    /// Remove and cancel a task. The caller drains it after releasing the
    /// state lock.
    fn take_task(&mut self, key: &PollKey) -> Option<PollTask> {
        let task = self.tasks.remove(key)?;
        task.cancel.cancel();

        let idle = self
            .in_flight
            .get(key)
            .is_some_and(|flag| !flag.load(Ordering::SeqCst));
        if idle {
            self.in_flight.remove(key);
        }

        metrics::set_active_poll_tasks(self.tasks.len());
        tracing::debug!(
            key = %key,
            generation = task.generation,
            "Poll task canceled"
        );
        Some(task)
    }
}

struct Inner {
    handler: Arc<dyn FeedHandler>,
    intervals: PollIntervals,
    shutdown: CancellationToken,
    state: Mutex<SchedulerState>,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Reference-counted poll task scheduler.
///
/// Cheap to clone; clones share the same tasks. Methods that start tasks
/// must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("intervals", &self.inner.intervals)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl PollScheduler {
    /// Create a scheduler that fetches through `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn FeedHandler>, intervals: PollIntervals) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                intervals,
                shutdown: CancellationToken::new(),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Subscribe to `key`.
    ///
    /// `interval` overrides the configured per-source interval, but only
    /// if this subscriber is the one that starts the key's task. A zero
    /// interval is ignored.
    #[must_use = "dropping the handle leaks the subscription; pass it to unsubscribe"]
    pub fn subscribe(&self, key: PollKey, interval: Option<Duration>) -> SubscriptionHandle {
        let mut state = self.inner.state.lock();
        let (id, changes) = state.registry.add(key.clone());
        if let Some(start) = changes.start {
            self.start_task(&mut state, start, interval);
        }
        drop(state);

        tracing::debug!(subscription_id = id, key = %key, "Subscribed");
        SubscriptionHandle { id, key, interval }
    }

    /// Point `handle` at a different key.
    ///
    /// The old key's task is canceled if this was its last subscriber; a
    /// task for the new key is started unless one already exists.
    pub fn rekey(&self, handle: &mut SubscriptionHandle, new_key: PollKey) {
        let mut state = self.inner.state.lock();
        let Some(changes) = state.registry.rekey(handle.id, new_key.clone()) else {
            tracing::warn!(subscription_id = handle.id, "Rekey of unknown subscription");
            return;
        };
        if let Some(start) = changes.start {
            self.start_task(&mut state, start, handle.interval);
        }
        let stopped = changes.stop.and_then(|key| state.take_task(&key));
        drop(state);

        if let Some(task) = stopped {
            task.drain();
        }

        tracing::debug!(
            subscription_id = handle.id,
            from = %handle.key,
            to = %new_key,
            "Subscription rekeyed"
        );
        handle.key = new_key;
    }

    /// Release a subscription.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut state = self.inner.state.lock();
        let changes = state.registry.remove(handle.id);
        let stopped = changes.stop.and_then(|key| state.take_task(&key));
        drop(state);

        if let Some(task) = stopped {
            task.drain();
        }
        tracing::debug!(subscription_id = handle.id, key = %handle.key, "Unsubscribed");
    }

    /// Cancel every task. Later subscriptions do not start new tasks.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        self.inner.shutdown.cancel();
        let keys: Vec<PollKey> = state.tasks.keys().cloned().collect();
        let stopped: Vec<PollTask> = keys.iter().filter_map(|k| state.take_task(k)).collect();
        state.registry = PollRegistry::new();
        drop(state);

        for task in &stopped {
            task.drain();
        }
        tracing::info!(tasks = stopped.len(), "Poll scheduler shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Keys with a live task.
    #[must_use]
    pub fn active_tasks(&self) -> Vec<PollKey> {
        self.inner.state.lock().tasks.keys().cloned().collect()
    }

    /// Interval of the live task for `key`, if any.
    #[must_use]
    pub fn task_interval(&self, key: &PollKey) -> Option<Duration> {
        self.inner.state.lock().tasks.get(key).map(|t| t.interval)
    }

    /// Task and subscriber counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.inner.state.lock().registry.stats()
    }

    fn start_task(&self, state: &mut SchedulerState, key: PollKey, interval: Option<Duration>) {
        if self.inner.shutdown.is_cancelled() {
            tracing::debug!(key = %key, "Scheduler shut down, task not started");
            return;
        }

        state.next_generation += 1;
        let interval = self.resolve_interval(&key, interval);
        let ctx = TaskContext {
            key: key.clone(),
            generation: state.next_generation,
            interval,
            cancel: self.inner.shutdown.child_token(),
            gate: Arc::new(ReentrantMutex::new(())),
            in_flight: Arc::clone(state.in_flight.entry(key.clone()).or_default()),
        };

        state.tasks.insert(
            key.clone(),
            PollTask {
                generation: ctx.generation,
                interval,
                cancel: ctx.cancel.clone(),
                gate: Arc::clone(&ctx.gate),
            },
        );
        metrics::set_active_poll_tasks(state.tasks.len());
        tracing::debug!(
            key = %key,
            generation = ctx.generation,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Poll task started"
        );

        tokio::spawn(Inner::run_task(Arc::clone(&self.inner), ctx));
    }

    /// First non-zero of the override, the configured interval and the
    /// source default.
    fn resolve_interval(&self, key: &PollKey, requested: Option<Duration>) -> Duration {
        let source = key.source();
        if requested.is_some_and(|d| d.is_zero()) {
            tracing::warn!(key = %key, "Zero poll interval requested, using configured interval");
        }
        let configured = self.inner.intervals.for_source(source);
        match requested {
            Some(d) if !d.is_zero() => d,
            _ if !configured.is_zero() => configured,
            _ => source.default_interval(),
        }
    }
}

impl Inner {
    async fn run_task(self: Arc<Self>, ctx: TaskContext) {
        let source = ctx.key.source();
        let mut ticker = tokio::time::interval(ctx.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if ctx.in_flight.swap(true, Ordering::SeqCst) {
                metrics::record_tick_skipped(source);
                tracing::trace!(key = %ctx.key, "Fetch still in flight, tick skipped");
                continue;
            }
            if ctx.cancel.is_cancelled() {
                ctx.in_flight.store(false, Ordering::SeqCst);
                break;
            }

            metrics::record_poll_issued(source);
            let inner = Arc::clone(&self);
            let fetch_ctx = ctx.clone();
            tokio::spawn(async move {
                inner.fetch_and_apply(&fetch_ctx).await;
            });
        }

        tracing::trace!(key = %ctx.key, generation = ctx.generation, "Poll task exited");
    }

    async fn fetch_and_apply(&self, ctx: &TaskContext) -> PollOutcome {
        let source = ctx.key.source();
        let result = self.handler.fetch(&ctx.key).await;

        let outcome = {
            let _gate = ctx.gate.lock();
            if ctx.cancel.is_cancelled() {
                PollOutcome::Stale
            } else {
                match result {
                    Ok(payload) => {
                        self.handler.apply(&ctx.key, payload);
                        PollOutcome::Applied
                    }
                    Err(err) => {
                        tracing::warn!(key = %ctx.key, error = %err, "Poll fetch failed");
                        metrics::record_fetch_error(source, err.kind());
                        self.handler.record_error(&ctx.key, &err);
                        PollOutcome::Failed
                    }
                }
            }
        };

        ctx.in_flight.store(false, Ordering::SeqCst);
        self.release_in_flight(&ctx.key);

        if outcome == PollOutcome::Stale {
            metrics::record_stale_result(source);
            tracing::debug!(
                key = %ctx.key,
                generation = ctx.generation,
                "Discarded result for canceled poll task"
            );
        }
        outcome
    }

    /// Forget the in-flight flag of a key that no longer has a task.
    fn release_in_flight(&self, key: &PollKey) {
        let mut state = self.state.lock();
        if !state.tasks.contains_key(key) {
            state.in_flight.remove(key);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{RawDepth, Symbol};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingHandler {
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Mutex<HashMap<PollKey, Duration>>,
        failing: AtomicBool,
        applied: Mutex<Vec<PollKey>>,
        errors: Mutex<Vec<PollKey>>,
    }

    impl RecordingHandler {
        fn slow(&self, key: PollKey, latency: Duration) {
            self.latency.lock().insert(key, latency);
        }

        fn applied(&self) -> Vec<PollKey> {
            self.applied.lock().clone()
        }
    }

    #[async_trait]
    impl FeedHandler for RecordingHandler {
        async fn fetch(&self, key: &PollKey) -> Result<FeedPayload, GatewayError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let latency = self.latency.lock().get(key).copied();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.load(Ordering::SeqCst) {
                Err(GatewayError::Network("connection reset".into()))
            } else {
                Ok(FeedPayload::Depth(RawDepth::default()))
            }
        }

        fn apply(&self, key: &PollKey, _payload: FeedPayload) {
            self.applied.lock().push(key.clone());
        }

        fn record_error(&self, key: &PollKey, _error: &GatewayError) {
            self.errors.lock().push(key.clone());
        }
    }

    fn depth(symbol: &str) -> PollKey {
        PollKey::depth(Symbol::new(symbol))
    }

    fn scheduler() -> (PollScheduler, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        let scheduler = PollScheduler::new(handler.clone(), PollIntervals::default());
        (scheduler, handler)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_fires_immediately() {
        let (scheduler, handler) = scheduler();

        let _handle = scheduler.subscribe(depth("AAPL"), None);
        settle().await;

        assert_eq!(handler.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(handler.applied(), vec![depth("AAPL")]);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_interval() {
        let (scheduler, handler) = scheduler();

        let _handle = scheduler.subscribe(depth("AAPL"), None);
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(handler.fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_is_skipped_while_fetch_in_flight() {
        let (scheduler, handler) = scheduler();
        handler.slow(depth("AAPL"), Duration::from_millis(2_500));

        let _handle = scheduler.subscribe(depth("AAPL"), None);
        tokio::time::sleep(Duration::from_millis(3_600)).await;

        assert_eq!(handler.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_share_one_task() {
        let (scheduler, handler) = scheduler();

        let a = scheduler.subscribe(depth("AAPL"), None);
        let b = scheduler.subscribe(depth("AAPL"), Some(Duration::from_millis(100)));
        settle().await;

        assert_eq!(scheduler.active_tasks(), vec![depth("AAPL")]);
        assert_eq!(
            scheduler.task_interval(&depth("AAPL")),
            Some(Duration::from_secs(1))
        );
        assert_eq!(scheduler.stats().subscriber_count, 2);
        assert_eq!(handler.fetches.load(Ordering::SeqCst), 1);

        scheduler.unsubscribe(a);
        assert_eq!(scheduler.active_tasks().len(), 1);
        scheduler.unsubscribe(b);
        assert!(scheduler.active_tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_polling() {
        let (scheduler, handler) = scheduler();

        let handle = scheduler.subscribe(depth("AAPL"), None);
        settle().await;
        scheduler.unsubscribe(handle);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(handler.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rekey_discards_in_flight_result_for_old_key() {
        let (scheduler, handler) = scheduler();
        handler.slow(depth("AAPL"), Duration::from_millis(500));

        let mut handle = scheduler.subscribe(depth("AAPL"), None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.rekey(&mut handle, depth("MSFT"));
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let applied = handler.applied();
        assert!(!applied.contains(&depth("AAPL")));
        assert!(applied.contains(&depth("MSFT")));
        assert_eq!(handle.key(), &depth("MSFT"));
        assert_eq!(scheduler.active_tasks(), vec![depth("MSFT")]);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_and_apply_reports_stale_for_canceled_task() {
        let (scheduler, handler) = scheduler();
        let ctx = TaskContext {
            key: depth("AAPL"),
            generation: 1,
            interval: Duration::from_secs(1),
            cancel: CancellationToken::new(),
            gate: Arc::new(ReentrantMutex::new(())),
            in_flight: Arc::new(AtomicBool::new(true)),
        };
        ctx.cancel.cancel();

        let outcome = scheduler.inner.fetch_and_apply(&ctx).await;

        assert_eq!(outcome, PollOutcome::Stale);
        assert!(handler.applied().is_empty());
        assert!(!ctx.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_waits_for_outstanding_fetch() {
        let (scheduler, handler) = scheduler();
        handler.slow(depth("AAPL"), Duration::from_millis(1_500));

        let first = scheduler.subscribe(depth("AAPL"), None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.unsubscribe(first);
        let _second = scheduler.subscribe(depth("AAPL"), None);
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(handler.fetches.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_recorded_and_polling_continues() {
        let (scheduler, handler) = scheduler();
        handler.failing.store(true, Ordering::SeqCst);

        let _handle = scheduler.subscribe(depth("AAPL"), None);
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(handler.errors.lock().len(), 2);

        handler.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        assert_eq!(handler.applied(), vec![depth("AAPL")]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_override_falls_back_to_configured() {
        let (scheduler, handler) = scheduler();

        let _handle = scheduler.subscribe(PollKey::Orders, Some(Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        assert_eq!(
            scheduler.task_interval(&PollKey::Orders),
            Some(Duration::from_secs(5))
        );
        assert_eq!(handler.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(handler.applied(), vec![PollKey::Orders, PollKey::Orders]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_configured_interval_falls_back_to_source_default() {
        let handler = Arc::new(RecordingHandler::default());
        let intervals = PollIntervals {
            depth: Duration::ZERO,
            ..PollIntervals::default()
        };
        let scheduler = PollScheduler::new(handler.clone(), intervals);

        let _handle = scheduler.subscribe(depth("AAPL"), None);
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(
            scheduler.task_interval(&depth("AAPL")),
            Some(DataSource::Depth.default_interval())
        );
        assert_eq!(handler.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let (scheduler, handler) = scheduler();

        let _a = scheduler.subscribe(depth("AAPL"), None);
        let _b = scheduler.subscribe(PollKey::Orders, None);
        settle().await;
        scheduler.shutdown();
        let after = handler.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(scheduler.is_shut_down());
        assert!(scheduler.active_tasks().is_empty());
        assert_eq!(handler.fetches.load(Ordering::SeqCst), after);

        let _c = scheduler.subscribe(depth("MSFT"), None);
        assert!(scheduler.active_tasks().is_empty());
    }

    #[test]
    fn intervals_per_source() {
        let intervals = PollIntervals::default();
        assert_eq!(intervals.for_source(DataSource::Bars), Duration::from_secs(60));
        assert_eq!(intervals.for_source(DataSource::Depth), Duration::from_secs(1));
        assert_eq!(intervals.for_source(DataSource::Movers), Duration::from_secs(30));
    }
}
