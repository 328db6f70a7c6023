//! Terminal Sync Facade
//!
//! Wires the store, scheduler, order manager and scan service together and
//! owns the subscriber slots that follow the selected symbol.

use std::sync::Arc;

use parking_lot::Mutex;

use super::feeds::FeedRouter;
use super::orders::{OrderError, OrderManager};
use super::scan::{ScanError, ScanService};
use super::scheduler::{PollIntervals, PollScheduler, SubscriptionHandle};
use crate::application::ports::MarketGateway;
use crate::application::store::{Mutation, Snapshot, Store};
use crate::domain::ValidationError;
use crate::domain::depth::LadderConfig;
use crate::domain::market::{MoverKind, Symbol, Timeframe};
use crate::domain::order::{LedgerSettings, Order, OrderId, OrderTicket};
use crate::domain::scan::{DEFAULT_MAX_LIMIT, FilterInput, ScanPreset, ScanRow};
use crate::domain::subscription::PollKey;

/// Default number of rows per movers list.
pub const DEFAULT_MOVERS_LIMIT: usize = 20;

/// Everything the facade needs to know up front.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalOptions {
    /// Per-source poll intervals.
    pub intervals: PollIntervals,
    /// Depth ladder shape.
    pub ladder: LadderConfig,
    /// Optimistic order retention.
    pub ledger: LedgerSettings,
    /// Upper bound for scan limits.
    pub scan_max_limit: usize,
    /// Rows per movers list.
    pub movers_limit: usize,
    /// Initially selected symbol.
    pub symbol: Symbol,
    /// Initial watchlist.
    pub watchlist: Vec<Symbol>,
    /// Initial chart timeframe.
    pub timeframe: Timeframe,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        let snapshot = Snapshot::default();
        Self {
            intervals: PollIntervals::default(),
            ladder: LadderConfig::default(),
            ledger: LedgerSettings::default(),
            scan_max_limit: DEFAULT_MAX_LIMIT,
            movers_limit: DEFAULT_MOVERS_LIMIT,
            symbol: snapshot.selected_symbol,
            watchlist: snapshot.watchlist,
            timeframe: snapshot.timeframe,
        }
    }
}

#[derive(Default)]
struct Slots {
    started: bool,
    account: Vec<SubscriptionHandle>,
    depth: Option<SubscriptionHandle>,
    bars: Option<SubscriptionHandle>,
}

/// The synchronization core, assembled.
///
/// Store listeners run synchronously inside poll and command handling and
/// must not call back into the facade.
pub struct TerminalSync {
    store: Arc<Store>,
    scheduler: PollScheduler,
    orders: OrderManager,
    scan: ScanService,
    movers_limit: usize,
    slots: Mutex<Slots>,
}

impl std::fmt::Debug for TerminalSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSync")
            .field("store", &self.store)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl TerminalSync {
    /// Assemble the core around `gateway`. Nothing is polled until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(gateway: Arc<dyn MarketGateway>, options: TerminalOptions) -> Self {
        let mut watchlist: Vec<Symbol> = Vec::with_capacity(options.watchlist.len());
        for symbol in options.watchlist {
            if !watchlist.contains(&symbol) {
                watchlist.push(symbol);
            }
        }

        let store = Arc::new(Store::with_snapshot(Snapshot {
            selected_symbol: options.symbol,
            timeframe: options.timeframe,
            watchlist,
            ..Snapshot::default()
        }));
        let orders = OrderManager::new(Arc::clone(&store), Arc::clone(&gateway), options.ledger);
        let router = FeedRouter::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            orders.clone(),
            options.ladder,
        );
        let scheduler = PollScheduler::new(Arc::new(router), options.intervals);
        let scan = ScanService::new(Arc::clone(&store), gateway, options.scan_max_limit);

        Self {
            store,
            scheduler,
            orders,
            scan,
            movers_limit: options.movers_limit,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Start polling: orders, positions, the movers lists, and depth and
    /// bars for the selected symbol. Calling it twice does nothing.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        let mut slots = self.slots.lock();
        if slots.started {
            tracing::warn!("Terminal sync already started");
            return;
        }

        let snapshot = self.store.snapshot();
        let mut account = vec![
            self.scheduler.subscribe(PollKey::Orders, None),
            self.scheduler.subscribe(PollKey::Positions, None),
        ];
        for kind in MoverKind::all() {
            account.push(
                self.scheduler
                    .subscribe(PollKey::movers(*kind, self.movers_limit), None),
            );
        }
        slots.account = account;
        slots.depth = Some(
            self.scheduler
                .subscribe(PollKey::depth(snapshot.selected_symbol.clone()), None),
        );
        slots.bars = Some(self.scheduler.subscribe(
            PollKey::bars(snapshot.selected_symbol.clone(), snapshot.timeframe),
            None,
        ));
        slots.started = true;

        tracing::info!(
            symbol = %snapshot.selected_symbol,
            timeframe = %snapshot.timeframe,
            tasks = self.scheduler.stats().task_count,
            "Terminal sync started"
        );
    }

    /// Cancel every poll task.
    pub fn shutdown(&self) {
        let mut guard = self.slots.lock();
        let slots = &mut *guard;
        let handles: Vec<SubscriptionHandle> = slots
            .account
            .drain(..)
            .chain(slots.depth.take())
            .chain(slots.bars.take())
            .collect();
        for handle in handles {
            self.scheduler.unsubscribe(handle);
        }
        self.scheduler.shutdown();
        tracing::info!("Terminal sync stopped");
    }

    /// Change the symbol of interest.
    ///
    /// Depth and bars polling move to the new symbol before the selection
    /// is published, so no result for the old symbol lands afterwards.
    ///
    /// # Errors
    ///
    /// `ValidationError` for an empty or malformed symbol.
    pub fn select_symbol(&self, symbol: &str) -> Result<(), ValidationError> {
        let symbol = Symbol::parse(symbol)?;
        let mut slots = self.slots.lock();
        let timeframe = self.store.snapshot().timeframe;

        if let Some(handle) = slots.depth.as_mut() {
            self.scheduler.rekey(handle, PollKey::depth(symbol.clone()));
        }
        if let Some(handle) = slots.bars.as_mut() {
            self.scheduler
                .rekey(handle, PollKey::bars(symbol.clone(), timeframe));
        }

        if self.store.apply(Mutation::SelectSymbol(symbol.clone())) {
            tracing::info!(symbol = %symbol, "Symbol selected");
        }
        Ok(())
    }

    /// Change the chart timeframe; bars polling follows.
    pub fn set_timeframe(&self, timeframe: Timeframe) {
        let mut slots = self.slots.lock();
        let symbol = self.store.snapshot().selected_symbol.clone();

        if let Some(handle) = slots.bars.as_mut() {
            self.scheduler.rekey(handle, PollKey::bars(symbol, timeframe));
        }
        if self.store.apply(Mutation::SetTimeframe(timeframe)) {
            tracing::info!(timeframe = %timeframe, "Timeframe changed");
        }
    }

    /// Append a symbol to the watchlist. Returns false if it was already
    /// listed.
    ///
    /// # Errors
    ///
    /// `ValidationError` for an empty or malformed symbol.
    pub fn add_to_watchlist(&self, symbol: &str) -> Result<bool, ValidationError> {
        let symbol = Symbol::parse(symbol)?;
        let _slots = self.slots.lock();

        let mut watchlist = self.store.snapshot().watchlist.clone();
        if watchlist.contains(&symbol) {
            return Ok(false);
        }
        watchlist.push(symbol);
        Ok(self.store.apply(Mutation::ReplaceWatchlist(watchlist)))
    }

    /// Remove a symbol from the watchlist. Returns false if it was not
    /// listed.
    ///
    /// # Errors
    ///
    /// `ValidationError` for an empty or malformed symbol.
    pub fn remove_from_watchlist(&self, symbol: &str) -> Result<bool, ValidationError> {
        let symbol = Symbol::parse(symbol)?;
        let _slots = self.slots.lock();

        let mut watchlist = self.store.snapshot().watchlist.clone();
        let before = watchlist.len();
        watchlist.retain(|s| s != &symbol);
        if watchlist.len() == before {
            return Ok(false);
        }
        Ok(self.store.apply(Mutation::ReplaceWatchlist(watchlist)))
    }

    /// Submit an order. See [`OrderManager::place`].
    ///
    /// # Errors
    ///
    /// See [`OrderManager::place`].
    pub async fn place_order(&self, ticket: OrderTicket) -> Result<Order, OrderError> {
        self.orders.place(ticket).await
    }

    /// Cancel an order. See [`OrderManager::cancel`].
    ///
    /// # Errors
    ///
    /// See [`OrderManager::cancel`].
    pub async fn cancel_order(&self, id: &OrderId) -> Result<(), OrderError> {
        self.orders.cancel(id).await
    }

    /// Run a scan. See [`ScanService::run`].
    ///
    /// # Errors
    ///
    /// See [`ScanService::run`].
    pub async fn run_scan(
        &self,
        filters: &[FilterInput],
        universe: &str,
        limit: usize,
    ) -> Result<Vec<ScanRow>, ScanError> {
        self.scan.run(filters, universe, limit).await
    }

    /// Fetch scan presets.
    ///
    /// # Errors
    ///
    /// See [`ScanService::presets`].
    pub async fn scan_presets(&self) -> Result<Vec<ScanPreset>, ScanError> {
        self.scan.presets().await
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    /// The scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// The order manager.
    #[must_use]
    pub const fn orders(&self) -> &OrderManager {
        &self.orders
    }

    /// The scan service.
    #[must_use]
    pub const fn scan(&self) -> &ScanService {
        &self.scan
    }
}
