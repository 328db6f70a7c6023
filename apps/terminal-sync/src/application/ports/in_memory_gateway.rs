//! In-memory gateway.
//!
//! A scriptable [`MarketGateway`] that serves canned data, can be told to
//! fail or slow down per data source, and records every call. Used by the
//! service tests and the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::market_gateway_port::{GatewayError, MarketGateway};
use crate::domain::market::{Bar, Mover, MoverKind, Position, RawDepth, Symbol, Timeframe};
use crate::domain::order::{Order, OrderId, OrderRequest, OrderStatus};
use crate::domain::scan::{ScanPreset, ScanRequest, ScanRow};
use crate::domain::subscription::DataSource;

#[derive(Debug, Default)]
struct Script {
    bars: HashMap<(Symbol, Timeframe), Vec<Bar>>,
    depth: HashMap<Symbol, RawDepth>,
    orders: Vec<Order>,
    positions: Vec<Position>,
    movers: HashMap<MoverKind, Vec<Mover>>,
    scan_rows: Vec<ScanRow>,
    presets: Vec<ScanPreset>,
    failures: HashMap<DataSource, GatewayError>,
    latency: HashMap<DataSource, Duration>,
    place_latency: Option<Duration>,
    place_failure: Option<GatewayError>,
    cancel_failure: Option<GatewayError>,
}

#[derive(Debug, Default)]
struct Calls {
    per_source: HashMap<DataSource, usize>,
    in_flight: HashMap<DataSource, usize>,
    max_in_flight: HashMap<DataSource, usize>,
    depth_symbols: Vec<Symbol>,
    placed: Vec<OrderRequest>,
    canceled: Vec<OrderId>,
    scans: Vec<ScanRequest>,
}

/// Scriptable in-memory gateway.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
    next_id: AtomicU64,
}

/// Decrements the in-flight count when a call completes or is dropped.
struct InFlight<'a> {
    calls: &'a Mutex<Calls>,
    source: DataSource,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut calls = self.calls.lock();
        if let Some(n) = calls.in_flight.get_mut(&self.source) {
            *n = n.saturating_sub(1);
        }
    }
}

impl InMemoryGateway {
    /// Create an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Serve these bars for a symbol and timeframe.
    pub fn set_bars(&self, symbol: Symbol, timeframe: Timeframe, bars: Vec<Bar>) {
        self.script.lock().bars.insert((symbol, timeframe), bars);
    }

    /// Serve this depth snapshot for a symbol.
    pub fn set_depth(&self, symbol: Symbol, depth: RawDepth) {
        self.script.lock().depth.insert(symbol, depth);
    }

    /// Serve this order list.
    pub fn set_orders(&self, orders: Vec<Order>) {
        self.script.lock().orders = orders;
    }

    /// Serve these positions.
    pub fn set_positions(&self, positions: Vec<Position>) {
        self.script.lock().positions = positions;
    }

    /// Serve this movers list.
    pub fn set_movers(&self, kind: MoverKind, movers: Vec<Mover>) {
        self.script.lock().movers.insert(kind, movers);
    }

    /// Serve these scan rows; scans filter and truncate them.
    pub fn set_scan_rows(&self, rows: Vec<ScanRow>) {
        self.script.lock().scan_rows = rows;
    }

    /// Serve these presets.
    pub fn set_presets(&self, presets: Vec<ScanPreset>) {
        self.script.lock().presets = presets;
    }

    /// Make every fetch for `source` fail with `error`.
    pub fn fail(&self, source: DataSource, error: GatewayError) {
        self.script.lock().failures.insert(source, error);
    }

    /// Stop failing fetches for `source`.
    pub fn recover(&self, source: DataSource) {
        self.script.lock().failures.remove(&source);
    }

    /// Delay every fetch for `source`.
    pub fn set_latency(&self, source: DataSource, latency: Duration) {
        self.script.lock().latency.insert(source, latency);
    }

    /// Delay order submissions by `latency`.
    pub fn set_place_latency(&self, latency: Duration) {
        self.script.lock().place_latency = Some(latency);
    }

    /// Make the next order placement fail.
    pub fn fail_next_order(&self, error: GatewayError) {
        self.script.lock().place_failure = Some(error);
    }

    /// Make the next cancel fail.
    pub fn fail_next_cancel(&self, error: GatewayError) {
        self.script.lock().cancel_failure = Some(error);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Number of fetches started for `source`.
    #[must_use]
    pub fn calls(&self, source: DataSource) -> usize {
        self.calls.lock().per_source.get(&source).copied().unwrap_or(0)
    }

    /// Highest number of concurrent fetches seen for `source`.
    #[must_use]
    pub fn max_in_flight(&self, source: DataSource) -> usize {
        self.calls
            .lock()
            .max_in_flight
            .get(&source)
            .copied()
            .unwrap_or(0)
    }

    /// Symbols requested from the depth endpoint, in call order.
    #[must_use]
    pub fn depth_requests(&self) -> Vec<Symbol> {
        self.calls.lock().depth_symbols.clone()
    }

    /// Order requests received, in call order.
    #[must_use]
    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.calls.lock().placed.clone()
    }

    /// Cancel requests received, in call order.
    #[must_use]
    pub fn canceled_orders(&self) -> Vec<OrderId> {
        self.calls.lock().canceled.clone()
    }

    /// Scan requests received, in call order.
    #[must_use]
    pub fn scan_requests(&self) -> Vec<ScanRequest> {
        self.calls.lock().scans.clone()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn begin(&self, source: DataSource) -> Result<InFlight<'_>, GatewayError> {
        {
            let mut calls = self.calls.lock();
            *calls.per_source.entry(source).or_insert(0) += 1;
            let current = {
                let n = calls.in_flight.entry(source).or_insert(0);
                *n += 1;
                *n
            };
            let max = calls.max_in_flight.entry(source).or_insert(0);
            *max = (*max).max(current);
        }
        let guard = InFlight {
            calls: &self.calls,
            source,
        };

        let latency = self.script.lock().latency.get(&source).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match self.script.lock().failures.get(&source) {
            Some(err) => Err(err.clone()),
            None => Ok(guard),
        }
    }
}

#[async_trait]
impl MarketGateway for InMemoryGateway {
    async fn get_bars(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, GatewayError> {
        let _guard = self.begin(DataSource::Bars).await?;
        self.script
            .lock()
            .bars
            .get(&(symbol.clone(), timeframe))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("no bars for {symbol}")))
    }

    async fn get_depth(&self, symbol: &Symbol) -> Result<RawDepth, GatewayError> {
        self.calls.lock().depth_symbols.push(symbol.clone());
        let _guard = self.begin(DataSource::Depth).await?;
        Ok(self
            .script
            .lock()
            .depth
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_orders(&self) -> Result<Vec<Order>, GatewayError> {
        let _guard = self.begin(DataSource::Orders).await?;
        Ok(self.script.lock().orders.clone())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, GatewayError> {
        let _guard = self.begin(DataSource::Positions).await?;
        Ok(self.script.lock().positions.clone())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, GatewayError> {
        self.calls.lock().placed.push(request.clone());
        let latency = self.script.lock().place_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.script.lock().place_failure.take() {
            return Err(err);
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut order = request.to_pending_order();
        order.id = OrderId::new(format!("srv-{n}"));
        order.status = OrderStatus::Accepted;

        self.script.lock().orders.push(order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, id: &OrderId) -> Result<(), GatewayError> {
        self.calls.lock().canceled.push(id.clone());
        let mut script = self.script.lock();
        if let Some(err) = script.cancel_failure.take() {
            return Err(err);
        }

        let order = script
            .orders
            .iter_mut()
            .find(|o| &o.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("order {id}")))?;
        if order.status.is_terminal() {
            return Err(GatewayError::RejectedByServer(format!(
                "order {id} is {}",
                order.status
            )));
        }
        order.status = OrderStatus::Canceled;
        Ok(())
    }

    async fn get_movers(&self, kind: MoverKind, limit: usize) -> Result<Vec<Mover>, GatewayError> {
        let _guard = self.begin(DataSource::Movers).await?;
        let mut movers = self
            .script
            .lock()
            .movers
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        movers.truncate(limit);
        Ok(movers)
    }

    async fn run_scan(&self, request: &ScanRequest) -> Result<Vec<ScanRow>, GatewayError> {
        self.calls.lock().scans.push(request.clone());
        Ok(self
            .script
            .lock()
            .scan_rows
            .iter()
            .filter(|row| request.filters.iter().all(|f| f.matches(row)))
            .take(request.limit)
            .cloned()
            .collect())
    }

    async fn get_scan_presets(&self) -> Result<Vec<ScanPreset>, GatewayError> {
        Ok(self.script.lock().presets.clone())
    }
}
