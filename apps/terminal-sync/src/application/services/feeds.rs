//! Feed Router
//!
//! The scheduler's [`FeedHandler`]: fetches each poll key from the gateway
//! and routes the result to the normalizer and store subtree it belongs to.

use std::sync::Arc;

use async_trait::async_trait;

use super::orders::OrderManager;
use super::scheduler::{FeedHandler, FeedPayload};
use crate::application::ports::{GatewayError, MarketGateway};
use crate::application::store::{Mutation, Store};
use crate::domain::depth::{LadderConfig, normalize_depth, select_reference};
use crate::domain::market::normalize_bars;
use crate::domain::subscription::PollKey;

/// Routes poll results into the store.
#[derive(Clone)]
pub struct FeedRouter {
    store: Arc<Store>,
    gateway: Arc<dyn MarketGateway>,
    orders: OrderManager,
    ladder: LadderConfig,
}

impl std::fmt::Debug for FeedRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRouter")
            .field("ladder", &self.ladder)
            .finish_non_exhaustive()
    }
}

impl FeedRouter {
    /// Create a router.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn MarketGateway>,
        orders: OrderManager,
        ladder: LadderConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            orders,
            ladder,
        }
    }
}

#[async_trait]
impl FeedHandler for FeedRouter {
    async fn fetch(&self, key: &PollKey) -> Result<FeedPayload, GatewayError> {
        match key {
            PollKey::Bars { symbol, timeframe } => self
                .gateway
                .get_bars(symbol, *timeframe)
                .await
                .map(FeedPayload::Bars),
            PollKey::Depth { symbol } => self.gateway.get_depth(symbol).await.map(FeedPayload::Depth),
            PollKey::Orders => self.gateway.get_orders().await.map(FeedPayload::Orders),
            PollKey::Positions => self.gateway.get_positions().await.map(FeedPayload::Positions),
            PollKey::Movers { kind, limit } => self
                .gateway
                .get_movers(*kind, *limit)
                .await
                .map(FeedPayload::Movers),
        }
    }

    fn apply(&self, key: &PollKey, payload: FeedPayload) {
        let mutation = match (key, payload) {
            (PollKey::Bars { symbol, timeframe }, FeedPayload::Bars(bars)) => Mutation::ReplaceBars {
                symbol: symbol.clone(),
                timeframe: *timeframe,
                bars: normalize_bars(bars),
            },
            (PollKey::Depth { symbol }, FeedPayload::Depth(raw)) => {
                let newest_close = self.store.snapshot().newest_close(symbol);
                let reference = select_reference(newest_close, &raw, &self.ladder);
                Mutation::ReplaceDepth {
                    symbol: symbol.clone(),
                    ladder: normalize_depth(&raw, reference, &self.ladder),
                }
            }
            (PollKey::Orders, FeedPayload::Orders(orders)) => {
                self.orders.reconcile(orders);
                return;
            }
            (PollKey::Positions, FeedPayload::Positions(positions)) => {
                Mutation::ReplacePositions(positions)
            }
            (PollKey::Movers { kind, .. }, FeedPayload::Movers(movers)) => Mutation::ReplaceMovers {
                kind: *kind,
                movers,
            },
            (key, payload) => {
                tracing::error!(key = %key, payload = ?payload, "Payload does not match poll key");
                return;
            }
        };

        if !self.store.apply(mutation) {
            tracing::trace!(key = %key, "Poll result changed nothing");
        }
    }

    fn record_error(&self, key: &PollKey, error: &GatewayError) {
        self.store.apply(Mutation::FeedError {
            key: key.clone(),
            error: error.to_string(),
        });
    }
}
