//! Order Ledger
//!
//! Merges locally written (optimistic) orders with the authoritative order
//! list delivered by polls.
//!
//! Each order poll replaces the confirmed list wholesale. Optimistic entries
//! are matched against it by server id or echoed client id:
//! - a matched entry is dropped and the server's row is shown instead
//! - an unmatched entry stays visible and its missed-poll count grows
//! - unmatched entries expire after the optimistic timeout, rejected ones
//!   after the (shorter) rejected retention
//!
//! Terminal statuses reported by a poll are never regressed by the merged
//! view. A local cancel lives only on its optimistic entry, so once that
//! entry expires the polled status shows again.
//!
//! Local status changes go through [`OrderStateMachine`]; an illegal one
//! leaves the entry unchanged.
//!
//! The ledger never reads a clock; callers pass `now`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::model::{OptimisticOrder, OptimisticPhase, Order, OrderEntry, OrderId};
use super::state_machine::OrderStateMachine;
use super::value_objects::OrderStatus;

/// Default time an unmatched optimistic entry stays visible.
pub const DEFAULT_OPTIMISTIC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a rejected entry stays visible.
pub const DEFAULT_REJECTED_RETENTION: Duration = Duration::from_secs(10);

/// Ledger timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// How long an unmatched optimistic entry is kept.
    pub optimistic_timeout: Duration,
    /// How long a rejected entry is kept.
    pub rejected_retention: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            optimistic_timeout: DEFAULT_OPTIMISTIC_TIMEOUT,
            rejected_retention: DEFAULT_REJECTED_RETENTION,
        }
    }
}

/// Result of merging one order poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Optimistic entries the poll confirmed.
    pub matched: usize,
    /// Optimistic entries still waiting.
    pub retained: usize,
    /// Optimistic entries dropped because they expired.
    pub expired: usize,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    entry: OptimisticOrder,
    since: Instant,
}

/// Optimistic and confirmed orders plus the merge rules between them.
#[derive(Debug, Default)]
pub struct OrderLedger {
    settings: LedgerSettings,
    pending: Vec<PendingEntry>,
    confirmed: Vec<Order>,
    polled_terminal: HashMap<OrderId, OrderStatus>,
}

impl OrderLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new(settings: LedgerSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Number of optimistic entries.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of confirmed orders from the last poll.
    #[must_use]
    pub fn confirmed_len(&self) -> usize {
        self.confirmed.len()
    }

    /// Record a newly submitted order.
    pub fn insert_submitting(&mut self, order: Order, now: Instant) {
        self.pending.push(PendingEntry {
            entry: OptimisticOrder::submitting(order),
            since: now,
        });
    }

    /// Record the server's acceptance of a submitted order.
    ///
    /// The entry takes the server id. Its status becomes accepted unless
    /// the server already reports something further along.
    pub fn mark_accepted(&mut self, temporary_id: &OrderId, server: Order, now: Instant) {
        let Some(idx) = self.pending_index(temporary_id) else {
            return;
        };

        let mut order = server;
        if order.client_order_id.is_none() {
            order.client_order_id = Some(temporary_id.to_string());
        }
        if order.status == OrderStatus::Pending {
            order.status = OrderStatus::Accepted;
        }
        if order.status.is_terminal() {
            self.polled_terminal.insert(order.id.clone(), order.status);
        }

        if self.confirmed.iter().any(|c| order.same_order(c)) {
            self.pending.remove(idx);
            return;
        }

        let pending = &mut self.pending[idx];
        pending.entry.order = order;
        pending.entry.phase = OptimisticPhase::Accepted;
        pending.since = now;
    }

    /// Record that a submitted order was refused.
    ///
    /// Returns false if the id is unknown or the entry can no longer be
    /// rejected.
    pub fn mark_rejected(&mut self, temporary_id: &OrderId, reason: String, now: Instant) -> bool {
        let Some(idx) = self.pending_index(temporary_id) else {
            return false;
        };
        let pending = &mut self.pending[idx];
        if !OrderStateMachine::is_valid_transition(pending.entry.order.status, OrderStatus::Rejected)
        {
            return false;
        }
        pending.entry.order.status = OrderStatus::Rejected;
        pending.entry.phase = OptimisticPhase::Rejected { reason };
        pending.since = now;
        true
    }

    /// Record a cancel the server has acknowledged.
    ///
    /// The order shows as canceled until a poll confirms it or the
    /// optimistic timeout elapses. Returns false if the id is unknown or the
    /// order cannot move to canceled.
    pub fn mark_cancel_pending(&mut self, id: &OrderId, now: Instant) -> bool {
        let Some(current) = self.find(id) else {
            return false;
        };
        if !OrderStateMachine::is_valid_transition(current.status, OrderStatus::Canceled) {
            return false;
        }

        if let Some(idx) = self.pending_index(id) {
            let pending = &mut self.pending[idx];
            pending.entry.order.status = OrderStatus::Canceled;
            pending.entry.phase = OptimisticPhase::CancelPending;
            pending.entry.missed_polls = 0;
            pending.since = now;
            return true;
        }

        let Some(confirmed) = self.confirmed.iter().find(|o| &o.id == id) else {
            return false;
        };
        let mut order = confirmed.clone();
        order.status = OrderStatus::Canceled;
        self.pending.push(PendingEntry {
            entry: OptimisticOrder {
                order,
                phase: OptimisticPhase::CancelPending,
                missed_polls: 0,
            },
            since: now,
        });
        true
    }

    /// The currently visible order with this id, after merging.
    #[must_use]
    pub fn find(&self, id: &OrderId) -> Option<Order> {
        self.view()
            .into_iter()
            .map(|entry| match entry {
                OrderEntry::Optimistic(o) => o.order,
                OrderEntry::Confirmed(o) => o,
            })
            .find(|o| &o.id == id)
    }

    /// Merge a freshly polled authoritative order list.
    pub fn reconcile(&mut self, polled: Vec<Order>, now: Instant) -> ReconcileSummary {
        let pending = &self.pending;
        self.polled_terminal.retain(|id, _| {
            polled.iter().any(|o| &o.id == id) || pending.iter().any(|p| &p.entry.order.id == id)
        });
        for order in polled.iter().filter(|o| o.status.is_terminal()) {
            self.polled_terminal.insert(order.id.clone(), order.status);
        }
        self.confirmed = polled;

        let mut summary = ReconcileSummary::default();
        let confirmed = &self.confirmed;
        self.pending.retain_mut(|pending| {
            let Some(server) = confirmed.iter().find(|c| pending.entry.order.same_order(c)) else {
                pending.entry.missed_polls = pending.entry.missed_polls.saturating_add(1);
                return true;
            };

            let still_lagging = pending.entry.phase == OptimisticPhase::CancelPending
                && !server.status.is_terminal();
            if still_lagging {
                pending.entry.missed_polls = 0;
                true
            } else {
                summary.matched += 1;
                false
            }
        });

        summary.expired = self.prune_expired(now);
        summary.retained = self.pending.len();
        summary
    }

    /// Drop optimistic entries whose retention has elapsed.
    ///
    /// Returns how many were dropped.
    pub fn prune_expired(&mut self, now: Instant) -> usize {
        let settings = self.settings;
        let before = self.pending.len();
        self.pending.retain(|pending| {
            let limit = match pending.entry.phase {
                OptimisticPhase::Rejected { .. } => settings.rejected_retention,
                _ => settings.optimistic_timeout,
            };
            now.saturating_duration_since(pending.since) < limit
        });
        before - self.pending.len()
    }

    /// The merged orders view: unmatched optimistic entries first, then
    /// the confirmed list in poll order.
    #[must_use]
    pub fn view(&self) -> Vec<OrderEntry> {
        let mut entries = Vec::with_capacity(self.pending.len() + self.confirmed.len());

        for pending in &self.pending {
            let shadowing = self
                .confirmed
                .iter()
                .any(|c| pending.entry.order.same_order(c));
            if !shadowing {
                entries.push(OrderEntry::Optimistic(pending.entry.clone()));
            }
        }

        for order in &self.confirmed {
            if let Some(pending) = self
                .pending
                .iter()
                .find(|p| p.entry.order.same_order(order))
            {
                entries.push(OrderEntry::Optimistic(pending.entry.clone()));
                continue;
            }

            let mut order = order.clone();
            if let Some(local) = self.polled_terminal.get(&order.id) {
                order.status = OrderStateMachine::merge(*local, order.status);
            }
            entries.push(OrderEntry::Confirmed(order));
        }

        entries
    }

    fn pending_index(&self, id: &OrderId) -> Option<usize> {
        self.pending.iter().position(|p| &p.entry.order.id == id)
    }
}
