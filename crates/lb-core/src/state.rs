//! All mutable core state, guarded by the single ledger lock.
//!
//! Every table and counter the broker core mutates lives in [`CoreState`],
//! behind one `parking_lot::Mutex` owned by the facade. Helper methods here
//! take `&mut self` and never perform I/O, so holding the lock across them
//! is always safe; anything that talks to the venue happens in the facade
//! before the lock is taken.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;

use lb_adapter::{OrderHandle, Side};
use lb_symbols::symbols_match;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One in-flight BUY and the reservation it holds against virtual spent.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ActiveBuy {
    pub symbol: String,
    /// Size the venue accepted (reservations are booked against this, not
    /// the requested size).
    pub size: i64,
    pub price: f64,
    pub lot_size: i64,
    /// Downgrade cycles already consumed by this order's rejection chain.
    pub retries: u32,
    pub created_at: f64,
    /// Consecutive snapshots that did not show this order.
    pub miss_snapshots: u32,
    pub miss_since: Option<f64>,
}

impl ActiveBuy {
    pub fn reservation(&self, safety_multiplier: f64) -> f64 {
        self.size as f64 * self.price * safety_multiplier
    }
}

/// A downgraded BUY retry waiting for its rejected source order to be
/// confirmed gone from the venue before resubmission.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BufferedRetry {
    pub symbol: String,
    pub new_size: i64,
    pub price: f64,
    pub lot_size: i64,
    pub next_retries: u32,
    pub queued_at: f64,
    pub query_fail_count: u32,
    pub query_fail_since: Option<f64>,
    pub submit_fail_count: u32,
    pub warned_timeout: bool,
    pub warned_query_unavailable: bool,
    pub warned_uncertain: bool,
}

impl BufferedRetry {
    pub fn new(
        symbol: impl Into<String>,
        new_size: i64,
        price: f64,
        lot_size: i64,
        next_retries: u32,
        queued_at: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            new_size,
            price,
            lot_size,
            next_retries,
            queued_at,
            query_fail_count: 0,
            query_fail_since: None,
            submit_fail_count: 0,
            warned_timeout: false,
            warned_query_unavailable: false,
            warned_uncertain: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum IntentKind {
    TargetPercent,
    TargetValue,
}

/// A BUY intent parked until cash frees up or the uncertain window closes.
/// Replay re-dispatches through the intent translator, so price, NAV and
/// risk locks are re-evaluated at replay time.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DeferredIntent {
    pub kind: IntentKind,
    pub symbol: String,
    pub target: f64,
    pub created_at: f64,
    pub fail_count: u32,
}

// ---------------------------------------------------------------------------
// Order state memory
// ---------------------------------------------------------------------------

/// Last-observed state of one order id.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OrderStateNote {
    pub symbol: String,
    pub side: Option<Side>,
    pub terminal: bool,
    pub pending: bool,
    pub updated_at: f64,
}

/// Bounded map of order id to last-observed state.
///
/// This is the safe fallback when the pending snapshot is unavailable: a
/// noted terminal means "definitely not pending", a noted pending means
/// "assume still live". Entries age out by TTL and the map evicts oldest
/// first past the item cap.
#[derive(Clone, Debug)]
pub(crate) struct OrderStateMemory {
    entries: BTreeMap<String, OrderStateNote>,
    max_items: usize,
    ttl_secs: f64,
}

impl OrderStateMemory {
    pub fn new(max_items: usize, ttl_secs: f64) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_items: max_items.max(100),
            ttl_secs,
        }
    }

    pub fn remember(&mut self, handle: &OrderHandle, now: f64) {
        let id = handle.id.trim();
        if id.is_empty() {
            return;
        }
        let terminal = handle.is_terminal();
        self.entries.insert(
            id.to_string(),
            OrderStateNote {
                symbol: handle.symbol.clone(),
                side: Some(handle.side),
                terminal,
                pending: !terminal && handle.is_pending(),
                updated_at: now,
            },
        );
        self.trim(now);
    }

    pub fn get(&self, order_id: &str) -> Option<&OrderStateNote> {
        self.entries.get(order_id.trim())
    }

    /// Tri-state pending answer from memory alone:
    /// `Some(false)` = observed terminal, `Some(true)` = observed live,
    /// `None` = no usable note (unknown side/symbol mismatch counts as no
    /// note rather than a veto of the caller's query).
    pub fn pending_state(
        &self,
        order_id: &str,
        symbol: Option<&str>,
        side: Option<Side>,
    ) -> Option<bool> {
        let note = self.get(order_id)?;

        if let (Some(want), Some(have)) = (side, note.side) {
            if want != have {
                return None;
            }
        }

        if let Some(sym) = symbol.map(str::trim).filter(|s| !s.is_empty()) {
            let noted = note.symbol.trim();
            // "Unknown" placeholders cannot constrain the match, so they do
            // not veto the note.
            let noted_known =
                !noted.is_empty() && !matches!(noted.to_uppercase().as_str(), "UNKNOWN" | "UNK" | "?");
            if noted_known && !symbols_match(noted, sym) {
                return None;
            }
        }

        if note.terminal {
            return Some(false);
        }
        if note.pending {
            return Some(true);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn trim(&mut self, now: f64) {
        if self.ttl_secs > 0.0 {
            self.entries
                .retain(|_, note| now - note.updated_at <= self.ttl_secs);
        }

        if self.entries.len() > self.max_items {
            let overflow = self.entries.len() - self.max_items;
            let mut by_age: Vec<(f64, String)> = self
                .entries
                .iter()
                .map(|(id, note)| (note.updated_at, id.clone()))
                .collect();
            by_age.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            for (_, id) in by_age.into_iter().take(overflow) {
                self.entries.remove(&id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot view
// ---------------------------------------------------------------------------

/// How the reconciler sees the pending snapshot for one pass.
///
/// `Unavailable` covers fetch failure, throttling, and invocation from a
/// path that already holds the ledger lock (which must not start a network
/// fetch). Reconciliation under `Unavailable` is strictly conservative.
#[derive(Copy, Clone, Debug)]
pub(crate) enum SnapshotView<'a> {
    Fresh(&'a [lb_adapter::PendingOrder]),
    Unavailable(&'a str),
}

pub(crate) fn snapshot_has_pending_sell(rows: &[lb_adapter::PendingOrder]) -> bool {
    rows.iter()
        .any(|row| row.side == Side::Sell && row.remaining > 0.0)
}

// ---------------------------------------------------------------------------
// CoreState
// ---------------------------------------------------------------------------

/// Everything the ledger lock guards.
#[derive(Clone, Debug)]
pub(crate) struct CoreState {
    /// Sum of all active-buy reservations. The ledger invariant pairs every
    /// mutation of this scalar with the matching table edit.
    pub virtual_spent_cash: f64,
    pub active_buys: BTreeMap<String, ActiveBuy>,
    pub pending_sells: BTreeSet<String>,
    pub buffered_retries: BTreeMap<String, BufferedRetry>,
    pub deferred: Vec<DeferredIntent>,
    pub order_memory: OrderStateMemory,
    pub risk_locked: BTreeSet<String>,
    /// Symbols registered for NAV computation.
    pub symbols: Vec<String>,

    pub pending_sell_empty_snapshots: u32,
    pub pending_sell_empty_since: Option<f64>,

    pub snapshot_fail_count: u32,
    pub snapshot_fail_since: Option<f64>,
    pub uncertain_until: f64,

    pub cash_degraded_until: f64,
    pub cash_degraded_reason: String,
    pub last_synced_cash: f64,

    pub last_self_heal: f64,
    pub last_snapshot: f64,
    pub last_deferred_replay: f64,
    pub placeholder_empty_since: Option<f64>,
    pub last_uncertain_replay_log: f64,
    pub last_no_snapshot_drain_log: f64,

    pub datetime: Option<NaiveDateTime>,
}

impl CoreState {
    pub fn new(memory_max_items: usize, memory_ttl_secs: f64) -> Self {
        Self {
            virtual_spent_cash: 0.0,
            active_buys: BTreeMap::new(),
            pending_sells: BTreeSet::new(),
            buffered_retries: BTreeMap::new(),
            deferred: Vec::new(),
            order_memory: OrderStateMemory::new(memory_max_items, memory_ttl_secs),
            risk_locked: BTreeSet::new(),
            symbols: Vec::new(),
            pending_sell_empty_snapshots: 0,
            pending_sell_empty_since: None,
            snapshot_fail_count: 0,
            snapshot_fail_since: None,
            uncertain_until: f64::NEG_INFINITY,
            cash_degraded_until: f64::NEG_INFINITY,
            cash_degraded_reason: String::new(),
            last_synced_cash: 0.0,
            last_self_heal: f64::NEG_INFINITY,
            last_snapshot: f64::NEG_INFINITY,
            last_deferred_replay: f64::NEG_INFINITY,
            placeholder_empty_since: None,
            last_uncertain_replay_log: f64::NEG_INFINITY,
            last_no_snapshot_drain_log: f64::NEG_INFINITY,
            datetime: None,
        }
    }

    pub fn has_backlog(&self) -> bool {
        !self.deferred.is_empty()
            || !self.pending_sells.is_empty()
            || !self.active_buys.is_empty()
            || !self.buffered_retries.is_empty()
    }

    pub fn has_stale_state(&self) -> bool {
        self.has_backlog() || self.virtual_spent_cash > 0.0
    }

    pub fn is_uncertain(&self, now: f64) -> bool {
        self.uncertain_until > now
    }

    pub fn is_cash_degraded(&self, now: f64) -> bool {
        self.cash_degraded_until > now
    }

    /// Remove an active buy and release its reservation. Returns the record
    /// and the refunded amount, or `None` when the id is unknown (repeated
    /// terminal callbacks land here and become no-ops).
    pub fn pop_buy_and_refund(
        &mut self,
        order_id: &str,
        safety_multiplier: f64,
    ) -> Option<(ActiveBuy, f64)> {
        let buy = self.active_buys.remove(order_id)?;
        let refund = buy.reservation(safety_multiplier);
        self.virtual_spent_cash = (self.virtual_spent_cash - refund).max(0.0);
        Some((buy, refund))
    }

    /// Wipe every queue, tracker and safety window. Used by the day-rollover
    /// / long-gap reset and by the operator rescue entry point. Registered
    /// symbols and the current datetime survive.
    pub fn reset_stale(&mut self) {
        self.deferred.clear();
        self.pending_sells.clear();
        self.active_buys.clear();
        self.buffered_retries.clear();
        self.order_memory.clear();
        self.pending_sell_empty_snapshots = 0;
        self.pending_sell_empty_since = None;
        self.snapshot_fail_count = 0;
        self.snapshot_fail_since = None;
        self.uncertain_until = f64::NEG_INFINITY;
        self.cash_degraded_until = f64::NEG_INFINITY;
        self.cash_degraded_reason.clear();
        self.last_deferred_replay = f64::NEG_INFINITY;
        self.placeholder_empty_since = None;
        self.last_uncertain_replay_log = f64::NEG_INFINITY;
        self.virtual_spent_cash = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lb_adapter::OrderStatus;

    fn handle(id: &str, side: Side, status: OrderStatus) -> OrderHandle {
        OrderHandle::new(id, "SHSE.600000", side, status)
    }

    #[test]
    fn memory_ttl_evicts_old_notes() {
        let mut mem = OrderStateMemory::new(100, 10.0);
        mem.remember(&handle("a", Side::Buy, OrderStatus::Accepted), 0.0);
        mem.remember(&handle("b", Side::Buy, OrderStatus::Accepted), 8.0);
        // Remember at t=15 triggers trim: "a" is 15s old, past the 10s TTL.
        mem.remember(&handle("c", Side::Buy, OrderStatus::Accepted), 15.0);
        assert!(mem.get("a").is_none());
        assert!(mem.get("b").is_some());
        assert!(mem.get("c").is_some());
    }

    #[test]
    fn memory_caps_items_evicting_oldest_first() {
        // max_items clamps to 100.
        let mut mem = OrderStateMemory::new(1, 0.0);
        for i in 0..105 {
            mem.remember(
                &handle(&format!("o{i}"), Side::Buy, OrderStatus::Accepted),
                i as f64,
            );
        }
        assert_eq!(mem.len(), 100);
        assert!(mem.get("o0").is_none());
        assert!(mem.get("o104").is_some());
    }

    #[test]
    fn memory_pending_state_tristate() {
        let mut mem = OrderStateMemory::new(100, 0.0);
        mem.remember(&handle("live", Side::Buy, OrderStatus::Accepted), 0.0);
        mem.remember(&handle("done", Side::Buy, OrderStatus::Completed), 0.0);

        assert_eq!(mem.pending_state("live", None, None), Some(true));
        assert_eq!(mem.pending_state("done", None, None), Some(false));
        assert_eq!(mem.pending_state("missing", None, None), None);
        // Side mismatch disqualifies the note.
        assert_eq!(mem.pending_state("live", None, Some(Side::Sell)), None);
        // Alias-matching symbol constraint still resolves.
        assert_eq!(
            mem.pending_state("live", Some("600000"), Some(Side::Buy)),
            Some(true)
        );
        // Conflicting symbol disqualifies.
        assert_eq!(mem.pending_state("live", Some("AAPL"), Some(Side::Buy)), None);
    }

    #[test]
    fn pop_buy_refunds_and_clamps_at_zero() {
        let mut st = CoreState::new(100, 0.0);
        let m = 1.0033;
        st.active_buys.insert(
            "o1".to_string(),
            ActiveBuy {
                symbol: "AAPL".to_string(),
                size: 100,
                price: 10.0,
                lot_size: 100,
                retries: 0,
                created_at: 0.0,
                miss_snapshots: 0,
                miss_since: None,
            },
        );
        st.virtual_spent_cash = 100.0 * 10.0 * m;

        let (buy, refund) = st.pop_buy_and_refund("o1", m).unwrap();
        assert_eq!(buy.size, 100);
        assert!((refund - 1003.3).abs() < 1e-9);
        assert_eq!(st.virtual_spent_cash, 0.0);

        // Second pop of the same id is a no-op.
        assert!(st.pop_buy_and_refund("o1", m).is_none());
    }

    #[test]
    fn stale_state_includes_virtual_spend_alone() {
        let mut st = CoreState::new(100, 0.0);
        assert!(!st.has_stale_state());
        st.virtual_spent_cash = 1.0;
        assert!(st.has_stale_state());
        assert!(!st.has_backlog());
        st.reset_stale();
        assert!(!st.has_stale_state());
    }
}
