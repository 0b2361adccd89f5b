use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel id carried by the virtual handle returned when a BUY is parked
/// in the deferred queue instead of being submitted. Strategies that store
/// the most recent handle as a local in-flight lock observe `is_pending()`
/// on it and wait, exactly as they would for a real submission.
pub const DEFERRED_VIRTUAL_ID: &str = "DEFERRED_VIRTUAL_ID";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Normalized order lifecycle state.
///
/// `Completed`, `Canceled` and `Rejected` are mutually exclusive terminal
/// states. `PendingSubmit` and `Accepted` are both "alive": venues that ack
/// asynchronously report `PendingSubmit` first, venues that ack inline may
/// report `Accepted` immediately.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    Accepted,
    Completed,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }
}

// ---------------------------------------------------------------------------
// FillSummary
// ---------------------------------------------------------------------------

/// Executed-fill summary attached to an order handle.
///
/// Only meaningful once `size > 0` (partial fill observed) or the order is
/// `Completed`; all zeros otherwise.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FillSummary {
    pub size: i64,
    pub avg_price: f64,
    pub value: f64,
    pub commission: f64,
}

// ---------------------------------------------------------------------------
// OrderHandle
// ---------------------------------------------------------------------------

/// The normalized, venue-agnostic view of one order submission.
///
/// Adapters produce these both as the return value of a submit and as the
/// payload of asynchronous status callbacks. The core never inspects raw
/// venue objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    /// Stable venue order identifier.
    pub id: String,
    /// Symbol in the venue's own rendering (alias resolution happens in the
    /// core, not here).
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    /// Size the venue actually accepted, when it reports one. Some venues
    /// shrink an order on the way in; the core books reservations against
    /// this value when present.
    pub submitted_size: Option<i64>,
    pub executed: FillSummary,
}

impl OrderHandle {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        status: OrderStatus,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            status,
            submitted_size: None,
            executed: FillSummary::default(),
        }
    }

    /// The virtual placeholder returned for a parked BUY: pending, buy-side,
    /// nothing executed. See [`DEFERRED_VIRTUAL_ID`].
    pub fn deferred(symbol: impl Into<String>) -> Self {
        Self::new(DEFERRED_VIRTUAL_ID, symbol, Side::Buy, OrderStatus::Accepted)
    }

    pub fn with_submitted_size(mut self, size: i64) -> Self {
        self.submitted_size = Some(size);
        self
    }

    pub fn with_executed(mut self, executed: FillSummary) -> Self {
        self.executed = executed;
        self
    }

    /// Alive in any form, including not-yet-acked.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::PendingSubmit | OrderStatus::Accepted
        )
    }

    pub fn is_accepted(&self) -> bool {
        self.status == OrderStatus::Accepted
    }

    pub fn is_completed(&self) -> bool {
        self.status == OrderStatus::Completed
    }

    pub fn is_canceled(&self) -> bool {
        self.status == OrderStatus::Canceled
    }

    pub fn is_rejected(&self) -> bool {
        self.status == OrderStatus::Rejected
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == Side::Sell
    }

    pub fn is_deferred_placeholder(&self) -> bool {
        self.id == DEFERRED_VIRTUAL_ID
    }
}

// ---------------------------------------------------------------------------
// Snapshot row / position
// ---------------------------------------------------------------------------

/// One row of the authoritative pending-order snapshot.
///
/// `id` is optional: some venue APIs return working orders without stable
/// identifiers, and the core degrades to symbol-level matching for those.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: Option<String>,
    pub symbol: String,
    pub side: Side,
    /// Unfilled remainder. Rows with `remaining <= 0` are ignored.
    pub remaining: f64,
}

impl PendingOrder {
    pub fn new(
        id: Option<String>,
        symbol: impl Into<String>,
        side: Side,
        remaining: f64,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            side,
            remaining,
        }
    }
}

/// Settled position as reported by the venue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub size: i64,
    pub avg_price: f64,
    /// Sellable today. Equals `size` on venues without T+1 settlement.
    pub available_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_mutually_exclusive_predicates() {
        let completed = OrderHandle::new("o1", "AAPL", Side::Buy, OrderStatus::Completed);
        assert!(completed.is_completed());
        assert!(!completed.is_canceled());
        assert!(!completed.is_rejected());
        assert!(!completed.is_pending());
        assert!(completed.is_terminal());
    }

    #[test]
    fn accepted_is_also_pending() {
        let h = OrderHandle::new("o1", "AAPL", Side::Buy, OrderStatus::Accepted);
        assert!(h.is_pending());
        assert!(h.is_accepted());
        assert!(!h.is_terminal());
    }

    #[test]
    fn deferred_placeholder_reads_as_inflight_buy() {
        let h = OrderHandle::deferred("SHSE.600000");
        assert_eq!(h.id, DEFERRED_VIRTUAL_ID);
        assert!(h.is_deferred_placeholder());
        assert!(h.is_pending());
        assert!(h.is_buy());
        assert!(!h.is_terminal());
        assert_eq!(h.executed, FillSummary::default());
    }
}
