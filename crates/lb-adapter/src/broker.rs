use std::fmt;

use crate::order::{OrderHandle, PendingOrder, Position, Side};

/// Convenience alias for adapter operation results.
pub type AdapterResult<T> = Result<T, AdapterError>;

// ---------------------------------------------------------------------------
// AdapterError
// ---------------------------------------------------------------------------

/// Failure of a venue operation, split by retry semantics.
///
/// `Transient` covers timeouts, disconnects and throttle responses; callers
/// may retry within their own bounds. `Permanent` covers everything the venue
/// will keep refusing (unknown symbol, closed session, bad credentials).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterError {
    Transient(String),
    Permanent(String),
}

impl AdapterError {
    pub fn transient(msg: impl Into<String>) -> Self {
        AdapterError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        AdapterError::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Transient(msg) => write!(f, "transient adapter error: {msg}"),
            AdapterError::Permanent(msg) => write!(f, "permanent adapter error: {msg}"),
        }
    }
}

impl std::error::Error for AdapterError {}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// What a venue driver can actually provide, declared up front.
///
/// The default is the conservative set: no declared capability, and the core
/// treats the venue accordingly (no id-precise snapshot reconciliation, whole
/// lots only, no snapshot enrichment of expected position size).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Pending-order snapshots carry stable order ids. Without this the
    /// reconciler never performs id set-difference updates.
    pub snapshot_order_ids: bool,
    /// Venue accepts sizes that are not whole-lot multiples; the core then
    /// sizes with an effective lot of 1.
    pub fractional_lots: bool,
    /// `fetch_pending_orders` returns the complete working-order book in one
    /// call. Without this the core does not fold in-flight orders into
    /// expected position size (settled position only).
    pub batch_pending: bool,
}

// ---------------------------------------------------------------------------
// BrokerAdapter
// ---------------------------------------------------------------------------

/// The minimum atomic operation set a venue driver must expose.
///
/// Every method is atomic from the core's point of view and may block on
/// network I/O, so the core never calls any of them while holding its ledger
/// lock. Thread-safety of the underlying connection is the adapter's
/// responsibility; the core issues calls from multiple threads without
/// serializing them.
pub trait BrokerAdapter: Send + Sync {
    /// Authoritative settled cash.
    fn fetch_cash(&self) -> AdapterResult<f64>;

    /// Settled position for one symbol. Flat positions return the default
    /// (all-zero) shape rather than an error.
    fn fetch_position(&self, symbol: &str) -> AdapterResult<Position>;

    /// Current mark price. Adapters fall back to close/last/mid when the
    /// live tick is invalid; a non-positive price is reported as an error,
    /// never as a value.
    fn fetch_price(&self, symbol: &str) -> AdapterResult<f64>;

    /// Authoritative pending-order snapshot.
    fn fetch_pending_orders(&self) -> AdapterResult<Vec<PendingOrder>>;

    /// Submit an order. `Ok(None)` is a venue-level rejection at submit time
    /// (distinct from a transport failure, which is an `Err`).
    fn submit_order(
        &self,
        symbol: &str,
        side: Side,
        size: i64,
        reference_price: f64,
    ) -> AdapterResult<Option<OrderHandle>>;

    fn is_live_mode(&self) -> bool;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

/// Shared-ownership delegation, so one adapter instance can serve the core
/// and a monitoring surface (or a test harness) at the same time.
impl<T: BrokerAdapter + ?Sized> BrokerAdapter for std::sync::Arc<T> {
    fn fetch_cash(&self) -> AdapterResult<f64> {
        (**self).fetch_cash()
    }

    fn fetch_position(&self, symbol: &str) -> AdapterResult<Position> {
        (**self).fetch_position(symbol)
    }

    fn fetch_price(&self, symbol: &str) -> AdapterResult<f64> {
        (**self).fetch_price(symbol)
    }

    fn fetch_pending_orders(&self) -> AdapterResult<Vec<PendingOrder>> {
        (**self).fetch_pending_orders()
    }

    fn submit_order(
        &self,
        symbol: &str,
        side: Side,
        size: i64,
        reference_price: f64,
    ) -> AdapterResult<Option<OrderHandle>> {
        (**self).submit_order(symbol, side, size, reference_price)
    }

    fn is_live_mode(&self) -> bool {
        (**self).is_live_mode()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }
}
