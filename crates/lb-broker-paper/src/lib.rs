//! Deterministic in-memory "paper" venue adapter.
//!
//! Design decisions (kept intentionally simple and deterministic):
//! - Order ids are counter-derived: `ORD-000001`, `ORD-000002`, ...
//! - No randomness, no wall-clock reads, no background fill simulation.
//!   Fills happen only when the test delivers the matching status callback
//!   and edits the pending book.
//! - Submitted orders are appended to the pending book automatically (the
//!   venue "sees" them in its working-order snapshot) until a test removes
//!   them.
//! - Failure injection is explicit and one-shot per armed count:
//!   `fail_next_pending_fetches`, `fail_next_cash_fetches`,
//!   `reject_next_submits`.
//!
//! Also here because every scenario test needs them: [`ManualClock`] (a
//! hand-cranked monotonic clock) and [`CapturingAlarm`] (records every alarm
//! event for assertions).

use parking_lot::Mutex;
use std::collections::BTreeMap;

use lb_adapter::{
    AdapterError, AdapterResult, AlarmEvent, AlarmSink, BrokerAdapter, Capabilities, Clock,
    OrderHandle, OrderStatus, PendingOrder, Position, Side,
};

/// One recorded submission, for test assertions.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmittedOrder {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub size: i64,
    pub price: f64,
}

#[derive(Debug)]
struct PaperInner {
    cash: f64,
    positions: BTreeMap<String, Position>,
    prices: BTreeMap<String, f64>,
    pending: Vec<PendingOrder>,
    submissions: Vec<SubmittedOrder>,
    next_order_seq: u64,
    fail_pending_fetches: u32,
    fail_cash_fetches: u32,
    reject_next_submits: u32,
    live_mode: bool,
    capabilities: Capabilities,
}

/// Scriptable paper broker. All mutators take `&self`; state lives behind a
/// mutex so the same instance can be shared with the core and driven from
/// the test at the same time.
pub struct PaperBroker {
    inner: Mutex<PaperInner>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PaperInner {
                cash: 0.0,
                positions: BTreeMap::new(),
                prices: BTreeMap::new(),
                pending: Vec::new(),
                submissions: Vec::new(),
                next_order_seq: 1,
                fail_pending_fetches: 0,
                fail_cash_fetches: 0,
                reject_next_submits: 0,
                live_mode: true,
                capabilities: Capabilities {
                    snapshot_order_ids: true,
                    fractional_lots: false,
                    batch_pending: true,
                },
            }),
        }
    }

    // -- test scripting ----------------------------------------------------

    pub fn set_cash(&self, cash: f64) {
        self.inner.lock().cash = cash;
    }

    pub fn set_position(&self, symbol: impl Into<String>, size: i64, avg_price: f64) {
        let symbol = symbol.into();
        self.inner.lock().positions.insert(
            symbol,
            Position {
                size,
                avg_price,
                available_size: size,
            },
        );
    }

    pub fn set_price(&self, symbol: impl Into<String>, price: f64) {
        self.inner.lock().prices.insert(symbol.into(), price);
    }

    /// Add a pending-order row directly (e.g. a sell the venue already had).
    pub fn push_pending(&self, row: PendingOrder) {
        self.inner.lock().pending.push(row);
    }

    /// Remove the pending row with the given id. Returns whether a row was
    /// removed.
    pub fn remove_pending(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner.pending.retain(|row| row.id.as_deref() != Some(id));
        inner.pending.len() != before
    }

    pub fn clear_pending(&self) {
        self.inner.lock().pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Strip ids from every pending row, simulating a venue API that does
    /// not return order identifiers.
    pub fn strip_pending_ids(&self) {
        let mut inner = self.inner.lock();
        for row in &mut inner.pending {
            row.id = None;
        }
    }

    pub fn fail_next_pending_fetches(&self, n: u32) {
        self.inner.lock().fail_pending_fetches = n;
    }

    pub fn fail_next_cash_fetches(&self, n: u32) {
        self.inner.lock().fail_cash_fetches = n;
    }

    /// Arm venue-level rejection (submit returns no handle) for the next `n`
    /// submissions.
    pub fn reject_next_submits(&self, n: u32) {
        self.inner.lock().reject_next_submits = n;
    }

    pub fn set_live_mode(&self, live: bool) {
        self.inner.lock().live_mode = live;
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.inner.lock().capabilities = capabilities;
    }

    pub fn submissions(&self) -> Vec<SubmittedOrder> {
        self.inner.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.inner.lock().submissions.len()
    }

    pub fn last_submission(&self) -> Option<SubmittedOrder> {
        self.inner.lock().submissions.last().cloned()
    }
}

impl BrokerAdapter for PaperBroker {
    fn fetch_cash(&self) -> AdapterResult<f64> {
        let mut inner = self.inner.lock();
        if inner.fail_cash_fetches > 0 {
            inner.fail_cash_fetches -= 1;
            return Err(AdapterError::transient("cash fetch unavailable"));
        }
        Ok(inner.cash)
    }

    fn fetch_position(&self, symbol: &str) -> AdapterResult<Position> {
        Ok(self
            .inner
            .lock()
            .positions
            .get(symbol)
            .copied()
            .unwrap_or_default())
    }

    fn fetch_price(&self, symbol: &str) -> AdapterResult<f64> {
        self.inner
            .lock()
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| AdapterError::permanent(format!("no price for {symbol}")))
    }

    fn fetch_pending_orders(&self) -> AdapterResult<Vec<PendingOrder>> {
        let mut inner = self.inner.lock();
        if inner.fail_pending_fetches > 0 {
            inner.fail_pending_fetches -= 1;
            return Err(AdapterError::transient("pending snapshot unavailable"));
        }
        Ok(inner.pending.clone())
    }

    fn submit_order(
        &self,
        symbol: &str,
        side: Side,
        size: i64,
        reference_price: f64,
    ) -> AdapterResult<Option<OrderHandle>> {
        let mut inner = self.inner.lock();
        if inner.reject_next_submits > 0 {
            inner.reject_next_submits -= 1;
            return Ok(None);
        }

        let id = format!("ORD-{:06}", inner.next_order_seq);
        inner.next_order_seq += 1;

        inner.submissions.push(SubmittedOrder {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            size,
            price: reference_price,
        });
        inner.pending.push(PendingOrder::new(
            Some(id.clone()),
            symbol,
            side,
            size as f64,
        ));

        Ok(Some(
            OrderHandle::new(id, symbol, side, OrderStatus::Accepted).with_submitted_size(size),
        ))
    }

    fn is_live_mode(&self) -> bool {
        self.inner.lock().live_mode
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.lock().capabilities
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Hand-cranked monotonic clock for tests: time moves only when the test
/// says so.
#[derive(Default)]
pub struct ManualClock {
    secs: Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(secs: f64) -> Self {
        Self {
            secs: Mutex::new(secs),
        }
    }

    pub fn advance(&self, secs: f64) {
        *self.secs.lock() += secs;
    }

    pub fn set(&self, secs: f64) {
        *self.secs.lock() = secs;
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> f64 {
        *self.secs.lock()
    }
}

// ---------------------------------------------------------------------------
// CapturingAlarm
// ---------------------------------------------------------------------------

/// Records every alarm event for later assertion.
#[derive(Default)]
pub struct CapturingAlarm {
    events: Mutex<Vec<AlarmEvent>>,
}

impl CapturingAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlarmEvent> {
        self.events.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AlarmSink for CapturingAlarm {
    fn push(&self, event: AlarmEvent) {
        self.events.lock().push(event);
    }
}
