//! The live broker facade: construction, the cash ledger surface, the
//! datetime-driven stale-state reset, and the small query surface strategies
//! and risk controls poll.
//!
//! # Lock discipline
//!
//! A single mutex (the ledger lock) guards [`CoreState`]. Public entry
//! points acquire it at most once and only around in-memory work; every
//! venue call (`fetch_*`) happens before the lock is taken or after it is
//! released. The one deliberate exception is `submit_order`, which is held
//! under the lock so a submission and its reservation are atomic with
//! respect to every other intent.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tracing::{debug, warn};

use lb_adapter::{
    AdapterError, AlarmEvent, AlarmSink, BrokerAdapter, Capabilities, Clock, NullAlarm,
    PendingOrder, Side, SystemClock,
};
use lb_symbols::symbols_match;

use crate::bridge::{NoStrategy, StrategyBridge};
use crate::config::CoreConfig;
use crate::state::CoreState;

/// The live broker core.
///
/// Sits between a strategy and a venue adapter: translates target-position
/// intents into lotted submissions, reserves cash for in-flight buys,
/// defers buys that wait on in-flight sells, retries venue rejections with
/// downgraded sizes, and continuously heals its local view against the
/// venue's authoritative pending snapshot.
pub struct LiveBroker<A: BrokerAdapter> {
    pub(crate) adapter: A,
    pub(crate) config: CoreConfig,
    pub(crate) caps: Capabilities,
    pub(crate) alarm: Arc<dyn AlarmSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) bridge: Arc<dyn StrategyBridge>,
    pub(crate) state: Mutex<CoreState>,
}

impl<A: BrokerAdapter> LiveBroker<A> {
    pub fn new(adapter: A, config: CoreConfig) -> Self {
        let caps = adapter.capabilities();
        let state = CoreState::new(
            config.order_state_memory_max_items,
            config.order_state_memory_ttl_secs,
        );
        Self {
            adapter,
            config,
            caps,
            alarm: Arc::new(NullAlarm),
            clock: Arc::new(SystemClock::new()),
            bridge: Arc::new(NoStrategy),
            state: Mutex::new(state),
        }
    }

    pub fn with_alarm(mut self, alarm: Arc<dyn AlarmSink>) -> Self {
        self.alarm = alarm;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_strategy_bridge(mut self, bridge: Arc<dyn StrategyBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn is_live_mode(&self) -> bool {
        self.adapter.is_live_mode()
    }

    /// Symbols the NAV computation iterates. Typically the strategy's data
    /// universe, registered once at startup.
    pub fn set_symbols(&self, symbols: Vec<String>) {
        self.state.lock().symbols = symbols;
    }

    pub(crate) fn now(&self) -> f64 {
        self.clock.monotonic()
    }

    pub(crate) fn effective_lot(&self) -> i64 {
        if self.caps.fractional_lots {
            1
        } else {
            self.config.lot_size.max(1)
        }
    }

    // -- cash ledger -------------------------------------------------------

    /// Usable cash: venue settled cash minus the virtual reservations held
    /// by in-flight buys, floored at zero and clipped to the configured cap.
    ///
    /// The venue fetch runs outside the lock; the lock is taken only for the
    /// subtraction so a long venue round-trip never stalls callbacks.
    pub fn get_cash(&self) -> f64 {
        let real = match self.adapter.fetch_cash() {
            Ok(cash) => cash,
            Err(err) => {
                warn!(error = %err, "cash fetch failed; treating usable cash as zero");
                self.mark_cash_degraded(&format!("cash fetch failed: {err}"));
                return 0.0;
            }
        };

        let mut cash = {
            let st = self.state.lock();
            real - st.virtual_spent_cash
        };
        if cash < 0.0 {
            cash = 0.0;
        }
        if let Some(cap) = self.config.cash_cap {
            cash = cash.min(cap);
        }
        cash
    }

    /// Cash figure strategies budget a rebalance plan against. Same as
    /// [`get_cash`](Self::get_cash) by default; venues with odd margin
    /// semantics can expose a more conservative figure by capping cash.
    pub fn get_rebalance_cash(&self) -> f64 {
        self.get_cash()
    }

    /// Refresh the cached settled-cash figure. A failed fetch opens the
    /// cash-degraded window instead of erroring.
    pub fn sync_balance(&self) {
        match self.adapter.fetch_cash() {
            Ok(cash) => {
                self.state.lock().last_synced_cash = cash;
                debug!(cash, "balance synced");
            }
            Err(err) => {
                warn!(error = %err, "balance sync failed");
                self.mark_cash_degraded(&format!("balance sync failed: {err}"));
            }
        }
    }

    pub fn last_synced_cash(&self) -> f64 {
        self.state.lock().last_synced_cash
    }

    /// Net liquidation value: usable cash plus the market value of every
    /// registered symbol's settled position. Position and price fetches run
    /// outside the lock; a missing live price falls back to the position's
    /// average cost.
    pub fn portfolio_value(&self) -> f64 {
        let symbols: Vec<String> = self.state.lock().symbols.clone();
        let mut value = self.get_cash();
        for symbol in &symbols {
            let pos = match self.adapter.fetch_position(symbol) {
                Ok(pos) => pos,
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "position fetch failed during NAV");
                    continue;
                }
            };
            if pos.size == 0 {
                continue;
            }
            let price = self.adapter.fetch_price(symbol).unwrap_or(pos.avg_price);
            value += pos.size as f64 * price;
        }
        value
    }

    // -- cash degraded window ---------------------------------------------

    /// Open (or extend) the fast-fail window that tells strategies the cash
    /// input is currently unreliable.
    pub fn mark_cash_degraded(&self, reason: &str) {
        let now = self.now();
        let ttl = self.config.cash_degraded_ttl_secs.max(0.0);
        let newly_degraded = {
            let mut st = self.state.lock();
            let prev = st.cash_degraded_until;
            st.cash_degraded_until = st.cash_degraded_until.max(now + ttl);
            st.cash_degraded_reason = reason.to_string();
            prev <= now
        };
        if newly_degraded {
            warn!(ttl, reason, "cash input degraded");
            self.alarm.push(AlarmEvent::CashDegraded {
                ttl_secs: ttl,
                reason: reason.to_string(),
            });
        }
    }

    pub fn clear_cash_degraded(&self) {
        let mut st = self.state.lock();
        st.cash_degraded_until = f64::NEG_INFINITY;
        st.cash_degraded_reason.clear();
    }

    pub fn is_cash_degraded(&self) -> bool {
        let now = self.now();
        self.state.lock().is_cash_degraded(now)
    }

    pub fn cash_degraded_reason(&self) -> String {
        let now = self.now();
        let st = self.state.lock();
        if st.is_cash_degraded(now) {
            st.cash_degraded_reason.clone()
        } else {
            String::new()
        }
    }

    /// Strategy fast-fail gate: false while the cash input is degraded.
    pub fn pre_strategy_check(&self) -> bool {
        !self.is_cash_degraded()
    }

    // -- risk locks --------------------------------------------------------

    /// Block new BUY exposure on a symbol. SELLs are never blocked.
    pub fn lock_for_risk(&self, symbol: &str) {
        self.state.lock().risk_locked.insert(symbol.to_string());
    }

    pub fn unlock_for_risk(&self, symbol: &str) {
        self.state.lock().risk_locked.remove(symbol);
    }

    pub fn is_risk_locked(&self, symbol: &str) -> bool {
        self.state.lock().risk_locked.contains(symbol)
    }

    // -- backlog queries ---------------------------------------------------

    pub fn has_deferred_orders(&self) -> bool {
        !self.state.lock().deferred.is_empty()
    }

    pub fn deferred_len(&self) -> usize {
        self.state.lock().deferred.len()
    }

    pub fn has_runtime_backlog(&self) -> bool {
        self.state.lock().has_backlog()
    }

    pub fn pending_sell_count(&self) -> usize {
        self.state.lock().pending_sells.len()
    }

    pub fn active_buy_count(&self) -> usize {
        self.state.lock().active_buys.len()
    }

    pub fn buffered_retry_count(&self) -> usize {
        self.state.lock().buffered_retries.len()
    }

    pub fn virtual_spent_cash(&self) -> f64 {
        self.state.lock().virtual_spent_cash
    }

    pub fn is_uncertain_mode(&self) -> bool {
        let now = self.now();
        self.state.lock().is_uncertain(now)
    }

    /// Ask the venue whether any order for `symbol` (optionally filtered by
    /// side) is still working. `None` means the snapshot is unavailable and
    /// the caller should stay conservative.
    pub fn has_pending_order(&self, symbol: &str, side: Option<Side>) -> Option<bool> {
        if symbol.trim().is_empty() {
            return Some(false);
        }
        let rows = match self.fetch_pending_with_retry("has_pending_order") {
            Ok(rows) => rows,
            Err(_) => return None,
        };
        for row in &rows {
            if let Some(want) = side {
                if row.side != want {
                    continue;
                }
            }
            if row.remaining <= 0.0 {
                continue;
            }
            if symbols_match(&row.symbol, symbol) {
                return Some(true);
            }
        }
        Some(false)
    }

    // -- datetime & stale-state reset -------------------------------------

    /// Advance the strategy clock and run the cross-period checks.
    ///
    /// Intraday bar updates keep all in-flight state: deferred intents are
    /// re-dispatched with fresh prices at replay time, so carrying them is
    /// safe. Only two conditions invalidate state:
    ///
    /// 1. A new calendar day: yesterday's working orders are dead.
    /// 2. A heartbeat gap past `long_gap_reset_secs`: the process likely
    ///    disconnected or restarted and local state cannot be trusted.
    pub fn set_datetime(&self, dt: NaiveDateTime) {
        let mut reset_trigger: Option<&str> = None;
        {
            let mut st = self.state.lock();
            if let Some(prev) = st.datetime {
                if dt > prev {
                    let is_new_day = dt.date() > prev.date();
                    // Day rollover always drops the reservation total, even
                    // when nothing else is stale: overnight fills settle into
                    // real cash and the virtual hold would double-count.
                    if is_new_day {
                        st.virtual_spent_cash = 0.0;
                    }
                    let gap_secs = (dt - prev).num_seconds() as f64;
                    let is_long_gap = gap_secs > self.config.long_gap_reset_secs;
                    if (is_new_day || is_long_gap) && st.has_stale_state() {
                        let trigger = if is_new_day { "new_day" } else { "long_gap" };
                        warn!(trigger, gap_secs, "resetting stale broker state");
                        st.reset_stale();
                        reset_trigger = Some(trigger);
                    }
                }
            }
            st.datetime = Some(dt);
        }
        if let Some(trigger) = reset_trigger {
            self.alarm.push(AlarmEvent::StaleStateReset {
                trigger: trigger.to_string(),
            });
        }
        // Every time advance doubles as a lightweight heal tick, so the
        // system never depends on a single callback arriving.
        self.self_heal("set_datetime", false);
    }

    pub fn datetime(&self) -> Option<NaiveDateTime> {
        self.state.lock().datetime
    }

    /// Operator rescue: wipe every queue, tracker and safety window
    /// unconditionally. The venue snapshot rebuilds whatever is still real
    /// on the next heal pass.
    pub fn force_reset_state(&self) {
        warn!("force reset of broker state requested");
        self.state.lock().reset_stale();
        self.alarm.push(AlarmEvent::StaleStateReset {
            trigger: "forced".to_string(),
        });
    }

    // -- snapshot plumbing -------------------------------------------------

    /// Fetch the pending snapshot with bounded retry. Success resets the
    /// failure streak; exhausting the attempts records a failure, which may
    /// open the uncertain window.
    pub(crate) fn fetch_pending_with_retry(
        &self,
        reason: &str,
    ) -> Result<Vec<PendingOrder>, AdapterError> {
        let attempts = self.config.snapshot_retry_attempts.max(1);
        let sleep_secs = self.config.snapshot_retry_sleep_secs.max(0.0);
        let mut last_err: Option<AdapterError> = None;

        for attempt in 0..attempts {
            match self.adapter.fetch_pending_orders() {
                Ok(rows) => {
                    self.mark_snapshot_success();
                    return Ok(rows);
                }
                Err(err) => {
                    if attempt == 0 && attempts > 1 {
                        debug!(reason, error = %err, "pending snapshot query failed, retrying");
                    }
                    last_err = Some(err);
                    if attempt + 1 < attempts && sleep_secs > 0.0 {
                        std::thread::sleep(Duration::from_secs_f64(sleep_secs));
                    }
                }
            }
        }

        self.mark_snapshot_failure(reason);
        Err(last_err
            .unwrap_or_else(|| AdapterError::transient("pending snapshot unavailable")))
    }

    pub(crate) fn mark_snapshot_success(&self) {
        let mut st = self.state.lock();
        st.snapshot_fail_count = 0;
        st.snapshot_fail_since = None;
    }

    pub(crate) fn mark_snapshot_failure(&self, reason: &str) {
        let now = self.now();
        let ttl = self.config.uncertain_ttl_secs.max(0.0);
        let (entered, failing_for) = {
            let mut st = self.state.lock();
            st.snapshot_fail_count += 1;
            if st.snapshot_fail_since.is_none() {
                st.snapshot_fail_since = Some(now);
            }
            let failing_for = now - st.snapshot_fail_since.unwrap_or(now);
            let entered = if st.snapshot_fail_count >= self.config.uncertain_fails.max(1) {
                let prev = st.uncertain_until;
                st.uncertain_until = st.uncertain_until.max(now + ttl);
                prev <= now
            } else {
                false
            };
            (entered, failing_for)
        };
        if entered {
            warn!(
                ttl,
                reason, failing_for, "entered uncertain mode: pending snapshot unstable"
            );
            self.alarm.push(AlarmEvent::UncertainModeEntered {
                ttl_secs: ttl,
                reason: reason.to_string(),
            });
        }
    }
}
