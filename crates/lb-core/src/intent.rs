//! Intent translation: target-percent / target-value into concrete lotted
//! submissions, routed through the smart buy/sell decision trees.
//!
//! Nothing in this module returns an error to the strategy. A condition that
//! prevents acting (no price, degraded inputs, risk lock, not enough cash
//! for one lot) logs a structured entry and yields `None`; the only non-None
//! results are a real venue handle or the deferred virtual placeholder.

use std::fmt;

use tracing::{debug, info, warn};

use lb_adapter::{AlarmEvent, BrokerAdapter, OrderHandle, Side};
use lb_symbols::symbols_match;

use crate::broker::LiveBroker;
use crate::state::{ActiveBuy, CoreState, DeferredIntent, IntentKind};

// ---------------------------------------------------------------------------
// IntentError (internal)
// ---------------------------------------------------------------------------

/// Why an intent dispatch could not even reach the buy/sell decision.
///
/// Surfaced to the deferred-replay loop (which re-queues on failure) and
/// swallowed into `None` + a log entry at the public surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum IntentError {
    PriceUnavailable { symbol: String, detail: String },
    PositionUnavailable { symbol: String, detail: String },
}

impl fmt::Display for IntentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentError::PriceUnavailable { symbol, detail } => {
                write!(f, "no usable price for {symbol}: {detail}")
            }
            IntentError::PositionUnavailable { symbol, detail } => {
                write!(f, "no usable position for {symbol}: {detail}")
            }
        }
    }
}

impl std::error::Error for IntentError {}

// ---------------------------------------------------------------------------
// Sizing helpers
// ---------------------------------------------------------------------------

/// Recompute an affordable size after a BUY rejection.
///
/// The result is strictly smaller than `old_size` (capped at one lot below
/// it), so a rejection chain always shrinks and cannot loop resubmitting the
/// same quantity the venue just refused.
pub(crate) fn recalc_rejected_buy_size(
    old_size: i64,
    price: f64,
    lot_size: i64,
    cash_now: f64,
    safety_multiplier: f64,
) -> i64 {
    if old_size <= 0 || price <= 0.0 || cash_now <= 0.0 {
        return 0;
    }
    let lot = lot_size.max(1);
    let max_affordable = cash_now / (price * safety_multiplier);
    let recalc = if lot > 1 {
        ((max_affordable / lot as f64).floor() as i64) * lot
    } else {
        max_affordable.floor() as i64
    };
    recalc.min(old_size - lot).max(0)
}

fn round_down_to_lot(shares: f64, lot: i64) -> i64 {
    if lot > 1 {
        ((shares / lot as f64).floor() as i64) * lot
    } else {
        shares.floor() as i64
    }
}

// ---------------------------------------------------------------------------
// Intent surface
// ---------------------------------------------------------------------------

impl<A: BrokerAdapter> LiveBroker<A> {
    /// Target a fraction of portfolio NAV in `symbol`.
    pub fn order_target_percent(&self, symbol: &str, target: f64) -> Option<OrderHandle> {
        match self.run_intent(IntentKind::TargetPercent, symbol, target) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(symbol, error = %err, "order_target_percent dropped");
                None
            }
        }
    }

    /// Target an absolute market value in `symbol`.
    pub fn order_target_value(&self, symbol: &str, target: f64) -> Option<OrderHandle> {
        match self.run_intent(IntentKind::TargetValue, symbol, target) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(symbol, error = %err, "order_target_value dropped");
                None
            }
        }
    }

    pub(crate) fn run_intent(
        &self,
        kind: IntentKind,
        symbol: &str,
        target: f64,
    ) -> Result<Option<OrderHandle>, IntentError> {
        let price = match self.adapter.fetch_price(symbol) {
            Ok(price) if price > 0.0 => price,
            Ok(price) => {
                return Err(IntentError::PriceUnavailable {
                    symbol: symbol.to_string(),
                    detail: format!("non-positive price {price}"),
                })
            }
            Err(err) => {
                return Err(IntentError::PriceUnavailable {
                    symbol: symbol.to_string(),
                    detail: err.to_string(),
                })
            }
        };

        let expected_shares = match kind {
            IntentKind::TargetPercent => self.portfolio_value() * target / price,
            IntentKind::TargetValue => target / price,
        };

        // Delta against the expected (settled + in-flight) size, not the
        // settled size alone. A still-working BUY from the previous intent
        // must not be bought again.
        let current = self.expected_size_checked(symbol)?;
        let delta = expected_shares - current;

        if delta > 0.0 && self.is_risk_locked(symbol) {
            info!(symbol, delta, "risk lock active: buy intent silently dropped");
            return Ok(None);
        }

        if delta > 0.0 {
            Ok(self.smart_buy(kind, symbol, delta, price, target))
        } else if delta < 0.0 {
            Ok(self.smart_sell(symbol, -delta, price))
        } else {
            Ok(None)
        }
    }

    /// Expected position: settled size plus in-flight BUY remainder minus
    /// in-flight SELL remainder, alias-matched across venue renderings.
    /// Logs and degrades to what it could read on fetch failure.
    pub fn expected_size(&self, symbol: &str) -> f64 {
        match self.expected_size_checked(symbol) {
            Ok(size) => size,
            Err(err) => {
                warn!(symbol, error = %err, "expected size unavailable; reporting zero");
                0.0
            }
        }
    }

    pub(crate) fn expected_size_checked(&self, symbol: &str) -> Result<f64, IntentError> {
        let settled = self
            .adapter
            .fetch_position(symbol)
            .map_err(|err| IntentError::PositionUnavailable {
                symbol: symbol.to_string(),
                detail: err.to_string(),
            })?
            .size;
        let mut size = settled as f64;

        // Venues without a batch pending book cannot enrich the figure;
        // conservative fallback is the settled size.
        if !self.caps.batch_pending {
            return Ok(size);
        }

        match self.fetch_pending_with_retry("expected_size") {
            Ok(rows) => {
                for row in &rows {
                    if row.remaining <= 0.0 {
                        continue;
                    }
                    if symbols_match(&row.symbol, symbol) {
                        match row.side {
                            Side::Buy => size += row.remaining,
                            Side::Sell => size -= row.remaining,
                        }
                    }
                }
            }
            Err(err) => {
                warn!(symbol, error = %err, "pending snapshot unavailable for expected size");
            }
        }
        Ok(size)
    }

    // -- smart buy ---------------------------------------------------------

    pub(crate) fn smart_buy(
        &self,
        kind: IntentKind,
        symbol: &str,
        shares: f64,
        price: f64,
        target: f64,
    ) -> Option<OrderHandle> {
        // Uncertain mode: no new exposure, park the intent instead. The
        // newest target per symbol wins so the queue cannot bloat while the
        // window is open.
        if self.is_uncertain_mode() {
            return Some(self.queue_uncertain_buy(kind, symbol, target));
        }

        let multiplier = self.config.safety_multiplier();
        let cash = self.get_cash();
        let lot = self.effective_lot();
        let mut shares = shares;
        let estimated_cost = shares * price * multiplier;

        if cash < estimated_cost {
            if self.has_pending_sells_gate() {
                // Cash is short but sells are in flight: wait for the
                // proceeds instead of downgrading.
                self.add_deferred(kind, symbol, target);
                info!(symbol, "buy deferred: waiting for pending sells to free cash");
                return Some(OrderHandle::deferred(symbol));
            }
            let max_affordable = cash / (price * multiplier);
            shares = shares.min(max_affordable);
            if shares < lot as f64 {
                warn!(symbol, cash, "buy skipped: cash insufficient for one lot");
                return None;
            }
        }

        let mut st = self.state.lock();
        self.finalize_and_submit(&mut st, symbol, shares, price, lot, 0)
    }

    /// Lot rounding plus the submit/register/reserve step. Holds the ledger
    /// lock (supplied by the caller) across the venue submit so the
    /// submission and its reservation are one atomic step.
    pub(crate) fn finalize_and_submit(
        &self,
        st: &mut CoreState,
        symbol: &str,
        shares: f64,
        price: f64,
        lot_size: i64,
        retries: u32,
    ) -> Option<OrderHandle> {
        let raw_shares = shares;
        let size = round_down_to_lot(shares, lot_size);

        if raw_shares > 0.0 && size <= 0 {
            warn!(
                symbol,
                requested = raw_shares,
                lot_size,
                "order rounded to zero shares: requirement is below one lot; order canceled"
            );
            self.alarm.push(AlarmEvent::LotTooCoarse {
                symbol: symbol.to_string(),
                requested: raw_shares,
                lot_size,
            });
            return None;
        }
        if size <= 0 {
            return None;
        }

        if retries > 0 {
            info!(symbol, size, price, retry = retries, "BUY signal (downgrade retry)");
        } else {
            info!(symbol, size, price, "BUY signal");
        }

        match self.adapter.submit_order(symbol, Side::Buy, size, price) {
            Ok(Some(handle)) => {
                // Some venues shrink the order on the way in; book the
                // reservation against what was actually accepted.
                let submitted = handle.submitted_size.unwrap_or(size);
                let now = self.now();
                st.active_buys.insert(
                    handle.id.clone(),
                    ActiveBuy {
                        symbol: symbol.to_string(),
                        size: submitted,
                        price,
                        lot_size,
                        retries,
                        created_at: now,
                        miss_snapshots: 0,
                        miss_since: None,
                    },
                );
                st.virtual_spent_cash +=
                    submitted as f64 * price * self.config.safety_multiplier();
                Some(handle)
            }
            Ok(None) => {
                warn!(symbol, size, "buy refused by venue at submit");
                self.alarm.push(AlarmEvent::SubmitRejected {
                    symbol: symbol.to_string(),
                    size,
                    reason: "venue refused submission".to_string(),
                });
                None
            }
            Err(err) => {
                warn!(symbol, size, error = %err, "buy submit failed");
                None
            }
        }
    }

    // -- smart sell --------------------------------------------------------

    /// Sell up to `shares` of `symbol`, capped at the settled position.
    ///
    /// Requesting at least the whole position sells it in full, bypassing
    /// lot rounding so an odd-lot remainder can always be liquidated.
    pub fn smart_sell(&self, symbol: &str, shares: f64, price: f64) -> Option<OrderHandle> {
        let settled = match self.adapter.fetch_position(symbol) {
            Ok(pos) => pos.size,
            Err(err) => {
                warn!(symbol, error = %err, "sell skipped: position unavailable");
                return None;
            }
        };
        if settled <= 0 {
            debug!(symbol, "sell skipped: no settled position");
            return None;
        }

        // Never short: the settled position is the hard ceiling, which also
        // keeps an in-flight buy from inflating what looks sellable.
        let capped = shares.min(settled as f64);
        let size = if capped >= settled as f64 {
            settled
        } else {
            round_down_to_lot(capped, self.effective_lot())
        };
        if size <= 0 {
            return None;
        }

        info!(symbol, size, price, "SELL signal");

        let mut st = self.state.lock();
        match self.adapter.submit_order(symbol, Side::Sell, size, price) {
            Ok(Some(handle)) => {
                st.pending_sells.insert(handle.id.clone());
                Some(handle)
            }
            Ok(None) => {
                warn!(symbol, size, "sell refused by venue at submit");
                self.alarm.push(AlarmEvent::SubmitRejected {
                    symbol: symbol.to_string(),
                    size,
                    reason: "venue refused submission".to_string(),
                });
                None
            }
            Err(err) => {
                warn!(symbol, size, error = %err, "sell submit failed");
                None
            }
        }
    }

    // -- deferred queue ----------------------------------------------------

    pub(crate) fn add_deferred(&self, kind: IntentKind, symbol: &str, target: f64) {
        let now = self.now();
        let mut st = self.state.lock();
        st.deferred.push(DeferredIntent {
            kind,
            symbol: symbol.to_string(),
            target,
            created_at: now,
            fail_count: 0,
        });
    }

    /// Park (or refresh) a BUY while uncertain mode is active. Only the most
    /// recent target per symbol and intent kind is retained.
    pub(crate) fn queue_uncertain_buy(
        &self,
        kind: IntentKind,
        symbol: &str,
        target: f64,
    ) -> OrderHandle {
        let now = self.now();
        let replaced = {
            let mut st = self.state.lock();
            let mut replaced = false;
            for item in &mut st.deferred {
                if item.kind == kind && item.symbol == symbol {
                    item.target = target;
                    replaced = true;
                    break;
                }
            }
            if !replaced {
                st.deferred.push(DeferredIntent {
                    kind,
                    symbol: symbol.to_string(),
                    target,
                    created_at: now,
                    fail_count: 0,
                });
            }
            replaced
        };
        if replaced {
            info!(symbol, target, "buy deferred target refreshed (uncertain mode)");
        } else {
            info!(symbol, target, "buy deferred (uncertain mode)");
        }
        OrderHandle::deferred(symbol)
    }

    /// Whether any sell is believed in flight. The local set answers first;
    /// when it is empty the venue is asked directly, and a failed snapshot
    /// counts as "possibly yes" so short cash never downgrades a buy while a
    /// sell might still settle.
    pub(crate) fn has_pending_sells_gate(&self) -> bool {
        if !self.state.lock().pending_sells.is_empty() {
            return true;
        }
        match self.fetch_pending_with_retry("has_pending_sells") {
            Ok(rows) => rows
                .iter()
                .any(|row| row.side == Side::Sell && row.remaining > 0.0),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: f64 = 1.0033;

    #[test]
    fn recalc_shrinks_below_previous_size() {
        // Plenty of cash: capped one lot below the rejected size.
        assert_eq!(recalc_rejected_buy_size(200, 10.0, 100, 100_000.0, M), 100);
        // Tight cash: limited by affordability, lot-rounded.
        assert_eq!(recalc_rejected_buy_size(500, 10.0, 100, 1_500.0, M), 100);
    }

    #[test]
    fn recalc_zero_on_no_cash_or_bad_inputs() {
        assert_eq!(recalc_rejected_buy_size(200, 10.0, 100, 0.0, M), 0);
        assert_eq!(recalc_rejected_buy_size(0, 10.0, 100, 1_000.0, M), 0);
        assert_eq!(recalc_rejected_buy_size(200, 0.0, 100, 1_000.0, M), 0);
    }

    #[test]
    fn recalc_single_lot_order_cannot_shrink_further() {
        // 100 shares, lot 100: upper bound is zero, downgrade chain ends.
        assert_eq!(recalc_rejected_buy_size(100, 10.0, 100, 100_000.0, M), 0);
    }

    #[test]
    fn recalc_fractional_lot_floors_to_share() {
        assert_eq!(recalc_rejected_buy_size(50, 10.0, 1, 250.0, M), 24);
    }

    #[test]
    fn lot_rounding_floors() {
        assert_eq!(round_down_to_lot(250.0, 100), 200);
        assert_eq!(round_down_to_lot(99.9, 100), 0);
        assert_eq!(round_down_to_lot(5.7, 1), 5);
    }
}
