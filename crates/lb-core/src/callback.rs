//! Order-status ingest.
//!
//! The venue adapter calls [`LiveBroker::on_order_status`] for every status
//! event it can normalize. The handler updates order-state memory first
//! (that record is the safe fallback when snapshots go dark), then applies
//! the side-specific terminal handling under the ledger lock, and finally
//! runs a lock-free snapshot fetch to drain any buffered retries whose
//! source orders are now confirmed gone.
//!
//! The handler never submits a fresh BUY synchronously beyond the single
//! buffered-retry release already owed to the event being processed; new
//! work is deposited into queues and picked up by the heal loop. It also
//! never propagates an error: a callback path that throws would disturb the
//! adapter's event pump.

use tracing::{debug, info, warn};

use lb_adapter::{BrokerAdapter, OrderHandle};

use crate::broker::LiveBroker;
use crate::intent::recalc_rejected_buy_size;
use crate::state::{BufferedRetry, SnapshotView};

impl<A: BrokerAdapter> LiveBroker<A> {
    /// Ingest one normalized order-status event.
    ///
    /// Idempotent for repeated terminal events: the first pop removes the
    /// active record, every replay finds nothing to do.
    pub fn on_order_status(&self, handle: &OrderHandle) {
        if handle.is_deferred_placeholder() {
            return;
        }

        let now = self.now();
        let multiplier = self.config.safety_multiplier();

        // A rejected BUY needs current cash to size its downgrade retry, and
        // cash is a venue fetch, so read it before taking the lock.
        let cash_before_refund = if handle.is_buy() && handle.is_rejected() {
            Some(self.get_cash())
        } else {
            None
        };

        let mut notify_sell_filled = false;
        let mut drain_reason: Option<String> = None;

        {
            let mut st = self.state.lock();
            st.order_memory.remember(handle, now);

            if handle.is_buy() {
                if handle.is_completed() {
                    // Physical cash settled; release the virtual hold or the
                    // spend would be counted twice.
                    if let Some((buy, refund)) = st.pop_buy_and_refund(&handle.id, multiplier) {
                        info!(
                            symbol = %buy.symbol,
                            refund,
                            "buy filled; released virtual cash"
                        );
                    }
                } else if handle.is_canceled() {
                    if let Some((buy, refund)) = st.pop_buy_and_refund(&handle.id, multiplier) {
                        info!(
                            symbol = %buy.symbol,
                            refund,
                            "buy canceled; refunded virtual cash"
                        );
                    }
                    // The cancel callback is itself positive evidence the
                    // source order is gone, so by default the buffered retry
                    // releases here even during uncertain mode (queue
                    // liveness over strict suppression; policy flag).
                    let uncertain = st.is_uncertain(now);
                    if self.config.release_retry_on_cancel_in_uncertain || !uncertain {
                        self.submit_buffered_retry(&mut st, &handle.id);
                    }
                } else if handle.is_rejected() {
                    if let Some((buy, refund)) = st.pop_buy_and_refund(&handle.id, multiplier) {
                        if buy.retries < self.config.max_rejection_downgrades {
                            // The refund just freed this order's own
                            // reservation; the retry may size against it.
                            let cash_now = cash_before_refund.unwrap_or(0.0) + refund;
                            let recalculated = recalc_rejected_buy_size(
                                buy.size,
                                buy.price,
                                buy.lot_size,
                                cash_now,
                                multiplier,
                            );
                            let new_size = if recalculated > 0 {
                                recalculated
                            } else {
                                buy.size - buy.lot_size
                            };
                            info!(
                                symbol = %buy.symbol,
                                old_size = buy.size,
                                new_size,
                                attempt = buy.retries + 1,
                                max = self.config.max_rejection_downgrades,
                                "buy rejected; downgrade queued"
                            );
                            if new_size > 0 {
                                // Buffer only; resubmission happens once the
                                // lock-free reconciliation confirms the
                                // source is no longer working at the venue.
                                st.buffered_retries
                                    .entry(handle.id.clone())
                                    .or_insert_with(|| {
                                        BufferedRetry::new(
                                            buy.symbol.clone(),
                                            new_size,
                                            buy.price,
                                            buy.lot_size,
                                            buy.retries + 1,
                                            now,
                                        )
                                    });
                            } else {
                                info!(symbol = %buy.symbol, "downgrade stopped: size reduced to zero");
                            }
                        } else {
                            info!(
                                symbol = %buy.symbol,
                                retries = buy.retries,
                                "buy rejected; downgrade budget exhausted"
                            );
                        }
                    } else if st.buffered_retries.contains_key(&handle.id) {
                        // Some venues push Rejected repeatedly without a
                        // final Canceled; the buffered entry waits for the
                        // lock-free reconciliation.
                        debug!(id = %handle.id, "duplicate rejected callback; retry already buffered");
                    }
                }
                drain_reason = Some(format!("buy_callback:{}", handle.symbol));
            } else if handle.is_sell() {
                if handle.is_completed() {
                    st.pending_sells.remove(&handle.id);
                    notify_sell_filled = true;
                } else if handle.is_canceled() || handle.is_rejected() {
                    st.pending_sells.remove(&handle.id);
                    if !st.deferred.is_empty() {
                        // Deferred buys were waiting for this sell's cash;
                        // that cash is not coming.
                        warn!(
                            symbol = %handle.symbol,
                            cleared = st.deferred.len(),
                            "sell failed; clearing deferred buy orders"
                        );
                        st.deferred.clear();
                    }
                } else if handle.is_pending() {
                    st.pending_sells.insert(handle.id.clone());
                }
                drain_reason = Some(format!("sell_callback:{}", handle.symbol));
            }
        }

        if notify_sell_filled {
            // Deferred replay is NOT triggered here; the bridge schedules
            // the sell-filled hook (balance sync + forced heal) on a thread
            // that may block.
            self.bridge.sell_filled();
        }

        let Some(reason) = drain_reason else { return };
        if self.state.lock().buffered_retries.is_empty() {
            return;
        }

        // Snapshot fetch outside the lock, then one drain pass with whatever
        // the fetch produced.
        let snapshot = self.fetch_pending_with_retry(&reason);
        let now = self.now();
        let mut st = self.state.lock();
        match &snapshot {
            Ok(rows) => {
                self.drain_buffered_retries(
                    &mut st,
                    SnapshotView::Fresh(rows.as_slice()),
                    now,
                    &reason,
                );
            }
            Err(err) => {
                let why = err.to_string();
                self.drain_buffered_retries(
                    &mut st,
                    SnapshotView::Unavailable(&why),
                    now,
                    &reason,
                );
            }
        }
    }

    /// The sell-filled hook: refresh settled cash, then force a heal pass
    /// that re-checks the replay gate and replays deferred buys if the sells
    /// are confirmed clear. Wire this to [`StrategyBridge::sell_filled`]
    /// (directly or via a scheduler) in live deployments.
    ///
    /// [`StrategyBridge::sell_filled`]: crate::StrategyBridge::sell_filled
    pub fn on_sell_filled(&self) {
        info!("sell filled hook: syncing balance and re-validating sell-clear");
        self.sync_balance();
        self.self_heal("sell_filled", true);
    }
}
