//! The self-heal loop and deferred-buy replay.
//!
//! A heartbeat (strategy time advance, scheduler tick, or the sell-filled
//! hook) drives [`LiveBroker::self_heal`]. Each pass decides under the lock
//! whether a snapshot is worth fetching, fetches it outside the lock with
//! bounded retry, re-locks to run the reconciler, and finally replays the
//! deferred queue when the gate allows.

use tracing::{info, warn};

use lb_adapter::{BrokerAdapter, PendingOrder};

use crate::broker::LiveBroker;
use crate::state::{snapshot_has_pending_sell, DeferredIntent, SnapshotView};

impl<A: BrokerAdapter> LiveBroker<A> {
    /// One throttled heal pass. Returns the number of state changes made
    /// (repairs, drains, replays), which callers may use for logging.
    ///
    /// `force` bypasses both the pass throttle and the snapshot throttle;
    /// it is used by the sell-filled hook where staleness is known.
    pub fn self_heal(&self, reason: &str, force: bool) -> usize {
        let now = self.now();
        let min_interval = self.config.self_heal_min_interval_secs.max(0.0);
        let snapshot_min_interval = self.config.pending_snapshot_min_interval_secs.max(0.0);

        let (should_fetch, snapshot_throttled) = {
            let mut st = self.state.lock();
            if !force && now - st.last_self_heal < min_interval {
                return 0;
            }
            st.last_self_heal = now;

            // Snapshots cost a venue round-trip; only fetch while some
            // backlog could actually be repaired by one.
            let should_fetch = force || st.has_backlog();
            let throttled =
                should_fetch && !force && now - st.last_snapshot < snapshot_min_interval;
            if should_fetch && !throttled {
                st.last_snapshot = now;
            }
            (should_fetch, throttled)
        };

        // Network I/O happens with the lock released so order callbacks and
        // the strategy thread are never serialized behind a slow venue.
        let mut snapshot: Option<Vec<PendingOrder>> = None;
        let unavailable_reason: String;
        if should_fetch && !snapshot_throttled {
            match self.fetch_pending_with_retry(&format!("self_heal:{reason}")) {
                Ok(rows) => {
                    snapshot = Some(rows);
                    unavailable_reason = String::new();
                }
                Err(err) => unavailable_reason = err.to_string(),
            }
        } else if snapshot_throttled {
            unavailable_reason = "pending snapshot throttled".to_string();
        } else {
            unavailable_reason = "no runtime backlog".to_string();
        }

        let mut changed = 0usize;
        {
            let mut st = self.state.lock();
            let view = match &snapshot {
                Some(rows) => SnapshotView::Fresh(rows.as_slice()),
                None => SnapshotView::Unavailable(&unavailable_reason),
            };
            changed += self.reconcile_pending_sells(&mut st, view, now);
            changed += self.reconcile_active_buys(&mut st, view, now);
            changed += self.drain_buffered_retries(&mut st, view, now, reason);
            changed += self.reconcile_strategy_placeholder(&mut st, now);
        }

        let should_replay = self.has_deferred_orders()
            && self.can_replay_deferred(snapshot.as_deref(), snapshot.is_none());

        if should_replay {
            let replay_interval = self.config.deferred_replay_interval_secs.max(0.0);
            let proceed = {
                let mut st = self.state.lock();
                if now - st.last_deferred_replay >= replay_interval {
                    st.last_deferred_replay = now;
                    true
                } else {
                    false
                }
            };
            if proceed {
                info!(reason, "no pending sells; replaying deferred orders");
                // The replay re-checks the gate itself: a new sell may have
                // gone in flight between this pass's snapshot and now.
                self.process_deferred_orders(false);
                changed += 1;
            }
        } else if self.has_deferred_orders() && self.is_uncertain_mode() {
            let log_interval = self.config.uncertain_replay_log_interval_secs.max(1.0);
            let mut st = self.state.lock();
            if now - st.last_uncertain_replay_log >= log_interval {
                st.last_uncertain_replay_log = now;
                info!("deferred replay paused: uncertain mode active");
            }
        }

        changed
    }

    /// The deferred replay gate.
    ///
    /// Replays are forbidden in uncertain mode; otherwise they require
    /// evidence of zero pending sells. A provided snapshot is that evidence;
    /// with a failed snapshot the answer is no; with no snapshot at all the
    /// venue is probed directly. The local pending-sell set is an additional
    /// conservative veto in every case, so one spuriously empty snapshot
    /// cannot trigger an early replay.
    pub(crate) fn can_replay_deferred(
        &self,
        snapshot: Option<&[PendingOrder]>,
        snapshot_failed: bool,
    ) -> bool {
        if self.is_uncertain_mode() {
            return false;
        }

        let mut has_pending_sell = match snapshot {
            Some(rows) => snapshot_has_pending_sell(rows),
            None if snapshot_failed => return false,
            None => self.has_pending_sells_gate(),
        };
        if !self.state.lock().pending_sells.is_empty() {
            has_pending_sell = true;
        }
        !has_pending_sell
    }

    /// Replay the deferred queue.
    ///
    /// `assume_sell_cleared` skips the sell-clear gate (the explicit path
    /// used when the caller has just confirmed the sells itself); uncertain
    /// mode is never skipped. Each entry re-dispatches through the intent
    /// translator, so price, NAV and risk locks are all re-evaluated; an
    /// entry whose dispatch fails outright is re-queued with an incremented
    /// fail count.
    pub fn process_deferred_orders(&self, assume_sell_cleared: bool) {
        if self.is_uncertain_mode() {
            info!("deferred replay skipped: uncertain mode active");
            return;
        }
        if !assume_sell_cleared && !self.can_replay_deferred(None, false) {
            info!("deferred replay skipped: pending sells not cleared");
            return;
        }

        let batch: Vec<DeferredIntent> = {
            let mut st = self.state.lock();
            if st.deferred.is_empty() {
                let now = self.now();
                self.drain_buffered_retries(
                    &mut st,
                    SnapshotView::Unavailable("replay path holds the ledger lock"),
                    now,
                    "deferred_empty",
                );
                return;
            }
            info!(count = st.deferred.len(), "cash available; replaying deferred orders");
            std::mem::take(&mut st.deferred)
        };

        let mut failed: Vec<DeferredIntent> = Vec::new();
        for mut item in batch {
            match self.run_intent(item.kind, &item.symbol, item.target) {
                Ok(_) => {}
                Err(err) => {
                    item.fail_count += 1;
                    let queued_for = (self.now() - item.created_at).max(0.0);
                    warn!(
                        symbol = %item.symbol,
                        attempt = item.fail_count,
                        queued_for,
                        error = %err,
                        "deferred replay dispatch failed"
                    );
                    failed.push(item);
                }
            }
        }

        if !failed.is_empty() {
            let requeued = failed.len();
            self.state.lock().deferred.extend(failed);
            info!(requeued, "re-queued failed deferred replays");
        }

        let now = self.now();
        let mut st = self.state.lock();
        self.drain_buffered_retries(
            &mut st,
            SnapshotView::Unavailable("replay path holds the ledger lock"),
            now,
            "deferred_replayed",
        );
    }
}
