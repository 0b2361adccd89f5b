//! Snapshot-driven reconciliation of local tracker state against broker
//! truth.
//!
//! Callback loss is a fact of life with venue APIs: a fill or cancel event
//! can simply never arrive, leaving a phantom pending-sell marker (which
//! blocks deferred buys forever) or a phantom active-buy reservation (which
//! freezes cash forever). Each heal pass takes the authoritative pending
//! snapshot and repairs both tables, with hysteresis so a single flaky empty
//! snapshot cannot wipe real in-flight state.
//!
//! Everything here runs under the ledger lock and performs no I/O; the
//! snapshot (or the reason it is unavailable) comes in as a [`SnapshotView`].

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use lb_adapter::{BrokerAdapter, Side};
use lb_symbols::{alias_set, symbols_match};

use crate::broker::LiveBroker;
use crate::state::{CoreState, OrderStateMemory, SnapshotView};

impl<A: BrokerAdapter> LiveBroker<A> {
    /// (a) Pending-sell reconciliation.
    ///
    /// A snapshot showing live sells resets the empty streak and, when ids
    /// are available, syncs the local set by exact set-difference. A
    /// snapshot showing no sells only clears local markers after both the
    /// consecutive-empty count and the minimum elapsed window are met.
    pub(crate) fn reconcile_pending_sells(
        &self,
        st: &mut CoreState,
        view: SnapshotView<'_>,
        now: f64,
    ) -> usize {
        let rows = match view {
            SnapshotView::Fresh(rows) => rows,
            // No fresh truth: stay conservative, touch nothing.
            SnapshotView::Unavailable(_) => return 0,
        };

        let mut live_sell_ids: BTreeSet<String> = BTreeSet::new();
        let mut live_sell_count = 0usize;
        for row in rows {
            if row.side != Side::Sell || row.remaining <= 0.0 {
                continue;
            }
            live_sell_count += 1;
            if self.caps.snapshot_order_ids {
                if let Some(id) = row.id.as_deref() {
                    if !id.trim().is_empty() {
                        live_sell_ids.insert(id.to_string());
                    }
                }
            }
        }

        if live_sell_count == 0 {
            if st.pending_sells.is_empty() {
                st.pending_sell_empty_snapshots = 0;
                st.pending_sell_empty_since = None;
                return 0;
            }
            st.pending_sell_empty_snapshots += 1;
            if st.pending_sell_empty_since.is_none() {
                st.pending_sell_empty_since = Some(now);
            }
            let threshold = self.config.pending_sell_clear_empty_snapshots.max(1);
            let min_wait = self.config.pending_sell_clear_empty_secs.max(0.0);
            let waited = now - st.pending_sell_empty_since.unwrap_or(now);
            if st.pending_sell_empty_snapshots >= threshold && waited >= min_wait {
                let stale = st.pending_sells.len();
                st.pending_sells.clear();
                st.pending_sell_empty_snapshots = 0;
                st.pending_sell_empty_since = None;
                info!(stale, "cleared stale pending-sell markers (broker snapshot empty)");
                return stale;
            }
            return 0;
        }

        // Real sells visible: the empty streak resets immediately.
        st.pending_sell_empty_snapshots = 0;
        st.pending_sell_empty_since = None;

        // Sells visible but without ids: no precise set reconciliation is
        // possible, abstain.
        if live_sell_ids.is_empty() {
            return 0;
        }

        let removed: Vec<String> = st
            .pending_sells
            .difference(&live_sell_ids)
            .cloned()
            .collect();
        let added: Vec<String> = live_sell_ids
            .difference(&st.pending_sells)
            .cloned()
            .collect();
        for id in &removed {
            st.pending_sells.remove(id);
        }
        for id in &added {
            st.pending_sells.insert(id.clone());
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "cleared stale pending-sell markers");
        }
        if !added.is_empty() {
            info!(count = added.len(), "synced pending-sell markers from broker snapshot");
        }
        removed.len() + added.len()
    }

    /// (b) Active-buy reconciliation.
    ///
    /// A record is "seen" when its id appears in the snapshot, or (in mixed
    /// id / no-id snapshots) when its symbol aliases overlap a BUY row that
    /// carries no id. Unseen records accumulate a miss streak; a record is
    /// only dropped and refunded once the streak, the time since the first
    /// miss, and the record's own age all clear their thresholds.
    pub(crate) fn reconcile_active_buys(
        &self,
        st: &mut CoreState,
        view: SnapshotView<'_>,
        now: f64,
    ) -> usize {
        if st.active_buys.is_empty() {
            return 0;
        }
        let rows = match view {
            SnapshotView::Fresh(rows) => rows,
            SnapshotView::Unavailable(_) => return 0,
        };

        let mut live_buy_ids: BTreeSet<String> = BTreeSet::new();
        let mut live_buy_aliases: BTreeSet<String> = BTreeSet::new();
        let mut has_buy_without_id = false;
        for row in rows {
            if row.side != Side::Buy || row.remaining <= 0.0 {
                continue;
            }
            match row.id.as_deref() {
                Some(id) if self.caps.snapshot_order_ids && !id.trim().is_empty() => {
                    live_buy_ids.insert(id.to_string());
                }
                _ => has_buy_without_id = true,
            }
            if !row.symbol.trim().is_empty() {
                live_buy_aliases.extend(alias_set(&row.symbol));
            }
        }
        let has_live_ids = !live_buy_ids.is_empty();

        let threshold = self.config.active_buy_clear_empty_snapshots.max(1);
        let min_wait = self.config.active_buy_clear_empty_secs.max(0.0);

        let mut stale_ids: Vec<String> = Vec::new();
        for (oid, record) in st.active_buys.iter_mut() {
            let aliases = alias_set(&record.symbol);
            // In an all-id snapshot the id comparison is exact and symbol
            // matching stays off; once any row lacks an id, symbol overlap
            // keeps a record alive rather than refunding a working order.
            let seen = live_buy_ids.contains(oid)
                || (!aliases.is_disjoint(&live_buy_aliases)
                    && (!has_live_ids || has_buy_without_id));

            if seen {
                record.miss_snapshots = 0;
                record.miss_since = None;
                continue;
            }

            record.miss_snapshots += 1;
            if record.miss_since.is_none() {
                record.miss_since = Some(now);
            }
            let miss_waited = now - record.miss_since.unwrap_or(now);
            let age = now - record.created_at;
            if record.miss_snapshots < threshold || age < min_wait || miss_waited < min_wait {
                continue;
            }
            stale_ids.push(oid.clone());
        }

        if stale_ids.is_empty() {
            return 0;
        }

        let multiplier = self.config.safety_multiplier();
        let mut released = 0.0;
        for oid in &stale_ids {
            if let Some(buy) = st.active_buys.remove(oid) {
                released += buy.reservation(multiplier);
            }
        }
        st.virtual_spent_cash = (st.virtual_spent_cash - released).max(0.0);
        warn!(
            count = stale_ids.len(),
            released, "cleared stale active-buy trackers (broker snapshot mismatch)"
        );
        stale_ids.len()
    }

    /// (c) Buffered-rejection drain.
    ///
    /// Each buffered retry waits for its source order to be provably gone.
    /// The probe is tri-state: still pending keeps it buffered (with a
    /// one-shot timeout warning), definitively gone releases it (unless
    /// uncertain mode is on and memory has not seen the terminal), unknown
    /// bumps a failure counter and waits.
    pub(crate) fn drain_buffered_retries(
        &self,
        st: &mut CoreState,
        view: SnapshotView<'_>,
        now: f64,
        reason: &str,
    ) -> usize {
        if st.buffered_retries.is_empty() {
            return 0;
        }

        if let SnapshotView::Unavailable(why) = view {
            // This pass has no venue truth (fetch failed, or the caller
            // already holds the lock and must not start a network fetch).
            // Bounded-rate note so a stuck snapshot is visible.
            if now - st.last_no_snapshot_drain_log >= 10.0 {
                st.last_no_snapshot_drain_log = now;
                debug!(reason, why, "buffered retry drain running without snapshot");
            }
        }

        let warn_after = self.config.buffered_retry_warn_secs.max(0.0);
        let uncertain = st.is_uncertain(now);
        let mut drained = 0usize;

        let keys: Vec<String> = st.buffered_retries.keys().cloned().collect();
        for key in keys {
            let Some(payload) = st.buffered_retries.get(&key) else {
                continue;
            };
            let symbol = payload.symbol.clone();
            let queued_at = payload.queued_at;

            match self.source_order_pending(&st.order_memory, &key, &symbol, view) {
                None => {
                    if let Some(p) = st.buffered_retries.get_mut(&key) {
                        p.query_fail_count += 1;
                        if p.query_fail_since.is_none() {
                            p.query_fail_since = Some(now);
                        }
                        if !p.warned_query_unavailable {
                            p.warned_query_unavailable = true;
                            warn!(
                                symbol = %symbol,
                                reason,
                                "pending snapshot unavailable for buffered retry; waiting"
                            );
                        } else if p.query_fail_count % 10 == 0 {
                            let waited = now - p.query_fail_since.unwrap_or(now);
                            warn!(
                                symbol = %symbol,
                                count = p.query_fail_count,
                                waited,
                                "pending snapshot still unavailable for buffered retry; keeping buffered"
                            );
                        }
                    }
                }
                Some(true) => {
                    if let Some(p) = st.buffered_retries.get_mut(&key) {
                        p.query_fail_count = 0;
                        p.query_fail_since = None;
                        p.warned_query_unavailable = false;
                        let waited = now - queued_at;
                        // Timeout is warn-only: while the source may still
                        // be live, resubmitting would double-reserve.
                        if waited > warn_after && !p.warned_timeout {
                            p.warned_timeout = true;
                            warn!(
                                symbol = %symbol,
                                waited,
                                reason,
                                "buffered retry source still pending at venue past warn threshold"
                            );
                        }
                    }
                }
                Some(false) => {
                    let known_terminal = st
                        .order_memory
                        .get(&key)
                        .map(|note| note.terminal)
                        .unwrap_or(false);
                    // Releasing on a locally observed terminal is unblocking
                    // a queue, not adding blind exposure, so memory evidence
                    // overrides the uncertain gate.
                    if uncertain && !known_terminal {
                        if let Some(p) = st.buffered_retries.get_mut(&key) {
                            if !p.warned_uncertain {
                                p.warned_uncertain = true;
                                warn!(symbol = %symbol, "buffered retry paused in uncertain mode");
                            }
                        }
                        continue;
                    }
                    if let Some(p) = st.buffered_retries.get_mut(&key) {
                        p.warned_uncertain = false;
                    }
                    if self.submit_buffered_retry(st, &key) {
                        drained += 1;
                    }
                }
            }
        }
        drained
    }

    /// Submit one buffered downgrade retry. Caller holds the ledger lock and
    /// has confirmed the source order is no longer working.
    pub(crate) fn submit_buffered_retry(&self, st: &mut CoreState, key: &str) -> bool {
        let Some(payload) = st.buffered_retries.get(key) else {
            return false;
        };
        let symbol = payload.symbol.clone();
        let new_size = payload.new_size;
        let price = payload.price;
        let lot_size = payload.lot_size;
        let next_retries = payload.next_retries;
        let waited = (self.now() - payload.queued_at).max(0.0);

        info!(
            symbol = %symbol,
            new_size,
            waited,
            "source order terminal; executing buffered downgrade retry"
        );

        match self.finalize_and_submit(st, &symbol, new_size as f64, price, lot_size, next_retries)
        {
            Some(_) => {
                st.buffered_retries.remove(key);
                true
            }
            None => {
                if let Some(p) = st.buffered_retries.get_mut(key) {
                    p.submit_fail_count += 1;
                    warn!(
                        symbol = %symbol,
                        attempt = p.submit_fail_count,
                        "buffered retry submit failed; keeping buffered for next heal pass"
                    );
                }
                false
            }
        }
    }

    /// Tri-state probe: is the order with `order_id` still working at the
    /// venue? Id-precise where the snapshot provides ids; symbol-level
    /// conservative fallback for id-less rows; order-state memory when the
    /// snapshot is unavailable.
    pub(crate) fn source_order_pending(
        &self,
        memory: &OrderStateMemory,
        order_id: &str,
        symbol: &str,
        view: SnapshotView<'_>,
    ) -> Option<bool> {
        match view {
            SnapshotView::Unavailable(_) => {
                memory.pending_state(order_id, Some(symbol), Some(Side::Buy))
            }
            SnapshotView::Fresh(rows) => {
                let mut symbol_matched_without_id = false;
                for row in rows {
                    if row.side != Side::Buy {
                        continue;
                    }
                    let row_id = row
                        .id
                        .as_deref()
                        .filter(|id| self.caps.snapshot_order_ids && !id.trim().is_empty());
                    if let Some(rid) = row_id {
                        if rid == order_id {
                            return Some(true);
                        }
                        continue;
                    }
                    // Mixed snapshots (some rows with ids, some without)
                    // still honor the symbol-level fallback: a return-order
                    // quirk must not release a retry whose source is live.
                    if !symbol.is_empty() && symbols_match(&row.symbol, symbol) {
                        symbol_matched_without_id = true;
                    }
                }
                Some(symbol_matched_without_id)
            }
        }
    }

    /// (d) Reclaim the strategy's stale virtual placeholder.
    ///
    /// When the strategy still holds the deferred sentinel but every queue
    /// has drained, nothing will ever resolve it; after a grace period the
    /// bridge is told to drop it so low-frequency schedules do not stay
    /// blocked until their next full run.
    pub(crate) fn reconcile_strategy_placeholder(&self, st: &mut CoreState, now: f64) -> usize {
        if !self.bridge.holds_deferred_placeholder() {
            st.placeholder_empty_since = None;
            return 0;
        }
        if st.has_backlog() {
            st.placeholder_empty_since = None;
            return 0;
        }
        let since = match st.placeholder_empty_since {
            Some(since) => since,
            None => {
                st.placeholder_empty_since = Some(now);
                return 0;
            }
        };
        let grace = self.config.deferred_clear_grace_secs.max(0.0);
        let waited = now - since;
        if waited < grace {
            return 0;
        }
        self.bridge.clear_deferred_placeholder();
        st.placeholder_empty_since = None;
        info!(waited, "cleared stale strategy deferred placeholder");
        1
    }
}
