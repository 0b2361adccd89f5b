use serde::{Deserialize, Serialize};

/// Every knob the core recognizes. All optional in serialized form; the
/// compiled-in defaults are the values the core was tuned against.
///
/// Loading and layering of configuration files happens outside the core;
/// embedders hand a fully resolved `CoreConfig` to the constructor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Lower bound between heartbeat-driven self-heal passes. One pass per
    /// second absorbs common callback jitter without producing noise.
    pub self_heal_min_interval_secs: f64,
    /// Minimum time between authoritative pending-snapshot fetches while a
    /// runtime backlog exists.
    pub pending_snapshot_min_interval_secs: f64,
    /// Callback-loss backstop: deferred buys are retried at least this often
    /// so "only cash left" cannot wedge the strategy.
    pub deferred_replay_interval_secs: f64,
    /// Emit a one-shot warning once a buffered retry has waited this long on
    /// its source order.
    pub buffered_retry_warn_secs: f64,
    /// Bounded retry for the pending-snapshot query, to absorb short network
    /// wobble.
    pub snapshot_retry_attempts: u32,
    pub snapshot_retry_sleep_secs: f64,
    /// Consecutive snapshot failures that trigger uncertain mode. Unattended
    /// overnight operation prefers trading less over adding exposure while
    /// state is unreliable.
    pub uncertain_fails: u32,
    pub uncertain_ttl_secs: f64,
    /// Hysteresis for clearing the local pending-sell set on empty
    /// snapshots: both the consecutive-empty count and the elapsed window
    /// must be met.
    pub pending_sell_clear_empty_snapshots: u32,
    pub pending_sell_clear_empty_secs: f64,
    /// Same two-condition hysteresis for dropping unseen active buys, plus a
    /// minimum record age.
    pub active_buy_clear_empty_snapshots: u32,
    pub active_buy_clear_empty_secs: f64,
    /// Bounded terminal-state cache used as the safe fallback when the
    /// snapshot is unavailable.
    pub order_state_memory_max_items: usize,
    pub order_state_memory_ttl_secs: f64,
    /// Fast-fail window reported through `pre_strategy_check` after a cash
    /// fetch degrades.
    pub cash_degraded_ttl_secs: f64,
    /// Delay before reclaiming a strategy's stale virtual placeholder once
    /// the backlog has drained.
    pub deferred_clear_grace_secs: f64,
    /// Cap on rejection-downgrade cycles per source order.
    pub max_rejection_downgrades: u32,
    /// Venue share multiple. 1 for fractional-capable venues, 100 for
    /// A-share boards.
    pub lot_size: i64,
    /// Heartbeat gap beyond which in-flight state is considered
    /// untrustworthy and reset (disconnect / restart detection).
    pub long_gap_reset_secs: f64,
    /// Bounded rate for the "replay paused: uncertain mode" log line.
    pub uncertain_replay_log_interval_secs: f64,
    /// Cost-model inputs for the safety multiplier.
    pub commission_rate: f64,
    pub slippage_rate: f64,
    /// Optional upper bound on usable cash, for running a strategy on a
    /// slice of a shared account.
    pub cash_cap: Option<f64>,
    /// Whether a BUY-cancel callback may release that order's buffered
    /// retry even during uncertain mode. The default favors queue liveness:
    /// the cancel callback itself is positive evidence the source is gone.
    pub release_retry_on_cancel_in_uncertain: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            self_heal_min_interval_secs: 1.0,
            pending_snapshot_min_interval_secs: 2.0,
            deferred_replay_interval_secs: 2.0,
            buffered_retry_warn_secs: 20.0,
            snapshot_retry_attempts: 2,
            snapshot_retry_sleep_secs: 0.05,
            uncertain_fails: 3,
            uncertain_ttl_secs: 60.0,
            pending_sell_clear_empty_snapshots: 2,
            pending_sell_clear_empty_secs: 20.0,
            active_buy_clear_empty_snapshots: 2,
            active_buy_clear_empty_secs: 20.0,
            order_state_memory_max_items: 5000,
            order_state_memory_ttl_secs: 12.0 * 3600.0,
            cash_degraded_ttl_secs: 30.0,
            deferred_clear_grace_secs: 5.0,
            max_rejection_downgrades: 3,
            lot_size: 100,
            long_gap_reset_secs: 600.0,
            uncertain_replay_log_interval_secs: 30.0,
            commission_rate: 0.0003,
            slippage_rate: 0.001,
            cash_cap: None,
            release_retry_on_cancel_in_uncertain: true,
        }
    }
}

impl CoreConfig {
    /// Cost-overestimation factor applied to every BUY reservation:
    /// `1 + commission + slippage + 0.002`. The absolute floor absorbs
    /// venue minimum-fee edges (for example A-share minimum commission).
    /// Overestimating makes tight-cash rejections rare at the price of
    /// slightly underusing cash.
    pub fn safety_multiplier(&self) -> f64 {
        1.0 + self.commission_rate + self.slippage_rate + 0.002
    }
}
