/// Core-to-strategy notification surface, supplied at construction.
///
/// The strategy depends on the core's intent surface; the core never holds a
/// reference back to the strategy. Everything the core needs to tell (or
/// ask) the strategy layer goes through this trait, with no-op defaults so
/// embedders implement only what they use.
///
/// Implementations must not call back into the core from these methods: the
/// placeholder pair is invoked while the ledger lock is held.
pub trait StrategyBridge: Send + Sync {
    /// Whether the strategy's stored in-flight handle is currently the
    /// deferred virtual placeholder. The reconciler reclaims a lingering
    /// placeholder after the backlog drains (plus a grace period) so a
    /// strategy never blocks forever on a parked buy that already resolved.
    fn holds_deferred_placeholder(&self) -> bool {
        false
    }

    /// Drop the stored placeholder. Called only after the grace period.
    fn clear_deferred_placeholder(&self) {}

    /// A SELL completed. The expected reaction is to schedule
    /// `sync_balance()` plus a forced self-heal (or simply call the core's
    /// `on_sell_filled`), on a thread that is allowed to block. Venues whose
    /// cash settles slowly may delay this notification; the core treats the
    /// timing as an adapter hint, not an invariant.
    fn sell_filled(&self) {}
}

/// Default bridge: no strategy wired, every notification is dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStrategy;

impl StrategyBridge for NoStrategy {}
