//! A single flaky empty snapshot must never wipe in-flight state. Both the
//! pending-sell set and active-buy reservations clear only after the
//! consecutive-empty count AND the minimum elapsed window are both met.

use std::sync::Arc;

use lb_adapter::{PendingOrder, Side};
use lb_broker_paper::{ManualClock, PaperBroker};
use lb_core::{CoreConfig, LiveBroker};

const SYM: &str = "SHSE.600000";

fn rig() -> (Arc<PaperBroker>, Arc<ManualClock>, LiveBroker<Arc<PaperBroker>>) {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default()).with_clock(clock.clone());
    (broker, clock, core)
}

#[test]
fn pending_sell_markers_survive_single_empty_snapshot() {
    let (broker, clock, core) = rig();
    broker.set_cash(100_000.0);
    broker.set_price(SYM, 10.0);

    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        500.0,
    ));
    core.self_heal("seed", true);
    assert_eq!(core.pending_sell_count(), 1);

    // The venue book goes empty (maybe truthfully, maybe a glitch).
    broker.clear_pending();

    clock.advance(3.0);
    core.self_heal("empty-1", true);
    assert_eq!(core.pending_sell_count(), 1, "one empty snapshot is not enough");

    clock.advance(3.0);
    core.self_heal("empty-2", true);
    assert_eq!(
        core.pending_sell_count(),
        1,
        "count met but the 20s window has not elapsed"
    );

    clock.advance(18.0);
    core.self_heal("empty-3", true);
    assert_eq!(core.pending_sell_count(), 0, "count and window both met");
}

#[test]
fn sell_reappearing_resets_the_empty_streak() {
    let (broker, clock, core) = rig();
    broker.set_cash(100_000.0);
    broker.set_price(SYM, 10.0);

    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        500.0,
    ));
    core.self_heal("seed", true);

    broker.clear_pending();
    clock.advance(3.0);
    core.self_heal("empty-1", true);

    // The sell shows up again: streak resets.
    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        500.0,
    ));
    clock.advance(3.0);
    core.self_heal("back", true);

    broker.clear_pending();
    clock.advance(25.0);
    core.self_heal("empty-again", true);
    assert_eq!(
        core.pending_sell_count(),
        1,
        "a fresh streak starts from one, not from the pre-reset count"
    );
}

#[test]
fn ghost_active_buy_is_refunded_only_after_full_hysteresis() {
    let (broker, clock, core) = rig();
    broker.set_cash(100_000.0);
    broker.set_price(SYM, 10.0);

    let handle = core.order_target_value(SYM, 2000.0).expect("buy submits");
    let reserved = 200.0 * 10.0 * core.config().safety_multiplier();
    assert!((core.virtual_spent_cash() - reserved).abs() < 1e-6);

    // The venue loses the order without ever sending a terminal callback.
    broker.remove_pending(&handle.id);

    clock.advance(3.0);
    core.self_heal("miss-1", true);
    assert_eq!(core.active_buy_count(), 1);

    clock.advance(3.0);
    core.self_heal("miss-2", true);
    assert_eq!(core.active_buy_count(), 1, "record too young to drop");

    clock.advance(18.0);
    core.self_heal("miss-3", true);
    assert_eq!(core.active_buy_count(), 0, "ghost reservation released");
    assert_eq!(core.virtual_spent_cash(), 0.0);
}

#[test]
fn idless_sell_rows_abstain_from_precise_reconcile() {
    let (broker, clock, core) = rig();
    broker.set_cash(100_000.0);
    broker.set_price(SYM, 10.0);

    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        500.0,
    ));
    core.self_heal("seed", true);
    assert_eq!(core.pending_sell_count(), 1);

    // The venue keeps the sell but stops reporting order ids: exact
    // set-difference is impossible, and the marker must be left alone.
    broker.strip_pending_ids();
    clock.advance(3.0);
    core.self_heal("idless", true);
    assert_eq!(core.pending_sell_count(), 1);
}

#[test]
fn idless_buy_rows_keep_active_buys_alive_via_symbol_match() {
    let (broker, clock, core) = rig();
    broker.set_cash(100_000.0);
    broker.set_price(SYM, 10.0);

    core.order_target_value(SYM, 2000.0).expect("buy submits");
    let reserved = core.virtual_spent_cash();

    // Same working order, rendered without an id: the symbol fallback must
    // keep counting it as seen, far past every hysteresis window.
    broker.strip_pending_ids();
    for _ in 0..4 {
        clock.advance(15.0);
        core.self_heal("idless", true);
    }
    assert_eq!(core.active_buy_count(), 1);
    assert_eq!(core.virtual_spent_cash(), reserved);
}

#[test]
fn pending_probe_is_tristate() {
    let (broker, _clock, core) = rig();
    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        500.0,
    ));

    assert_eq!(core.has_pending_order(SYM, Some(Side::Sell)), Some(true));
    assert_eq!(core.has_pending_order(SYM, Some(Side::Buy)), Some(false));
    assert_eq!(core.has_pending_order("MSFT", None), Some(false));

    // Snapshot down: the answer is "unknown", not "no".
    broker.fail_next_pending_fetches(2);
    assert_eq!(core.has_pending_order(SYM, Some(Side::Sell)), None);
}
