//! Core race regression: a buy arriving while a sell is in flight must park
//! in the deferred queue, and the sell's fill callback alone must NOT replay
//! it. Replay happens only through the explicit path (balance sync plus
//! deferred processing, or the sell-filled hook).

use std::sync::Arc;

use lb_adapter::{OrderHandle, OrderStatus, PendingOrder, Side};
use lb_broker_paper::{CapturingAlarm, ManualClock, PaperBroker};
use lb_core::{CoreConfig, LiveBroker};

const SYM: &str = "SHSE.600000";

fn rig() -> (
    Arc<PaperBroker>,
    Arc<ManualClock>,
    Arc<CapturingAlarm>,
    LiveBroker<Arc<PaperBroker>>,
) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let alarm = Arc::new(CapturingAlarm::new());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default())
        .with_clock(clock.clone())
        .with_alarm(alarm.clone());
    (broker, clock, alarm, core)
}

fn park_buy_behind_sell(
    broker: &PaperBroker,
    core: &LiveBroker<Arc<PaperBroker>>,
) -> OrderHandle {
    broker.set_cash(100.0);
    broker.set_price(SYM, 10.0);
    broker.set_position(SYM, 1000, 10.0);
    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        1000.0,
    ));

    let handle = core
        .order_target_value(SYM, 1000.0)
        .expect("buy behind a pending sell must return the virtual handle");
    assert!(handle.is_deferred_placeholder());
    assert!(handle.is_pending(), "strategies treat the placeholder as in flight");
    assert_eq!(broker.submission_count(), 0, "no real order may go out yet");
    assert_eq!(core.deferred_len(), 1);
    handle
}

fn settle_sell(broker: &PaperBroker, core: &LiveBroker<Arc<PaperBroker>>) {
    core.on_order_status(&OrderHandle::new(
        "S1",
        SYM,
        Side::Sell,
        OrderStatus::Completed,
    ));
    assert_eq!(core.pending_sell_count(), 0);
    assert_eq!(
        core.deferred_len(),
        1,
        "the fill callback must not replay the deferred buy by itself"
    );
    assert_eq!(broker.submission_count(), 0);

    // Venue truth after the fill: cash landed, position flat, sell gone.
    broker.set_cash(5000.0);
    broker.set_position(SYM, 0, 0.0);
    broker.remove_pending("S1");
}

#[test]
fn deferred_buy_replays_after_explicit_sync_and_processing() {
    let (broker, _clock, _alarm, core) = rig();
    park_buy_behind_sell(&broker, &core);
    settle_sell(&broker, &core);

    core.sync_balance();
    core.process_deferred_orders(false);

    let subs = broker.submissions();
    assert_eq!(subs.len(), 1, "exactly one real buy after replay");
    assert_eq!(subs[0].side, Side::Buy);
    assert_eq!(subs[0].size, 100, "1000 value at price 10 is 100 shares");
    assert_eq!(core.deferred_len(), 0);

    // Ledger invariant: the reservation for the submitted buy is the whole
    // of virtual spent.
    let expected = 100.0 * 10.0 * core.config().safety_multiplier();
    assert!((core.virtual_spent_cash() - expected).abs() < 1e-6);
}

#[test]
fn sell_filled_hook_drives_the_same_replay() {
    let (broker, _clock, _alarm, core) = rig();
    park_buy_behind_sell(&broker, &core);
    settle_sell(&broker, &core);

    core.on_sell_filled();

    let subs = broker.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].side, Side::Buy);
    assert_eq!(subs[0].size, 100);
    assert_eq!(core.deferred_len(), 0);
    assert_eq!(core.last_synced_cash(), 5000.0);
}
