//! Repeated snapshot failures open the uncertain window: new buys park with
//! per-symbol replacement, sells stay allowed, replay pauses, and everything
//! resumes once the deadline passes.

use std::sync::Arc;

use lb_adapter::{AlarmEvent, OrderHandle, OrderStatus, Side};
use lb_broker_paper::{CapturingAlarm, ManualClock, PaperBroker};
use lb_core::{CoreConfig, LiveBroker};

#[test]
fn uncertain_window_defers_buys_and_recovers() {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let alarm = Arc::new(CapturingAlarm::new());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default())
        .with_clock(clock.clone())
        .with_alarm(alarm.clone());

    broker.set_cash(100_000.0);
    broker.set_price("AAPL", 10.0);
    broker.set_price("MSFT", 20.0);

    // A working buy gives the heal loop a backlog worth snapshotting.
    core.order_target_value("AAPL", 2000.0)
        .expect("seed buy must submit");
    assert_eq!(broker.submission_count(), 1);

    // Three heal passes, each exhausting the snapshot retry budget.
    broker.fail_next_pending_fetches(6);
    for _ in 0..3 {
        clock.advance(10.0);
        core.self_heal("tick", false);
    }
    assert!(core.is_uncertain_mode());
    assert!(alarm
        .events()
        .iter()
        .any(|e| matches!(e, AlarmEvent::UncertainModeEntered { .. })));

    // New BUY intent: parked, not submitted.
    let parked = core
        .order_target_value("MSFT", 2000.0)
        .expect("uncertain buy must return the virtual handle");
    assert!(parked.is_deferred_placeholder());
    assert_eq!(broker.submission_count(), 1);
    assert_eq!(core.deferred_len(), 1);

    // A newer target for the same symbol replaces the queued one.
    core.order_target_value("MSFT", 4000.0)
        .expect("refresh must return the virtual handle");
    assert_eq!(core.deferred_len(), 1);

    // SELLs are never suppressed by the window.
    broker.set_position("AAPL", 200, 10.0);
    let sell = core
        .smart_sell("AAPL", 200.0, 10.0)
        .expect("sell must submit during uncertain mode");
    assert_eq!(broker.submission_count(), 2);

    // Heal inside the window: replay stays paused.
    clock.advance(5.0);
    core.self_heal("tick", false);
    assert_eq!(core.deferred_len(), 1);
    assert_eq!(broker.submission_count(), 2);

    // Clear the sell so the replay gate can pass once the window ends.
    broker.remove_pending(&sell.id);
    core.on_order_status(&OrderHandle::new(
        sell.id.as_str(),
        "AAPL",
        Side::Sell,
        OrderStatus::Completed,
    ));

    // Past the deadline the window closes by itself and the parked buy
    // replays at its latest target.
    clock.advance(61.0);
    assert!(!core.is_uncertain_mode());
    core.self_heal("tick", false);

    assert_eq!(core.deferred_len(), 0);
    let last = broker.last_submission().expect("replayed buy must submit");
    assert_eq!(last.symbol, "MSFT");
    assert_eq!(last.side, Side::Buy);
    assert_eq!(last.size, 200, "4000 of value at price 20 is 200 shares");
}
