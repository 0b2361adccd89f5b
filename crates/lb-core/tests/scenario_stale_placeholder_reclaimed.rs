//! The strategy bridge: sell-filled notifications reach the strategy layer,
//! and a virtual placeholder the strategy is still holding after the
//! backlog drains is reclaimed after the grace period.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use lb_adapter::{OrderHandle, OrderStatus, Side};
use lb_broker_paper::{ManualClock, PaperBroker};
use lb_core::{CoreConfig, LiveBroker, StrategyBridge};

#[derive(Default)]
struct RecordingBridge {
    holds_placeholder: AtomicBool,
    sell_fills: AtomicUsize,
}

impl StrategyBridge for RecordingBridge {
    fn holds_deferred_placeholder(&self) -> bool {
        self.holds_placeholder.load(Ordering::SeqCst)
    }

    fn clear_deferred_placeholder(&self) {
        self.holds_placeholder.store(false, Ordering::SeqCst);
    }

    fn sell_filled(&self) {
        self.sell_fills.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn lingering_placeholder_clears_after_grace_period() {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let bridge = Arc::new(RecordingBridge::default());
    let core = LiveBroker::new(broker, CoreConfig::default())
        .with_clock(clock.clone())
        .with_strategy_bridge(bridge.clone());

    // Strategy stored the virtual handle; meanwhile every queue drained.
    bridge.holds_placeholder.store(true, Ordering::SeqCst);

    core.self_heal("tick", true);
    assert!(
        bridge.holds_placeholder.load(Ordering::SeqCst),
        "grace period starts on the first empty observation"
    );

    clock.advance(2.0);
    core.self_heal("tick", true);
    assert!(bridge.holds_placeholder.load(Ordering::SeqCst), "still inside grace");

    clock.advance(4.0);
    core.self_heal("tick", true);
    assert!(
        !bridge.holds_placeholder.load(Ordering::SeqCst),
        "placeholder reclaimed after the grace period"
    );
}

#[test]
fn sell_completion_notifies_the_bridge() {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let bridge = Arc::new(RecordingBridge::default());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default())
        .with_clock(clock)
        .with_strategy_bridge(bridge.clone());

    broker.set_position("AAPL", 100, 10.0);
    let sell = core.smart_sell("AAPL", 100.0, 10.0).expect("sell submits");

    core.on_order_status(&OrderHandle::new(
        sell.id.as_str(),
        "AAPL",
        Side::Sell,
        OrderStatus::Completed,
    ));
    assert_eq!(bridge.sell_fills.load(Ordering::SeqCst), 1);

    // Cancel and reject callbacks do not fire the hook.
    core.on_order_status(&OrderHandle::new(
        "other",
        "AAPL",
        Side::Sell,
        OrderStatus::Canceled,
    ));
    assert_eq!(bridge.sell_fills.load(Ordering::SeqCst), 1);
}
