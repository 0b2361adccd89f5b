//! Deltas are computed against the expected size (settled plus in-flight),
//! so repeating a target while the first order is still working must not
//! submit again.

use std::sync::Arc;

use lb_adapter::Side;
use lb_broker_paper::{ManualClock, PaperBroker};
use lb_core::{CoreConfig, LiveBroker};

const SYM: &str = "AAPL.SMART";

#[test]
fn repeated_target_percent_is_a_noop_while_buy_is_inflight() {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default()).with_clock(clock);

    broker.set_cash(100_000.0);
    broker.set_price(SYM, 10.0);
    core.set_symbols(vec![SYM.to_string()]);

    let first = core
        .order_target_percent(SYM, 0.5)
        .expect("first intent must submit");
    assert!(first.is_buy());
    assert_eq!(broker.submissions()[0].size, 5000);

    // Same target again, no fills in between: the in-flight buy already
    // covers it, so the delta is not positive and nothing is submitted.
    assert!(core.order_target_percent(SYM, 0.5).is_none());
    assert_eq!(broker.submission_count(), 1);
}

#[test]
fn expected_size_folds_inflight_orders_across_renderings() {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default()).with_clock(clock);

    broker.set_cash(100_000.0);
    broker.set_price(SYM, 10.0);
    broker.set_position(SYM, 1000, 10.0);
    // The venue book renders the symbol without the exchange suffix.
    broker.push_pending(lb_adapter::PendingOrder::new(
        Some("B1".to_string()),
        "AAPL",
        Side::Buy,
        300.0,
    ));
    broker.push_pending(lb_adapter::PendingOrder::new(
        Some("S1".to_string()),
        "AAPL",
        Side::Sell,
        200.0,
    ));

    assert_eq!(core.expected_size(SYM), 1000.0 + 300.0 - 200.0);
}
