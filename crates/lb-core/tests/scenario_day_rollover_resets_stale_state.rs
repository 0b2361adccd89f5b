//! Overnight disconnects make in-flight state untrustworthy: crossing into a
//! new calendar day (or a long heartbeat gap) wipes queues and the virtual
//! ledger, and the broker snapshot rebuilds what is still real.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use lb_adapter::{AlarmEvent, PendingOrder, Side};
use lb_broker_paper::{CapturingAlarm, ManualClock, PaperBroker};
use lb_core::{CoreConfig, LiveBroker};

const SYM: &str = "SHSE.600000";

fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(y, m, d)
        .context("bad date")?
        .and_hms_opt(hh, mm, 0)
        .context("bad time")
}

#[test]
fn new_day_clears_queues_and_virtual_spend() -> Result<()> {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let alarm = Arc::new(CapturingAlarm::new());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default())
        .with_clock(clock.clone())
        .with_alarm(alarm.clone());

    core.set_datetime(at(2026, 2, 16, 14, 55)?);

    // Seed a live sell marker from the venue book plus a deferred buy
    // parked behind it.
    broker.set_cash(100.0);
    broker.set_price(SYM, 10.0);
    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        1000.0,
    ));
    clock.advance(5.0);
    core.self_heal("seed", true);
    assert_eq!(core.pending_sell_count(), 1);

    let handle = core
        .order_target_value(SYM, 1000.0)
        .context("buy should park behind the pending sell")?;
    assert!(handle.is_deferred_placeholder());
    assert_eq!(core.deferred_len(), 1);

    // Next morning: all of it is stale.
    core.set_datetime(at(2026, 2, 17, 9, 31)?);

    assert_eq!(core.deferred_len(), 0);
    assert_eq!(core.pending_sell_count(), 0);
    assert_eq!(core.active_buy_count(), 0);
    assert_eq!(core.buffered_retry_count(), 0);
    assert_eq!(core.virtual_spent_cash(), 0.0);
    assert!(alarm.events().iter().any(|e| matches!(
        e,
        AlarmEvent::StaleStateReset { trigger } if trigger == "new_day"
    )));
    Ok(())
}

#[test]
fn intraday_bar_advance_keeps_inflight_state() -> Result<()> {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default()).with_clock(clock.clone());

    core.set_datetime(at(2026, 2, 16, 10, 0)?);

    broker.set_cash(100.0);
    broker.set_price(SYM, 10.0);
    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        500.0,
    ));
    clock.advance(5.0);
    core.self_heal("seed", true);
    core.order_target_value(SYM, 1000.0)
        .context("buy should defer")?;
    assert_eq!(core.deferred_len(), 1);

    // One-minute bar advance inside the same day: replay will reprice, so
    // carrying the queue is safe and must not be wiped.
    core.set_datetime(at(2026, 2, 16, 10, 1)?);
    assert_eq!(core.deferred_len(), 1);
    assert_eq!(core.pending_sell_count(), 1);
    Ok(())
}

#[test]
fn long_gap_inside_a_day_also_resets() -> Result<()> {
    let broker = Arc::new(PaperBroker::new());
    let clock = Arc::new(ManualClock::new());
    let core = LiveBroker::new(broker.clone(), CoreConfig::default()).with_clock(clock.clone());

    core.set_datetime(at(2026, 2, 16, 10, 0)?);

    broker.set_cash(100.0);
    broker.set_price(SYM, 10.0);
    broker.push_pending(PendingOrder::new(
        Some("S1".to_string()),
        SYM,
        Side::Sell,
        500.0,
    ));
    clock.advance(5.0);
    core.self_heal("seed", true);
    assert_eq!(core.pending_sell_count(), 1);

    // 11 minutes of heartbeat silence: assume a disconnect happened.
    core.set_datetime(at(2026, 2, 16, 10, 11)?);
    assert_eq!(core.pending_sell_count(), 0);
    Ok(())
}
