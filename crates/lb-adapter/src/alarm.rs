use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmLevel {
    Info,
    Warning,
    Critical,
}

/// Structured operator notifications emitted by the core.
///
/// These are the events a human on call needs to hear about even when nobody
/// is tailing logs: a submission the venue refused, a misconfigured lot size
/// eating an order, a state wipe, and entry into the uncertain / degraded
/// safety windows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AlarmEvent {
    SubmitRejected {
        symbol: String,
        size: i64,
        reason: String,
    },
    /// A positive requested size rounded to zero against the configured lot.
    LotTooCoarse {
        symbol: String,
        requested: f64,
        lot_size: i64,
    },
    StaleStateReset {
        trigger: String,
    },
    UncertainModeEntered {
        ttl_secs: f64,
        reason: String,
    },
    CashDegraded {
        ttl_secs: f64,
        reason: String,
    },
}

impl AlarmEvent {
    pub fn level(&self) -> AlarmLevel {
        match self {
            AlarmEvent::SubmitRejected { .. } => AlarmLevel::Warning,
            AlarmEvent::LotTooCoarse { .. } => AlarmLevel::Warning,
            AlarmEvent::StaleStateReset { .. } => AlarmLevel::Warning,
            AlarmEvent::UncertainModeEntered { .. } => AlarmLevel::Critical,
            AlarmEvent::CashDegraded { .. } => AlarmLevel::Critical,
        }
    }
}

/// Notification channel injected into the core at construction.
///
/// Implementations deliver to whatever the deployment uses (chat webhook,
/// pager, stdout). Delivery must not block the caller for long and must not
/// panic; the core calls this from locked and callback paths.
pub trait AlarmSink: Send + Sync {
    fn push(&self, event: AlarmEvent);
}

/// Drops every event. The default when no channel is wired.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAlarm;

impl AlarmSink for NullAlarm {
    fn push(&self, _event: AlarmEvent) {}
}
