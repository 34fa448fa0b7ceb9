use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::Record;
use crate::timer::{SessionState, StopReason};

/// Every session state change produces an Event.
/// Hosts subscribe through [`SessionController::subscribe`](crate::SessionController::subscribe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        session_id: String,
        target_duration_millis: i64,
        at: DateTime<Utc>,
    },
    SessionPaused {
        session_id: String,
        time_left_millis: i64,
        at: DateTime<Utc>,
    },
    SessionResumed {
        session_id: String,
        time_left_millis: i64,
        at: DateTime<Utc>,
    },
    /// App went to the background; the grace countdown began.
    SessionBackgrounded {
        session_id: String,
        grace_millis: i64,
        at: DateTime<Utc>,
    },
    /// App came back before the grace period ran out.
    SessionForegrounded {
        session_id: String,
        time_left_millis: i64,
        at: DateTime<Utc>,
    },
    SessionCompleted {
        record: Record,
        at: DateTime<Utc>,
    },
    SessionStopped {
        record: Record,
        reason: StopReason,
        at: DateTime<Utc>,
    },
    /// Countdown progress, once per tick while running.
    Tick {
        session_id: String,
        state: SessionState,
        remaining_millis: i64,
        at: DateTime<Utc>,
    },
}
