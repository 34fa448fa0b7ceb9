//! Focus session state machine.
//!
//! The engine holds at most one active session. It does not own any timers;
//! the caller drives it with [`TimerEngine::countdown_tick`] while running and
//! [`TimerEngine::grace_tick`] while the app is backgrounded. Each tick names
//! the session it was scheduled for and is ignored unless that session is
//! still active and in the matching state.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running -> (Paused | BackgroundGrace | Completed | Stopped)
//! Paused -> Running | Stopped
//! BackgroundGrace -> Running | Stopped
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::records::{Record, RecordKind};
use crate::storage::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    /// App left the foreground; the session survives if it returns in time.
    BackgroundGrace,
    Completed,
    Stopped,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Running | SessionState::Paused | SessionState::BackgroundGrace
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::BackgroundGrace => "in background grace",
            SessionState::Completed => "completed",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a session ended without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    GraceExpired,
}

/// One in-progress or just-finished focus session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusSession {
    pub id: String,
    pub target_duration_millis: i64,
    pub time_left_millis: i64,
    pub state: SessionState,
    pub background_grace_left_millis: i64,
    pub planted_at: DateTime<Utc>,
    pub kind: RecordKind,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

impl FocusSession {
    pub fn elapsed_millis(&self) -> i64 {
        self.target_duration_millis - self.time_left_millis
    }

    /// 0.0 .. 1.0 progress towards the target.
    pub fn progress(&self) -> f64 {
        if self.target_duration_millis == 0 {
            return 0.0;
        }
        self.elapsed_millis() as f64 / self.target_duration_millis as f64
    }
}

/// Result of applying one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick's session is gone or in another state; nothing changed.
    Inactive,
    /// Countdown (or grace countdown) moved; the session is still live.
    Ticked { remaining_millis: i64 },
    /// The session reached a terminal state and produced this record.
    Finished(Record),
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub state: SessionState,
    pub target_duration_millis: i64,
    pub time_left_millis: i64,
    pub background_grace_left_millis: i64,
    pub progress: f64,
    pub at: DateTime<Utc>,
}

const MAX_TICK_INTERVAL_MS: u64 = 86_400_000;

/// Core session engine.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    tick_interval_ms: i64,
    grace_period_ms: i64,
    active: Option<FocusSession>,
    /// The last session that left the active slot.
    finished: Option<FocusSession>,
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl TimerEngine {
    /// The tick interval is clamped to 1 ms ..= 1 day.
    pub fn new(config: &SessionConfig) -> Self {
        let clamped = config.tick_interval_ms.clamp(1, MAX_TICK_INTERVAL_MS);
        if clamped != config.tick_interval_ms {
            tracing::warn!(
                configured = config.tick_interval_ms,
                used = clamped,
                "tick_interval_ms out of range, clamping"
            );
        }
        Self {
            tick_interval_ms: clamped as i64,
            grace_period_ms: i64::try_from(config.grace_period_ms).unwrap_or(i64::MAX),
            active: None,
            finished: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// State of the active session, or `Idle`.
    pub fn state(&self) -> SessionState {
        self.active
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn active(&self) -> Option<&FocusSession> {
        self.active.as_ref()
    }

    pub fn last_finished(&self) -> Option<&FocusSession> {
        self.finished.as_ref()
    }

    /// Look up a session by id among the active and last finished sessions.
    pub fn session(&self, id: &str) -> Option<&FocusSession> {
        self.active
            .iter()
            .chain(self.finished.iter())
            .find(|s| s.id == id)
    }

    pub fn tick_interval_ms(&self) -> i64 {
        self.tick_interval_ms
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.active.as_ref();
        SessionSnapshot {
            session_id: session.map(|s| s.id.clone()),
            state: self.state(),
            target_duration_millis: session.map(|s| s.target_duration_millis).unwrap_or(0),
            time_left_millis: session.map(|s| s.time_left_millis).unwrap_or(0),
            background_grace_left_millis: session
                .map(|s| s.background_grace_left_millis)
                .unwrap_or(0),
            progress: session.map(FocusSession::progress).unwrap_or(0.0),
            at: Utc::now(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start a plain focus session. Returns the new session id.
    pub fn start(&mut self, target_duration_millis: i64) -> Result<String, SessionError> {
        self.start_with(target_duration_millis, RecordKind::Focus)
    }

    /// Start a session whose record will carry `kind`.
    pub fn start_with(
        &mut self,
        target_duration_millis: i64,
        kind: RecordKind,
    ) -> Result<String, SessionError> {
        if target_duration_millis <= 0 {
            return Err(SessionError::InvalidArgument(format!(
                "target duration must be positive, got {target_duration_millis} ms"
            )));
        }
        if let Some(active) = &self.active {
            return Err(SessionError::AlreadyActive {
                active_id: active.id.clone(),
            });
        }

        let id = Uuid::new_v4().to_string();
        self.active = Some(FocusSession {
            id: id.clone(),
            target_duration_millis,
            time_left_millis: target_duration_millis,
            state: SessionState::Running,
            background_grace_left_millis: 0,
            planted_at: Utc::now(),
            kind,
            stop_reason: None,
        });
        tracing::info!(session_id = %id, target_duration_millis, "Session started");
        Ok(id)
    }

    pub fn pause(&mut self, id: &str) -> Result<(), SessionError> {
        let session = self.expect_state(id, "pause", SessionState::Running)?;
        session.state = SessionState::Paused;
        tracing::debug!(session_id = %id, time_left_millis = session.time_left_millis, "Session paused");
        Ok(())
    }

    pub fn resume(&mut self, id: &str) -> Result<(), SessionError> {
        let session = self.expect_state(id, "resume", SessionState::Paused)?;
        session.state = SessionState::Running;
        tracing::debug!(session_id = %id, "Session resumed");
        Ok(())
    }

    /// End the session early. The record is never marked completed.
    pub fn stop(&mut self, id: &str) -> Result<Record, SessionError> {
        let Some(session) = self.take_active(id) else {
            return Err(self.invalid_state("stop", id));
        };
        Ok(self.finish(session, SessionState::Stopped, Some(StopReason::Manual)))
    }

    /// The app left the foreground: freeze the countdown and start the grace period.
    pub fn on_app_background(&mut self, id: &str) -> Result<(), SessionError> {
        let grace = self.grace_period_ms;
        let session = self.expect_state(id, "background", SessionState::Running)?;
        session.state = SessionState::BackgroundGrace;
        session.background_grace_left_millis = grace;
        tracing::info!(session_id = %id, grace_ms = grace, "Session entered background grace");
        Ok(())
    }

    /// The app returned to the foreground.
    ///
    /// Resumes a session still in its grace period. If the grace period
    /// already expired, the session is stopped and this is a no-op that
    /// reports `Stopped`.
    pub fn on_app_foreground(&mut self, id: &str) -> Result<SessionState, SessionError> {
        if let Some(finished) = &self.finished {
            if finished.id == id && finished.stop_reason == Some(StopReason::GraceExpired) {
                return Ok(finished.state);
            }
        }
        let session = self.expect_state(id, "foreground", SessionState::BackgroundGrace)?;
        session.state = SessionState::Running;
        session.background_grace_left_millis = 0;
        tracing::info!(session_id = %id, "Session returned from background in time");
        Ok(SessionState::Running)
    }

    /// Apply one countdown tick to the session `id`.
    pub fn countdown_tick(&mut self, id: &str) -> TickOutcome {
        let step = self.tick_interval_ms;
        let Some(session) = self.live(id, SessionState::Running) else {
            return TickOutcome::Inactive;
        };
        session.time_left_millis = (session.time_left_millis - step).max(0);
        if session.time_left_millis > 0 {
            return TickOutcome::Ticked {
                remaining_millis: session.time_left_millis,
            };
        }
        match self.take_active(id) {
            Some(session) => {
                TickOutcome::Finished(self.finish(session, SessionState::Completed, None))
            }
            None => TickOutcome::Inactive,
        }
    }

    /// Apply one grace tick to the session `id`.
    pub fn grace_tick(&mut self, id: &str) -> TickOutcome {
        let step = self.tick_interval_ms;
        let Some(session) = self.live(id, SessionState::BackgroundGrace) else {
            return TickOutcome::Inactive;
        };
        session.background_grace_left_millis =
            (session.background_grace_left_millis - step).max(0);
        if session.background_grace_left_millis > 0 {
            return TickOutcome::Ticked {
                remaining_millis: session.background_grace_left_millis,
            };
        }
        tracing::info!(session_id = %id, "Background grace expired");
        match self.take_active(id) {
            Some(session) => TickOutcome::Finished(self.finish(
                session,
                SessionState::Stopped,
                Some(StopReason::GraceExpired),
            )),
            None => TickOutcome::Inactive,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn live(&mut self, id: &str, state: SessionState) -> Option<&mut FocusSession> {
        self.active
            .as_mut()
            .filter(|s| s.id == id && s.state == state)
    }

    fn take_active(&mut self, id: &str) -> Option<FocusSession> {
        if self.active.as_ref().is_some_and(|s| s.id == id) {
            self.active.take()
        } else {
            None
        }
    }

    fn invalid_state(&self, operation: &'static str, id: &str) -> SessionError {
        SessionError::InvalidState {
            operation,
            session_id: id.to_string(),
            state: self.session(id).map(|s| s.state),
        }
    }

    fn active_mut(
        &mut self,
        id: &str,
        operation: &'static str,
    ) -> Result<&mut FocusSession, SessionError> {
        let err = self.invalid_state(operation, id);
        match self.active.as_mut() {
            Some(session) if session.id == id => Ok(session),
            _ => Err(err),
        }
    }

    fn expect_state(
        &mut self,
        id: &str,
        operation: &'static str,
        expected: SessionState,
    ) -> Result<&mut FocusSession, SessionError> {
        let session = self.active_mut(id, operation)?;
        if session.state != expected {
            return Err(SessionError::InvalidState {
                operation,
                session_id: id.to_string(),
                state: Some(session.state),
            });
        }
        Ok(session)
    }

    /// Move a session taken from the active slot to a terminal state and
    /// build its record.
    fn finish(
        &mut self,
        mut session: FocusSession,
        state: SessionState,
        stop_reason: Option<StopReason>,
    ) -> Record {
        session.state = state;
        session.stop_reason = stop_reason;
        session.background_grace_left_millis = 0;

        let record = Record::new(
            session.id.clone(),
            session.elapsed_millis(),
            session.planted_at,
            Utc::now(),
            state == SessionState::Completed,
            session.kind.clone(),
        );
        tracing::info!(
            session_id = %session.id,
            state = %state,
            duration_millis = record.duration_millis,
            "Session finished"
        );
        self.finished = Some(session);
        record
    }
}
