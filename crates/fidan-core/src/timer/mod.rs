//! Focus session timer: the synchronous state machine and its async driver.

mod controller;
mod engine;

pub use controller::SessionController;
pub use engine::{FocusSession, SessionSnapshot, SessionState, StopReason, TickOutcome, TimerEngine};
