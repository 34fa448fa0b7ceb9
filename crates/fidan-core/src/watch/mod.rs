//! Completion notices from a paired watch.

mod dedup;
mod event;

pub use dedup::{IngestOutcome, WatchDeduplicator, EVENTS_KEY};
pub use event::WatchEvent;
