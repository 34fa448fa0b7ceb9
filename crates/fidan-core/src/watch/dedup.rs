//! Duplicate and plausibility filter for watch events.
//!
//! Accepted events are kept newest-first, bounded to `max_events`, and
//! persisted as one JSON array under [`EVENTS_KEY`]. This store is independent
//! of the record repository: it has its own lock and its own key.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::event::WatchEvent;
use crate::error::StoreError;
use crate::storage::{KeyValueStore, WatchConfig};

pub const EVENTS_KEY: &str = "fidan.watch.events";

/// Result of [`WatchDeduplicator::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted,
    Duplicate,
    /// Duration outside the accepted window.
    Rejected,
    /// The set is full and the event is older than everything retained.
    Stale,
}

struct Inner {
    events: Vec<WatchEvent>,
    memory_fallback: bool,
}

pub struct WatchDeduplicator {
    store: Arc<dyn KeyValueStore>,
    config: WatchConfig,
    inner: Mutex<Inner>,
}

impl WatchDeduplicator {
    /// Load previously accepted events. Undecodable entries are skipped; an
    /// unreadable key starts empty in memory-fallback mode.
    pub fn open(store: Arc<dyn KeyValueStore>, config: WatchConfig) -> Self {
        let (mut events, memory_fallback) = match store.get(EVENTS_KEY) {
            Ok(Some(raw)) => match decode_events(&raw) {
                Ok(events) => (events, false),
                Err(e) => {
                    tracing::warn!("Stored watch events unreadable, starting empty: {e}");
                    (Vec::new(), false)
                }
            },
            Ok(None) => (Vec::new(), false),
            Err(e) => {
                tracing::warn!("Could not read watch events, using memory-fallback: {e}");
                (Vec::new(), true)
            }
        };
        sort_and_trim(&mut events, config.max_events);
        tracing::debug!(count = events.len(), memory_fallback, "Watch deduplicator opened");

        Self {
            store,
            config,
            inner: Mutex::new(Inner {
                events,
                memory_fallback,
            }),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Whether the reported duration is inside the accepted window (inclusive).
    pub fn is_valid(&self, event: &WatchEvent) -> bool {
        (self.config.min_duration_secs..=self.config.max_duration_secs)
            .contains(&event.duration_seconds)
    }

    /// Accept `event` unless its `(timestamp, deviceId)` was already accepted.
    ///
    /// Returns false without touching state for a duplicate, or when the set
    /// is full and `event` is older than every retained event. Does not check
    /// the duration window; see [`ingest`](Self::ingest).
    pub fn store(&self, event: WatchEvent) -> bool {
        self.store_outcome(event) == IngestOutcome::Accepted
    }

    /// Validate then store.
    pub fn ingest(&self, event: WatchEvent) -> IngestOutcome {
        if !self.is_valid(&event) {
            tracing::info!(
                duration_seconds = event.duration_seconds,
                device_id = %event.device_id,
                "Watch event rejected, duration outside accepted window"
            );
            return IngestOutcome::Rejected;
        }
        self.store_outcome(event)
    }

    /// Accepted events from the last `since_days` days, newest first.
    pub fn list_recent(&self, since_days: u32) -> Vec<WatchEvent> {
        let cutoff = Utc::now()
            .checked_sub_signed(Duration::days(i64::from(since_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.list_since(cutoff)
    }

    /// Accepted events at or after `cutoff`, newest first.
    pub fn list_since(&self, cutoff: DateTime<Utc>) -> Vec<WatchEvent> {
        let cutoff = cutoff.timestamp();
        self.lock()
            .events
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every accepted event and remove the persisted key.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.events.clear();
        inner.memory_fallback = false;
        if let Err(e) = self.store.remove(EVENTS_KEY) {
            tracing::warn!("Failed to remove persisted watch events: {e}");
        }
    }

    pub fn is_using_memory_fallback(&self) -> bool {
        self.lock().memory_fallback
    }

    fn store_outcome(&self, event: WatchEvent) -> IngestOutcome {
        let mut inner = self.lock();
        if inner.events.iter().any(|e| e.key() == event.key()) {
            tracing::debug!(
                timestamp = event.timestamp,
                device_id = %event.device_id,
                "Duplicate watch event ignored"
            );
            return IngestOutcome::Duplicate;
        }

        // Events are newest-first, so the last one is the oldest retained.
        let full = inner.events.len() >= self.config.max_events;
        if full
            && inner
                .events
                .last()
                .map_or(true, |oldest| event.timestamp <= oldest.timestamp)
        {
            tracing::debug!(
                timestamp = event.timestamp,
                device_id = %event.device_id,
                "Watch event older than retained window ignored"
            );
            return IngestOutcome::Stale;
        }

        inner.events.push(event);
        sort_and_trim(&mut inner.events, self.config.max_events);

        if !inner.memory_fallback {
            if let Err(e) = self.persist(&inner.events) {
                tracing::warn!("Failed to persist watch events, switching to memory-fallback: {e}");
                inner.memory_fallback = true;
            }
        }
        IngestOutcome::Accepted
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, events: &[WatchEvent]) -> Result<(), StoreError> {
        let payload = serde_json::to_string(events)
            .map_err(|e| StoreError::operation("encode", EVENTS_KEY, e))?;
        self.store.put(EVENTS_KEY, &payload)
    }
}

/// Decode entry by entry so one bad element does not discard the rest.
fn decode_events(raw: &str) -> Result<Vec<WatchEvent>, serde_json::Error> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    let total = entries.len();
    let events: Vec<WatchEvent> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    if events.len() < total {
        tracing::warn!(dropped = total - events.len(), "Skipped undecodable watch events");
    }
    Ok(events)
}

fn sort_and_trim(events: &mut Vec<WatchEvent>, max_events: usize) {
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(max_events);
}
