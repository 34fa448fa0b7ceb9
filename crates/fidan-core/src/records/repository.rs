//! Crash-resilient record repository.
//!
//! The full collection lives in memory behind one exclusive lock and is
//! written as a JSON array to the primary key after every add. A second copy
//! goes to the backup key every few adds or when the last backup is stale.
//!
//! Storage failures never fail an add. The repository switches to
//! memory-fallback mode instead, and the host can surface that to the user.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::record::{decode_collection, encode_collection, DecodedCollection, Record};
use super::validation::{
    is_retainable, validate_records, RecoveryAction, RecoveryResult, ValidationResult,
};
use crate::error::StoreError;
use crate::storage::{KeyValueStore, RepositoryConfig};

pub const PRIMARY_KEY: &str = "fidan.records.primary";
pub const BACKUP_KEY: &str = "fidan.records.backup";

/// Where the collection came from when the repository was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Primary,
    Backup,
    Empty,
}

/// How the repository was loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub source: LoadSource,
    pub loaded: usize,
    /// Stored entries that failed to decode and were skipped.
    pub dropped: usize,
    pub memory_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordStats {
    pub count: usize,
    pub completed_count: usize,
    pub total_duration_millis: i64,
    pub average_duration_millis: i64,
}

impl RecordStats {
    pub fn from_records(records: &[Record]) -> Self {
        let count = records.len();
        let completed_count = records.iter().filter(|r| r.was_completed).count();
        // Widened so corrupt or huge durations cannot overflow.
        let sum: i128 = records.iter().map(|r| i128::from(r.duration_millis)).sum();
        let total_duration_millis = sum.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
        let average_duration_millis = if count == 0 {
            0
        } else {
            (sum / count as i128) as i64
        };
        Self {
            count,
            completed_count,
            total_duration_millis,
            average_duration_millis,
        }
    }
}

struct Inner {
    records: Vec<Record>,
    next_position: u64,
    memory_fallback: bool,
    adds_since_backup: u32,
    last_backup_at: Option<DateTime<Utc>>,
}

/// Durable store for finished session records.
pub struct RecordRepository {
    store: Arc<dyn KeyValueStore>,
    config: RepositoryConfig,
    inner: Mutex<Inner>,
    published: watch::Sender<Vec<Record>>,
    load_report: LoadReport,
}

impl RecordRepository {
    /// Open the repository over `store`, loading whatever it holds.
    ///
    /// Never fails: an unreadable primary falls back to the backup, and an
    /// unreadable backup leaves an empty collection in memory-fallback mode.
    pub fn open(store: Arc<dyn KeyValueStore>, config: RepositoryConfig) -> Self {
        let (mut records, load_report) = load_initial(store.as_ref());
        normalize_positions(&mut records);
        let next_position = records.last().map(|r| r.position + 1).unwrap_or(1);

        tracing::info!(
            source = ?load_report.source,
            loaded = load_report.loaded,
            dropped = load_report.dropped,
            memory_fallback = load_report.memory_fallback,
            "Record repository opened"
        );

        let (published, _) = watch::channel(records.clone());
        Self {
            store,
            config,
            inner: Mutex::new(Inner {
                records,
                next_position,
                memory_fallback: load_report.memory_fallback,
                adds_since_backup: 0,
                last_backup_at: None,
            }),
            published,
            load_report,
        }
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// Append `record`, assigning its position, and persist the collection.
    pub fn add(&self, record: Record) -> Record {
        self.add_at(record, Utc::now())
    }

    fn add_at(&self, mut record: Record, now: DateTime<Utc>) -> Record {
        let mut inner = self.lock();
        record.position = inner.next_position;
        inner.next_position += 1;
        inner.records.push(record.clone());
        self.enforce_capacity(&mut inner);

        if inner.memory_fallback {
            tracing::debug!(record_id = %record.id, "Memory-fallback active, record kept in memory only");
        } else {
            match self.write_key(PRIMARY_KEY, &inner.records) {
                Ok(()) => {
                    inner.adds_since_backup += 1;
                    if self.backup_due(&inner, now) {
                        self.write_backup(&mut inner, now);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        record_id = %record.id,
                        "Failed to persist records, switching to memory-fallback: {e}"
                    );
                    inner.memory_fallback = true;
                }
            }
        }

        self.publish(&inner.records);
        record
    }

    /// Snapshot copy of the collection.
    pub fn get_all(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    /// Empty the collection and remove both persisted keys.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.records.clear();
        inner.adds_since_backup = 0;
        inner.last_backup_at = None;
        inner.memory_fallback = false;
        for key in [PRIMARY_KEY, BACKUP_KEY] {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key, "Failed to remove persisted records: {e}");
            }
        }
        tracing::info!("Record repository cleared");
        self.publish(&inner.records);
    }

    pub fn stats(&self) -> RecordStats {
        RecordStats::from_records(&self.lock().records)
    }

    pub fn validate(&self) -> ValidationResult {
        let result = validate_records(&self.lock().records);
        if !result.is_valid {
            tracing::warn!(issues = result.issues.len(), "Record collection has integrity issues");
        }
        result
    }

    /// Rebuild the collection from the backup and the valid primary entries.
    ///
    /// The cleaned set replaces both the in-memory collection and the
    /// persisted keys. Always returns a result describing what happened.
    pub fn recover(&self) -> RecoveryResult {
        let mut inner = self.lock();
        let mut actions = Vec::new();
        let now = Utc::now();

        let backup = match self.read_key(BACKUP_KEY) {
            Ok(Some(decoded)) => decoded.records,
            Ok(None) => {
                actions.push(RecoveryAction::BackupUnavailable {
                    reason: "no backup stored".to_string(),
                });
                Vec::new()
            }
            Err(reason) => {
                actions.push(RecoveryAction::BackupUnavailable { reason });
                Vec::new()
            }
        };

        let mut lost_count = 0;
        let primary = match self.read_key(PRIMARY_KEY) {
            Ok(Some(decoded)) => {
                for (index, err) in decoded.dropped {
                    lost_count += 1;
                    actions.push(RecoveryAction::DroppedCorrupt {
                        index,
                        reason: err.to_string(),
                    });
                }
                decoded.records
            }
            Ok(None) => Vec::new(),
            Err(reason) => {
                actions.push(RecoveryAction::PrimaryUnreadable { reason });
                Vec::new()
            }
        };

        // Memory may hold records that never reached the store.
        let in_memory = std::mem::take(&mut inner.records);

        let mut seen = HashSet::new();
        let mut valid_ids = HashSet::new();
        let mut merged = Vec::new();
        let mut invalid = Vec::new();
        let mut duplicates = 0;
        for record in primary.into_iter().chain(in_memory) {
            let identity = owned_identity(&record);
            if !seen.insert(identity.clone()) {
                duplicates += 1;
            } else if is_retainable(&record) {
                valid_ids.insert(identity);
                merged.push(record);
            } else {
                invalid.push(record);
            }
        }

        let mut restored = 0;
        for record in backup.into_iter().filter(is_retainable) {
            if valid_ids.insert(owned_identity(&record)) {
                restored += 1;
                merged.push(record);
            } else {
                duplicates += 1;
            }
        }
        if restored > 0 {
            actions.insert(0, RecoveryAction::RestoredFromBackup { count: restored });
        }

        for record in invalid {
            if valid_ids.contains(&owned_identity(&record)) {
                continue;
            }
            lost_count += 1;
            actions.push(RecoveryAction::DroppedInvalid {
                reason: invalid_reason(&record),
                record_id: record.id,
            });
        }
        if duplicates > 0 {
            actions.push(RecoveryAction::Deduplicated {
                removed: duplicates,
            });
        }

        merged.sort_by_key(|r| r.position);
        let max_position = merged.last().map(|r| r.position).unwrap_or(0);
        inner.next_position = inner.next_position.max(max_position + 1);
        inner.records = merged;
        self.enforce_capacity(&mut inner);

        let persisted = self
            .write_key(PRIMARY_KEY, &inner.records)
            .and_then(|()| self.write_key(BACKUP_KEY, &inner.records));
        let was_successful = match persisted {
            Ok(()) => {
                inner.memory_fallback = false;
                inner.adds_since_backup = 0;
                inner.last_backup_at = Some(now);
                actions.push(RecoveryAction::Persisted {
                    count: inner.records.len(),
                });
                true
            }
            Err(e) => {
                inner.memory_fallback = true;
                actions.push(RecoveryAction::PersistFailed {
                    reason: e.to_string(),
                });
                false
            }
        };

        for action in &actions {
            tracing::info!(?action, "Recovery action");
        }
        tracing::info!(
            recovered = inner.records.len(),
            lost = lost_count,
            was_successful,
            "Record recovery finished"
        );

        self.publish(&inner.records);
        RecoveryResult {
            was_successful,
            recovered_records: inner.records.clone(),
            lost_count,
            actions,
        }
    }

    pub fn is_using_memory_fallback(&self) -> bool {
        self.lock().memory_fallback
    }

    /// Receive the full collection after every add, clear and recover.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Record>> {
        self.published.subscribe()
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, records: &[Record]) {
        self.published.send_replace(records.to_vec());
    }

    fn backup_due(&self, inner: &Inner, now: DateTime<Utc>) -> bool {
        if inner.adds_since_backup >= self.config.backup_every_adds {
            return true;
        }
        let Some(last) = inner.last_backup_at else {
            return true;
        };
        // An interval too large for chrono never goes stale.
        i64::try_from(self.config.backup_interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .is_some_and(|interval| now - last > interval)
    }

    fn write_backup(&self, inner: &mut Inner, now: DateTime<Utc>) {
        match self.write_key(BACKUP_KEY, &inner.records) {
            Ok(()) => {
                inner.adds_since_backup = 0;
                inner.last_backup_at = Some(now);
                tracing::debug!(count = inner.records.len(), "Record backup written");
            }
            Err(e) => tracing::warn!("Failed to write record backup: {e}"),
        }
    }

    fn enforce_capacity(&self, inner: &mut Inner) {
        let max = self.config.max_records;
        if inner.records.len() > max {
            let excess = inner.records.len() - max;
            inner.records.drain(..excess);
            tracing::info!(pruned = excess, max, "Pruned oldest records");
        }
    }

    fn write_key(&self, key: &str, records: &[Record]) -> Result<(), StoreError> {
        let payload =
            encode_collection(records).map_err(|e| StoreError::operation("encode", key, e))?;
        self.store.put(key, &payload)
    }

    fn read_key(&self, key: &str) -> Result<Option<DecodedCollection>, String> {
        match self.store.get(key) {
            Ok(Some(raw)) => decode_collection(&raw).map(Some).map_err(|e| e.to_string()),
            Ok(None) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn owned_identity(record: &Record) -> (String, i64) {
    let (id, completed) = record.identity();
    (id.to_string(), completed)
}

fn invalid_reason(record: &Record) -> String {
    if record.id.trim().is_empty() {
        "empty id".to_string()
    } else {
        format!("negative duration {}", record.duration_millis)
    }
}

/// Reassign positions when stored ones are missing or out of order.
fn normalize_positions(records: &mut [Record]) {
    let ordered = records.windows(2).all(|w| w[0].position < w[1].position);
    if ordered && records.first().map_or(true, |r| r.position > 0) {
        return;
    }
    for (i, record) in records.iter_mut().enumerate() {
        record.position = i as u64 + 1;
    }
}

fn load_initial(store: &dyn KeyValueStore) -> (Vec<Record>, LoadReport) {
    let primary_failure = match store.get(PRIMARY_KEY) {
        Ok(Some(raw)) => match decode_collection(&raw) {
            Ok(decoded) => return loaded(decoded, LoadSource::Primary, false),
            Err(e) => format!("primary records are not a JSON array: {e}"),
        },
        Ok(None) => {
            // Fresh install, or the primary key was lost.
            return match store.get(BACKUP_KEY) {
                Ok(Some(raw)) => match decode_collection(&raw) {
                    Ok(decoded) => restore_primary(store, decoded),
                    Err(_) => empty(false),
                },
                _ => empty(false),
            };
        }
        Err(e) => e.to_string(),
    };

    tracing::warn!("Could not load primary records, trying backup: {primary_failure}");
    match store.get(BACKUP_KEY) {
        Ok(Some(raw)) => match decode_collection(&raw) {
            Ok(decoded) => restore_primary(store, decoded),
            Err(e) => {
                tracing::warn!("Backup records unreadable, starting in memory-fallback: {e}");
                empty(true)
            }
        },
        Ok(None) => {
            tracing::warn!("No backup records, starting in memory-fallback");
            empty(true)
        }
        Err(e) => {
            tracing::warn!("Backup records unreadable, starting in memory-fallback: {e}");
            empty(true)
        }
    }
}

fn restore_primary(store: &dyn KeyValueStore, decoded: DecodedCollection) -> (Vec<Record>, LoadReport) {
    let fallback = match encode_collection(&decoded.records) {
        Ok(payload) => match store.put(PRIMARY_KEY, &payload) {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!("Failed to rewrite primary from backup: {e}");
                true
            }
        },
        Err(e) => {
            tracing::warn!("Failed to encode backup records: {e}");
            true
        }
    };
    tracing::info!(count = decoded.records.len(), "Restored records from backup");
    loaded(decoded, LoadSource::Backup, fallback)
}

fn loaded(
    decoded: DecodedCollection,
    source: LoadSource,
    memory_fallback: bool,
) -> (Vec<Record>, LoadReport) {
    for (index, err) in &decoded.dropped {
        tracing::warn!(index, ?source, "Dropped stored record: {err}");
    }
    let report = LoadReport {
        source,
        loaded: decoded.records.len(),
        dropped: decoded.dropped.len(),
        memory_fallback,
    };
    (decoded.records, report)
}

fn empty(memory_fallback: bool) -> (Vec<Record>, LoadReport) {
    (
        Vec::new(),
        LoadReport {
            source: LoadSource::Empty,
            loaded: 0,
            dropped: 0,
            memory_fallback,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordKind;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose reads and writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::operation("get", key, "disk unavailable"));
            }
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::operation("put", key, "disk full"));
            }
            self.inner.put(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }

        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
    }

    fn record(id: &str, duration: i64, completed: bool) -> Record {
        let now = Utc::now();
        Record::new(id, duration, now, now, completed, RecordKind::Focus)
    }

    fn open(store: Arc<FlakyStore>) -> RecordRepository {
        RecordRepository::open(store, RepositoryConfig::default())
    }

    fn stored_count(store: &FlakyStore, key: &str) -> Option<usize> {
        let raw = store.inner.get(key).unwrap()?;
        Some(decode_collection(&raw).unwrap().records.len())
    }

    #[test]
    fn add_assigns_increasing_positions() {
        let repo = open(Arc::new(FlakyStore::default()));
        let a = repo.add(record("a", 10, true));
        let b = repo.add(record("b", 20, false));
        assert_eq!(a.position, 1);
        assert_eq!(b.position, 2);
        let ids: Vec<String> = repo.get_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn write_failure_switches_to_memory_fallback() {
        let store = Arc::new(FlakyStore::default());
        let repo = open(store.clone());
        store.fail_writes.store(true, Ordering::SeqCst);

        let added = repo.add(record("a", 10, true));
        assert_eq!(added.id, "a");
        assert!(repo.is_using_memory_fallback());
        assert_eq!(repo.get_all().len(), 1);
        assert_eq!(stored_count(&store, PRIMARY_KEY), None);

        // Later adds stay in memory even once the store recovers.
        store.fail_writes.store(false, Ordering::SeqCst);
        repo.add(record("b", 10, true));
        assert_eq!(repo.get_all().len(), 2);
        assert_eq!(stored_count(&store, PRIMARY_KEY), None);
    }

    #[test]
    fn clear_resets_fallback_and_keys() {
        let store = Arc::new(FlakyStore::default());
        store.inner.put("fidan.watch.events", "[]").unwrap();
        let repo = open(store.clone());
        repo.add(record("a", 10, true));
        store.fail_writes.store(true, Ordering::SeqCst);
        repo.add(record("b", 10, true));
        assert!(repo.is_using_memory_fallback());

        repo.clear();
        assert!(!repo.is_using_memory_fallback());
        assert!(repo.get_all().is_empty());
        assert_eq!(stored_count(&store, PRIMARY_KEY), None);
        assert_eq!(stored_count(&store, BACKUP_KEY), None);
        // Keys owned by other components are untouched.
        assert!(store.inner.get("fidan.watch.events").unwrap().is_some());
    }

    #[test]
    fn backup_written_on_first_add_then_every_fifth() {
        let store = Arc::new(FlakyStore::default());
        let repo = open(store.clone());
        let t0 = Utc::now();

        repo.add_at(record("r1", 1, true), t0);
        assert_eq!(stored_count(&store, BACKUP_KEY), Some(1));

        for i in 2..=5 {
            repo.add_at(record(&format!("r{i}"), 1, true), t0);
        }
        assert_eq!(stored_count(&store, BACKUP_KEY), Some(1));

        repo.add_at(record("r6", 1, true), t0);
        assert_eq!(stored_count(&store, BACKUP_KEY), Some(6));
        assert_eq!(stored_count(&store, PRIMARY_KEY), Some(6));
    }

    #[test]
    fn stale_backup_is_refreshed_after_an_hour() {
        let store = Arc::new(FlakyStore::default());
        let repo = open(store.clone());
        let t0 = Utc::now();

        repo.add_at(record("r1", 1, true), t0);
        repo.add_at(record("r2", 1, true), t0 + Duration::minutes(30));
        assert_eq!(stored_count(&store, BACKUP_KEY), Some(1));

        repo.add_at(record("r3", 1, true), t0 + Duration::minutes(61));
        assert_eq!(stored_count(&store, BACKUP_KEY), Some(3));
    }

    #[test]
    fn stats_aggregate_snapshot() {
        let repo = open(Arc::new(FlakyStore::default()));
        assert_eq!(repo.stats(), RecordStats::default());
        repo.add(record("a", 1_500_000, true));
        repo.add(record("b", 500_000, false));
        let stats = repo.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.total_duration_millis, 2_000_000);
        assert_eq!(stats.average_duration_millis, 1_000_000);
    }

    #[test]
    fn stats_saturate_on_huge_durations() {
        let repo = open(Arc::new(FlakyStore::default()));
        repo.add(record("a", i64::MAX / 2 + 1, true));
        repo.add(record("b", i64::MAX / 2 + 1, true));
        let stats = repo.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_duration_millis, i64::MAX);
        assert_eq!(stats.average_duration_millis, i64::MAX / 2 + 1);
    }

    #[test]
    fn huge_backup_interval_never_goes_stale() {
        let store = Arc::new(FlakyStore::default());
        let config = RepositoryConfig {
            backup_interval_secs: u64::MAX,
            ..RepositoryConfig::default()
        };
        let repo = RecordRepository::open(store.clone(), config);
        repo.add(record("a", 10, true));
        repo.add(record("b", 10, true));
        // Only the first add, which had no prior backup, wrote one.
        assert_eq!(stored_count(&store, BACKUP_KEY), Some(1));
        assert_eq!(stored_count(&store, PRIMARY_KEY), Some(2));
    }

    #[test]
    fn concurrent_adds_keep_positions_unique_and_ordered() {
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 50;

        let store = Arc::new(FlakyStore::default());
        let repo = Arc::new(open(store.clone()));
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let repo = repo.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut previous: Vec<Record> = Vec::new();
                let mut reads = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let snapshot = repo.get_all();
                    assert!(snapshot.windows(2).all(|w| w[0].position < w[1].position));
                    // Later snapshots extend earlier ones; nothing is torn or reordered.
                    assert!(snapshot.len() >= previous.len());
                    assert_eq!(&snapshot[..previous.len()], previous.as_slice());
                    previous = snapshot;
                    reads += 1;
                }
                (previous, reads)
            })
        };

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        repo.add(record(&format!("w{w}-{i}"), 1, true));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        let (last_seen, reads) = reader.join().unwrap();
        assert!(reads > 0);

        let all = repo.get_all();
        assert_eq!(all.len(), WRITERS * PER_WRITER);
        let positions: Vec<u64> = all.iter().map(|r| r.position).collect();
        let expected: Vec<u64> = (1..=(WRITERS * PER_WRITER) as u64).collect();
        assert_eq!(positions, expected);
        assert_eq!(&all[..last_seen.len()], last_seen.as_slice());
        assert_eq!(stored_count(&store, PRIMARY_KEY), Some(WRITERS * PER_WRITER));
    }

    #[test]
    fn capacity_prunes_oldest() {
        let store = Arc::new(FlakyStore::default());
        let config = RepositoryConfig {
            max_records: 3,
            ..RepositoryConfig::default()
        };
        let repo = RecordRepository::open(store, config);
        for i in 1..=5 {
            repo.add(record(&format!("r{i}"), 1, true));
        }
        let ids: Vec<String> = repo.get_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r3", "r4", "r5"]);
    }

    #[test]
    fn unreadable_primary_loads_backup() {
        let store = Arc::new(FlakyStore::default());
        {
            let repo = open(store.clone());
            repo.add(record("a", 10, true));
        }
        store.inner.put(PRIMARY_KEY, "{{ truncated").unwrap();

        let repo = open(store.clone());
        assert_eq!(repo.load_report().source, LoadSource::Backup);
        assert_eq!(repo.get_all().len(), 1);
        assert!(!repo.is_using_memory_fallback());
        assert_eq!(stored_count(&store, PRIMARY_KEY), Some(1));
    }

    #[test]
    fn unreadable_store_starts_empty_in_fallback() {
        let store = Arc::new(FlakyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);
        let repo = open(store);
        assert_eq!(repo.load_report().source, LoadSource::Empty);
        assert!(repo.is_using_memory_fallback());
        assert!(repo.get_all().is_empty());
    }

    #[test]
    fn recover_merges_backup_and_memory_only_records() {
        let store = Arc::new(FlakyStore::default());
        let repo = open(store.clone());
        repo.add(record("a", 10, true)); // primary + backup
        repo.add(record("b", 10, true)); // primary only
        store.inner.remove(PRIMARY_KEY).unwrap();
        store.fail_writes.store(true, Ordering::SeqCst);
        repo.add(record("c", 10, true)); // memory only
        store.fail_writes.store(false, Ordering::SeqCst);

        let result = repo.recover();
        assert!(result.was_successful);
        assert_eq!(result.lost_count, 0);
        let ids: Vec<&str> = result.recovered_records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!repo.is_using_memory_fallback());
        assert_eq!(stored_count(&store, PRIMARY_KEY), Some(3));
        assert_eq!(stored_count(&store, BACKUP_KEY), Some(3));
    }

    #[test]
    fn recover_drops_invalid_records() {
        let repo = open(Arc::new(FlakyStore::default()));
        repo.add(record("good", 10, true));
        repo.add(record("", 10, true));
        repo.add(record("neg", -3, false));
        assert!(!repo.validate().is_valid);

        let result = repo.recover();
        assert_eq!(result.lost_count, 2);
        assert_eq!(result.recovered_records.len(), 1);
        assert!(repo.validate().is_valid);
    }

    #[test]
    fn recover_reports_failed_persist() {
        let store = Arc::new(FlakyStore::default());
        let repo = open(store.clone());
        repo.add(record("a", 10, true));
        store.fail_writes.store(true, Ordering::SeqCst);

        let result = repo.recover();
        assert!(!result.was_successful);
        assert_eq!(result.recovered_records.len(), 1);
        assert!(repo.is_using_memory_fallback());
        assert!(result
            .actions
            .iter()
            .any(|a| matches!(a, RecoveryAction::PersistFailed { .. })));
    }

    #[test]
    fn subscribers_see_every_mutation() {
        let repo = open(Arc::new(FlakyStore::default()));
        let mut rx = repo.subscribe();
        repo.add(record("a", 10, true));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);
        repo.clear();
        assert!(rx.borrow_and_update().is_empty());
    }
}
