//! Async driver for [`TimerEngine`].
//!
//! Owns the two periodic tasks: the countdown ticker runs while a session is
//! `Running`, the grace ticker while it is in `BackgroundGrace`. The engine and
//! both task handles sit behind one lock, so a transition and the matching
//! spawn or abort are applied together. Each tick is also re-checked by the
//! engine, so a tick racing an abort is a no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time;

use super::engine::{FocusSession, SessionSnapshot, SessionState, StopReason, TickOutcome, TimerEngine};
use crate::error::SessionError;
use crate::events::Event;
use crate::records::{Record, RecordKind, RecordRepository};
use crate::storage::SessionConfig;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ticker {
    Countdown,
    Grace,
}

/// Engine plus the handles of the tasks driving it.
struct Driver {
    engine: TimerEngine,
    countdown: Option<JoinHandle<()>>,
    grace: Option<JoinHandle<()>>,
}

impl Driver {
    fn slot(&mut self, ticker: Ticker) -> &mut Option<JoinHandle<()>> {
        match ticker {
            Ticker::Countdown => &mut self.countdown,
            Ticker::Grace => &mut self.grace,
        }
    }

    fn cancel(&mut self, ticker: Ticker) {
        if let Some(handle) = self.slot(ticker).take() {
            handle.abort();
        }
    }

    fn install(&mut self, ticker: Ticker, handle: JoinHandle<()>) {
        self.cancel(ticker);
        *self.slot(ticker) = Some(handle);
    }

    fn time_left(&self) -> i64 {
        self.engine.active().map(|s| s.time_left_millis).unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct SessionController {
    driver: Arc<Mutex<Driver>>,
    repository: Arc<RecordRepository>,
    events: broadcast::Sender<Event>,
    tick_interval: Duration,
}

impl SessionController {
    /// A zero tick interval is raised to 1 ms.
    pub fn new(repository: Arc<RecordRepository>, config: &SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = TimerEngine::new(config);
        let tick_interval = Duration::from_millis(engine.tick_interval_ms().unsigned_abs());
        Self {
            driver: Arc::new(Mutex::new(Driver {
                engine,
                countdown: None,
                grace: None,
            })),
            repository,
            events,
            tick_interval,
        }
    }

    pub fn repository(&self) -> &Arc<RecordRepository> {
        &self.repository
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.lock().await.engine.snapshot()
    }

    pub async fn state(&self) -> SessionState {
        self.lock().await.engine.state()
    }

    /// The active or most recently finished session with this id.
    pub async fn session(&self, id: &str) -> Option<FocusSession> {
        self.lock().await.engine.session(id).cloned()
    }

    pub async fn start(&self, target_duration_millis: i64) -> Result<String, SessionError> {
        self.start_with(target_duration_millis, RecordKind::Focus).await
    }

    pub async fn start_with(
        &self,
        target_duration_millis: i64,
        kind: RecordKind,
    ) -> Result<String, SessionError> {
        let mut driver = self.lock().await;
        let id = driver.engine.start_with(target_duration_millis, kind)?;
        driver.cancel(Ticker::Grace);
        driver.install(Ticker::Countdown, self.spawn_ticker(&id, Ticker::Countdown));
        self.emit(Event::SessionStarted {
            session_id: id.clone(),
            target_duration_millis,
            at: Utc::now(),
        });
        Ok(id)
    }

    pub async fn pause(&self, id: &str) -> Result<(), SessionError> {
        let mut driver = self.lock().await;
        driver.engine.pause(id)?;
        driver.cancel(Ticker::Countdown);
        self.emit(Event::SessionPaused {
            session_id: id.to_string(),
            time_left_millis: driver.time_left(),
            at: Utc::now(),
        });
        Ok(())
    }

    pub async fn resume(&self, id: &str) -> Result<(), SessionError> {
        let mut driver = self.lock().await;
        driver.engine.resume(id)?;
        driver.install(Ticker::Countdown, self.spawn_ticker(id, Ticker::Countdown));
        self.emit(Event::SessionResumed {
            session_id: id.to_string(),
            time_left_millis: driver.time_left(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Stop the session and hand its record to the repository.
    pub async fn stop(&self, id: &str) -> Result<Record, SessionError> {
        let mut driver = self.lock().await;
        let record = driver.engine.stop(id)?;
        driver.cancel(Ticker::Countdown);
        driver.cancel(Ticker::Grace);
        Ok(hand_off(&self.repository, &self.events, record, Some(StopReason::Manual)))
    }

    pub async fn on_app_background(&self, id: &str) -> Result<(), SessionError> {
        let mut driver = self.lock().await;
        driver.engine.on_app_background(id)?;
        driver.cancel(Ticker::Countdown);
        driver.install(Ticker::Grace, self.spawn_ticker(id, Ticker::Grace));
        let grace_millis = driver
            .engine
            .active()
            .map(|s| s.background_grace_left_millis)
            .unwrap_or(0);
        self.emit(Event::SessionBackgrounded {
            session_id: id.to_string(),
            grace_millis,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Returns `Running` if the session resumed, `Stopped` if grace had already expired.
    pub async fn on_app_foreground(&self, id: &str) -> Result<SessionState, SessionError> {
        let mut driver = self.lock().await;
        let state = driver.engine.on_app_foreground(id)?;
        if state == SessionState::Running {
            driver.cancel(Ticker::Grace);
            driver.install(Ticker::Countdown, self.spawn_ticker(id, Ticker::Countdown));
            self.emit(Event::SessionForegrounded {
                session_id: id.to_string(),
                time_left_millis: driver.time_left(),
                at: Utc::now(),
            });
        }
        Ok(state)
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn lock(&self) -> MutexGuard<'_, Driver> {
        self.driver.lock().await
    }

    /// Spawn a ticker for `session_id`. Callers hold the driver lock and
    /// install the handle before releasing it.
    fn spawn_ticker(&self, session_id: &str, ticker: Ticker) -> JoinHandle<()> {
        let driver = self.driver.clone();
        let repository = self.repository.clone();
        let events = self.events.clone();
        let period = self.tick_interval;
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            loop {
                interval.tick().await;

                let mut guard = driver.lock().await;
                let outcome = match ticker {
                    Ticker::Countdown => guard.engine.countdown_tick(&session_id),
                    Ticker::Grace => guard.engine.grace_tick(&session_id),
                };

                match outcome {
                    TickOutcome::Inactive => break,
                    TickOutcome::Ticked { remaining_millis } => {
                        let _ = events.send(Event::Tick {
                            session_id: session_id.clone(),
                            state: guard.engine.state(),
                            remaining_millis,
                            at: Utc::now(),
                        });
                    }
                    TickOutcome::Finished(record) => {
                        let reason = match ticker {
                            Ticker::Countdown => None,
                            Ticker::Grace => Some(StopReason::GraceExpired),
                        };
                        hand_off(&repository, &events, record, reason);
                        break;
                    }
                }
            }
        })
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Store a terminal record and announce it. `reason` is `None` for completion.
fn hand_off(
    repository: &RecordRepository,
    events: &broadcast::Sender<Event>,
    record: Record,
    reason: Option<StopReason>,
) -> Record {
    let stored = repository.add(record);
    let at = Utc::now();
    let event = match reason {
        None => Event::SessionCompleted {
            record: stored.clone(),
            at,
        },
        Some(reason) => Event::SessionStopped {
            record: stored.clone(),
            reason,
            at,
        },
    };
    let _ = events.send(event);
    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, RepositoryConfig};

    fn controller() -> SessionController {
        let store = Arc::new(MemoryStore::new());
        let repository = Arc::new(RecordRepository::open(store, RepositoryConfig::default()));
        SessionController::new(repository, &SessionConfig::default())
    }

    /// A ticker exists for `ticker` and has not exited.
    async fn ticker_live(controller: &SessionController, ticker: Ticker) -> bool {
        let mut driver = controller.lock().await;
        driver
            .slot(ticker)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_pause_and_resume_keep_ticker_in_step() {
        let controller = controller();
        let id = controller.start(3_600_000).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let controller = controller.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        if i % 2 == 0 {
                            let _ = controller.pause(&id).await;
                        } else {
                            let _ = controller.resume(&id).await;
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        match controller.state().await {
            SessionState::Running => assert!(ticker_live(&controller, Ticker::Countdown).await),
            SessionState::Paused => {
                assert!(controller.lock().await.countdown.is_none());
            }
            other => panic!("unexpected state {other}"),
        }
        assert!(controller.lock().await.grace.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_keeps_new_countdown() {
        let controller = controller();
        for _ in 0..3 {
            let id = controller.start(60_000).await.unwrap();
            controller.stop(&id).await.unwrap();
        }
        let id = controller.start(60_000).await.unwrap();
        assert!(ticker_live(&controller, Ticker::Countdown).await);

        time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(controller.session(&id).await.unwrap().time_left_millis, 57_000);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tick_interval_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let repository = Arc::new(RecordRepository::open(store, RepositoryConfig::default()));
        let config = SessionConfig {
            tick_interval_ms: 0,
            ..SessionConfig::default()
        };
        let controller = SessionController::new(repository, &config);
        let id = controller.start(100).await.unwrap();

        time::sleep(Duration::from_millis(50)).await;
        let left = controller.session(&id).await.unwrap().time_left_millis;
        assert!(left < 100);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_runs_to_completion() {
        let controller = controller();
        let id = controller.start(1_500_000).await.unwrap();

        time::sleep(Duration::from_millis(1_500_500)).await;

        let session = controller.session(&id).await.unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.time_left_millis, 0);
        let records = controller.repository().get_all();
        assert_eq!(records.len(), 1);
        assert!(records[0].was_completed);
        assert_eq!(records[0].duration_millis, 1_500_000);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expiry_stops_session() {
        let controller = controller();
        let mut events = controller.subscribe();
        let id = controller.start(1_500_000).await.unwrap();
        controller.on_app_background(&id).await.unwrap();

        time::sleep(Duration::from_millis(31_000)).await;

        assert_eq!(controller.session(&id).await.unwrap().state, SessionState::Stopped);
        assert_eq!(controller.state().await, SessionState::Idle);
        let records = controller.repository().get_all();
        assert_eq!(records.len(), 1);
        assert!(!records[0].was_completed);

        let mut saw_stop = false;
        while let Ok(event) = events.try_recv() {
            if let Event::SessionStopped { reason, .. } = event {
                assert_eq!(reason, StopReason::GraceExpired);
                saw_stop = true;
            }
        }
        assert!(saw_stop);

        // Coming back after expiry changes nothing.
        assert_eq!(
            controller.on_app_foreground(&id).await.unwrap(),
            SessionState::Stopped
        );
        assert_eq!(controller.repository().get_all().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_countdown() {
        let controller = controller();
        let id = controller.start(60_000).await.unwrap();
        time::sleep(Duration::from_millis(10_500)).await;
        controller.pause(&id).await.unwrap();
        let frozen = controller.snapshot().await.time_left_millis;
        assert_eq!(frozen, 50_000);

        time::sleep(Duration::from_millis(120_000)).await;
        assert_eq!(controller.snapshot().await.time_left_millis, frozen);
        assert!(controller.repository().get_all().is_empty());

        controller.resume(&id).await.unwrap();
        time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(controller.snapshot().await.time_left_millis, 45_000);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_in_time_resumes_countdown() {
        let controller = controller();
        let id = controller.start(60_000).await.unwrap();
        time::sleep(Duration::from_millis(2_500)).await;
        controller.on_app_background(&id).await.unwrap();
        time::sleep(Duration::from_millis(20_000)).await;

        let snap = controller.snapshot().await;
        assert_eq!(snap.state, SessionState::BackgroundGrace);
        assert_eq!(snap.time_left_millis, 58_000);

        assert_eq!(
            controller.on_app_foreground(&id).await.unwrap(),
            SessionState::Running
        );
        time::sleep(Duration::from_millis(60_000)).await;
        // Old grace task must not stop the session; the countdown finishes it.
        let records = controller.repository().get_all();
        assert_eq!(records.len(), 1);
        assert!(records[0].was_completed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_hands_record_to_repository() {
        let controller = controller();
        let mut collection = controller.repository().subscribe();
        let id = controller.start(1_500_000).await.unwrap();
        let record = controller.stop(&id).await.unwrap();

        assert!(!record.was_completed);
        assert_eq!(record.position, 1);
        assert_eq!(collection.borrow_and_update().as_slice(), &[record]);
        assert!(matches!(
            controller.stop(&id).await,
            Err(SessionError::InvalidState { .. })
        ));
    }
}
