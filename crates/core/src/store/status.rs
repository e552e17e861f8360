use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const IDLE_STAGE: i8 = -1;
pub const LAST_STAGE: i8 = 3;

pub const PIPELINE_STAGES: [&str; 4] = [
    "Validate market context",
    "Query pricing model",
    "Apply business rules",
    "Explain decision",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendHealth {
    #[default]
    Unknown,
    Online,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusState {
    /// `-1` when idle, otherwise `0..=3`.
    pub current_stage: i8,
    pub completed_stages: Vec<u8>,
    pub health: BackendHealth,
    pub backend_version: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for StatusState {
    fn default() -> Self {
        Self {
            current_stage: IDLE_STAGE,
            completed_stages: Vec::new(),
            health: BackendHealth::Unknown,
            backend_version: None,
            last_checked: None,
        }
    }
}

impl StatusState {
    pub fn is_running(&self) -> bool {
        self.current_stage != IDLE_STAGE
    }

    pub fn stage_label(&self) -> Option<&'static str> {
        usize::try_from(self.current_stage)
            .ok()
            .and_then(|idx| PIPELINE_STAGES.get(idx).copied())
    }
}

/// Pipeline progress and backend health.
///
/// Completing a pipeline leaves the completed stages visible for a short
/// delay before clearing them. Only one delayed clear is ever pending: a new
/// run or a new completion aborts the previous one, and a generation counter
/// keeps a timer that already fired from clearing a newer run.
#[derive(Debug)]
pub struct StatusStore {
    state: Arc<watch::Sender<StatusState>>,
    reset_delay: Duration,
    reset_task: Mutex<Option<JoinHandle<()>>>,
    generation: Arc<AtomicU64>,
}

impl StatusStore {
    pub fn new(reset_delay: Duration) -> Self {
        let (state, _) = watch::channel(StatusState::default());
        Self {
            state: Arc::new(state),
            reset_delay,
            reset_task: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn snapshot(&self) -> StatusState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusState> {
        self.state.subscribe()
    }

    pub fn start_pipeline(&self) {
        self.cancel_pending_reset();
        self.state.send_modify(|s| {
            s.current_stage = 0;
            s.completed_stages.clear();
        });
    }

    /// Moves to the next stage. Only applies while `0 <= stage < 3`;
    /// returns whether anything changed.
    pub fn advance_stage(&self) -> bool {
        self.state.send_if_modified(|s| {
            if !(0..LAST_STAGE).contains(&s.current_stage) {
                return false;
            }
            s.completed_stages.push(s.current_stage as u8);
            s.current_stage += 1;
            true
        })
    }

    pub fn complete_pipeline(&self) {
        self.state.send_modify(|s| {
            s.completed_stages = (0..=LAST_STAGE as u8).collect();
            s.current_stage = IDLE_STAGE;
        });
        self.schedule_reset();
    }

    pub fn reset(&self) {
        self.cancel_pending_reset();
        self.state.send_modify(|s| {
            s.current_stage = IDLE_STAGE;
            s.completed_stages.clear();
        });
    }

    pub fn set_health(&self, health: BackendHealth, version: Option<String>) {
        self.state.send_modify(|s| {
            s.health = health;
            s.backend_version = version;
            s.last_checked = Some(Utc::now());
        });
    }

    fn pending_reset(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reset_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_pending_reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.pending_reset().take() {
            task.abort();
        }
    }

    fn schedule_reset(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = self.pending_reset();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime; clearing completed stages immediately");
            self.state.send_modify(|s| s.completed_stages.clear());
            return;
        };

        let state = Arc::clone(&self.state);
        let counter = Arc::clone(&self.generation);
        let delay = self.reset_delay;
        *slot = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if counter.load(Ordering::SeqCst) == generation {
                state.send_if_modified(|s| {
                    let changed = !s.completed_stages.is_empty();
                    s.completed_stages.clear();
                    changed
                });
            }
        }));
    }
}

impl Drop for StatusStore {
    fn drop(&mut self) {
        if let Some(task) = self.pending_reset().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_walks_stages_and_stops_at_last() {
        let store = StatusStore::new(Duration::from_millis(10));
        assert!(!store.advance_stage(), "idle must not advance");

        store.start_pipeline();
        assert_eq!(store.snapshot().stage_label(), Some(PIPELINE_STAGES[0]));
        assert!(store.advance_stage());
        assert!(store.advance_stage());
        assert!(store.advance_stage());

        let at_last = store.snapshot();
        assert_eq!(at_last.current_stage, 3);
        assert_eq!(at_last.completed_stages, vec![0, 1, 2]);

        assert!(!store.advance_stage());
        assert_eq!(store.snapshot(), at_last);
    }

    #[test]
    fn completion_without_runtime_clears_immediately() {
        let store = StatusStore::new(Duration::from_secs(60));
        store.start_pipeline();
        store.complete_pipeline();
        let s = store.snapshot();
        assert_eq!(s.current_stage, IDLE_STAGE);
        assert!(s.completed_stages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_clears_after_delay() {
        let store = StatusStore::new(Duration::from_millis(1500));
        store.start_pipeline();
        store.complete_pipeline();
        assert_eq!(store.snapshot().completed_stages, vec![0, 1, 2, 3]);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(store.snapshot().completed_stages.len(), 4);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.snapshot().completed_stages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_completions_replace_pending_reset() {
        let store = StatusStore::new(Duration::from_millis(1000));
        store.start_pipeline();
        store.complete_pipeline();

        tokio::time::sleep(Duration::from_millis(700)).await;
        store.start_pipeline();
        store.complete_pipeline();

        // The first timer would have fired here.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.snapshot().completed_stages, vec![0, 1, 2, 3]);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.snapshot().completed_stages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_run_is_not_cleared_by_old_timer() {
        let store = StatusStore::new(Duration::from_millis(100));
        store.start_pipeline();
        store.complete_pipeline();

        store.start_pipeline();
        store.advance_stage();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let s = store.snapshot();
        assert_eq!(s.current_stage, 1);
        assert_eq!(s.completed_stages, vec![0]);
    }

    #[test]
    fn health_updates_record_check_time() {
        let store = StatusStore::new(Duration::from_millis(10));
        store.set_health(BackendHealth::Online, Some("1.4.0".to_string()));
        let s = store.snapshot();
        assert_eq!(s.health, BackendHealth::Online);
        assert_eq!(s.backend_version.as_deref(), Some("1.4.0"));
        assert!(s.last_checked.is_some());
    }
}
