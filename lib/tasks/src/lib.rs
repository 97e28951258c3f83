//! Async Task Engine (§4.8): converts a long computation into an HTTP
//! poll/result protocol. One `TaskEngine` per controller instance — disjoint
//! per-controller maps, not a shared global keyed by a namespace string
//! (§9).

use dashmap::DashMap;
use dispatch_core::task::{Task, TaskId, TaskOutcome};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const TASK_TTL: chrono::Duration = chrono::Duration::hours(1);
const DEDUP_CAPACITY: usize = 100;
const DEDUP_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct ProgressView {
    pub id: TaskId,
    pub progress: f64,
    pub finished: bool,
}

pub enum ProgressRequestError {
    NotFound,
}

pub enum ResultRequestError {
    NotFound,
    NotYetFinished,
    /// Mirrors the `task-uncaught-generic` code from §6.
    UncaughtError,
}

struct DedupEntry {
    task_id: TaskId,
    inserted_at: std::time::Instant,
}

/// A single controller's task registry. Cheap to clone; the `Arc`s inside
/// are the actual shared state.
#[derive(Clone)]
pub struct TaskEngine {
    tasks: Arc<DashMap<TaskId, Task>>,
    dedup: Arc<Mutex<LruCache<String, DedupEntry>>>,
}

impl Default for TaskEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskEngine {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            dedup: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(DEDUP_CAPACITY).expect("nonzero literal"),
            ))),
        }
    }

    /// Looks up a warm dedup hit for `fingerprint` (a stable-JSON encoding
    /// of the caller's job options), pruning it if stale or if its task has
    /// since been swept.
    pub async fn dedup_lookup(&self, fingerprint: &str) -> Option<TaskId> {
        let mut dedup = self.dedup.lock().await;
        let entry = dedup.get(fingerprint)?;
        if entry.inserted_at.elapsed() > DEDUP_TTL {
            dedup.pop(fingerprint);
            return None;
        }
        let task_id = entry.task_id;
        if !self.tasks.contains_key(&task_id) {
            dedup.pop(fingerprint);
            return None;
        }
        Some(task_id)
    }

    async fn dedup_insert(&self, fingerprint: String, task_id: TaskId) {
        self.dedup.lock().await.put(
            fingerprint,
            DedupEntry {
                task_id,
                inserted_at: std::time::Instant::now(),
            },
        );
    }

    /// Allocates a task and spawns `process` against it in the background.
    /// Any panic inside `process` is trapped and recorded as a terminal
    /// Error on the same task id instead of taking down the process.
    pub fn run_task<F, Fut>(&self, fingerprint: Option<String>, process: F) -> TaskId
    where
        F: FnOnce(TaskHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let expire_time = chrono::Utc::now() + TASK_TTL;
        let task = Task::new(expire_time);
        let id = task.id;
        self.tasks.insert(id, task);

        let handle = TaskHandle {
            id,
            tasks: self.tasks.clone(),
        };
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let outcome = futures::FutureExt::catch_unwind(AssertUnwindSafe(process(handle))).await;
            if outcome.is_err() {
                if let Some(mut entry) = tasks.get_mut(&id) {
                    entry.outcome = TaskOutcome::Error("task panicked".to_string());
                    entry.finished = true;
                }
            }
        });

        if let Some(fingerprint) = fingerprint {
            let this = self.clone();
            tokio::spawn(async move { this.dedup_insert(fingerprint, id).await });
        }
        id
    }

    pub fn sweep_tasks(&self) {
        let now = chrono::Utc::now();
        self.tasks.retain(|_, task| !task.is_expired(now) && !task.is_error());
    }

    /// Targeted eviction; when `checks_only` is set the task is only
    /// removed if actually expired.
    pub fn sweep_task(&self, id: TaskId, checks_only: bool) {
        if checks_only {
            let now = chrono::Utc::now();
            let expired = self.tasks.get(&id).map(|t| t.is_expired(now)).unwrap_or(false);
            if expired {
                self.tasks.remove(&id);
            }
        } else {
            self.tasks.remove(&id);
        }
    }

    pub fn is_task_existing(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn is_task_expired(&self, id: TaskId) -> Option<bool> {
        self.tasks.get(&id).map(|t| t.is_expired(chrono::Utc::now()))
    }

    /// For Error-state tasks, progress reports 1.0 (§4.8).
    pub fn get_task_progress(&self, id: TaskId) -> Option<f64> {
        self.tasks.get(&id).map(|t| if t.is_error() { 1.0 } else { t.progress })
    }

    /// For Error-state tasks, finished reports true.
    pub fn get_task_finished(&self, id: TaskId) -> Option<bool> {
        self.tasks.get(&id).map(|t| t.finished || t.is_error())
    }

    /// For Error-state tasks, result reports `None` (the caller surfaces
    /// the generic uncaught-error code instead).
    pub fn get_task_result(&self, id: TaskId) -> Option<Option<serde_json::Value>> {
        self.tasks.get(&id).map(|t| match &t.outcome {
            TaskOutcome::Success(v) => Some(v.clone()),
            _ => None,
        })
    }

    pub fn handle_progress_request(&self, id: TaskId) -> Result<ProgressView, ProgressRequestError> {
        let task = self.tasks.get(&id).ok_or(ProgressRequestError::NotFound)?;
        Ok(ProgressView {
            id,
            progress: if task.is_error() { 1.0 } else { task.progress },
            finished: task.finished || task.is_error(),
        })
    }

    pub fn handle_result_request(&self, id: TaskId) -> Result<serde_json::Value, ResultRequestError> {
        let task = self.tasks.get(&id).ok_or(ResultRequestError::NotFound)?;
        match &task.outcome {
            TaskOutcome::Pending => Err(ResultRequestError::NotYetFinished),
            TaskOutcome::Error(_) => Err(ResultRequestError::UncaughtError),
            TaskOutcome::Success(v) => Ok(v.clone()),
        }
    }

    /// Spawns the periodic sweep loop that evicts expired tasks on a fixed
    /// interval.
    pub fn spawn_periodic_sweep(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                this.sweep_tasks();
            }
        })
    }
}

/// Passed to a spawned task's worker closure so it can report progress and
/// a terminal outcome without reaching back into the engine's internals.
pub struct TaskHandle {
    id: TaskId,
    tasks: Arc<DashMap<TaskId, Task>>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Progress is monotonic non-decreasing (§3 invariant); a lower value
    /// is silently clamped rather than accepted.
    pub fn set_progress(&self, progress: f64) {
        if let Some(mut task) = self.tasks.get_mut(&self.id) {
            if progress > task.progress {
                task.progress = progress;
            }
        }
    }

    pub fn finish_success(&self, result: serde_json::Value) {
        if let Some(mut task) = self.tasks.get_mut(&self.id) {
            task.outcome = TaskOutcome::Success(result);
            task.progress = 1.0;
            task.finished = true;
        }
    }

    pub fn finish_error(&self, message: impl Into<String>) {
        if let Some(mut task) = self.tasks.get_mut(&self.id) {
            task.outcome = TaskOutcome::Error(message.into());
            task.finished = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_task_reports_progress_and_result() {
        let engine = TaskEngine::new();
        let id = engine.run_task(None, |handle| async move {
            handle.set_progress(0.5);
            handle.finish_success(serde_json::json!({"ok": true}));
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let progress = engine.handle_progress_request(id).ok().unwrap();
        assert!(progress.finished);
        assert_eq!(progress.progress, 1.0);

        let result = engine.handle_result_request(id).ok().unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn panicking_task_becomes_a_terminal_error() {
        let engine = TaskEngine::new();
        let id = engine.run_task(None, |_handle| async move {
            panic!("boom");
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(engine.get_task_progress(id), Some(1.0));
        assert_eq!(engine.get_task_finished(id), Some(true));
        matches!(
            engine.handle_result_request(id),
            Err(ResultRequestError::UncaughtError)
        );
    }

    #[tokio::test]
    async fn sweep_task_checks_only_preserves_unexpired() {
        let engine = TaskEngine::new();
        let id = engine.run_task(None, |handle| async move {
            handle.finish_success(serde_json::json!(1));
        });
        engine.sweep_task(id, true);
        assert!(engine.is_task_existing(id));
    }
}
