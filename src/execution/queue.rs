use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;

use crate::error::TradingError;
use crate::Result;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_KEEP_SETTLED: usize = 1000;

/// Exponential backoff: `base_delay * 2^(attempt - 1)` between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub payload: Value,
    /// Attempts started so far
    pub attempt: u32,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_settled(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub id: String,
    pub name: String,
    pub payload: Value,
    pub state: TaskState,
    pub attempts_made: u32,
    pub progress: u8,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

type StatusMap = Arc<RwLock<HashMap<String, TaskStatus>>>;

/// Lets a running handler publish 0..=100 progress for its task
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: String,
    statuses: StatusMap,
}

impl ProgressReporter {
    pub async fn report(&self, progress: u8) {
        if let Some(status) = self.statuses.write().await.get_mut(&self.task_id) {
            status.progress = progress.min(100);
            status.updated_at = Utc::now();
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task, progress: &ProgressReporter) -> Result<()>;

    /// Called once when the task has failed for the last time
    async fn on_exhausted(&self, _task: &Task, _error: &TradingError) {}
}

struct QueueInner {
    name: String,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    statuses: StatusMap,
    sender: mpsc::Sender<Task>,
    receiver: Mutex<Option<mpsc::Receiver<Task>>>,
    workers: Arc<Semaphore>,
    retry: RetryPolicy,
    keep_settled: AtomicUsize,
    settled: Notify,
}

/// In-process task queue with a bounded worker pool.
///
/// Tasks carry a caller-chosen id; enqueuing an id that is already waiting
/// or running is a no-op. Retryable failures are retried with exponential
/// backoff, anything else fails the task at once.
///
/// Only the most recent settled statuses are kept (`with_retention`); older
/// ones are dropped and look unknown to `status`.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>, workers: usize, capacity: usize, retry: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                handlers: RwLock::new(HashMap::new()),
                statuses: Arc::new(RwLock::new(HashMap::new())),
                sender,
                receiver: Mutex::new(Some(receiver)),
                workers: Arc::new(Semaphore::new(workers.max(1))),
                retry,
                keep_settled: AtomicUsize::new(DEFAULT_KEEP_SETTLED),
                settled: Notify::new(),
            }),
        }
    }

    /// How many completed/failed statuses to remember
    pub fn with_retention(self, keep_settled: usize) -> Self {
        self.inner.keep_settled.store(keep_settled, Ordering::Relaxed);
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub async fn on_task(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.inner.handlers.write().await.insert(name.into(), handler);
    }

    /// Enqueue with the queue's default retry policy.
    ///
    /// Returns `false` when a task with the same id is already pending.
    pub async fn enqueue(&self, name: &str, id: impl Into<String>, payload: Value) -> Result<bool> {
        self.enqueue_with_retry(name, id, payload, self.inner.retry).await
    }

    pub async fn enqueue_with_retry(
        &self,
        name: &str,
        id: impl Into<String>,
        payload: Value,
        retry: RetryPolicy,
    ) -> Result<bool> {
        let id = id.into();
        {
            let mut statuses = self.inner.statuses.write().await;
            if let Some(existing) = statuses.get(&id) {
                if !existing.state.is_settled() {
                    tracing::debug!(queue = %self.inner.name, task_id = %id, "Task already pending, skipping");
                    return Ok(false);
                }
            }
            statuses.insert(
                id.clone(),
                TaskStatus {
                    id: id.clone(),
                    name: name.to_string(),
                    payload: payload.clone(),
                    state: TaskState::Waiting,
                    attempts_made: 0,
                    progress: 0,
                    error: None,
                    updated_at: Utc::now(),
                },
            );
        }

        let task = Task {
            id: id.clone(),
            name: name.to_string(),
            payload,
            attempt: 0,
            retry,
        };

        if let Err(e) = self.inner.sender.send(task).await {
            self.inner.statuses.write().await.remove(&id);
            return Err(TradingError::Queue(format!("queue {} is closed: {}", self.inner.name, e)));
        }

        tracing::debug!(queue = %self.inner.name, task_id = %id, task = name, "Task enqueued");
        Ok(true)
    }

    /// Spawn the dispatcher. Can only be started once.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let mut receiver = self.inner.receiver.lock().await.take().ok_or_else(|| {
            TradingError::Queue(format!("queue {} already started", self.inner.name))
        })?;

        let inner = self.inner.clone();
        tracing::info!(queue = %inner.name, workers = inner.workers.available_permits(), "🚀 Task queue started");

        Ok(tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                let permit = match inner.workers.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let inner = inner.clone();
                tokio::spawn(async move {
                    inner.run(task).await;
                    drop(permit);
                });
            }
        }))
    }

    pub async fn status(&self, id: &str) -> Option<TaskStatus> {
        self.inner.statuses.read().await.get(id).cloned()
    }

    pub async fn statuses(&self) -> Vec<TaskStatus> {
        let mut all: Vec<TaskStatus> = self.inner.statuses.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn stats(&self) -> QueueStats {
        let statuses = self.inner.statuses.read().await;
        let mut stats = QueueStats::default();
        for status in statuses.values() {
            match status.state {
                TaskState::Waiting => stats.waiting += 1,
                TaskState::Active => stats.active += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Wait until the task completes or fails; `None` for an unknown id
    pub async fn wait_until_settled(&self, id: &str) -> Option<TaskStatus> {
        loop {
            let notified = self.inner.settled.notified();
            match self.status(id).await {
                None => return None,
                Some(status) if status.state.is_settled() => return Some(status),
                Some(_) => notified.await,
            }
        }
    }
}

impl QueueInner {
    async fn set_state(&self, id: &str, state: TaskState, attempts: u32, error: Option<String>) {
        let mut statuses = self.statuses.write().await;
        if let Some(status) = statuses.get_mut(id) {
            status.state = state;
            status.attempts_made = attempts;
            if state == TaskState::Completed {
                status.progress = 100;
            }
            status.error = error;
            status.updated_at = Utc::now();
        }
        if state.is_settled() {
            evict_settled(&mut statuses, self.keep_settled.load(Ordering::Relaxed));
        }
    }

    async fn run(&self, mut task: Task) {
        let handler = self.handlers.read().await.get(&task.name).cloned();
        let Some(handler) = handler else {
            tracing::error!(queue = %self.name, task_id = %task.id, task = %task.name, "No handler registered for task");
            self.set_state(&task.id, TaskState::Failed, 0, Some(format!("no handler for {}", task.name)))
                .await;
            self.settled.notify_waiters();
            return;
        };

        let progress = ProgressReporter {
            task_id: task.id.clone(),
            statuses: self.statuses.clone(),
        };

        loop {
            task.attempt += 1;
            self.set_state(&task.id, TaskState::Active, task.attempt, None).await;

            match handler.handle(&task, &progress).await {
                Ok(()) => {
                    self.set_state(&task.id, TaskState::Completed, task.attempt, None).await;
                    tracing::debug!(queue = %self.name, task_id = %task.id, attempts = task.attempt, "Task completed");
                    break;
                }
                Err(e) if e.is_retryable() && task.attempt < task.retry.attempts => {
                    let backoff = task.retry.delay_for(task.attempt);
                    tracing::warn!(
                        queue = %self.name,
                        task_id = %task.id,
                        task = %task.name,
                        attempt = task.attempt,
                        max_attempts = task.retry.attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "⚠️  Task failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!(
                        queue = %self.name,
                        task_id = %task.id,
                        task = %task.name,
                        payload = %task.payload,
                        attempts = task.attempt,
                        error = %e,
                        "❌ Task failed permanently"
                    );
                    handler.on_exhausted(&task, &e).await;
                    self.set_state(&task.id, TaskState::Failed, task.attempt, Some(e.to_string()))
                        .await;
                    break;
                }
            }
        }

        self.settled.notify_waiters();
    }
}

/// Drop the oldest settled statuses beyond `keep`
fn evict_settled(statuses: &mut HashMap<String, TaskStatus>, keep: usize) {
    let mut settled: Vec<(DateTime<Utc>, String)> = statuses
        .values()
        .filter(|s| s.state.is_settled())
        .map(|s| (s.updated_at, s.id.clone()))
        .collect();
    if settled.len() <= keep {
        return;
    }

    settled.sort();
    let excess = settled.len() - keep;
    for (_, id) in settled.into_iter().take(excess) {
        statuses.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error until `succeed_on` attempts have been made
    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
        error: fn() -> TradingError,
        exhausted: AtomicU32,
    }

    impl Flaky {
        fn new(succeed_on: u32, error: fn() -> TradingError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on,
                error,
                exhausted: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, _task: &Task, progress: &ProgressReporter) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                progress.report(50).await;
                Ok(())
            } else {
                Err((self.error)())
            }
        }

        async fn on_exhausted(&self, _task: &Task, _error: &TradingError) {
            self.exhausted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn transient() -> TradingError {
        TradingError::ExchangeTransient("timeout".to_string())
    }

    fn fatal() -> TradingError {
        TradingError::ExchangeFatal("bad key".to_string())
    }

    async fn queue_with(handler: Arc<dyn TaskHandler>) -> TaskQueue {
        let queue = TaskQueue::new("test", 2, 16, RetryPolicy::default());
        queue.on_task("job", handler).await;
        queue.start().await.unwrap();
        queue
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_saturates_for_large_attempts() {
        let retry = RetryPolicy {
            attempts: 64,
            base_delay: Duration::from_millis(1000),
        };
        assert_eq!(retry.delay_for(33), Duration::from_millis(1000) * u32::MAX);
        assert_eq!(retry.delay_for(64), retry.delay_for(33));
    }

    #[tokio::test]
    async fn test_settled_statuses_are_bounded() {
        let handler = Flaky::new(1, transient);
        let queue = TaskQueue::new("test", 2, 16, RetryPolicy::default()).with_retention(5);
        queue.on_task("job", handler.clone()).await;
        queue.start().await.unwrap();

        for i in 0..20 {
            let id = format!("t-{}", i);
            queue.enqueue("job", id.clone(), json!({})).await.unwrap();
            let status = queue.wait_until_settled(&id).await.unwrap();
            assert_eq!(status.state, TaskState::Completed);
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 20);
        assert_eq!(queue.statuses().await.len(), 5);
        assert_eq!(queue.stats().await.completed, 5);
        assert!(queue.status("t-0").await.is_none());
        assert!(queue.status("t-19").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let handler = Flaky::new(3, transient);
        let queue = queue_with(handler.clone()).await;

        assert!(queue.enqueue("job", "t-1", json!({})).await.unwrap());
        let status = queue.wait_until_settled("t-1").await.unwrap();

        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.attempts_made, 3);
        assert_eq!(status.progress, 100);
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_after_three_attempts() {
        let handler = Flaky::new(u32::MAX, transient);
        let queue = queue_with(handler.clone()).await;

        queue.enqueue("job", "t-1", json!({"orderId": "x"})).await.unwrap();
        let status = queue.wait_until_settled("t-1").await.unwrap();

        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.attempts_made, 3);
        assert!(status.error.unwrap().contains("timeout"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_skips_retries() {
        let handler = Flaky::new(u32::MAX, fatal);
        let queue = queue_with(handler.clone()).await;

        queue.enqueue("job", "t-1", json!({})).await.unwrap();
        let status = queue.wait_until_settled("t-1").await.unwrap();

        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_not_enqueued_twice() {
        // not started, so the first task stays waiting
        let queue = TaskQueue::new("test", 1, 16, RetryPolicy::default());

        assert!(queue.enqueue("job", "same", json!({})).await.unwrap());
        assert!(!queue.enqueue("job", "same", json!({})).await.unwrap());
        assert!(queue.enqueue("job", "other", json!({})).await.unwrap());

        let stats = queue.stats().await;
        assert_eq!(stats.waiting, 2);
    }

    #[tokio::test]
    async fn test_settled_id_can_run_again() {
        let handler = Flaky::new(1, transient);
        let queue = queue_with(handler.clone()).await;

        queue.enqueue("job", "t-1", json!({})).await.unwrap();
        queue.wait_until_settled("t-1").await.unwrap();
        assert!(queue.enqueue("job", "t-1", json!({})).await.unwrap());
        queue.wait_until_settled("t-1").await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_handler_fails_task() {
        let queue = TaskQueue::new("test", 1, 16, RetryPolicy::default());
        queue.start().await.unwrap();

        queue.enqueue("unknown", "t-1", json!({})).await.unwrap();
        let status = queue.wait_until_settled("t-1").await.unwrap();
        assert_eq!(status.state, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let queue = TaskQueue::new("test", 1, 16, RetryPolicy::default());
        queue.start().await.unwrap();
        assert!(queue.start().await.is_err());
    }
}
