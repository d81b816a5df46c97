//! Asynchronous task engine.
//!
//! A purely mechanical worker pool: four priority sub-queues feed a set of
//! worker coroutines, blocking callables are offloaded to a bounded blocking
//! pool, and failed tasks are re-queued at their original priority until
//! their retry budget runs out. The engine knows nothing about intent or
//! routing; that is the Director's business.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::tasks::TaskPriority;
use crate::utils::config::EngineSettings;
use crate::utils::error::{DirectorError, DirectorResult};

/// Priority levels shared by the request queue and the task engine.
/// Dispatch is strict: no NORMAL item runs while a CRITICAL item waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    Critical,
    High,
    Normal,
    Low,
}

impl QueuePriority {
    /// Queues are polled in this order.
    pub const DISPATCH_ORDER: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Sub-queue capacity as a fraction of the overall cap. The fractions
    /// sum past 100% on purpose: soft partitioning that favors mid-tier
    /// traffic.
    #[must_use]
    pub fn capacity_share(&self, max_queue_size: usize) -> usize {
        match self {
            Self::Critical | Self::High | Self::Low => max_queue_size / 4,
            Self::Normal => max_queue_size / 2,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl From<TaskPriority> for QueuePriority {
    fn from(priority: TaskPriority) -> Self {
        match priority {
            TaskPriority::Critical => Self::Critical,
            TaskPriority::High => Self::High,
            TaskPriority::Medium => Self::Normal,
            TaskPriority::Low => Self::Low,
        }
    }
}

type AsyncWork = Arc<dyn Fn() -> BoxFuture<'static, DirectorResult<Value>> + Send + Sync>;
type BlockingWork = Arc<dyn Fn() -> DirectorResult<Value> + Send + Sync>;
type TaskCallback = Arc<dyn Fn(&DirectorResult<Value>) + Send + Sync>;

#[derive(Clone)]
enum TaskWork {
    /// Awaitable work, run directly on a worker coroutine.
    Async(AsyncWork),
    /// CPU-bound or otherwise blocking work, dispatched to the blocking pool.
    Blocking(BlockingWork),
}

/// A submitted unit of work with its scheduling metadata. The work closure
/// is a factory so retries can re-invoke it.
#[derive(Clone)]
pub struct EngineTask {
    pub id: Uuid,
    work: TaskWork,
    pub priority: QueuePriority,
    pub timeout: Option<Duration>,
    callback: Option<TaskCallback>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl EngineTask {
    #[must_use]
    pub fn from_async<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = DirectorResult<Value>> + Send + 'static,
    {
        Self::with_work(TaskWork::Async(Arc::new(move || Box::pin(factory()))))
    }

    #[must_use]
    pub fn from_blocking<F>(factory: F) -> Self
    where
        F: Fn() -> DirectorResult<Value> + Send + Sync + 'static,
    {
        Self::with_work(TaskWork::Blocking(Arc::new(factory)))
    }

    fn with_work(work: TaskWork) -> Self {
        Self {
            id: Uuid::new_v4(),
            work,
            priority: QueuePriority::Normal,
            timeout: None,
            callback: None,
            created_at: Utc::now(),
            started_at: None,
            retry_count: 0,
            max_retries: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DirectorResult<Value>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Reset transient state ahead of a retry re-queue.
    fn reset_for_retry(&mut self) {
        self.started_at = None;
    }
}

/// Record kept after a task leaves the worker pool, retained until cleanup
/// so callers can fetch results post-hoc.
#[derive(Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub priority: QueuePriority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub outcome: DirectorResult<Value>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub tasks_queued: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timeout: u64,
    pub tasks_retried: u64,
    pub tasks_cancelled: u64,
    pub peak_queue_size: usize,
    pub peak_concurrent_tasks: usize,
    pub total_processing_time_ms: u64,
    pub average_task_time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

struct TaskQueues {
    queues: HashMap<QueuePriority, VecDeque<EngineTask>>,
    size: usize,
}

impl TaskQueues {
    fn new() -> Self {
        let mut queues = HashMap::new();
        for priority in QueuePriority::DISPATCH_ORDER {
            queues.insert(priority, VecDeque::new());
        }
        Self { queues, size: 0 }
    }

    fn push(&mut self, task: EngineTask, settings: &EngineSettings) -> DirectorResult<()> {
        let priority = task.priority;
        let share = priority.capacity_share(settings.max_queue_size);
        let queue = self
            .queues
            .get_mut(&priority)
            .ok_or_else(|| DirectorError::Internal {
                reason: "priority queue missing".to_string(),
            })?;
        if queue.len() >= share {
            return Err(DirectorError::QueueFull {
                queue_name: priority.as_str().to_string(),
                capacity: share,
            });
        }
        queue.push_back(task);
        self.size += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<EngineTask> {
        for priority in QueuePriority::DISPATCH_ORDER {
            if let Some(queue) = self.queues.get_mut(&priority) {
                if let Some(task) = queue.pop_front() {
                    self.size -= 1;
                    return Some(task);
                }
            }
        }
        None
    }

    fn drain(&mut self) -> Vec<EngineTask> {
        let mut drained = Vec::with_capacity(self.size);
        for priority in QueuePriority::DISPATCH_ORDER {
            if let Some(queue) = self.queues.get_mut(&priority) {
                drained.extend(queue.drain(..));
            }
        }
        self.size = 0;
        drained
    }
}

/// The asynchronous worker pool.
pub struct AsyncTaskEngine {
    config: EngineSettings,
    queues: Mutex<TaskQueues>,
    queue_notify: Notify,
    active: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    completed: Mutex<HashMap<Uuid, TaskRecord>>,
    completion_notify: Notify,
    metrics: Mutex<EngineMetrics>,
    blocking_slots: Arc<Semaphore>,
    concurrency_limit: AtomicUsize,
    backpressure: AtomicBool,
    running: AtomicBool,
    state: Mutex<EngineState>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl AsyncTaskEngine {
    #[must_use]
    pub fn new(config: EngineSettings) -> Self {
        let blocking_slots = Arc::new(Semaphore::new(config.worker_thread_count.max(1)));
        let limit = config.max_concurrent_tasks.max(1);
        Self {
            config,
            queues: Mutex::new(TaskQueues::new()),
            queue_notify: Notify::new(),
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            completion_notify: Notify::new(),
            metrics: Mutex::new(EngineMetrics::default()),
            blocking_slots,
            concurrency_limit: AtomicUsize::new(limit),
            backpressure: AtomicBool::new(false),
            running: AtomicBool::new(false),
            state: Mutex::new(EngineState::Idle),
            workers: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        }
    }

    /// Start the worker pool and the cleanup loop.
    pub async fn start(self: &Arc<Self>) -> DirectorResult<()> {
        {
            let mut state = self.state.lock().await;
            if *state != EngineState::Idle {
                return Err(DirectorError::InvalidState {
                    operation: "start".to_string(),
                    state: format!("{state:?}"),
                });
            }
            *state = EngineState::Running;
        }
        self.running.store(true, Ordering::SeqCst);
        *self.started_at.lock().await = Some(Utc::now());

        let worker_count = self.config.max_concurrent_tasks.max(1);
        let mut workers = self.workers.lock().await;
        for i in 0..worker_count {
            let engine = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                engine.worker_loop(i).await;
            }));
        }

        let engine = Arc::clone(self);
        workers.push(tokio::spawn(async move {
            engine.cleanup_loop().await;
        }));

        info!(worker_count, "async task engine started");
        Ok(())
    }

    /// Submit a task for execution. The hard cap rejects every priority;
    /// engaged backpressure sheds NORMAL and LOW while CRITICAL and HIGH
    /// keep entering up to the cap. Either way the failure is immediate.
    pub async fn submit(&self, mut task: EngineTask) -> DirectorResult<Uuid> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(DirectorError::InvalidState {
                operation: "submit".to_string(),
                state: "engine not running".to_string(),
            });
        }
        if task.timeout.is_none() {
            task.timeout = Some(Duration::from_secs(self.config.task_timeout_secs));
        }

        let task_id = task.id;
        {
            let mut queues = self.queues.lock().await;

            // Hard cap applies to every priority.
            if queues.size >= self.config.max_queue_size {
                return Err(DirectorError::Overloaded {
                    reason: "task queue at hard capacity".to_string(),
                });
            }

            // Hysteresis backpressure: while engaged, NORMAL and LOW are
            // shed; CRITICAL and HIGH still enter up to the hard cap.
            let engage_at = (self.config.max_queue_size as f64
                * self.config.backpressure_threshold) as usize;
            if queues.size >= engage_at && !self.backpressure.swap(true, Ordering::SeqCst) {
                warn!(queue_size = queues.size, "task queue backpressure engaged");
            }
            if self.backpressure.load(Ordering::SeqCst)
                && matches!(task.priority, QueuePriority::Normal | QueuePriority::Low)
            {
                return Err(DirectorError::Overloaded {
                    reason: "task queue backpressure active".to_string(),
                });
            }

            queues.push(task, &self.config)?;

            let mut metrics = self.metrics.lock().await;
            metrics.tasks_queued += 1;
            metrics.peak_queue_size = metrics.peak_queue_size.max(queues.size);
        }
        self.queue_notify.notify_waiters();

        debug!(%task_id, "task queued");
        Ok(task_id)
    }

    /// Await a task result, re-raising any captured error.
    pub async fn await_result(&self, task_id: Uuid, timeout: Duration) -> DirectorResult<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let completed = self.completed.lock().await;
                if let Some(record) = completed.get(&task_id) {
                    return record.outcome.clone();
                }
            }

            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                return Err(DirectorError::Timeout {
                    operation: format!("await_result {task_id}"),
                    duration_ms: timeout.as_millis() as u64,
                });
            }
            let _ = tokio::time::timeout(remaining, self.completion_notify.notified()).await;
        }
    }

    /// Adjust the worker concurrency limit; applied by the throttling
    /// controller.
    pub fn update_concurrency_limit(&self, limit: usize) {
        let clamped = limit.max(1);
        self.concurrency_limit.store(clamped, Ordering::SeqCst);
        self.queue_notify.notify_waiters();
        debug!(limit = clamped, "engine concurrency limit updated");
    }

    #[must_use]
    pub fn current_concurrency_limit(&self) -> usize {
        self.concurrency_limit.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure.load(Ordering::SeqCst)
    }

    pub async fn queue_size(&self) -> usize {
        self.queues.lock().await.size
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Current engine status for monitoring endpoints.
    pub async fn status(&self) -> Value {
        let state = *self.state.lock().await;
        let queues = self.queues.lock().await;
        let active = self.active.lock().await;
        let completed = self.completed.lock().await;
        let metrics = self.metrics.lock().await;
        let uptime_secs = self
            .started_at
            .lock()
            .await
            .map(|t| (Utc::now() - t).num_seconds())
            .unwrap_or(0);

        json!({
            "state": state,
            "queue_size": queues.size,
            "active_tasks": active.len(),
            "completed_tasks": completed.len(),
            "backpressure_active": self.backpressure.load(Ordering::SeqCst),
            "concurrency_limit": self.concurrency_limit.load(Ordering::SeqCst),
            "metrics": &*metrics,
            "uptime_seconds": uptime_secs,
            "config": {
                "max_concurrent_tasks": self.config.max_concurrent_tasks,
                "max_queue_size": self.config.max_queue_size,
                "worker_thread_count": self.config.worker_thread_count,
                "backpressure_threshold": self.config.backpressure_threshold,
            }
        })
    }

    /// Graceful shutdown: stop pulling work, allow a bounded drain window,
    /// then cancel whatever is left.
    pub async fn shutdown(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if *state != EngineState::Running {
                return;
            }
            *state = EngineState::Stopping;
        }
        info!("stopping async task engine");
        self.running.store(false, Ordering::SeqCst);
        self.queue_notify.notify_waiters();

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.active.lock().await.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown grace period elapsed with tasks still active");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut handles = self.workers.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }

        // Everything still queued is cancelled, not lost silently.
        let drained = self.queues.lock().await.drain();
        if !drained.is_empty() {
            let mut completed = self.completed.lock().await;
            let mut metrics = self.metrics.lock().await;
            for task in drained {
                metrics.tasks_cancelled += 1;
                completed.insert(
                    task.id,
                    TaskRecord {
                        id: task.id,
                        priority: task.priority,
                        created_at: task.created_at,
                        started_at: task.started_at,
                        completed_at: Utc::now(),
                        retry_count: task.retry_count,
                        outcome: Err(DirectorError::TaskCancelled {
                            id: task.id.to_string(),
                        }),
                    },
                );
            }
        }
        self.completion_notify.notify_waiters();

        *self.state.lock().await = EngineState::Stopped;
        info!("async task engine stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_index: usize) {
        debug!(worker_index, "engine worker started");

        while self.running.load(Ordering::SeqCst) {
            // Live concurrency gate: workers beyond the current limit idle
            // until the throttling controller raises it again.
            let limit = self.concurrency_limit.load(Ordering::SeqCst);
            let active = self.active.lock().await.len();
            if active >= limit {
                let _ = tokio::time::timeout(
                    Duration::from_millis(100),
                    self.queue_notify.notified(),
                )
                .await;
                continue;
            }

            let task = { self.queues.lock().await.pop() };
            let Some(task) = task else {
                self.maybe_release_backpressure().await;
                let _ = tokio::time::timeout(
                    Duration::from_millis(100),
                    self.queue_notify.notified(),
                )
                .await;
                continue;
            };

            self.maybe_release_backpressure().await;
            self.process_task(task, worker_index).await;
        }

        debug!(worker_index, "engine worker stopped");
    }

    async fn process_task(&self, mut task: EngineTask, worker_index: usize) {
        task.started_at = Some(Utc::now());
        {
            let mut active = self.active.lock().await;
            active.insert(task.id, Utc::now());
            let mut metrics = self.metrics.lock().await;
            metrics.peak_concurrent_tasks = metrics.peak_concurrent_tasks.max(active.len());
        }

        debug!(worker_index, task_id = %task.id, "processing task");
        let timeout = task
            .timeout
            .unwrap_or(Duration::from_secs(self.config.task_timeout_secs));
        let outcome = self.run_work(&task.work, timeout).await;

        match outcome {
            Ok(value) => {
                self.finish_task(task, Ok(value)).await;
            }
            Err(DirectorError::Timeout { .. }) => {
                let err = DirectorError::Timeout {
                    operation: format!("task {}", task.id),
                    duration_ms: timeout.as_millis() as u64,
                };
                let mut metrics = self.metrics.lock().await;
                metrics.tasks_timeout += 1;
                drop(metrics);
                warn!(task_id = %task.id, "task timed out");
                self.finish_task(task, Err(err)).await;
            }
            Err(err) => {
                // Errors (not timeouts, not cancellation) consume the retry
                // budget: the task goes back at its original priority with
                // transient state reset.
                if task.retry_count < task.max_retries {
                    task.retry_count += 1;
                    task.reset_for_retry();
                    let task_id = task.id;
                    let attempt = task.retry_count;

                    self.active.lock().await.remove(&task_id);
                    let requeued = {
                        let mut queues = self.queues.lock().await;
                        queues.push(task, &self.config)
                    };
                    match requeued {
                        Ok(()) => {
                            let mut metrics = self.metrics.lock().await;
                            metrics.tasks_retried += 1;
                            drop(metrics);
                            self.queue_notify.notify_waiters();
                            info!(%task_id, attempt, "task re-queued for retry");
                        }
                        Err(queue_err) => {
                            error!(%task_id, error = %queue_err, "retry re-queue failed");
                            let record = TaskRecord {
                                id: task_id,
                                priority: QueuePriority::Normal,
                                created_at: Utc::now(),
                                started_at: None,
                                completed_at: Utc::now(),
                                retry_count: attempt,
                                outcome: Err(err),
                            };
                            self.record_completion(record, false).await;
                        }
                    }
                    return;
                }
                error!(task_id = %task.id, error = %err, "task failed");
                self.finish_task(task, Err(err)).await;
            }
        }
    }

    async fn maybe_release_backpressure(&self) {
        if !self.backpressure.load(Ordering::SeqCst) {
            return;
        }
        let resume_at =
            (self.config.max_queue_size as f64 * self.config.resume_threshold) as usize;
        let size = self.queues.lock().await.size;
        if size <= resume_at && self.backpressure.swap(false, Ordering::SeqCst) {
            info!(queue_size = size, "task queue backpressure released");
        }
    }

    async fn run_work(&self, work: &TaskWork, timeout: Duration) -> DirectorResult<Value> {
        let timed_out = || DirectorError::Timeout {
            operation: "task execution".to_string(),
            duration_ms: timeout.as_millis() as u64,
        };

        match work {
            TaskWork::Async(factory) => tokio::time::timeout(timeout, factory())
                .await
                .map_err(|_| timed_out())?,
            TaskWork::Blocking(factory) => {
                // Blocking work never runs on a worker coroutine; it takes a
                // bounded blocking-pool slot under the same timeout.
                let permit = Arc::clone(&self.blocking_slots)
                    .acquire_owned()
                    .await
                    .map_err(|_| DirectorError::OperationCancelled {
                        operation: "blocking slot acquire".to_string(),
                    })?;
                let factory = Arc::clone(factory);
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    factory()
                });
                tokio::time::timeout(timeout, handle)
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(|e| DirectorError::Internal {
                        reason: format!("blocking task join error: {e}"),
                    })?
            }
        }
    }

    async fn finish_task(&self, task: EngineTask, outcome: DirectorResult<Value>) {
        if let Some(callback) = &task.callback {
            callback(&outcome);
        }

        let success = outcome.is_ok();
        let record = TaskRecord {
            id: task.id,
            priority: task.priority,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: Utc::now(),
            retry_count: task.retry_count,
            outcome,
        };
        self.record_completion(record, success).await;
    }

    async fn record_completion(&self, record: TaskRecord, success: bool) {
        let processing_ms = record
            .started_at
            .map(|s| (record.completed_at - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        self.active.lock().await.remove(&record.id);
        {
            let mut metrics = self.metrics.lock().await;
            if success {
                metrics.tasks_completed += 1;
                metrics.total_processing_time_ms += processing_ms;
                metrics.average_task_time_ms =
                    metrics.total_processing_time_ms as f64 / metrics.tasks_completed as f64;
            } else if !matches!(record.outcome, Err(DirectorError::Timeout { .. })) {
                metrics.tasks_failed += 1;
            }
        }
        self.completed.lock().await.insert(record.id, record);
        self.completion_notify.notify_waiters();
        self.queue_notify.notify_waiters();
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            let cutoff = Utc::now() - chrono::Duration::seconds(
                self.config.cleanup_interval_secs as i64,
            );
            let removed = {
                let mut completed = self.completed.lock().await;
                let before = completed.len();
                completed.retain(|_, record| record.completed_at >= cutoff);
                before - completed.len()
            };
            if removed > 0 {
                debug!(removed, "cleaned up completed task records");
            }
            self.maybe_release_backpressure().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicU32;

    fn test_settings() -> EngineSettings {
        EngineSettings {
            max_concurrent_tasks: 2,
            max_queue_size: 16,
            worker_thread_count: 2,
            task_timeout_secs: 5,
            backpressure_threshold: 0.8,
            resume_threshold: 0.3,
            cleanup_interval_secs: 300,
            shutdown_grace_secs: 1,
        }
    }

    #[tokio::test]
    async fn async_submit_and_await_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Arc::new(AsyncTaskEngine::new(test_settings()));
        engine.start().await?;

        let task = EngineTask::from_async(|| async { Ok(json!({"answer": 42})) });
        let task_id = engine.submit(task).await?;
        let result = engine.await_result(task_id, Duration::from_secs(2)).await?;
        assert_eq!(result["answer"], 42);

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn blocking_work_runs_off_the_coroutine() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Arc::new(AsyncTaskEngine::new(test_settings()));
        engine.start().await?;

        let task = EngineTask::from_blocking(|| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(json!("done"))
        });
        let task_id = engine.submit(task).await?;
        let result = engine.await_result(task_id, Duration::from_secs(2)).await?;
        assert_eq!(result, json!("done"));

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn retries_then_succeeds() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Arc::new(AsyncTaskEngine::new(test_settings()));
        engine.start().await?;

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let task = EngineTask::from_async(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DirectorError::TaskExecutionFailed {
                        reason: "first attempt fails".to_string(),
                    })
                } else {
                    Ok(json!("recovered"))
                }
            }
        })
        .with_max_retries(1);

        let task_id = engine.submit(task).await?;
        let result = engine.await_result(task_id, Duration::from_secs(2)).await?;
        assert_eq!(result, json!("recovered"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let metrics = engine.metrics.lock().await.clone();
        assert_eq!(metrics.tasks_retried, 1);
        assert_eq!(metrics.tasks_completed, 1);

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Arc::new(AsyncTaskEngine::new(test_settings()));
        engine.start().await?;

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let task = EngineTask::from_async(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DirectorError::TaskExecutionFailed {
                    reason: "always fails".to_string(),
                })
            }
        })
        .with_max_retries(2);

        let task_id = engine.submit(task).await?;
        let result = engine.await_result(task_id, Duration::from_secs(2)).await;
        assert!(result.is_err());
        // Initial attempt plus exactly max_retries re-runs.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn timeout_does_not_retry() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Arc::new(AsyncTaskEngine::new(test_settings()));
        engine.start().await?;

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let task = EngineTask::from_async(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!("never"))
            }
        })
        .with_timeout(Duration::from_millis(50))
        .with_max_retries(3);

        let task_id = engine.submit(task).await?;
        let result = engine.await_result(task_id, Duration::from_secs(2)).await;
        assert_matches::assert_matches!(result, Err(DirectorError::Timeout { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn backpressure_sheds_normal_but_admits_critical(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let engine = AsyncTaskEngine::new(test_settings());
        // Accept submissions without spawning workers, so nothing drains
        // the queues underneath the test.
        engine.running.store(true, Ordering::SeqCst);

        // max_queue_size 16: NORMAL holds 8, HIGH and CRITICAL hold 4 each,
        // and the hysteresis threshold is 16 * 0.8 = 12 queued tasks.
        for _ in 0..8 {
            engine
                .submit(EngineTask::from_async(|| async { Ok(Value::Null) }))
                .await?;
        }
        for _ in 0..4 {
            engine
                .submit(
                    EngineTask::from_async(|| async { Ok(Value::Null) })
                        .with_priority(QueuePriority::High),
                )
                .await?;
        }

        // The next NORMAL submission observes size >= 12, engages
        // backpressure, and is shed.
        let shed = engine
            .submit(EngineTask::from_async(|| async { Ok(Value::Null) }))
            .await;
        assert_matches::assert_matches!(shed, Err(DirectorError::Overloaded { .. }));
        assert!(engine.is_backpressure_active());

        // CRITICAL still enters while backpressure is engaged.
        for _ in 0..4 {
            engine
                .submit(
                    EngineTask::from_async(|| async { Ok(Value::Null) })
                        .with_priority(QueuePriority::Critical),
                )
                .await?;
        }

        // At the hard cap (16 queued) even CRITICAL is rejected.
        let rejected = engine
            .submit(
                EngineTask::from_async(|| async { Ok(Value::Null) })
                    .with_priority(QueuePriority::Critical),
            )
            .await;
        assert_matches::assert_matches!(rejected, Err(DirectorError::Overloaded { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn priority_order_is_strict() -> Result<(), Box<dyn std::error::Error>> {
        let engine = AsyncTaskEngine::new(test_settings());
        let mut queues = engine.queues.lock().await;

        let normal = EngineTask::from_async(|| async { Ok(Value::Null) });
        let normal_id = normal.id;
        queues.push(normal, &engine.config)?;

        let critical = EngineTask::from_async(|| async { Ok(Value::Null) })
            .with_priority(QueuePriority::Critical);
        let critical_id = critical.id;
        queues.push(critical, &engine.config)?;

        assert_eq!(queues.pop().map(|t| t.id), Some(critical_id));
        assert_eq!(queues.pop().map(|t| t.id), Some(normal_id));
        Ok(())
    }
}
