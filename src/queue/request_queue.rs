//! Request admission queue.
//!
//! External work enters here before anything else sees it. Four priority
//! sub-queues with overlapping caps feed a resizable worker pool; process
//! groups isolate request types from each other; hysteresis backpressure
//! sheds NORMAL-and-below traffic while the queue is hot. Requests are
//! executed through an injected [`RequestExecutor`], which in production is
//! the Director.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::blackboard::Blackboard;
use super::process_groups::ProcessGroupManager;
use crate::engine::QueuePriority;
use crate::utils::config::QueueSettings;
use crate::utils::error::{DirectorError, DirectorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    TaskSubmission,
    AgentOperation,
    AnalyticsQuery,
    StreamingRequest,
    HealthCheck,
    ApiCall,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TaskSubmission => "task_submission",
            Self::AgentOperation => "agent_operation",
            Self::AnalyticsQuery => "analytics_query",
            Self::StreamingRequest => "streaming_request",
            Self::HealthCheck => "health_check",
            Self::ApiCall => "api_call",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

/// In-memory wrapper around a request while it is admitted and processed.
/// Owned by the queue until terminal, then parked in the completion buffer
/// for result retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub request_id: Uuid,
    pub request_type: RequestType,
    pub priority: QueuePriority,
    pub payload: Value,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub result: Option<Value>,
    pub error: Option<DirectorError>,
    pub timeout_secs: u64,
    pub process_group: String,
    pub annotations: Map<String, Value>,
}

/// Port through which admitted requests are actually executed.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &QueuedRequest) -> DirectorResult<Value>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total_requests: u64,
    pub requests_queued: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
    pub requests_timeout: u64,
    pub requests_cancelled: u64,
    pub requests_rejected: u64,
    pub peak_queue_size: usize,
    pub peak_concurrent_requests: usize,
    pub total_queue_time_secs: f64,
    pub total_processing_time_secs: f64,
    pub average_queue_time_secs: f64,
    pub average_processing_time_secs: f64,
}

struct SubQueues {
    queues: HashMap<QueuePriority, VecDeque<QueuedRequest>>,
    size: usize,
}

impl SubQueues {
    fn new() -> Self {
        let mut queues = HashMap::new();
        for priority in QueuePriority::DISPATCH_ORDER {
            queues.insert(priority, VecDeque::new());
        }
        Self { queues, size: 0 }
    }

    fn push_back(
        &mut self,
        request: QueuedRequest,
        settings: &QueueSettings,
    ) -> DirectorResult<()> {
        let priority = request.priority;
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
        queue.push_back(request);
        self.size += 1;
        Ok(())
    }

    /// Re-admission path for group-saturated requests: back of the original
    /// priority queue, bypassing the per-queue cap so nothing is dropped.
    fn requeue(&mut self, request: QueuedRequest) {
        if let Some(queue) = self.queues.get_mut(&request.priority) {
            queue.push_back(request);
            self.size += 1;
        }
    }

    fn pop(&mut self) -> Option<QueuedRequest> {
        for priority in QueuePriority::DISPATCH_ORDER {
            if let Some(queue) = self.queues.get_mut(&priority) {
                if let Some(request) = queue.pop_front() {
                    self.size -= 1;
                    return Some(request);
                }
            }
        }
        None
    }

    fn drain(&mut self) -> Vec<QueuedRequest> {
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

/// The admission layer. All public operations are safe under concurrent use.
pub struct RequestQueue {
    config: QueueSettings,
    executor: Arc<dyn RequestExecutor>,
    blackboard: Arc<Blackboard>,
    groups: ProcessGroupManager,
    queues: Mutex<SubQueues>,
    queue_notify: Notify,
    active: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    completed: Mutex<HashMap<Uuid, QueuedRequest>>,
    completion_notify: Notify,
    metrics: Mutex<QueueMetrics>,
    backpressure: AtomicBool,
    concurrency_limit: AtomicUsize,
    running: AtomicBool,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RequestQueue {
    #[must_use]
    pub fn new(
        config: QueueSettings,
        executor: Arc<dyn RequestExecutor>,
        blackboard: Arc<Blackboard>,
    ) -> Self {
        let limit = config.max_concurrent_requests.max(1);
        Self {
            config,
            executor,
            blackboard,
            groups: ProcessGroupManager::new(),
            queues: Mutex::new(SubQueues::new()),
            queue_notify: Notify::new(),
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            completion_notify: Notify::new(),
            metrics: Mutex::new(QueueMetrics::default()),
            backpressure: AtomicBool::new(false),
            concurrency_limit: AtomicUsize::new(limit),
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start the worker pool and the completion-buffer cleanup loop.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let worker_count = self.config.max_concurrent_requests.max(1);
        let mut workers = self.workers.lock().await;
        for i in 0..worker_count {
            let queue = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                queue.worker_loop(i).await;
            }));
        }
        let queue = Arc::clone(self);
        workers.push(tokio::spawn(async move {
            queue.cleanup_loop().await;
        }));

        self.blackboard.write("queue_status", json!("running")).await;
        info!(worker_count, "request queue started");
    }

    /// Admit a request, or reject it under backpressure.
    pub async fn submit(
        &self,
        request_type: RequestType,
        payload: Value,
        priority: QueuePriority,
        timeout: Option<Duration>,
        client_id: Option<String>,
    ) -> DirectorResult<Uuid> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(DirectorError::InvalidState {
                operation: "submit".to_string(),
                state: "request queue not running".to_string(),
            });
        }

        let request = QueuedRequest {
            request_id: Uuid::new_v4(),
            request_type,
            priority,
            payload,
            client_id: client_id.unwrap_or_else(|| "system".to_string()),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: RequestStatus::Queued,
            result: None,
            error: None,
            timeout_secs: timeout
                .map(|t| t.as_secs())
                .unwrap_or(self.config.request_timeout_secs),
            process_group: ProcessGroupManager::group_for(request_type).to_string(),
            annotations: Map::new(),
        };
        let request_id = request.request_id;

        let size_after = {
            let mut queues = self.queues.lock().await;

            // Hard cap applies to every priority.
            if queues.size >= self.config.max_queue_size {
                self.metrics.lock().await.requests_rejected += 1;
                return Err(DirectorError::Overloaded {
                    reason: "request queue at hard capacity".to_string(),
                });
            }

            // Hysteresis backpressure: while engaged, NORMAL and LOW are
            // shed; CRITICAL and HIGH still enter up to the hard cap.
            let engage_at = (self.config.max_queue_size as f64
                * self.config.backpressure_threshold) as usize;
            if queues.size >= engage_at && !self.backpressure.swap(true, Ordering::SeqCst) {
                warn!(queue_size = queues.size, "backpressure engaged");
            }
            if self.backpressure.load(Ordering::SeqCst)
                && matches!(priority, QueuePriority::Normal | QueuePriority::Low)
            {
                self.metrics.lock().await.requests_rejected += 1;
                return Err(DirectorError::Overloaded {
                    reason: "backpressure active, request shed".to_string(),
                });
            }

            queues.push_back(request, &self.config)?;

            let mut metrics = self.metrics.lock().await;
            metrics.total_requests += 1;
            metrics.requests_queued += 1;
            metrics.peak_queue_size = metrics.peak_queue_size.max(queues.size);
            queues.size
        };
        self.blackboard.write("queue_size", json!(size_after)).await;
        self.blackboard
            .write(
                "backpressure_active",
                json!(self.backpressure.load(Ordering::SeqCst)),
            )
            .await;
        self.queue_notify.notify_waiters();

        debug!(%request_id, %request_type, priority = priority.as_str(), "request admitted");
        Ok(request_id)
    }

    /// Wait for a request's terminal result.
    pub async fn await_result(
        &self,
        request_id: Uuid,
        timeout: Duration,
    ) -> DirectorResult<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let completed = self.completed.lock().await;
                if let Some(request) = completed.get(&request_id) {
                    return match request.status {
                        RequestStatus::Completed => {
                            Ok(request.result.clone().unwrap_or(Value::Null))
                        }
                        RequestStatus::Timeout => Err(DirectorError::Timeout {
                            operation: format!("request {request_id}"),
                            duration_ms: request.timeout_secs * 1000,
                        }),
                        RequestStatus::Cancelled => Err(DirectorError::OperationCancelled {
                            operation: format!("request {request_id}"),
                        }),
                        _ => Err(request.error.clone().unwrap_or(DirectorError::Internal {
                            reason: "request failed without recorded error".to_string(),
                        })),
                    };
                }
            }

            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                return Err(DirectorError::Timeout {
                    operation: format!("await_result {request_id}"),
                    duration_ms: timeout.as_millis() as u64,
                });
            }
            let _ = tokio::time::timeout(remaining, self.completion_notify.notified()).await;
        }
    }

    /// Applied by the throttling controller.
    pub fn update_concurrency_limit(&self, limit: usize) {
        let clamped = limit.max(1);
        self.concurrency_limit.store(clamped, Ordering::SeqCst);
        self.queue_notify.notify_waiters();
        debug!(limit = clamped, "queue concurrency limit updated");
    }

    #[must_use]
    pub fn current_concurrency_limit(&self) -> usize {
        self.concurrency_limit.load(Ordering::SeqCst)
    }

    pub async fn queue_size(&self) -> usize {
        self.queues.lock().await.size
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    #[must_use]
    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure.load(Ordering::SeqCst)
    }

    /// Current queue status for monitoring endpoints.
    pub async fn status(&self) -> Value {
        let queues = self.queues.lock().await;
        let active = self.active.lock().await;
        let completed = self.completed.lock().await;
        let metrics = self.metrics.lock().await;

        json!({
            "running": self.running.load(Ordering::SeqCst),
            "queue_size": queues.size,
            "active_requests": active.len(),
            "completed_requests": completed.len(),
            "backpressure_active": self.backpressure.load(Ordering::SeqCst),
            "concurrency_limit": self.concurrency_limit.load(Ordering::SeqCst),
            "metrics": &*metrics,
            "process_groups": self.groups.status().await,
            "config": {
                "max_queue_size": self.config.max_queue_size,
                "max_concurrent_requests": self.config.max_concurrent_requests,
                "backpressure_threshold": self.config.backpressure_threshold,
                "resume_threshold": self.config.resume_threshold,
            }
        })
    }

    /// Stop workers and cancel everything still queued.
    pub async fn shutdown(self: &Arc<Self>, grace: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping request queue");
        self.queue_notify.notify_waiters();

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.active.lock().await.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("request queue grace period elapsed with requests active");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut handles = self.workers.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }

        let drained = self.queues.lock().await.drain();
        if !drained.is_empty() {
            let mut completed = self.completed.lock().await;
            let mut metrics = self.metrics.lock().await;
            for mut request in drained {
                request.status = RequestStatus::Cancelled;
                request.completed_at = Some(Utc::now());
                metrics.requests_cancelled += 1;
                completed.insert(request.request_id, request);
            }
        }
        self.completion_notify.notify_waiters();
        self.blackboard.write("queue_status", json!("stopped")).await;
        info!("request queue stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_index: usize) {
        debug!(worker_index, "request worker started");

        while self.running.load(Ordering::SeqCst) {
            let limit = self.concurrency_limit.load(Ordering::SeqCst);
            if self.active.lock().await.len() >= limit {
                let _ = tokio::time::timeout(
                    Duration::from_millis(100),
                    self.queue_notify.notified(),
                )
                .await;
                continue;
            }

            let request = { self.queues.lock().await.pop() };
            let Some(request) = request else {
                self.maybe_release_backpressure().await;
                let _ = tokio::time::timeout(
                    Duration::from_millis(100),
                    self.queue_notify.notified(),
                )
                .await;
                continue;
            };

            // A worker first claims a group slot; saturated groups push the
            // request to the back of its original priority queue so other
            // groups keep flowing.
            let Some(permit) = self.groups.try_acquire(&request.process_group).await else {
                self.queues.lock().await.requeue(request);
                tokio::time::sleep(Duration::from_millis(25)).await;
                continue;
            };

            self.maybe_release_backpressure().await;
            self.process_request(request, worker_index).await;
            drop(permit);
        }

        debug!(worker_index, "request worker stopped");
    }

    async fn maybe_release_backpressure(&self) {
        if !self.backpressure.load(Ordering::SeqCst) {
            return;
        }
        let resume_at =
            (self.config.max_queue_size as f64 * self.config.resume_threshold) as usize;
        let size = self.queues.lock().await.size;
        if size <= resume_at && self.backpressure.swap(false, Ordering::SeqCst) {
            info!(queue_size = size, "backpressure released");
            self.blackboard
                .write("backpressure_active", json!(false))
                .await;
        }
    }

    async fn process_request(&self, mut request: QueuedRequest, worker_index: usize) {
        let request_id = request.request_id;
        request.started_at = Some(Utc::now());
        request.status = RequestStatus::Processing;

        let active_count = {
            let mut active = self.active.lock().await;
            active.insert(request_id, Utc::now());
            let mut metrics = self.metrics.lock().await;
            metrics.peak_concurrent_requests = metrics.peak_concurrent_requests.max(active.len());
            active.len()
        };
        self.blackboard
            .write("active_requests", json!(active_count))
            .await;
        self.blackboard
            .write(
                &format!("request_{request_id}"),
                json!({
                    "status": "processing",
                    "type": request.request_type.to_string(),
                    "started_at": request.started_at,
                    "worker": worker_index,
                }),
            )
            .await;

        debug!(worker_index, %request_id, "processing request");
        let timeout = Duration::from_secs(request.timeout_secs);
        let outcome = tokio::time::timeout(timeout, self.executor.execute(&request)).await;
        let completed_at = Utc::now();
        request.completed_at = Some(completed_at);

        match outcome {
            Ok(Ok(result)) => {
                request.status = RequestStatus::Completed;
                request.result = Some(result);
            }
            Ok(Err(err)) => {
                error!(%request_id, error = %err, "request failed");
                request.status = RequestStatus::Failed;
                request.error = Some(err);
            }
            Err(_) => {
                warn!(%request_id, "request timed out");
                request.status = RequestStatus::Timeout;
                request.error = Some(DirectorError::Timeout {
                    operation: format!("request {request_id}"),
                    duration_ms: timeout.as_millis() as u64,
                });
            }
        }

        let success = request.status == RequestStatus::Completed;
        self.groups
            .record_outcome(&request.process_group, success)
            .await;

        {
            let mut metrics = self.metrics.lock().await;
            match request.status {
                RequestStatus::Completed => {
                    metrics.requests_processed += 1;
                    if let Some(started) = request.started_at {
                        let queue_time =
                            (started - request.created_at).num_milliseconds() as f64 / 1000.0;
                        let processing_time =
                            (completed_at - started).num_milliseconds() as f64 / 1000.0;
                        metrics.total_queue_time_secs += queue_time;
                        metrics.total_processing_time_secs += processing_time;
                        let processed = metrics.requests_processed as f64;
                        metrics.average_queue_time_secs =
                            metrics.total_queue_time_secs / processed;
                        metrics.average_processing_time_secs =
                            metrics.total_processing_time_secs / processed;
                    }
                }
                RequestStatus::Timeout => metrics.requests_timeout += 1,
                _ => metrics.requests_failed += 1,
            }
        }

        let active_count = {
            let mut active = self.active.lock().await;
            active.remove(&request_id);
            active.len()
        };
        self.blackboard
            .write("active_requests", json!(active_count))
            .await;
        self.blackboard
            .write(
                &format!("request_{request_id}"),
                json!({
                    "status": request.status,
                    "completed_at": request.completed_at,
                    "error": request.error.as_ref().map(ToString::to_string),
                }),
            )
            .await;

        self.completed.lock().await.insert(request_id, request);
        self.completion_notify.notify_waiters();
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;

            let cutoff = Utc::now()
                - chrono::Duration::seconds(self.config.cleanup_interval_secs as i64);
            let removed_ids: Vec<Uuid> = {
                let mut completed = self.completed.lock().await;
                let expired: Vec<Uuid> = completed
                    .iter()
                    .filter(|(_, r)| r.completed_at.map(|t| t < cutoff).unwrap_or(false))
                    .map(|(id, _)| *id)
                    .collect();
                for id in &expired {
                    completed.remove(id);
                }
                expired
            };
            for id in &removed_ids {
                self.blackboard.remove(&format!("request_{id}")).await;
            }
            if !removed_ids.is_empty() {
                debug!(removed = removed_ids.len(), "cleaned up completed requests");
            }

            // Publish a rolled-up metrics snapshot for observers.
            let metrics = self.metrics.lock().await.clone();
            self.blackboard
                .write(
                    "current_metrics",
                    json!({
                        "queue_size": self.queues.lock().await.size,
                        "active_requests": self.active.lock().await.len(),
                        "metrics": metrics,
                    }),
                )
                .await;
            self.maybe_release_backpressure().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Executor that echoes the payload back after an optional delay.
    struct EchoExecutor {
        delay: Duration,
    }

    #[async_trait]
    impl RequestExecutor for EchoExecutor {
        async fn execute(&self, request: &QueuedRequest) -> DirectorResult<Value> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(json!({"echo": request.payload}))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl RequestExecutor for FailingExecutor {
        async fn execute(&self, _request: &QueuedRequest) -> DirectorResult<Value> {
            Err(DirectorError::TaskExecutionFailed {
                reason: "executor refused".to_string(),
            })
        }
    }

    fn test_settings() -> QueueSettings {
        QueueSettings {
            max_queue_size: 40,
            max_concurrent_requests: 4,
            request_timeout_secs: 5,
            backpressure_threshold: 0.8,
            resume_threshold: 0.3,
            cleanup_interval_secs: 300,
        }
    }

    fn build_queue(executor: Arc<dyn RequestExecutor>) -> Arc<RequestQueue> {
        Arc::new(RequestQueue::new(
            test_settings(),
            executor,
            Arc::new(Blackboard::new()),
        ))
    }

    #[tokio::test]
    async fn submit_and_await_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let queue = build_queue(Arc::new(EchoExecutor {
            delay: Duration::ZERO,
        }));
        queue.start().await;

        let request_id = queue
            .submit(
                RequestType::TaskSubmission,
                json!({"type": "email"}),
                QueuePriority::Normal,
                None,
                Some("client-1".to_string()),
            )
            .await?;

        let result = queue
            .await_result(request_id, Duration::from_secs(2))
            .await?;
        assert_eq!(result["echo"]["type"], "email");

        queue.shutdown(Duration::from_secs(1)).await;
        Ok(())
    }

    #[tokio::test]
    async fn failed_requests_surface_the_error() -> Result<(), Box<dyn std::error::Error>> {
        let queue = build_queue(Arc::new(FailingExecutor));
        queue.start().await;

        let request_id = queue
            .submit(
                RequestType::ApiCall,
                Value::Null,
                QueuePriority::High,
                None,
                None,
            )
            .await?;

        let result = queue.await_result(request_id, Duration::from_secs(2)).await;
        assert_matches::assert_matches!(
            result,
            Err(DirectorError::TaskExecutionFailed { .. })
        );

        queue.shutdown(Duration::from_secs(1)).await;
        Ok(())
    }

    #[tokio::test]
    async fn backpressure_sheds_normal_but_admits_critical(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let queue = build_queue(Arc::new(EchoExecutor {
            delay: Duration::ZERO,
        }));
        // Mark running without workers so the queue fills deterministically.
        queue.running.store(true, Ordering::SeqCst);

        // Engage threshold: 40 * 0.8 = 32. NORMAL holds 20, LOW 10, HIGH 10
        // of the 40 total, so fill NORMAL + LOW + part of HIGH.
        for _ in 0..20 {
            queue
                .submit(
                    RequestType::TaskSubmission,
                    Value::Null,
                    QueuePriority::Normal,
                    None,
                    None,
                )
                .await?;
        }
        for _ in 0..10 {
            queue
                .submit(
                    RequestType::TaskSubmission,
                    Value::Null,
                    QueuePriority::Low,
                    None,
                    None,
                )
                .await?;
        }
        for _ in 0..2 {
            queue
                .submit(
                    RequestType::TaskSubmission,
                    Value::Null,
                    QueuePriority::High,
                    None,
                    None,
                )
                .await?;
        }
        // The next submission observes size >= 32, engages backpressure,
        // and NORMAL traffic is shed.
        let shed = queue
            .submit(
                RequestType::TaskSubmission,
                Value::Null,
                QueuePriority::Normal,
                None,
                None,
            )
            .await;
        assert_matches::assert_matches!(shed, Err(DirectorError::Overloaded { .. }));
        assert!(queue.is_backpressure_active());

        // CRITICAL still enters until the hard cap.
        let admitted = queue
            .submit(
                RequestType::TaskSubmission,
                Value::Null,
                QueuePriority::Critical,
                None,
                None,
            )
            .await;
        assert!(admitted.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn strict_priority_dispatch_order() {
        let mut queues = SubQueues::new();
        let settings = test_settings();

        let make = |priority| QueuedRequest {
            request_id: Uuid::new_v4(),
            request_type: RequestType::ApiCall,
            priority,
            payload: Value::Null,
            client_id: "test".to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: RequestStatus::Queued,
            result: None,
            error: None,
            timeout_secs: 5,
            process_group: "general".to_string(),
            annotations: Map::new(),
        };

        let normal = make(QueuePriority::Normal);
        let normal_id = normal.request_id;
        queues.push_back(normal, &settings).unwrap();

        let critical = make(QueuePriority::Critical);
        let critical_id = critical.request_id;
        queues.push_back(critical, &settings).unwrap();

        assert_eq!(queues.pop().map(|r| r.request_id), Some(critical_id));
        assert_eq!(queues.pop().map(|r| r.request_id), Some(normal_id));
    }

    #[tokio::test]
    async fn blackboard_sees_queue_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
        let blackboard = Arc::new(Blackboard::new());
        let queue = Arc::new(RequestQueue::new(
            test_settings(),
            Arc::new(EchoExecutor {
                delay: Duration::ZERO,
            }),
            Arc::clone(&blackboard),
        ));
        queue.start().await;

        assert_eq!(
            blackboard.read("queue_status").await,
            Some(json!("running"))
        );

        let request_id = queue
            .submit(
                RequestType::HealthCheck,
                Value::Null,
                QueuePriority::Normal,
                None,
                None,
            )
            .await?;
        queue
            .await_result(request_id, Duration::from_secs(2))
            .await?;

        let progress = blackboard.read(&format!("request_{request_id}")).await;
        assert!(progress.is_some());

        queue.shutdown(Duration::from_secs(1)).await;
        assert_eq!(
            blackboard.read("queue_status").await,
            Some(json!("stopped"))
        );
        Ok(())
    }
}
