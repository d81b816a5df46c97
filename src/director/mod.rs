//! The Director.
//!
//! The single orchestrator at the top of the hierarchy: it validates and
//! admits tasks under a concurrency gate, classifies intent, picks a routing
//! strategy, executes it against the registered department handlers with a
//! fallback cascade, and falls back to handling the task directly when no
//! handler can take it. It never executes domain logic beyond that last
//! resort, and it never holds its locks across a handler call.

/// Routing strategy selection and complexity scoring
pub mod routing;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{DepartmentHandler, HandlerOutcome};
use crate::classifier::{Intent, IntentClassifier};
use crate::repository::TaskRepository;
use crate::tasks::{Task, TaskStatus};
use crate::utils::config::DirectorSettings;
use crate::utils::error::{DirectorError, DirectorResult};

pub use routing::{RoutingDecision, RoutingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectorState {
    Initializing,
    Active,
    Busy,
    Maintenance,
    Error,
}

impl fmt::Display for DirectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Busy => "busy",
            Self::Maintenance => "maintenance",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DirectorMetrics {
    pub tasks_processed: u64,
    pub successful_routes: u64,
    pub failed_routes: u64,
    pub direct_handled: u64,
    pub average_response_time: f64,
    pub department_routing_counts: HashMap<String, u64>,
    pub error_counts: HashMap<String, u64>,
    pub parallel_executions: u64,
    pub aggregated_results: u64,
    pub routing_strategy_usage: HashMap<String, u64>,
}

impl DirectorMetrics {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        self.successful_routes as f64 / self.tasks_processed.max(1) as f64
    }
}

/// The orchestrator. One per process, shared by reference.
pub struct Director {
    name: String,
    settings: DirectorSettings,
    state: RwLock<DirectorState>,
    active_tasks: Mutex<HashMap<Uuid, String>>,
    handlers: RwLock<HashMap<Intent, Vec<Arc<dyn DepartmentHandler>>>>,
    workload: Mutex<HashMap<String, usize>>,
    classifier: Arc<IntentClassifier>,
    repository: Arc<dyn TaskRepository>,
    metrics: Mutex<DirectorMetrics>,
    decisions: Mutex<Vec<RoutingDecision>>,
    created_at: DateTime<Utc>,
}

impl Director {
    #[must_use]
    pub fn new(
        settings: DirectorSettings,
        classifier: Arc<IntentClassifier>,
        repository: Arc<dyn TaskRepository>,
    ) -> Self {
        Self {
            name: "Director".to_string(),
            settings,
            state: RwLock::new(DirectorState::Initializing),
            active_tasks: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            workload: Mutex::new(HashMap::new()),
            classifier,
            repository,
            metrics: Mutex::new(DirectorMetrics::default()),
            decisions: Mutex::new(Vec::new()),
            created_at: Utc::now(),
        }
    }

    /// Register the initial set of handlers and move to active. Any failure
    /// leaves the Director in the error state, which is terminal until
    /// restart.
    pub async fn initialize(
        &self,
        handlers: Vec<Arc<dyn DepartmentHandler>>,
    ) -> DirectorResult<()> {
        {
            let state = *self.state.read().await;
            if state != DirectorState::Initializing {
                return Err(DirectorError::InvalidState {
                    operation: "initialize".to_string(),
                    state: state.to_string(),
                });
            }
        }

        for handler in handlers {
            self.register_handler(handler).await;
        }
        *self.state.write().await = DirectorState::Active;
        info!("director initialized");
        Ok(())
    }

    pub async fn register_handler(&self, handler: Arc<dyn DepartmentHandler>) {
        let department = handler.department();
        info!(department = department.as_str(), name = handler.name(), "handler registered");
        self.handlers
            .write()
            .await
            .entry(department)
            .or_default()
            .push(handler);
    }

    pub async fn unregister_department(&self, department: Intent) {
        if self.handlers.write().await.remove(&department).is_some() {
            info!(department = department.as_str(), "department handlers unregistered");
        }
    }

    pub async fn state(&self) -> DirectorState {
        *self.state.read().await
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.values().map(Vec::len).sum()
    }

    /// Execute a task end to end and return the response envelope.
    pub async fn execute_task(&self, mut task: Task) -> Value {
        let start = Utc::now();
        let task_id = task.id;

        if let Some(rejection) = self.validate_task(&task).await {
            return rejection;
        }

        // Concurrency gate: saturated Directors refuse instead of queueing.
        {
            let mut active = self.active_tasks.lock().await;
            if active.len() >= self.settings.max_concurrent_tasks {
                let message = format!(
                    "Maximum concurrent tasks ({}) exceeded",
                    self.settings.max_concurrent_tasks
                );
                warn!(%task_id, "{message}");
                return self.error_response(&message, Some(task_id));
            }
            active.insert(task_id, task.title.clone());
        }
        *self.state.write().await = DirectorState::Busy;

        info!(%task_id, title = %task.title, "processing task");
        let (intent, confidence) = self.classifier.classify(&task).await;
        let decision = self.make_routing_decision(&task, intent, confidence).await;

        let mut result = self
            .route_task(&mut task, intent, confidence, decision.strategy)
            .await;

        if let Value::Object(map) = &mut result {
            map.insert(
                "routing_decision".to_string(),
                json!({
                    "strategy": decision.strategy.to_string(),
                    "selected_agents": decision.selected_handlers,
                    "confidence": decision.confidence,
                    "reasoning": decision.reasoning,
                    "expected_execution_time": decision.expected_execution_secs,
                }),
            );
        }

        let success = matches!(
            result.get("status").and_then(Value::as_str),
            Some("success" | "handled_directly")
        );
        self.update_metrics(intent, success, start).await;

        {
            let mut active = self.active_tasks.lock().await;
            active.remove(&task_id);
            if active.is_empty() {
                drop(active);
                let mut state = self.state.write().await;
                if *state == DirectorState::Busy {
                    *state = DirectorState::Active;
                }
            }
        }

        result
    }

    async fn validate_task(&self, task: &Task) -> Option<Value> {
        let state = *self.state.read().await;
        match state {
            DirectorState::Error => {
                return Some(self.error_response("Director is in error state", Some(task.id)))
            }
            DirectorState::Maintenance => {
                return Some(
                    self.error_response("Director is in maintenance mode", Some(task.id)),
                )
            }
            DirectorState::Initializing => {
                return Some(self.error_response("Director is initializing", Some(task.id)))
            }
            _ => {}
        }

        if task.title.trim().is_empty() {
            return Some(self.error_response("Task has no title", Some(task.id)));
        }
        if task.status.is_terminal() {
            return Some(self.error_response(
                &format!("Task is already {}", task.status),
                Some(task.id),
            ));
        }
        None
    }

    async fn make_routing_decision(
        &self,
        task: &Task,
        intent: Intent,
        confidence: f64,
    ) -> RoutingDecision {
        let complexity = routing::analyze_task_complexity(task);
        let available = self.available_handlers(intent, task).await;
        let strategy = routing::determine_strategy(
            &self.settings,
            complexity,
            confidence,
            available.len(),
        );

        let selected: Vec<String> = match strategy {
            RoutingStrategy::SingleAgent | RoutingStrategy::LoadBalanced => {
                vec![intent.as_str().to_string()]
            }
            RoutingStrategy::ParallelAgents => available
                .iter()
                .take(self.settings.max_parallel_agents)
                .map(|h| h.name().to_string())
                .collect(),
            RoutingStrategy::ScatterGather => {
                let mut selected = vec![intent.as_str().to_string()];
                for dept in routing::complementary_departments(intent) {
                    if !self.available_handlers(*dept, task).await.is_empty() {
                        selected.push(dept.as_str().to_string());
                        if selected.len() >= self.settings.max_parallel_agents {
                            break;
                        }
                    }
                }
                selected
            }
        };

        let mut fallbacks = Vec::new();
        let fallback_department = self.fallback_intent();
        if !selected.contains(&fallback_department.as_str().to_string()) {
            fallbacks.push(fallback_department.as_str().to_string());
        }

        let decision = RoutingDecision {
            strategy,
            selected_handlers: selected.clone(),
            confidence,
            reasoning: routing::routing_reasoning(
                &self.settings,
                strategy,
                &selected,
                intent,
                confidence,
            ),
            expected_execution_secs: routing::estimate_execution_secs(strategy, complexity),
            fallback_handlers: fallbacks,
            created_at: Utc::now(),
        };

        debug!(
            strategy = %decision.strategy,
            handlers = decision.selected_handlers.len(),
            "routing decision made"
        );
        {
            let mut metrics = self.metrics.lock().await;
            *metrics
                .routing_strategy_usage
                .entry(decision.strategy.to_string())
                .or_default() += 1;
        }
        self.decisions.lock().await.push(decision.clone());
        decision
    }

    async fn route_task(
        &self,
        task: &mut Task,
        intent: Intent,
        confidence: f64,
        strategy: RoutingStrategy,
    ) -> Value {
        match strategy {
            RoutingStrategy::ParallelAgents => {
                let handlers = self.available_handlers(intent, task).await;
                if handlers.len() >= 2 {
                    return self.execute_parallel(task, intent, handlers).await;
                }
                // Fewer than two handlers: degrade to the single-agent path.
            }
            RoutingStrategy::ScatterGather => {
                let handlers = self.scatter_gather_handlers(intent, task).await;
                if handlers.len() >= 2 {
                    return self.execute_scatter_gather(task, intent, handlers).await;
                }
            }
            RoutingStrategy::LoadBalanced => {
                let handlers = self.available_handlers(intent, task).await;
                if let Some(handler) = self.least_loaded(handlers).await {
                    return self.execute_through_handler(task, intent, handler).await;
                }
            }
            RoutingStrategy::SingleAgent => {}
        }

        // Default cascade. Low confidence substitutes the fallback
        // department before any handler lookup.
        let mut target = intent;
        if confidence < self.settings.routing_confidence_threshold {
            let fallback = self.fallback_intent();
            if target != fallback {
                info!(
                    confidence,
                    fallback = fallback.as_str(),
                    "low routing confidence, substituting fallback department"
                );
                target = fallback;
            }
        }
        self.execute_single(task, target).await
    }

    /// Single-handler cascade: primary handler, then an alternative in the
    /// same domain, then the fallback department, then direct handling.
    async fn execute_single(&self, task: &mut Task, intent: Intent) -> Value {
        let handlers = self.available_handlers(intent, task).await;
        if let Some(handler) = handlers.into_iter().next() {
            return self.execute_through_handler(task, intent, handler).await;
        }

        warn!(department = intent.as_str(), "department handler unavailable");
        let fallback = self.fallback_intent();
        if intent != fallback {
            let fallback_handlers = self.available_handlers(fallback, task).await;
            if let Some(handler) = fallback_handlers.into_iter().next() {
                info!(fallback = fallback.as_str(), "routing through fallback department");
                return self.execute_through_handler(task, fallback, handler).await;
            }
        }

        self.handle_directly(task, intent).await
    }

    async fn execute_through_handler(
        &self,
        task: &mut Task,
        intent: Intent,
        handler: Arc<dyn DepartmentHandler>,
    ) -> Value {
        let handler_name = handler.name().to_string();
        self.adjust_workload(&handler_name, 1).await;

        task.start_progress();
        self.persist(task).await;

        let mut attempts: u32 = 0;
        let outcome = loop {
            let outcome = handler.execute(task).await;
            if outcome.is_success() {
                break outcome;
            }
            if !self.settings.enable_auto_retry || attempts >= self.settings.max_retries {
                break outcome;
            }
            attempts += 1;
            info!(task_id = %task.id, attempt = attempts, "retrying handler execution");
        };

        self.adjust_workload(&handler_name, -1).await;

        if outcome.is_success() {
            task.retry_count += attempts;
            task.complete(Some(outcome.result.clone()));
            self.persist(task).await;
            info!(task_id = %task.id, department = intent.as_str(), "task routed successfully");
            self.success_response(intent, &handler_name, task.id, &outcome)
        } else {
            let reason = outcome
                .error
                .unwrap_or_else(|| "handler returned an error envelope".to_string());
            let message = format!("Error executing task through {intent} agent: {reason}");
            error!(task_id = %task.id, "{message}");
            task.retry_count += attempts;
            task.fail(Some(reason));
            self.persist(task).await;
            json!({
                "status": "execution_error",
                "department": intent.as_str(),
                "error": message,
                "task_id": task.id,
                "timestamp": Utc::now(),
            })
        }
    }

    /// Fan out to same-intent handlers; the first success wins and the
    /// remaining futures are dropped.
    async fn execute_parallel(
        &self,
        task: &mut Task,
        intent: Intent,
        handlers: Vec<Arc<dyn DepartmentHandler>>,
    ) -> Value {
        let selected: Vec<Arc<dyn DepartmentHandler>> = handlers
            .into_iter()
            .take(self.settings.max_parallel_agents)
            .collect();
        {
            let mut metrics = self.metrics.lock().await;
            metrics.parallel_executions += 1;
        }

        task.start_progress();
        self.persist(task).await;

        let timeout = Duration::from_secs(self.settings.parallel_timeout_secs);
        let snapshot = task.clone();
        let mut in_flight: FuturesUnordered<_> = selected
            .iter()
            .map(|handler| {
                let handler = Arc::clone(handler);
                let task = snapshot.clone();
                async move {
                    let outcome = handler.execute(&task).await;
                    (handler.name().to_string(), outcome)
                }
            })
            .collect();

        let mut failures: Vec<String> = Vec::new();
        let winner = tokio::time::timeout(timeout, async {
            while let Some((name, outcome)) = in_flight.next().await {
                if outcome.is_success() {
                    return Some((name, outcome));
                }
                failures.push(format!(
                    "{name}: {}",
                    outcome.error.unwrap_or_else(|| "error".to_string())
                ));
            }
            None
        })
        .await;
        // Dropping the stream cancels the losers.
        drop(in_flight);

        match winner {
            Ok(Some((name, outcome))) => {
                task.complete(Some(outcome.result.clone()));
                self.persist(task).await;
                info!(task_id = %task.id, winner = %name, "parallel execution succeeded");
                self.success_response(intent, &name, task.id, &outcome)
            }
            Ok(None) => {
                let message = format!("All parallel handlers failed: {}", failures.join("; "));
                task.fail(Some(message.clone()));
                self.persist(task).await;
                json!({
                    "status": "execution_error",
                    "department": intent.as_str(),
                    "error": message,
                    "task_id": task.id,
                    "timestamp": Utc::now(),
                })
            }
            Err(_) => {
                let message = format!(
                    "Parallel execution timed out after {}s",
                    self.settings.parallel_timeout_secs
                );
                task.fail(Some(message.clone()));
                self.persist(task).await;
                json!({
                    "status": "execution_error",
                    "department": intent.as_str(),
                    "error": message,
                    "task_id": task.id,
                    "timestamp": Utc::now(),
                })
            }
        }
    }

    /// Send to the primary handler plus complementary departments and fold
    /// every response into one aggregated result.
    async fn execute_scatter_gather(
        &self,
        task: &mut Task,
        intent: Intent,
        handlers: Vec<(Intent, Arc<dyn DepartmentHandler>)>,
    ) -> Value {
        {
            let mut metrics = self.metrics.lock().await;
            metrics.aggregated_results += 1;
        }

        task.start_progress();
        self.persist(task).await;

        let timeout = Duration::from_secs(self.settings.parallel_timeout_secs);
        let snapshot = task.clone();
        let executions = handlers.iter().map(|(department, handler)| {
            let handler = Arc::clone(handler);
            let department = *department;
            let task = snapshot.clone();
            async move {
                let started = Utc::now();
                let outcome = handler.execute(&task).await;
                let execution_secs =
                    (Utc::now() - started).num_milliseconds() as f64 / 1000.0;
                (department, handler.name().to_string(), outcome, execution_secs)
            }
        });

        let gathered = tokio::time::timeout(timeout, futures::future::join_all(executions)).await;
        let Ok(results) = gathered else {
            let message = format!(
                "Scatter-gather timed out after {}s",
                self.settings.parallel_timeout_secs
            );
            task.fail(Some(message.clone()));
            self.persist(task).await;
            return json!({
                "status": "execution_error",
                "department": intent.as_str(),
                "error": message,
                "task_id": task.id,
                "timestamp": Utc::now(),
            });
        };

        let successes = results.iter().filter(|(_, _, o, _)| o.is_success()).count();
        let consensus = successes as f64 / results.len().max(1) as f64;
        let individual: Vec<Value> = results
            .iter()
            .map(|(department, name, outcome, execution_secs)| {
                json!({
                    "agent_name": name,
                    "department": department.as_str(),
                    "status": outcome.status,
                    "result": outcome.result,
                    "error": outcome.error,
                    "execution_time": execution_secs,
                })
            })
            .collect();

        // The primary department's result leads; any success may stand in
        // when the primary one failed.
        let primary = results
            .iter()
            .find(|(department, _, outcome, _)| *department == intent && outcome.is_success())
            .or_else(|| results.iter().find(|(_, _, outcome, _)| outcome.is_success()));

        match primary {
            Some((_, name, outcome, _)) => {
                let mut aggregated = outcome.result.clone();
                aggregated.insert(
                    "aggregation".to_string(),
                    json!({
                        "method": "scatter_gather",
                        "consensus_score": consensus,
                        "individual_results": individual,
                    }),
                );
                task.complete(Some(aggregated.clone()));
                self.persist(task).await;
                info!(task_id = %task.id, consensus, "scatter-gather aggregated");
                self.success_response(
                    intent,
                    name,
                    task.id,
                    &HandlerOutcome::success(aggregated),
                )
            }
            None => {
                let message = "All scatter-gather handlers failed".to_string();
                task.fail(Some(message.clone()));
                self.persist(task).await;
                json!({
                    "status": "execution_error",
                    "department": intent.as_str(),
                    "error": message,
                    "task_id": task.id,
                    "timestamp": Utc::now(),
                })
            }
        }
    }

    /// Last-resort execution inside the Director itself.
    async fn handle_directly(&self, task: &mut Task, intended: Intent) -> Value {
        info!(task_id = %task.id, department = intended.as_str(), "handling task directly");

        task.start_progress();
        self.persist(task).await;

        let mut result = Map::new();
        let (message, method) = match intended {
            Intent::Communications => (
                "Communication task processed by Director",
                "direct_communication_handling",
            ),
            Intent::Analysis => (
                "Analysis task processed by Director",
                "direct_analysis_handling",
            ),
            Intent::Automation => (
                "Automation task processed by Director",
                "direct_automation_handling",
            ),
            Intent::Coordination => (
                "Coordination task processed by Director",
                "direct_generic_handling",
            ),
        };
        result.insert("message".to_string(), Value::String(message.to_string()));
        result.insert("method".to_string(), Value::String(method.to_string()));
        result.insert(
            "intended_department".to_string(),
            Value::String(intended.as_str().to_string()),
        );
        result.insert(
            "recommendations".to_string(),
            json!([
                format!("Task completed with basic {intended} handling"),
                format!("Consider registering a {intended} department handler"),
            ]),
        );

        task.complete(Some(result.clone()));
        self.persist(task).await;

        {
            let mut metrics = self.metrics.lock().await;
            metrics.direct_handled += 1;
        }

        json!({
            "status": "handled_directly",
            "department": intended.as_str(),
            "task_id": task.id,
            "result": result,
            "timestamp": Utc::now(),
            "handler": self.name,
        })
    }

    async fn available_handlers(
        &self,
        intent: Intent,
        task: &Task,
    ) -> Vec<Arc<dyn DepartmentHandler>> {
        let candidates: Vec<Arc<dyn DepartmentHandler>> = self
            .handlers
            .read()
            .await
            .get(&intent)
            .map(|handlers| handlers.to_vec())
            .unwrap_or_default();

        let mut available = Vec::new();
        for handler in candidates {
            if handler.is_available().await && handler.can_handle(task).await {
                available.push(handler);
            }
        }
        available
    }

    async fn scatter_gather_handlers(
        &self,
        intent: Intent,
        task: &Task,
    ) -> Vec<(Intent, Arc<dyn DepartmentHandler>)> {
        let mut selected = Vec::new();
        if let Some(primary) = self.available_handlers(intent, task).await.into_iter().next() {
            selected.push((intent, primary));
        }
        for department in routing::complementary_departments(intent) {
            if selected.len() >= self.settings.max_parallel_agents {
                break;
            }
            if let Some(handler) = self
                .available_handlers(*department, task)
                .await
                .into_iter()
                .next()
            {
                selected.push((*department, handler));
            }
        }
        selected
    }

    async fn least_loaded(
        &self,
        handlers: Vec<Arc<dyn DepartmentHandler>>,
    ) -> Option<Arc<dyn DepartmentHandler>> {
        let workload = self.workload.lock().await;
        handlers
            .into_iter()
            .min_by_key(|handler| workload.get(handler.name()).copied().unwrap_or(0))
    }

    async fn adjust_workload(&self, handler_name: &str, delta: i64) {
        let mut workload = self.workload.lock().await;
        let entry = workload.entry(handler_name.to_string()).or_default();
        *entry = (*entry as i64 + delta).max(0) as usize;
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.repository.save_task(task).await {
            error!(task_id = %task.id, error = %e, "failed to persist task");
        }
    }

    fn fallback_intent(&self) -> Intent {
        Intent::parse(&self.settings.fallback_department).unwrap_or(Intent::Coordination)
    }

    fn error_response(&self, message: &str, task_id: Option<Uuid>) -> Value {
        json!({
            "status": "error",
            "error": message,
            "task_id": task_id,
            "timestamp": Utc::now(),
            "agent": self.name,
        })
    }

    fn success_response(
        &self,
        routed_to: Intent,
        agent_name: &str,
        task_id: Uuid,
        outcome: &HandlerOutcome,
    ) -> Value {
        json!({
            "status": "success",
            "routed_to": routed_to.as_str(),
            "agent_name": agent_name,
            "task_id": task_id,
            "result": outcome.result,
            "timestamp": Utc::now(),
            "director_agent": self.name,
        })
    }

    async fn update_metrics(&self, intent: Intent, success: bool, start: DateTime<Utc>) {
        let response_time = (Utc::now() - start).num_milliseconds() as f64 / 1000.0;
        let mut metrics = self.metrics.lock().await;

        metrics.tasks_processed += 1;
        if success {
            metrics.successful_routes += 1;
        } else {
            metrics.failed_routes += 1;
            *metrics
                .error_counts
                .entry(intent.as_str().to_string())
                .or_default() += 1;
        }
        *metrics
            .department_routing_counts
            .entry(intent.as_str().to_string())
            .or_default() += 1;

        let processed = metrics.tasks_processed as f64;
        metrics.average_response_time =
            (metrics.average_response_time * (processed - 1.0) + response_time) / processed;
    }

    /// Record a classification correction against a persisted task.
    pub async fn add_classification_feedback(
        &self,
        task_id: Uuid,
        predicted: Intent,
        predicted_confidence: f64,
        actual: Intent,
        source: &str,
    ) -> DirectorResult<()> {
        let task = self
            .repository
            .get_task(task_id)
            .await?
            .ok_or_else(|| DirectorError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        let text = IntentClassifier::extract_task_text(&task);
        self.classifier
            .add_feedback(task_id, predicted, predicted_confidence, actual, source, &text)
            .await;
        Ok(())
    }

    /// Request maintenance: refuse new work and wait (bounded) for active
    /// tasks to drain.
    pub async fn enter_maintenance_mode(&self) -> bool {
        if *self.state.read().await == DirectorState::Error {
            return false;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            if self.active_tasks.lock().await.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("entering maintenance with tasks still active");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.state.write().await = DirectorState::Maintenance;
        info!("director entered maintenance mode");
        true
    }

    pub async fn exit_maintenance_mode(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == DirectorState::Maintenance {
            *state = DirectorState::Active;
            info!("director left maintenance mode");
            true
        } else {
            false
        }
    }

    pub async fn metrics_snapshot(&self) -> DirectorMetrics {
        self.metrics.lock().await.clone()
    }

    /// Health report consumed by external probes.
    pub async fn health_status(&self) -> Value {
        let state = *self.state.read().await;
        let active = self.active_tasks.lock().await.len();
        let metrics = self.metrics.lock().await.clone();
        let uptime = (Utc::now() - self.created_at).num_seconds();

        json!({
            "state": state.to_string(),
            "uptime_seconds": uptime,
            "active_tasks": active,
            "max_concurrent_tasks": self.settings.max_concurrent_tasks,
            "department_agents_count": self.handler_count().await,
            "metrics": metrics,
            "configuration": {
                "enable_llm_classification": self.settings.enable_llm_classification,
                "fallback_department": self.settings.fallback_department,
                "enable_auto_retry": self.settings.enable_auto_retry,
                "max_retries": self.settings.max_retries,
                "routing_confidence_threshold": self.settings.routing_confidence_threshold,
            },
            "timestamp": Utc::now(),
        })
    }

    /// Key numbers for dashboards.
    pub async fn performance_summary(&self) -> Value {
        let metrics = self.metrics.lock().await.clone();
        let most_used = metrics
            .department_routing_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(dept, count)| json!({"department": dept, "count": count}));

        json!({
            "success_rate_percentage": (metrics.success_rate() * 100.0 * 100.0).round() / 100.0,
            "average_response_time_seconds": metrics.average_response_time,
            "total_tasks_processed": metrics.tasks_processed,
            "tasks_handled_directly": metrics.direct_handled,
            "most_used_department": most_used,
            "error_count": metrics.failed_routes,
        })
    }

    /// Strategy usage, workload, and the last ten routing decisions.
    pub async fn routing_analytics(&self) -> Value {
        let decisions = self.decisions.lock().await.clone();
        let metrics = self.metrics.lock().await.clone();
        let workload = self.workload.lock().await.clone();

        json!({
            "routing_decisions": decisions.len(),
            "strategy_usage": metrics.routing_strategy_usage,
            "agent_workload": workload,
            "parallel_executions": metrics.parallel_executions,
            "aggregated_results": metrics.aggregated_results,
            "recent_decisions": decisions
                .iter()
                .rev()
                .take(10)
                .map(|d| json!({
                    "strategy": d.strategy.to_string(),
                    "agents": d.selected_handlers,
                    "confidence": d.confidence,
                    "reasoning": d.reasoning,
                    "timestamp": d.created_at,
                }))
                .collect::<Vec<_>>(),
        })
    }
}
