//! HTTP surface and background task wiring.
//!
//! The handlers translate HTTP requests into queue submissions and status
//! queries; all orchestration decisions stay behind the admission queue and
//! the Director.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classifier::Intent;
use crate::director::Director;
use crate::queue::{QueuedRequest, RequestExecutor, RequestType};
use crate::repository::{TaskFilter, TaskRepository};
use crate::tasks::{Task, TaskPriority, TaskType};
use crate::utils::error::{DirectorError, DirectorResult};
use crate::utils::validation::InputValidator;
use crate::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Executor bridging admitted requests to the Director. Request types that
/// are not task submissions run as sub-tasks on the async engine.
pub struct DirectorRequestExecutor {
    director: Arc<Director>,
    repository: Arc<dyn TaskRepository>,
    engine: Option<Arc<crate::engine::AsyncTaskEngine>>,
}

impl DirectorRequestExecutor {
    #[must_use]
    pub fn new(director: Arc<Director>, repository: Arc<dyn TaskRepository>) -> Self {
        Self {
            director,
            repository,
            engine: None,
        }
    }

    #[must_use]
    pub fn with_engine(mut self, engine: Arc<crate::engine::AsyncTaskEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    fn build_task(payload: &Value) -> DirectorResult<Task> {
        InputValidator::validate_task_payload(payload)?;
        let object = payload.as_object().ok_or_else(|| {
            DirectorError::ValidationError {
                field: "body".to_string(),
                reason: "expected a JSON object".to_string(),
            }
        })?;

        let task_type_raw = object
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("other");
        let title = object
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Task: {task_type_raw}"));
        let description = object
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let priority = object
            .get("priority")
            .and_then(Value::as_str)
            .map(TaskPriority::parse)
            .transpose()?
            .unwrap_or(TaskPriority::Medium);
        let input_data: Map<String, Value> = object
            .get("args")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(
            Task::new(title, description, TaskType::parse_lossy(task_type_raw))
                .with_priority(priority)
                .with_input(input_data),
        )
    }
}

#[async_trait]
impl RequestExecutor for DirectorRequestExecutor {
    async fn execute(&self, request: &QueuedRequest) -> DirectorResult<Value> {
        match request.request_type {
            RequestType::TaskSubmission => {
                let task = Self::build_task(&request.payload)?;
                let external_id =
                    format!("task_{}_{}", task.id, task.created_at.format("%Y%m%d_%H%M%S"));
                let task_details = json!({
                    "id": task.id,
                    "title": task.title,
                    "type": task.task_type.to_string(),
                    "status": task.status.to_string(),
                    "created_at": task.created_at,
                });
                self.repository.save_task(&task).await?;

                let routing_result = self.director.execute_task(task).await;
                Ok(json!({
                    "task_id": external_id,
                    "routing_result": routing_result,
                    "task_details": task_details,
                }))
            }
            RequestType::HealthCheck => Ok(json!({
                "status": "ok",
                "timestamp": Utc::now(),
            })),
            RequestType::AnalyticsQuery => Ok(self.director.routing_analytics().await),
            RequestType::AgentOperation | RequestType::StreamingRequest | RequestType::ApiCall => {
                let ack = json!({
                    "status": "processed",
                    "type": request.request_type.to_string(),
                    "timestamp": Utc::now(),
                });
                let Some(engine) = &self.engine else {
                    return Ok(ack);
                };
                // Run as a sub-task so these requests share the engine's
                // priority ordering and concurrency limits.
                let response = ack.clone();
                let task = crate::engine::EngineTask::from_async(move || {
                    let response = response.clone();
                    async move { Ok(response) }
                })
                .with_priority(request.priority);
                let task_id = engine.submit(task).await?;
                engine
                    .await_result(task_id, Duration::from_secs(request.timeout_secs))
                    .await
            }
        }
    }
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/task", post(submit_task))
        .route("/api/tasks", get(list_tasks))
        .route("/api/agents", get(list_agents))
        .route("/api/queue/status", get(queue_status))
        .route("/api/engine/status", get(engine_status))
        .route("/api/director/health", get(director_health))
        .route("/api/director/analytics", get(director_analytics))
        .route("/api/throttling/history", get(throttling_history))
        .route("/api/monitor/resources", get(monitor_resources))
        .route("/api/classifier/analytics", get(classifier_analytics))
        .route("/api/classifier/feedback", post(classifier_feedback))
        .route("/api/classifier/training-data", get(classifier_training_data))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Spawn the periodic background jobs that keep the system healthy.
pub fn start_background_tasks(state: &AppState) {
    state.monitor.start();
    state.throttling.start();

    let classifier = Arc::clone(&state.classifier);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = classifier.cleanup_cache().await;
            if removed > 0 {
                info!(removed, "classification cache cleanup pass");
            }
        }
    });

    info!("background tasks started");
}

fn error_status(error: &DirectorError) -> StatusCode {
    match error.kind() {
        "validation" => StatusCode::BAD_REQUEST,
        "overloaded" => StatusCode::SERVICE_UNAVAILABLE,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        "task" if matches!(error, DirectorError::TaskNotFound { .. }) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(error: &DirectorError) -> Json<Value> {
    Json(json!({
        "status": "error",
        "error": error.to_string(),
        "timestamp": Utc::now(),
    }))
}

async fn index() -> Json<Value> {
    Json(json!({
        "message": format!("Task Director API v{VERSION}"),
        "status": "healthy",
    }))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = match state.repository.ping().await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let healthy = database == "connected";
    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "database": database,
        "version": VERSION,
    });
    if healthy {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

async fn submit_task(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(payload)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "error": "Request body must be JSON",
                "timestamp": Utc::now(),
            })),
        );
    };

    if let Err(e) = InputValidator::validate_task_payload(&payload) {
        warn!(error = %e, "task submission rejected");
        return (error_status(&e), error_body(&e));
    }

    let priority = payload
        .get("priority")
        .and_then(Value::as_str)
        .and_then(|p| TaskPriority::parse(p).ok())
        .unwrap_or(TaskPriority::Medium);

    let request_id = match state
        .queue
        .submit(
            RequestType::TaskSubmission,
            payload,
            priority.into(),
            None,
            None,
        )
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "task admission failed");
            return (error_status(&e), error_body(&e));
        }
    };

    let timeout = Duration::from_secs(state.config.queue.request_timeout_secs);
    match state.queue.await_result(request_id, timeout).await {
        Ok(result) => {
            let response = json!({
                "status": "success",
                "task_id": result["task_id"],
                "message": "Task created and routed successfully",
                "routing_result": result["routing_result"],
                "task_details": result["task_details"],
            });
            (StatusCode::CREATED, Json(response))
        }
        Err(e) => {
            error!(error = %e, "task processing failed");
            (error_status(&e), error_body(&e))
        }
    }
}

async fn list_tasks(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state
        .repository
        .list_tasks(TaskFilter {
            limit: Some(100),
            ..TaskFilter::default()
        })
        .await
    {
        Ok(tasks) => (StatusCode::OK, Json(json!({"tasks": tasks}))),
        Err(e) => (error_status(&e), error_body(&e)),
    }
}

async fn list_agents(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.repository.list_agents().await {
        Ok(agents) => (StatusCode::OK, Json(json!({"agents": agents}))),
        Err(e) => (error_status(&e), error_body(&e)),
    }
}

async fn queue_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.queue.status().await)
}

async fn engine_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.engine.status().await)
}

async fn director_health(State(state): State<AppState>) -> Json<Value> {
    Json(state.director.health_status().await)
}

async fn director_analytics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "routing": state.director.routing_analytics().await,
        "performance": state.director.performance_summary().await,
    }))
}

async fn throttling_history(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "current_concurrency": state.throttling.current_concurrency().await,
        "target_concurrency": state.throttling.target_concurrency().await,
        "history": state.throttling.history(50).await,
    }))
}

async fn monitor_resources(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.monitor.current_snapshot();
    Json(json!({
        "health_score": snapshot.health_score(),
        "overloaded": state.monitor.is_overloaded(),
        "snapshot": snapshot,
        "history": state.monitor.history(60).await,
    }))
}

async fn classifier_analytics(State(state): State<AppState>) -> Json<Value> {
    Json(state.classifier.analytics().await)
}

async fn classifier_training_data(State(state): State<AppState>) -> Json<Value> {
    Json(state.classifier.export_training_data().await)
}

async fn classifier_feedback(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let parse = || -> DirectorResult<(Uuid, Intent, f64, Intent, String)> {
        let task_id = payload
            .get("task_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| DirectorError::ValidationError {
                field: "task_id".to_string(),
                reason: "must be a task UUID".to_string(),
            })?;
        let predicted = payload
            .get("predicted_intent")
            .and_then(Value::as_str)
            .and_then(Intent::parse)
            .ok_or_else(|| DirectorError::ValidationError {
                field: "predicted_intent".to_string(),
                reason: "must be a known department".to_string(),
            })?;
        let actual = payload
            .get("actual_intent")
            .and_then(Value::as_str)
            .and_then(Intent::parse)
            .ok_or_else(|| DirectorError::ValidationError {
                field: "actual_intent".to_string(),
                reason: "must be a known department".to_string(),
            })?;
        let confidence = payload
            .get("predicted_confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let source = payload
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("manual")
            .to_string();
        Ok((task_id, predicted, confidence, actual, source))
    };

    let (task_id, predicted, confidence, actual, source) = match parse() {
        Ok(parsed) => parsed,
        Err(e) => return (error_status(&e), error_body(&e)),
    };

    match state
        .director
        .add_classification_feedback(task_id, predicted, confidence, actual, &source)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "success", "task_id": task_id})),
        ),
        Err(e) => (error_status(&e), error_body(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn builds_task_with_defaults() {
        let task =
            DirectorRequestExecutor::build_task(&json!({"type": "email"})).unwrap();
        assert_eq!(task.title, "Task: email");
        assert_eq!(task.task_type, TaskType::Email);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.input_data.is_empty());
    }

    #[test]
    fn builds_task_with_explicit_fields() {
        let task = DirectorRequestExecutor::build_task(&json!({
            "type": "analysis",
            "title": "Quarterly review",
            "description": "Look at the numbers",
            "priority": "critical",
            "args": {"quarter": "Q3"},
        }))
        .unwrap();
        assert_eq!(task.title, "Quarterly review");
        assert_eq!(task.priority, TaskPriority::Critical);
        assert_eq!(task.input_data["quarter"], "Q3");
    }

    #[test]
    fn rejects_payload_without_type() {
        assert!(DirectorRequestExecutor::build_task(&json!({"title": "x"})).is_err());
    }
}
