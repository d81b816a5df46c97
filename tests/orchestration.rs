//! End-to-end orchestration scenarios driven through the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use task_director::agents::handler::testing::{FlakyHandler, StaticHandler};
use task_director::agents::DepartmentHandler;
use task_director::classifier::{Intent, IntentClassifier};
use task_director::director::Director;
use task_director::engine::AsyncTaskEngine;
use task_director::monitor::{synthetic_snapshot, SystemResourceMonitor};
use task_director::queue::{Blackboard, RequestQueue};
use task_director::repository::{InMemoryTaskRepository, TaskRepository};
use task_director::server::{self, DirectorRequestExecutor};
use task_director::tasks::TaskStatus;
use task_director::throttling::ThrottlingController;
use task_director::utils::config::OrchestratorConfig;
use task_director::AppState;

async fn build_app(handlers: Vec<Arc<dyn DepartmentHandler>>) -> (Router, AppState) {
    build_app_with_config(handlers, OrchestratorConfig::default()).await
}

async fn build_app_with_config(
    handlers: Vec<Arc<dyn DepartmentHandler>>,
    mut config: OrchestratorConfig,
) -> (Router, AppState) {
    config.queue.request_timeout_secs = 10;
    let config = Arc::new(config);

    let repository: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
    let classifier = Arc::new(IntentClassifier::new(
        config.classifier.clone(),
        Intent::Coordination,
    ));
    let director = Arc::new(Director::new(
        config.director.clone(),
        Arc::clone(&classifier),
        Arc::clone(&repository),
    ));
    director.initialize(handlers).await.unwrap();

    let engine = Arc::new(AsyncTaskEngine::new(config.engine.clone()));
    engine.start().await.unwrap();

    let blackboard = Arc::new(Blackboard::new());
    let executor = Arc::new(
        DirectorRequestExecutor::new(Arc::clone(&director), Arc::clone(&repository))
            .with_engine(Arc::clone(&engine)),
    );
    let queue = Arc::new(RequestQueue::new(
        config.queue.clone(),
        executor,
        Arc::clone(&blackboard),
    ));
    queue.start().await;

    let monitor = Arc::new(SystemResourceMonitor::with_sampler(
        config.monitor.clone(),
        Arc::new(|| synthetic_snapshot(10.0, 10.0, 10.0)),
    ));
    let throttling = Arc::new(
        ThrottlingController::new(config.throttling.clone(), Arc::clone(&monitor))
            .with_queue(Arc::clone(&queue))
            .with_engine(Arc::clone(&engine)),
    );

    let state = AppState {
        config,
        director,
        queue,
        engine,
        throttling,
        monitor,
        classifier,
        repository,
        blackboard,
    };
    (server::create_router(state.clone()), state)
}

async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn email_task_routes_to_communications() {
    let comms = Arc::new(StaticHandler::new("CommsDept", Intent::Communications));
    let (router, state) =
        build_app(vec![Arc::clone(&comms) as Arc<dyn DepartmentHandler>]).await;

    let (status, body) = post_json(
        &router,
        "/task",
        json!({
            "type": "email",
            "title": "Send welcome email",
            "description": "Draft a welcome message for new user",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["routing_result"]["status"], "success");
    assert_eq!(body["routing_result"]["routed_to"], "communications");
    assert_eq!(body["routing_result"]["agent_name"], "CommsDept");
    assert!(body["task_id"]
        .as_str()
        .unwrap()
        .starts_with("task_"));

    // The task row reflects completion.
    let task_id = Uuid::parse_str(body["task_details"]["id"].as_str().unwrap()).unwrap();
    let task = state.repository.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress_percentage, 100);
    assert!(task.created_at <= task.started_at.unwrap());
    assert!(task.started_at.unwrap() <= task.completed_at.unwrap());

    state.queue.shutdown(Duration::from_secs(1)).await;
    state.engine.shutdown().await;
}

#[tokio::test]
async fn unknown_type_falls_back_to_direct_coordination() {
    let (router, state) = build_app(vec![]).await;

    let (status, body) = post_json(
        &router,
        "/task",
        json!({"type": "wibble", "title": "Do the thing"}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["routing_result"]["status"], "handled_directly");
    assert_eq!(body["routing_result"]["department"], "coordination");

    state.queue.shutdown(Duration::from_secs(1)).await;
    state.engine.shutdown().await;
}

#[tokio::test]
async fn missing_type_is_a_bad_request() {
    let (router, state) = build_app(vec![]).await;

    let (status, body) = post_json(&router, "/task", json!({"title": "No type"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = post_json(
        &router,
        "/task",
        json!({"type": "email", "priority": "urgent"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    state.queue.shutdown(Duration::from_secs(1)).await;
    state.engine.shutdown().await;
}

#[tokio::test]
async fn flaky_handler_retries_to_success() {
    let flaky = Arc::new(FlakyHandler::new("CommsDept", Intent::Communications, 1));
    let mut config = OrchestratorConfig::default();
    config.director.max_retries = 1;
    let (router, state) = build_app_with_config(
        vec![Arc::clone(&flaky) as Arc<dyn DepartmentHandler>],
        config,
    )
    .await;

    let (status, body) = post_json(
        &router,
        "/task",
        json!({
            "type": "email",
            "title": "Send welcome email",
            "description": "Draft a welcome message for new user",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["routing_result"]["status"], "success");
    assert_eq!(flaky.calls(), 2);

    let task_id = Uuid::parse_str(body["task_details"]["id"].as_str().unwrap()).unwrap();
    let task = state.repository.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.status, TaskStatus::Completed);

    state.queue.shutdown(Duration::from_secs(1)).await;
    state.engine.shutdown().await;
}

#[tokio::test]
async fn feedback_endpoint_corrects_classification() {
    let (router, state) = build_app(vec![]).await;

    let (status, body) = post_json(
        &router,
        "/task",
        json!({
            "type": "review",
            "title": "Review quarterly numbers",
            "description": "Review the quarterly report",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let task_id = body["task_details"]["id"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &router,
        "/api/classifier/feedback",
        json!({
            "task_id": task_id,
            "predicted_intent": "analysis",
            "predicted_confidence": 0.8,
            "actual_intent": "coordination",
            "source": "manual",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, analytics) = get_json(&router, "/api/classifier/analytics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(analytics["total_feedback"], 1);
    assert_eq!(analytics["accuracy"], 0.0);
    // The correction landed as a new coordination training example.
    assert_eq!(analytics["training_examples"]["coordination"], 13);

    state.queue.shutdown(Duration::from_secs(1)).await;
    state.engine.shutdown().await;
}

#[tokio::test]
async fn health_and_status_endpoints_respond() {
    let (router, state) = build_app(vec![]).await;

    let (status, body) = get_json(&router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = get_json(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");

    let (status, body) = get_json(&router, "/api/queue/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert_eq!(body["backpressure_active"], false);

    let (status, body) = get_json(&router, "/api/director/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active");

    let (status, body) = get_json(&router, "/api/monitor/resources").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["health_score"].as_f64().unwrap() > 80.0);

    state.queue.shutdown(Duration::from_secs(1)).await;
    state.engine.shutdown().await;
}

#[tokio::test]
async fn throttling_cycle_reaches_queue_and_engine() {
    let (_, state) = build_app(vec![]).await;

    // A synthetic idle system with an empty queue drifts the controller's
    // limit down by one step per cycle, and the applied value lands on both
    // the queue and the engine.
    let before = state.throttling.current_concurrency().await;
    state.throttling.run_cycle().await;
    let after = state.throttling.current_concurrency().await;
    assert!(before.abs_diff(after) <= 2);
    assert_eq!(state.queue.current_concurrency_limit(), after);
    assert_eq!(state.engine.current_concurrency_limit(), after);

    state.queue.shutdown(Duration::from_secs(1)).await;
    state.engine.shutdown().await;
}

#[tokio::test]
async fn queue_metrics_track_processed_requests() {
    let (router, state) = build_app(vec![]).await;

    for _ in 0..3 {
        let (status, _) = post_json(
            &router,
            "/task",
            json!({"type": "other", "title": "Task"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let queue_status = state.queue.status().await;
    assert_eq!(queue_status["metrics"]["total_requests"], 3);
    assert_eq!(queue_status["metrics"]["requests_processed"], 3);
    assert_eq!(
        queue_status["process_groups"]["task_processing"]["total_processed"],
        3
    );

    let director_metrics = state.director.metrics_snapshot().await;
    assert_eq!(director_metrics.tasks_processed, 3);

    state.queue.shutdown(Duration::from_secs(1)).await;
    state.engine.shutdown().await;
}
