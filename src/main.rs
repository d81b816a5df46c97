//! Server entry point: load configuration, wire the orchestrator, serve.

use std::sync::Arc;

use tracing::{info, Level};

use task_director::classifier::{HttpClassifier, Intent, IntentClassifier};
use task_director::director::Director;
use task_director::engine::AsyncTaskEngine;
use task_director::monitor::SystemResourceMonitor;
use task_director::queue::{Blackboard, RequestQueue};
use task_director::repository::{SqliteTaskRepository, TaskRepository};
use task_director::server::{self, DirectorRequestExecutor};
use task_director::throttling::ThrottlingController;
use task_director::utils::config::OrchestratorConfig;
use task_director::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(OrchestratorConfig::load().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    }));

    let log_level = match config.logging.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(false)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting task director");

    let repository: Arc<dyn TaskRepository> =
        Arc::new(SqliteTaskRepository::open(&config.database.url)?);

    let fallback =
        Intent::parse(&config.director.fallback_department).unwrap_or(Intent::Coordination);
    let mut classifier = IntentClassifier::new(config.classifier.clone(), fallback);
    if config.classifier.enable_llm {
        if let Some(endpoint) = config.classifier.llm_endpoint.clone() {
            classifier = classifier.with_llm(Arc::new(HttpClassifier::new(
                endpoint,
                config.classifier.llm_api_key.clone(),
                config.classifier.llm_model.clone(),
            )));
        }
    }
    let classifier = Arc::new(classifier);

    let director = Arc::new(Director::new(
        config.director.clone(),
        Arc::clone(&classifier),
        Arc::clone(&repository),
    ));
    // Department handlers are external collaborators; deployments register
    // them before serving. With none registered the Director handles every
    // task directly.
    director.initialize(Vec::new()).await?;

    let engine = Arc::new(AsyncTaskEngine::new(config.engine.clone()));
    engine.start().await?;

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

    let monitor = Arc::new(SystemResourceMonitor::new(config.monitor.clone()));
    let throttling = Arc::new(
        ThrottlingController::new(config.throttling.clone(), Arc::clone(&monitor))
            .with_queue(Arc::clone(&queue))
            .with_engine(Arc::clone(&engine)),
    );

    let state = AppState {
        config: Arc::clone(&config),
        director,
        queue,
        engine,
        throttling,
        monitor,
        classifier,
        repository,
        blackboard,
    };

    server::start_background_tasks(&state);
    let router = server::create_router(state);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}
