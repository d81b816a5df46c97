//! # Task Director
//!
//! A hierarchical task-orchestration service: HTTP requests are admitted
//! through a backpressured priority queue, classified by intent, and routed
//! by a single Director to department handlers, with an adaptive throttling
//! loop resizing the worker pools from live resource samples.
//!
//! ## Architecture Overview
//!
//! - [`queue`]: request admission, process groups, and the blackboard
//! - [`engine`]: the priority worker pool for asynchronous sub-tasks
//! - [`director`]: intent routing, strategy selection, and supervision
//! - [`classifier`]: keyword and LLM intent classification with feedback
//! - [`monitor`]: system resource sampling and health scoring
//! - [`throttling`]: adaptive concurrency control
//! - [`repository`]: task and agent persistence ports
//! - [`server`]: the axum HTTP surface

/// Agent model and the department handler contract
pub mod agents;
/// Intent classification with caching and feedback
pub mod classifier;
/// The Director orchestrator and routing strategies
pub mod director;
/// Asynchronous priority task engine
pub mod engine;
/// System resource monitoring
pub mod monitor;
/// Request admission queue, process groups, and blackboard
pub mod queue;
/// Persistence ports and implementations
pub mod repository;
/// HTTP routes and background task wiring
pub mod server;
/// Task model and lifecycle
pub mod tasks;
/// Adaptive throttling controller
pub mod throttling;
/// Configuration, validation, and error handling
pub mod utils;

pub use agents::{Agent, AgentRegistry, AgentStatus, AgentType, DepartmentHandler};
pub use classifier::{Intent, IntentClassifier};
pub use director::{Director, DirectorState};
pub use engine::{AsyncTaskEngine, EngineTask, QueuePriority};
pub use monitor::SystemResourceMonitor;
pub use queue::{Blackboard, RequestQueue, RequestType};
pub use repository::{InMemoryTaskRepository, SqliteTaskRepository, TaskRepository};
pub use tasks::{Task, TaskPriority, TaskStatus, TaskType};
pub use throttling::ThrottlingController;
pub use utils::{DirectorError, DirectorResult, OrchestratorConfig};

use std::sync::Arc;

/// Application state shared across HTTP handlers and background loops.
///
/// All process-wide mutable state hangs off this one value constructed at
/// startup; there are no module-level singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OrchestratorConfig>,
    pub director: Arc<Director>,
    pub queue: Arc<RequestQueue>,
    pub engine: Arc<AsyncTaskEngine>,
    pub throttling: Arc<ThrottlingController>,
    pub monitor: Arc<SystemResourceMonitor>,
    pub classifier: Arc<IntentClassifier>,
    pub repository: Arc<dyn TaskRepository>,
    pub blackboard: Arc<Blackboard>,
}
