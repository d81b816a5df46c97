//! Task and agent persistence port.
//!
//! The orchestration core only requires single-row atomicity: status and
//! timing updates for one task are saved together. The sqlite
//! implementation backs production; the in-memory one backs tests and
//! ephemeral deployments.

/// In-memory repository for tests and ephemeral use
pub mod memory;
/// rusqlite-backed repository
pub mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::agents::Agent;
use crate::tasks::{Task, TaskStatus, TaskType};
use crate::utils::error::DirectorResult;

pub use memory::InMemoryTaskRepository;
pub use sqlite::SqliteTaskRepository;

/// Filters for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub assigned_agent_id: Option<Uuid>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a task row; status and timing fields land atomically.
    async fn save_task(&self, task: &Task) -> DirectorResult<()>;

    async fn get_task(&self, id: Uuid) -> DirectorResult<Option<Task>>;

    async fn list_tasks(&self, filter: TaskFilter) -> DirectorResult<Vec<Task>>;

    async fn save_agent(&self, agent: &Agent) -> DirectorResult<()>;

    async fn get_agent(&self, id: Uuid) -> DirectorResult<Option<Agent>>;

    async fn list_agents(&self) -> DirectorResult<Vec<Agent>>;

    /// Connectivity probe for health checks.
    async fn ping(&self) -> DirectorResult<()>;
}
