//! rusqlite-backed repository.
//!
//! Statements are short single-row operations executed under a connection
//! mutex. Schema creation on open is idempotent; deployments that manage
//! schema externally simply open an already-initialized file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde_json::Map;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{TaskFilter, TaskRepository};
use crate::agents::{Agent, AgentStatus, AgentType};
use crate::tasks::{Task, TaskPriority, TaskStatus, TaskType};
use crate::utils::error::{DirectorError, DirectorResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    task_type TEXT NOT NULL,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    assigned_agent_id TEXT,
    parent_task_id TEXT,
    input_data TEXT NOT NULL DEFAULT '{}',
    output_data TEXT NOT NULL DEFAULT '{}',
    error_details TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    last_activity TEXT,
    queue_time INTEGER,
    processing_time INTEGER,
    estimated_duration INTEGER,
    actual_duration INTEGER,
    retry_count INTEGER NOT NULL DEFAULT 0,
    progress_percentage INTEGER NOT NULL DEFAULT 0,
    complexity_score INTEGER,
    quality_score REAL
);
CREATE INDEX IF NOT EXISTS idx_task_status_created ON tasks(status, created_at);
CREATE INDEX IF NOT EXISTS idx_task_type_priority ON tasks(task_type, priority);
CREATE INDEX IF NOT EXISTS idx_task_assigned_agent ON tasks(assigned_agent_id);
CREATE INDEX IF NOT EXISTS idx_task_completed_at ON tasks(completed_at);

CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    agent_type TEXT NOT NULL,
    status TEXT NOT NULL,
    description TEXT,
    capabilities TEXT NOT NULL DEFAULT '[]',
    parent_id TEXT,
    tasks_completed INTEGER NOT NULL DEFAULT 0,
    success_rate REAL NOT NULL DEFAULT 0,
    average_response_time REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_active TEXT NOT NULL
);
";

/// Repository persisting tasks and agents to a sqlite database.
pub struct SqliteTaskRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskRepository {
    /// Open (and initialize) a database at the given path. Pass `:memory:`
    /// for an ephemeral database.
    pub fn open<P: AsRef<Path>>(path: P) -> DirectorResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            DirectorError::PersistenceError {
                operation: "open".to_string(),
                reason: e.to_string(),
            }
        })?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| DirectorError::PersistenceError {
                operation: "schema".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T, F>(&self, operation: &'static str, f: F) -> DirectorResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| DirectorError::PersistenceError {
                operation: operation.to_string(),
                reason: "connection mutex poisoned".to_string(),
            })?;
        f(&conn).map_err(|e| DirectorError::PersistenceError {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
        let parse_json = |text: String| -> Map<String, serde_json::Value> {
            serde_json::from_str(&text).unwrap_or_default()
        };
        let parse_uuid = |text: Option<String>| text.and_then(|t| Uuid::parse_str(&t).ok());
        let parse_time = |text: Option<String>| -> Option<DateTime<Utc>> {
            text.and_then(|t| t.parse().ok())
        };

        Ok(Task {
            id: Uuid::parse_str(&row.get::<_, String>("id")?).unwrap_or_else(|_| Uuid::nil()),
            title: row.get("title")?,
            description: row.get("description")?,
            task_type: TaskType::parse_lossy(&row.get::<_, String>("task_type")?),
            status: parse_status(&row.get::<_, String>("status")?),
            priority: TaskPriority::parse(&row.get::<_, String>("priority")?)
                .unwrap_or(TaskPriority::Medium),
            assigned_agent_id: parse_uuid(row.get("assigned_agent_id")?),
            parent_task_id: parse_uuid(row.get("parent_task_id")?),
            input_data: parse_json(row.get("input_data")?),
            output_data: parse_json(row.get("output_data")?),
            error_details: row.get("error_details")?,
            created_at: row
                .get::<_, String>("created_at")?
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            started_at: parse_time(row.get("started_at")?),
            completed_at: parse_time(row.get("completed_at")?),
            last_activity: parse_time(row.get("last_activity")?),
            queue_time: row.get("queue_time")?,
            processing_time: row.get("processing_time")?,
            estimated_duration: row.get("estimated_duration")?,
            actual_duration: row.get("actual_duration")?,
            retry_count: row.get("retry_count")?,
            progress_percentage: row.get("progress_percentage")?,
            complexity_score: row.get("complexity_score")?,
            quality_score: row.get("quality_score")?,
        })
    }

    fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
        Ok(Agent {
            id: Uuid::parse_str(&row.get::<_, String>("id")?).unwrap_or_else(|_| Uuid::nil()),
            name: row.get("name")?,
            agent_type: parse_agent_type(&row.get::<_, String>("agent_type")?),
            status: parse_agent_status(&row.get::<_, String>("status")?),
            description: row.get("description")?,
            capabilities: serde_json::from_str(&row.get::<_, String>("capabilities")?)
                .unwrap_or_default(),
            parent_id: row
                .get::<_, Option<String>>("parent_id")?
                .and_then(|t| Uuid::parse_str(&t).ok()),
            tasks_completed: row.get::<_, i64>("tasks_completed")?.max(0) as u64,
            success_rate: row.get("success_rate")?,
            average_response_time: row.get("average_response_time")?,
            created_at: row
                .get::<_, String>("created_at")?
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            last_active: row
                .get::<_, String>("last_active")?
                .parse()
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

fn parse_status(value: &str) -> TaskStatus {
    match value {
        "assigned" => TaskStatus::Assigned,
        "in_progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        _ => TaskStatus::Pending,
    }
}

fn parse_agent_type(value: &str) -> AgentType {
    match value {
        "supervisor" => AgentType::Supervisor,
        "coordinator" => AgentType::Coordinator,
        "specialist" => AgentType::Specialist,
        _ => AgentType::Worker,
    }
}

fn parse_agent_status(value: &str) -> AgentStatus {
    match value {
        "active" => AgentStatus::Active,
        "busy" => AgentStatus::Busy,
        "error" => AgentStatus::Error,
        "offline" => AgentStatus::Offline,
        _ => AgentStatus::Idle,
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn save_task(&self, task: &Task) -> DirectorResult<()> {
        let input_data = serde_json::to_string(&task.input_data).unwrap_or_else(|_| "{}".into());
        let output_data = serde_json::to_string(&task.output_data).unwrap_or_else(|_| "{}".into());
        self.with_conn("save_task", |conn| {
            conn.execute(
                "INSERT INTO tasks (
                    id, title, description, task_type, status, priority,
                    assigned_agent_id, parent_task_id, input_data, output_data,
                    error_details, created_at, started_at, completed_at,
                    last_activity, queue_time, processing_time,
                    estimated_duration, actual_duration, retry_count,
                    progress_percentage, complexity_score, quality_score
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                    ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
                 )
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    task_type = excluded.task_type,
                    status = excluded.status,
                    priority = excluded.priority,
                    assigned_agent_id = excluded.assigned_agent_id,
                    parent_task_id = excluded.parent_task_id,
                    input_data = excluded.input_data,
                    output_data = excluded.output_data,
                    error_details = excluded.error_details,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at,
                    last_activity = excluded.last_activity,
                    queue_time = excluded.queue_time,
                    processing_time = excluded.processing_time,
                    estimated_duration = excluded.estimated_duration,
                    actual_duration = excluded.actual_duration,
                    retry_count = excluded.retry_count,
                    progress_percentage = excluded.progress_percentage,
                    complexity_score = excluded.complexity_score,
                    quality_score = excluded.quality_score",
                params![
                    task.id.to_string(),
                    task.title,
                    task.description,
                    task.task_type.to_string(),
                    task.status.to_string(),
                    task.priority.to_string(),
                    task.assigned_agent_id.map(|id| id.to_string()),
                    task.parent_task_id.map(|id| id.to_string()),
                    input_data,
                    output_data,
                    task.error_details,
                    task.created_at.to_rfc3339(),
                    task.started_at.map(|t| t.to_rfc3339()),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    task.last_activity.map(|t| t.to_rfc3339()),
                    task.queue_time,
                    task.processing_time,
                    task.estimated_duration,
                    task.actual_duration,
                    task.retry_count,
                    task.progress_percentage,
                    task.complexity_score,
                    task.quality_score,
                ],
            )?;
            Ok(())
        })
    }

    async fn get_task(&self, id: Uuid) -> DirectorResult<Option<Task>> {
        self.with_conn("get_task", |conn| {
            let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![id.to_string()], Self::task_from_row)?;
            rows.next().transpose()
        })
    }

    async fn list_tasks(&self, filter: TaskFilter) -> DirectorResult<Vec<Task>> {
        self.with_conn("list_tasks", move |conn| {
            let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
            let mut args: Vec<String> = Vec::new();
            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                args.push(status.to_string());
            }
            if let Some(task_type) = filter.task_type {
                sql.push_str(" AND task_type = ?");
                args.push(task_type.to_string());
            }
            if let Some(agent_id) = filter.assigned_agent_id {
                sql.push_str(" AND assigned_agent_id = ?");
                args.push(agent_id.to_string());
            }
            sql.push_str(" ORDER BY created_at");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter()),
                Self::task_from_row,
            )?;
            rows.collect()
        })
    }

    async fn save_agent(&self, agent: &Agent) -> DirectorResult<()> {
        let capabilities =
            serde_json::to_string(&agent.capabilities).unwrap_or_else(|_| "[]".into());
        self.with_conn("save_agent", |conn| {
            conn.execute(
                "INSERT INTO agents (
                    id, name, agent_type, status, description, capabilities,
                    parent_id, tasks_completed, success_rate,
                    average_response_time, created_at, last_active
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    agent_type = excluded.agent_type,
                    status = excluded.status,
                    description = excluded.description,
                    capabilities = excluded.capabilities,
                    parent_id = excluded.parent_id,
                    tasks_completed = excluded.tasks_completed,
                    success_rate = excluded.success_rate,
                    average_response_time = excluded.average_response_time,
                    last_active = excluded.last_active",
                params![
                    agent.id.to_string(),
                    agent.name,
                    agent.agent_type.to_string(),
                    agent.status.to_string(),
                    agent.description,
                    capabilities,
                    agent.parent_id.map(|id| id.to_string()),
                    agent.tasks_completed as i64,
                    agent.success_rate,
                    agent.average_response_time,
                    agent.created_at.to_rfc3339(),
                    agent.last_active.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    async fn get_agent(&self, id: Uuid) -> DirectorResult<Option<Agent>> {
        self.with_conn("get_agent", |conn| {
            let mut stmt = conn.prepare("SELECT * FROM agents WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![id.to_string()], Self::agent_from_row)?;
            rows.next().transpose()
        })
    }

    async fn list_agents(&self) -> DirectorResult<Vec<Agent>> {
        self.with_conn("list_agents", |conn| {
            let mut stmt = conn.prepare("SELECT * FROM agents ORDER BY created_at")?;
            let rows = stmt.query_map([], Self::agent_from_row)?;
            rows.collect()
        })
    }

    async fn ping(&self) -> DirectorResult<()> {
        self.with_conn("ping", |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskType;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn task_round_trip_preserves_lifecycle_fields(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let repo = SqliteTaskRepository::open(dir.path().join("tasks.db"))?;

        let mut task = Task::new(
            "Send welcome email".to_string(),
            "Draft a welcome message".to_string(),
            TaskType::Email,
        );
        task.input_data.insert(
            "recipient".to_string(),
            serde_json::Value::String("user@example.com".to_string()),
        );
        task.start_progress();
        task.complete(None);
        repo.save_task(&task).await?;

        let loaded = repo.get_task(task.id).await?.unwrap();
        assert_eq!(loaded.title, task.title);
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.progress_percentage, 100);
        assert_eq!(loaded.input_data["recipient"], "user@example.com");
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_by_status_and_type() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let repo = SqliteTaskRepository::open(dir.path().join("tasks.db"))?;

        let pending = Task::new("a".to_string(), String::new(), TaskType::Analysis);
        repo.save_task(&pending).await?;

        let mut done = Task::new("b".to_string(), String::new(), TaskType::Email);
        done.start_progress();
        done.complete(None);
        repo.save_task(&done).await?;

        let completed = repo
            .list_tasks(TaskFilter {
                status: Some(TaskStatus::Completed),
                ..TaskFilter::default()
            })
            .await?;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done.id);

        let analysis = repo
            .list_tasks(TaskFilter {
                task_type: Some(TaskType::Analysis),
                ..TaskFilter::default()
            })
            .await?;
        assert_eq!(analysis.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn agent_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let repo = SqliteTaskRepository::open(dir.path().join("tasks.db"))?;

        let mut agent = Agent::new("CommsDept".to_string(), AgentType::Supervisor)
            .with_capabilities(vec!["communications".to_string()]);
        agent.record_task_result(true, 1.5);
        repo.save_agent(&agent).await?;

        let loaded = repo.get_agent(agent.id).await?.unwrap();
        assert_eq!(loaded.name, "CommsDept");
        assert_eq!(loaded.agent_type, AgentType::Supervisor);
        assert_eq!(loaded.tasks_completed, 1);

        repo.ping().await?;
        Ok(())
    }
}
