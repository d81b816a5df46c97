use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{TaskFilter, TaskRepository};
use crate::agents::Agent;
use crate::tasks::Task;
use crate::utils::error::DirectorResult;

/// Repository backed by in-process maps. Suitable for tests and ephemeral
/// deployments where task history need not survive a restart.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<Uuid, Task>>,
    agents: RwLock<HashMap<Uuid, Agent>>,
}

impl InMemoryTaskRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save_task(&self, task: &Task) -> DirectorResult<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> DirectorResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: TaskFilter) -> DirectorResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|task| {
                filter.status.map_or(true, |s| task.status == s)
                    && filter.task_type.map_or(true, |t| task.task_type == t)
                    && filter
                        .assigned_agent_id
                        .map_or(true, |a| task.assigned_agent_id == Some(a))
            })
            .cloned()
            .collect();
        matched.sort_by_key(|task| task.created_at);
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn save_agent(&self, agent: &Agent) -> DirectorResult<()> {
        self.agents.write().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> DirectorResult<Option<Agent>> {
        Ok(self.agents.read().await.get(&id).cloned())
    }

    async fn list_agents(&self) -> DirectorResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by_key(|agent| agent.created_at);
        Ok(agents)
    }

    async fn ping(&self) -> DirectorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskStatus, TaskType};

    #[tokio::test]
    async fn save_and_filter_tasks() -> Result<(), Box<dyn std::error::Error>> {
        let repo = InMemoryTaskRepository::new();

        let mut email = Task::new("a".to_string(), String::new(), TaskType::Email);
        email.start_progress();
        repo.save_task(&email).await?;

        let review = Task::new("b".to_string(), String::new(), TaskType::Review);
        repo.save_task(&review).await?;

        let in_progress = repo
            .list_tasks(TaskFilter {
                status: Some(TaskStatus::InProgress),
                ..TaskFilter::default()
            })
            .await?;
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, email.id);

        let by_type = repo
            .list_tasks(TaskFilter {
                task_type: Some(TaskType::Review),
                ..TaskFilter::default()
            })
            .await?;
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].id, review.id);
        Ok(())
    }
}
