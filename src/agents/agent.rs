//! Agent registry model.
//!
//! Agents are registered executors arranged in a tree: supervisors may own
//! children, everyone else is a leaf. Status transitions between idle,
//! active, and busy are free; leaving error or offline requires an explicit
//! recovery call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::utils::error::{DirectorError, DirectorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Supervisor,
    Coordinator,
    Worker,
    Specialist,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Supervisor => "supervisor",
            Self::Coordinator => "coordinator",
            Self::Worker => "worker",
            Self::Specialist => "specialist",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Error,
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Offline => "offline",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub description: Option<String>,
    pub capabilities: Vec<String>,
    pub parent_id: Option<Uuid>,
    pub tasks_completed: u64,
    pub success_rate: f64,
    pub average_response_time: f64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Agent {
    #[must_use]
    pub fn new(name: String, agent_type: AgentType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            agent_type,
            status: AgentStatus::Idle,
            description: None,
            capabilities: Vec::new(),
            parent_id: None,
            tasks_completed: 0,
            success_rate: 0.0,
            average_response_time: 0.0,
            created_at: now,
            last_active: now,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Transitions between idle, active, and busy are free; any move out of
    /// error or offline must go through [`Agent::recover`].
    pub fn set_status(&mut self, new_status: AgentStatus) -> DirectorResult<()> {
        let free = matches!(
            self.status,
            AgentStatus::Idle | AgentStatus::Active | AgentStatus::Busy
        );
        let entering_fault = matches!(new_status, AgentStatus::Error | AgentStatus::Offline);

        if !free && !entering_fault {
            return Err(DirectorError::AgentStateTransitionFailed {
                from: self.status.to_string(),
                to: new_status.to_string(),
                reason: "recovery required to leave a fault state".to_string(),
            });
        }

        self.status = new_status;
        self.last_active = Utc::now();
        Ok(())
    }

    /// Explicit recovery from error or offline back to idle.
    pub fn recover(&mut self) -> DirectorResult<()> {
        if !matches!(self.status, AgentStatus::Error | AgentStatus::Offline) {
            return Err(DirectorError::AgentStateTransitionFailed {
                from: self.status.to_string(),
                to: AgentStatus::Idle.to_string(),
                reason: "agent is not in a fault state".to_string(),
            });
        }
        self.status = AgentStatus::Idle;
        self.last_active = Utc::now();
        Ok(())
    }

    /// Fold one task outcome into the performance counters.
    pub fn record_task_result(&mut self, success: bool, response_time_secs: f64) {
        let previous = self.tasks_completed as f64;
        self.tasks_completed += 1;
        let total = self.tasks_completed as f64;

        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * previous + outcome) / total;
        self.average_response_time =
            (self.average_response_time * previous + response_time_secs) / total;
        self.last_active = Utc::now();
    }
}

/// In-memory registry enforcing the agent tree invariants: no parent
/// cycles, and only supervisors may register children.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<Uuid, Agent>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Agent) -> DirectorResult<Uuid> {
        if let Some(parent_id) = agent.parent_id {
            let parent =
                self.agents
                    .get(&parent_id)
                    .ok_or_else(|| DirectorError::AgentNotFound {
                        id: parent_id.to_string(),
                    })?;
            if parent.agent_type != AgentType::Supervisor {
                return Err(DirectorError::ValidationError {
                    field: "parent_id".to_string(),
                    reason: format!("agent {} is not a supervisor", parent.name),
                });
            }
            if self.would_create_cycle(agent.id, parent_id) {
                return Err(DirectorError::ValidationError {
                    field: "parent_id".to_string(),
                    reason: "parent chain would form a cycle".to_string(),
                });
            }
        }
        let id = agent.id;
        self.agents.insert(id, agent);
        Ok(id)
    }

    fn would_create_cycle(&self, child_id: Uuid, mut parent_id: Uuid) -> bool {
        loop {
            if parent_id == child_id {
                return true;
            }
            match self.agents.get(&parent_id).and_then(|a| a.parent_id) {
                Some(next) => parent_id = next,
                None => return false,
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    #[must_use]
    pub fn all(&self) -> Vec<&Agent> {
        self.agents.values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_transitions_between_working_states() {
        let mut agent = Agent::new("Worker-1".to_string(), AgentType::Worker);
        assert!(agent.set_status(AgentStatus::Active).is_ok());
        assert!(agent.set_status(AgentStatus::Busy).is_ok());
        assert!(agent.set_status(AgentStatus::Idle).is_ok());
    }

    #[test]
    fn fault_states_require_recovery() {
        let mut agent = Agent::new("Worker-1".to_string(), AgentType::Worker);
        agent.set_status(AgentStatus::Error).unwrap();

        assert!(agent.set_status(AgentStatus::Active).is_err());
        assert!(agent.recover().is_ok());
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.recover().is_err());
    }

    #[test]
    fn only_supervisors_take_children() {
        let mut registry = AgentRegistry::new();
        let worker = Agent::new("Worker-1".to_string(), AgentType::Worker);
        let worker_id = registry.register(worker).unwrap();

        let mut child = Agent::new("Child".to_string(), AgentType::Worker);
        child.parent_id = Some(worker_id);
        assert!(registry.register(child).is_err());

        let supervisor = Agent::new("Super".to_string(), AgentType::Supervisor);
        let supervisor_id = registry.register(supervisor).unwrap();
        let mut child = Agent::new("Child".to_string(), AgentType::Worker);
        child.parent_id = Some(supervisor_id);
        assert!(registry.register(child).is_ok());
    }

    #[test]
    fn parent_cycles_rejected() {
        let mut registry = AgentRegistry::new();
        let root = Agent::new("Root".to_string(), AgentType::Supervisor);
        let root_id = registry.register(root).unwrap();

        let mut mid = Agent::new("Mid".to_string(), AgentType::Supervisor);
        mid.parent_id = Some(root_id);
        let mid_id = registry.register(mid).unwrap();

        // Re-pointing the root under its own descendant must fail.
        let mut looped = registry.get(&root_id).cloned().unwrap();
        looped.parent_id = Some(mid_id);
        assert!(registry.register(looped).is_err());
    }

    #[test]
    fn performance_counters_average() {
        let mut agent = Agent::new("Worker-1".to_string(), AgentType::Worker);
        agent.record_task_result(true, 2.0);
        agent.record_task_result(false, 4.0);

        assert_eq!(agent.tasks_completed, 2);
        assert!((agent.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((agent.average_response_time - 3.0).abs() < f64::EPSILON);
    }
}
