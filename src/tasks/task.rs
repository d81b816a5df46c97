use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::utils::error::{DirectorError, DirectorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition again within a run; only an
    /// explicit retry resets the task.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn parse(value: &str) -> DirectorResult<Self> {
        match value.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(DirectorError::InvalidEnumValue {
                field: "priority".to_string(),
                value: other.to_string(),
                expected: "low|medium|high|critical".to_string(),
            }),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Email,
    Communication,
    Analysis,
    Review,
    Research,
    Development,
    Other,
}

impl TaskType {
    /// Unknown type strings fall back to `Other` instead of failing; the
    /// classifier decides routing from the full text anyway.
    #[must_use]
    pub fn parse_lossy(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "email" => Self::Email,
            "communication" => Self::Communication,
            "analysis" => Self::Analysis,
            "review" => Self::Review,
            "research" => Self::Research,
            "development" => Self::Development,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Email => "email",
            Self::Communication => "communication",
            Self::Analysis => "analysis",
            Self::Review => "review",
            Self::Research => "research",
            Self::Development => "development",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

/// A unit of work flowing through the orchestration substrate.
///
/// Timing fields obey `created_at <= started_at <= completed_at` whenever
/// set; `queue_time` and `processing_time` are derived in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_agent_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub input_data: Map<String, Value>,
    pub output_data: Map<String, Value>,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Time spent waiting in queue, minutes.
    pub queue_time: Option<i64>,
    /// Time spent processing, minutes.
    pub processing_time: Option<i64>,
    pub estimated_duration: Option<i64>,
    pub actual_duration: Option<i64>,
    pub retry_count: u32,
    pub progress_percentage: u8,
    pub complexity_score: Option<u8>,
    pub quality_score: Option<f64>,
}

impl Task {
    #[must_use]
    pub fn new(title: String, description: String, task_type: TaskType) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description,
            task_type,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            assigned_agent_id: None,
            parent_task_id: None,
            input_data: Map::new(),
            output_data: Map::new(),
            error_details: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_activity: None,
            queue_time: None,
            processing_time: None,
            estimated_duration: None,
            actual_duration: None,
            retry_count: 0,
            progress_percentage: 0,
            complexity_score: None,
            quality_score: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_input(mut self, input_data: Map<String, Value>) -> Self {
        self.input_data = input_data;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_task_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    /// Assign the task to an agent. Only one agent may hold it at a time;
    /// re-assignment replaces the previous holder.
    pub fn assign_to_agent(&mut self, agent_id: Uuid) {
        self.assigned_agent_id = Some(agent_id);
        self.status = TaskStatus::Assigned;
        self.last_activity = Some(Utc::now());
    }

    /// Mark the task as in progress. First write wins on `started_at`;
    /// repeated calls only refresh `last_activity`.
    pub fn start_progress(&mut self) {
        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
            self.queue_time = Some((now - self.created_at).num_minutes());
        }
        self.status = TaskStatus::InProgress;
        self.last_activity = Some(now);
    }

    /// Mark the task completed with its output payload.
    pub fn complete(&mut self, output_data: Option<Map<String, Value>>) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.status = TaskStatus::Completed;
        self.progress_percentage = 100;

        if let Some(started) = self.started_at {
            let minutes = (now - started).num_minutes();
            self.processing_time = Some(minutes);
            self.actual_duration = Some(minutes);
        }

        if let Some(output) = output_data {
            self.output_data = output;
        }
        self.last_activity = Some(now);
    }

    /// Mark the task failed, recording the error and bumping the retry
    /// counter.
    pub fn fail(&mut self, error_details: Option<String>) {
        let now = Utc::now();
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.retry_count += 1;

        if let Some(details) = error_details {
            self.error_details = Some(details);
        }
        if let Some(started) = self.started_at {
            self.processing_time = Some((now - started).num_minutes());
        }
        self.last_activity = Some(now);
    }

    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.last_activity = self.completed_at;
    }

    /// Reset timing and error state ahead of an explicit retry. The retry
    /// counter is preserved; it only increases.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.error_details = None;
        self.processing_time = None;
        self.progress_percentage = 0;
        self.last_activity = Some(Utc::now());
    }

    /// A task can only start once assigned and once its parent (if any) has
    /// completed. The caller supplies the parent status, since the parent
    /// row lives in the repository.
    #[must_use]
    pub fn can_be_started(&self, parent_status: Option<TaskStatus>) -> bool {
        if self.status != TaskStatus::Assigned {
            return false;
        }
        match (self.parent_task_id, parent_status) {
            (Some(_), Some(status)) => status == TaskStatus::Completed,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Derived performance analytics for reporting.
    #[must_use]
    pub fn calculate_analytics(&self) -> Value {
        let time_efficiency = match (self.estimated_duration, self.actual_duration) {
            (Some(estimated), Some(actual)) if actual > 0 => {
                Some((estimated as f64 / actual as f64).min(1.0))
            }
            _ => None,
        };

        let queue_efficiency = match (self.queue_time, self.processing_time) {
            (Some(queued), Some(processed)) if queued + processed > 0 => {
                Some(processed as f64 / (queued + processed) as f64)
            }
            _ => None,
        };

        serde_json::json!({
            "completion_rate": self.progress_percentage,
            "time_efficiency": time_efficiency,
            "queue_efficiency": queue_efficiency,
            "status_transitions": self.retry_count,
            "quality_metrics": {
                "complexity_score": self.complexity_score,
                "quality_score": self.quality_score,
                "retry_rate": self.retry_count,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_task() -> Task {
        Task::new(
            "Send welcome email".to_string(),
            "Draft a welcome message for new user".to_string(),
            TaskType::Email,
        )
    }

    #[test]
    fn lifecycle_sets_timing_fields() {
        let mut task = sample_task();
        assert_eq!(task.status, TaskStatus::Pending);

        task.assign_to_agent(Uuid::new_v4());
        assert_eq!(task.status, TaskStatus::Assigned);

        task.start_progress();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.started_at.is_some());
        assert!(task.queue_time.is_some());

        task.complete(None);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress_percentage, 100);
        assert!(task.completed_at.is_some());
        assert!(task.processing_time.is_some());

        let (started, completed) = (task.started_at.unwrap(), task.completed_at.unwrap());
        assert!(task.created_at <= started);
        assert!(started <= completed);
    }

    #[test]
    fn started_at_first_write_wins() {
        let mut task = sample_task();
        task.start_progress();
        let first = task.started_at;
        let first_activity = task.last_activity;

        std::thread::sleep(std::time::Duration::from_millis(5));
        task.start_progress();
        assert_eq!(task.started_at, first);
        assert!(task.last_activity >= first_activity);
    }

    #[test]
    fn fail_increments_retry_count() {
        let mut task = sample_task();
        task.start_progress();
        task.fail(Some("handler exploded".to_string()));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error_details.as_deref(), Some("handler exploded"));

        task.reset_for_retry();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
        assert!(task.error_details.is_none());
        // retry_count only increases, never resets
        assert_eq!(task.retry_count, 1);
    }

    #[test]
    fn parent_gates_start() {
        let parent = sample_task();
        let mut child = sample_task().with_parent(parent.id);
        child.assign_to_agent(Uuid::new_v4());

        assert!(!child.can_be_started(Some(TaskStatus::InProgress)));
        assert!(!child.can_be_started(None));
        assert!(child.can_be_started(Some(TaskStatus::Completed)));
    }

    #[test]
    fn priority_parsing() {
        assert_eq!(TaskPriority::parse("HIGH").unwrap(), TaskPriority::High);
        assert!(TaskPriority::parse("urgent").is_err());
        assert_eq!(TaskType::parse_lossy("wibble"), TaskType::Other);
    }

    #[test]
    fn analytics_derive_efficiencies() {
        let mut task = sample_task();
        task.estimated_duration = Some(10);
        task.actual_duration = Some(20);
        task.queue_time = Some(5);
        task.processing_time = Some(15);

        let analytics = task.calculate_analytics();
        assert_eq!(analytics["time_efficiency"], 0.5);
        assert_eq!(analytics["queue_efficiency"], 0.75);
    }
}
