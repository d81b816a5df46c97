use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error types for the task-orchestration service.
///
/// Every component reports failures through this enum so callers can match
/// on the error kind instead of parsing message strings.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum DirectorError {
    /// Validation errors
    #[error("Invalid input: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Invalid enum value: {field}, value: {value}, expected: {expected}")]
    InvalidEnumValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Admission and capacity errors
    #[error("System overloaded: {reason}")]
    Overloaded { reason: String },

    #[error("Queue full: {queue_name}, capacity: {capacity}")]
    QueueFull { queue_name: String, capacity: usize },

    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    /// Timeout errors
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Task-related errors
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Task execution failed: {reason}")]
    TaskExecutionFailed { reason: String },

    #[error("Task cancelled: {id}")]
    TaskCancelled { id: String },

    /// Agent and handler errors
    #[error("Agent not found: {id}")]
    AgentNotFound { id: String },

    #[error("Handler error in {department}: {reason}")]
    HandlerError { department: String, reason: String },

    #[error("Handler unavailable: {department}")]
    HandlerUnavailable { department: String },

    #[error("Agent state transition failed: {from} -> {to}, reason: {reason}")]
    AgentStateTransitionFailed {
        from: String,
        to: String,
        reason: String,
    },

    /// Classification errors
    #[error("Classifier unavailable: {reason}")]
    ClassifierUnavailable { reason: String },

    /// Persistence errors
    #[error("Persistence error: {operation}, reason: {reason}")]
    PersistenceError { operation: String, reason: String },

    /// Configuration errors
    #[error("Configuration error: {reason}")]
    ConfigurationError { reason: String },

    /// Lifecycle errors
    #[error("Operation cancelled: {operation}")]
    OperationCancelled { operation: String },

    #[error("Invalid state for {operation}: {state}")]
    InvalidState { operation: String, state: String },

    /// Unexpected errors in orchestration code
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl DirectorError {
    /// Short machine-readable kind label, used for error-bucket metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } | Self::InvalidEnumValue { .. } => "validation",
            Self::Overloaded { .. } | Self::QueueFull { .. } | Self::ResourceExhausted { .. } => {
                "overloaded"
            }
            Self::Timeout { .. } => "timeout",
            Self::TaskNotFound { .. }
            | Self::TaskExecutionFailed { .. }
            | Self::TaskCancelled { .. } => "task",
            Self::AgentNotFound { .. }
            | Self::HandlerError { .. }
            | Self::HandlerUnavailable { .. }
            | Self::AgentStateTransitionFailed { .. } => "handler",
            Self::ClassifierUnavailable { .. } => "classifier",
            Self::PersistenceError { .. } => "persistence",
            Self::ConfigurationError { .. } => "configuration",
            Self::OperationCancelled { .. } | Self::InvalidState { .. } => "lifecycle",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether the caller may reasonably retry after backing off.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Overloaded { .. }
                | Self::QueueFull { .. }
                | Self::ResourceExhausted { .. }
                | Self::Timeout { .. }
                | Self::HandlerUnavailable { .. }
        )
    }
}

/// Convenience result type used throughout the crate.
pub type DirectorResult<T> = Result<T, DirectorError>;
