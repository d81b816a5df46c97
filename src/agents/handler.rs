//! Department handler port.
//!
//! Concrete departments (communications, analysis, automation, coordination)
//! live outside this crate; the Director only requires this contract.
//! `execute` must not fail at the transport level: every failure is reported
//! inside the returned envelope so the Director can apply its own retry and
//! fallback policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classifier::Intent;
use crate::tasks::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
    Success,
    Error,
}

/// Result envelope returned by every department handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub status: HandlerStatus,
    pub result: Map<String, Value>,
    pub error: Option<String>,
}

impl HandlerOutcome {
    #[must_use]
    pub fn success(result: Map<String, Value>) -> Self {
        Self {
            status: HandlerStatus::Success,
            result,
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HandlerStatus::Error,
            result: Map::new(),
            error: Some(message.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == HandlerStatus::Success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub success_rate: f64,
    pub status: String,
    pub capabilities: Vec<String>,
}

/// Contract every department implementation must satisfy. Implementations
/// must be safe under concurrent `execute` calls.
#[async_trait]
pub trait DepartmentHandler: Send + Sync {
    /// Handler display name, used in response envelopes.
    fn name(&self) -> &str;

    /// The intent this handler is registered under.
    fn department(&self) -> Intent;

    async fn is_available(&self) -> bool;

    async fn can_handle(&self, task: &Task) -> bool;

    async fn execute(&self, task: &Task) -> HandlerOutcome;

    async fn performance_metrics(&self) -> HandlerMetrics;
}

pub mod testing {
    //! Scriptable handlers for orchestration tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Handler that succeeds every time, recording call counts.
    pub struct StaticHandler {
        name: String,
        department: Intent,
        available: AtomicBool,
        calls: AtomicU64,
    }

    impl StaticHandler {
        #[must_use]
        pub fn new(name: &str, department: Intent) -> Self {
            Self {
                name: name.to_string(),
                department,
                available: AtomicBool::new(true),
                calls: AtomicU64::new(0),
            }
        }

        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        #[must_use]
        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DepartmentHandler for StaticHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn department(&self) -> Intent {
            self.department
        }

        async fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn can_handle(&self, _task: &Task) -> bool {
            true
        }

        async fn execute(&self, task: &Task) -> HandlerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut result = Map::new();
            result.insert(
                "message".to_string(),
                Value::String(format!("{} processed '{}'", self.name, task.title)),
            );
            result.insert(
                "department".to_string(),
                Value::String(self.department.to_string()),
            );
            HandlerOutcome::success(result)
        }

        async fn performance_metrics(&self) -> HandlerMetrics {
            let calls = self.calls.load(Ordering::SeqCst);
            HandlerMetrics {
                total_tasks: calls,
                completed_tasks: calls,
                success_rate: 1.0,
                status: "active".to_string(),
                capabilities: vec![self.department.to_string()],
            }
        }
    }

    /// Handler that fails a configured number of times before succeeding.
    pub struct FlakyHandler {
        name: String,
        department: Intent,
        failures_before_success: u64,
        calls: AtomicU64,
    }

    impl FlakyHandler {
        #[must_use]
        pub fn new(name: &str, department: Intent, failures_before_success: u64) -> Self {
            Self {
                name: name.to_string(),
                department,
                failures_before_success,
                calls: AtomicU64::new(0),
            }
        }

        #[must_use]
        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DepartmentHandler for FlakyHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn department(&self) -> Intent {
            self.department
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn can_handle(&self, _task: &Task) -> bool {
            true
        }

        async fn execute(&self, _task: &Task) -> HandlerOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                HandlerOutcome::error("transient failure")
            } else {
                let mut result = Map::new();
                result.insert(
                    "message".to_string(),
                    Value::String("succeeded after retry".to_string()),
                );
                HandlerOutcome::success(result)
            }
        }

        async fn performance_metrics(&self) -> HandlerMetrics {
            HandlerMetrics {
                total_tasks: self.calls.load(Ordering::SeqCst),
                completed_tasks: 0,
                success_rate: 0.0,
                status: "active".to_string(),
                capabilities: vec![self.department.to_string()],
            }
        }
    }
}
