//! Process-group isolation for the request queue.
//!
//! Each request type is pinned to exactly one named group, and each group
//! carries its own worker cap. Slots are counted semaphores: acquiring
//! returns an owned permit whose drop releases the slot, so acquire and
//! release cannot get out of step.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use super::request_queue::RequestType;

struct GroupState {
    max_workers: usize,
    slots: Arc<Semaphore>,
    total_processed: u64,
    total_failed: u64,
}

/// Manages per-group worker caps and utilization accounting.
pub struct ProcessGroupManager {
    groups: Mutex<HashMap<&'static str, GroupState>>,
}

impl Default for ProcessGroupManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessGroupManager {
    #[must_use]
    pub fn new() -> Self {
        let mut groups = HashMap::new();
        for (name, max_workers) in [
            ("task_processing", 8),
            ("agent_operations", 4),
            ("analytics", 3),
            ("streaming", 6),
            ("general", 4),
        ] {
            groups.insert(
                name,
                GroupState {
                    max_workers,
                    slots: Arc::new(Semaphore::new(max_workers)),
                    total_processed: 0,
                    total_failed: 0,
                },
            );
        }
        Self {
            groups: Mutex::new(groups),
        }
    }

    /// Every request type maps to exactly one group.
    #[must_use]
    pub fn group_for(request_type: RequestType) -> &'static str {
        match request_type {
            RequestType::TaskSubmission => "task_processing",
            RequestType::AgentOperation => "agent_operations",
            RequestType::AnalyticsQuery => "analytics",
            RequestType::StreamingRequest => "streaming",
            RequestType::HealthCheck | RequestType::ApiCall => "general",
        }
    }

    /// Try to take a worker slot. `None` means the group is saturated and
    /// the caller should re-queue the request.
    pub async fn try_acquire(&self, group: &str) -> Option<OwnedSemaphorePermit> {
        let groups = self.groups.lock().await;
        let state = groups.get(group)?;
        Arc::clone(&state.slots).try_acquire_owned().ok()
    }

    /// Fold one finished request into the group counters. The slot itself is
    /// freed by dropping the permit.
    pub async fn record_outcome(&self, group: &str, success: bool) {
        let mut groups = self.groups.lock().await;
        if let Some(state) = groups.get_mut(group) {
            if success {
                state.total_processed += 1;
            } else {
                state.total_failed += 1;
            }
        }
    }

    /// Per-group utilization and outcome counters.
    pub async fn status(&self) -> Value {
        let groups = self.groups.lock().await;
        let mut status = serde_json::Map::new();
        for (name, state) in groups.iter() {
            let active = state.max_workers - state.slots.available_permits();
            let handled = state.total_processed + state.total_failed;
            status.insert(
                (*name).to_string(),
                json!({
                    "active_workers": active,
                    "max_workers": state.max_workers,
                    "utilization": active as f64 / state.max_workers as f64,
                    "total_processed": state.total_processed,
                    "total_failed": state.total_failed,
                    "success_rate": state.total_processed as f64 / handled.max(1) as f64,
                }),
            );
        }
        Value::Object(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_types_pin_to_groups() {
        assert_eq!(
            ProcessGroupManager::group_for(RequestType::TaskSubmission),
            "task_processing"
        );
        assert_eq!(
            ProcessGroupManager::group_for(RequestType::HealthCheck),
            "general"
        );
        assert_eq!(
            ProcessGroupManager::group_for(RequestType::AnalyticsQuery),
            "analytics"
        );
    }

    #[tokio::test]
    async fn saturated_group_refuses_slots() {
        let manager = ProcessGroupManager::new();

        // Analytics caps at 3 workers.
        let mut permits = Vec::new();
        for _ in 0..3 {
            permits.push(manager.try_acquire("analytics").await.unwrap());
        }
        assert!(manager.try_acquire("analytics").await.is_none());

        // Dropping a permit frees the slot atomically.
        permits.pop();
        assert!(manager.try_acquire("analytics").await.is_some());
    }

    #[tokio::test]
    async fn status_tracks_outcomes() {
        let manager = ProcessGroupManager::new();
        manager.record_outcome("general", true).await;
        manager.record_outcome("general", false).await;

        let status = manager.status().await;
        assert_eq!(status["general"]["total_processed"], 1);
        assert_eq!(status["general"]["total_failed"], 1);
        assert_eq!(status["general"]["success_rate"], 0.5);
    }
}
