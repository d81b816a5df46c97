//! Shared coordination blackboard.
//!
//! A thread-safe key/value map used by the queue, the Director, and the
//! throttling controller to publish live state. Change events go out over a
//! broadcast channel instead of callbacks, so no subscriber code ever runs
//! inside the writer's critical section. Nothing here survives a restart.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

/// One change notification. `old` is `None` for a fresh key.
#[derive(Debug, Clone)]
pub struct BlackboardEvent {
    pub key: String,
    pub old: Option<Value>,
    pub new: Value,
}

pub struct Blackboard {
    data: RwLock<HashMap<String, Value>>,
    events: broadcast::Sender<BlackboardEvent>,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Blackboard {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            data: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Write a value. Subscribers are notified only when the value actually
    /// changed.
    pub async fn write(&self, key: &str, value: Value) {
        let old = {
            let mut data = self.data.write().await;
            data.insert(key.to_string(), value.clone())
        };

        if old.as_ref() != Some(&value) {
            trace!(key, "blackboard updated");
            // Send fails only when nobody is listening, which is fine.
            let _ = self.events.send(BlackboardEvent {
                key: key.to_string(),
                old,
                new: value,
            });
        }
    }

    pub async fn read(&self, key: &str) -> Option<Value> {
        self.data.read().await.get(key).cloned()
    }

    /// Atomically transform the value stored under a key.
    pub async fn update<F>(&self, key: &str, default: Value, updater: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let (old, new) = {
            let mut data = self.data.write().await;
            let current = data.get(key).cloned().unwrap_or(default);
            let new = updater(&current);
            data.insert(key.to_string(), new.clone());
            (Some(current), new)
        };

        if old.as_ref() != Some(&new) {
            let _ = self.events.send(BlackboardEvent {
                key: key.to_string(),
                old,
                new,
            });
        }
    }

    pub async fn remove(&self, key: &str) {
        self.data.write().await.remove(key);
    }

    /// Subscribe to change events for every key; filter client-side.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BlackboardEvent> {
        self.events.subscribe()
    }

    /// Full snapshot for monitoring endpoints.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.data.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_and_read_round_trip() {
        let board = Blackboard::new();
        board.write("queue_status", json!("running")).await;
        assert_eq!(board.read("queue_status").await, Some(json!("running")));
        assert_eq!(board.read("missing").await, None);
    }

    #[tokio::test]
    async fn notifies_only_on_change() -> Result<(), Box<dyn std::error::Error>> {
        let board = Blackboard::new();
        let mut events = board.subscribe();

        board.write("backpressure_active", json!(true)).await;
        // Same value again: no second event.
        board.write("backpressure_active", json!(true)).await;
        board.write("backpressure_active", json!(false)).await;

        let first = events.recv().await?;
        assert_eq!(first.key, "backpressure_active");
        assert_eq!(first.old, None);
        assert_eq!(first.new, json!(true));

        let second = events.recv().await?;
        assert_eq!(second.old, Some(json!(true)));
        assert_eq!(second.new, json!(false));

        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn update_applies_transform() {
        let board = Blackboard::new();
        board
            .update("active_requests", json!(0), |current| {
                json!(current.as_u64().unwrap_or(0) + 1)
            })
            .await;
        board
            .update("active_requests", json!(0), |current| {
                json!(current.as_u64().unwrap_or(0) + 1)
            })
            .await;
        assert_eq!(board.read("active_requests").await, Some(json!(2)));
    }
}
