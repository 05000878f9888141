//! The storage seam used by the ingestion endpoint.

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::StoredEvent;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable sink for validated events. A call persists the whole batch or
/// fails as a whole.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, events: &[StoredEvent]) -> Result<(), StoreError>;

    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;
}

/// In-memory store for development and tests.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<StoredEvent>>,
    failing: Mutex<Option<String>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StoredEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// Make every subsequent append fail with `reason`, or recover with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.failing.lock() = reason.map(str::to_string);
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, events: &[StoredEvent]) -> Result<(), StoreError> {
        if let Some(reason) = self.failing.lock().clone() {
            return Err(StoreError::Unavailable(reason));
        }
        self.events.lock().extend_from_slice(events);
        debug!(count = events.len(), "events appended to memory store");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::{EventCategory, TelemetryEvent};

    fn stored(action: &str) -> StoredEvent {
        StoredEvent::new(
            TelemetryEvent {
                session_id: "s-1".into(),
                page_path: "/".into(),
                event_category: EventCategory::Engagement,
                event_action: action.into(),
                event_label: None,
                event_value: Some(6000),
                visitor_hash: None,
                metadata: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = MemoryEventStore::new();
        store.append(&[stored("a"), stored("b")]).await.unwrap();
        store.append(&[stored("c")]).await.unwrap();

        let actions: Vec<String> = store
            .events()
            .into_iter()
            .map(|e| e.event.event_action)
            .collect();
        assert_eq!(actions, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failing_store_keeps_nothing() {
        let store = MemoryEventStore::new();
        store.set_failure(Some("disk full"));
        let err = store.append(&[stored("a")]).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(store.count(), 0);

        store.set_failure(None);
        store.append(&[stored("a")]).await.unwrap();
        assert_eq!(store.count(), 1);
    }
}
