//! Append-only audit event store - trait + in-memory implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared_types::Event;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An event before it has been assigned an id and timestamp.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub actor: String,
    pub idempotency_key: Option<String>,
}

impl NewEvent {
    pub fn new(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            actor: "system".to_string(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Minimal contract for an append-only event store.
///
/// Events are never mutated or deleted; `list_events` returns newest first.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event, returning its id. Appending a second event with the
    /// same idempotency key is a no-op that returns the original id.
    async fn append(&self, event: NewEvent) -> Result<String, EventStoreError>;

    async fn list_events(
        &self,
        aggregate_id: Option<&str>,
        event_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError>;
}

#[derive(Default)]
struct MemoryState {
    events: Vec<Event>,
    seen_keys: HashSet<String>,
}

/// Append-only store backed by a plain vec. Dev/test only; serializes
/// internally so concurrent consumers are safe within one process.
#[derive(Default)]
pub struct InMemoryEventStore {
    state: Mutex<MemoryState>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: NewEvent) -> Result<String, EventStoreError> {
        let mut state = self.state.lock().await;

        if let Some(key) = &event.idempotency_key {
            if state.seen_keys.contains(key) {
                let existing = state
                    .events
                    .iter()
                    .find(|e| e.idempotency_key.as_deref() == Some(key))
                    .map(|e| e.event_id.clone())
                    .unwrap_or_default();
                return Ok(existing);
            }
            state.seen_keys.insert(key.clone());
        }

        let event_id = Uuid::new_v4().to_string();
        state.events.push(Event {
            event_id: event_id.clone(),
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            payload: event.payload,
            actor: event.actor,
            created_at: Utc::now().to_rfc3339(),
            idempotency_key: event.idempotency_key,
        });
        Ok(event_id)
    }

    async fn list_events(
        &self,
        aggregate_id: Option<&str>,
        event_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let state = self.state.lock().await;
        let filtered = state
            .events
            .iter()
            .filter(|e| aggregate_id.map_or(true, |agg| e.aggregate_id == agg))
            .filter(|e| event_type.map_or(true, |et| e.event_type == et))
            .rev()
            .take(limit)
            .cloned()
            .collect();
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn append_and_list() {
        let store = InMemoryEventStore::new();
        store
            .append(NewEvent::new("APT-1", "appointment_received", json!({})))
            .await
            .unwrap();
        store
            .append(NewEvent::new("APT-1", "risk_scored", json!({"score": 0.4})))
            .await
            .unwrap();
        store
            .append(NewEvent::new("APT-2", "appointment_received", json!({})))
            .await
            .unwrap();

        let events = store.list_events(Some("APT-1"), None, 100).await.unwrap();
        assert_eq!(events.len(), 2);
        // Newest first.
        assert_eq!(events[0].event_type, "risk_scored");

        let scored = store.list_events(None, Some("risk_scored"), 100).await.unwrap();
        assert_eq!(scored.len(), 1);
    }

    #[tokio::test]
    async fn idempotent_append_returns_original_id() {
        let store = InMemoryEventStore::new();
        let first = store
            .append(
                NewEvent::new("pr-1", "pr_merged", json!({"pr_number": 1}))
                    .with_idempotency_key("delivery-1"),
            )
            .await
            .unwrap();
        let second = store
            .append(
                NewEvent::new("pr-1", "pr_merged", json!({"pr_number": 1}))
                    .with_idempotency_key("delivery-1"),
            )
            .await
            .unwrap();
        assert_eq!(first, second);

        let events = store.list_events(None, Some("pr_merged"), 100).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn limit_caps_results() {
        let store = InMemoryEventStore::new();
        for i in 0..10 {
            store
                .append(NewEvent::new("APT-1", "risk_scored", json!({"i": i})))
                .await
                .unwrap();
        }
        let events = store.list_events(Some("APT-1"), None, 3).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].payload["i"], 9);
    }

    #[tokio::test]
    async fn actor_defaults_to_system() {
        let store = InMemoryEventStore::new();
        store
            .append(NewEvent::new("APT-1", "appointment_received", json!({})))
            .await
            .unwrap();
        let events = store.list_events(Some("APT-1"), None, 1).await.unwrap();
        assert_eq!(events[0].actor, "system");
    }
}
