//! Append-only event log in PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared_types::Event;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use super::event_store::{EventStore, EventStoreError, NewEvent};

impl From<sqlx::Error> for EventStoreError {
    fn from(e: sqlx::Error) -> Self {
        EventStoreError::Database(e.to_string())
    }
}

/// Event store over a shared Postgres pool. The schema is provisioned out of
/// band; this side only appends and reads.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: NewEvent) -> Result<String, EventStoreError> {
        let event_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(&event.payload)?;

        sqlx::query(
            "INSERT INTO events \
                 (event_id, aggregate_id, event_type, payload, actor, created_at, idempotency_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(&event_id)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(&payload)
        .bind(&event.actor)
        .bind(&created_at)
        .bind(&event.idempotency_key)
        .execute(&self.pool)
        .await?;

        Ok(event_id)
    }

    async fn list_events(
        &self,
        aggregate_id: Option<&str>,
        event_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let mut query: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT event_id, aggregate_id, event_type, payload, actor, created_at, \
             idempotency_key FROM events",
        );

        let mut has_where = false;
        if let Some(aggregate) = aggregate_id {
            query.push(" WHERE aggregate_id = ");
            query.push_bind(aggregate);
            has_where = true;
        }
        if let Some(etype) = event_type {
            query.push(if has_where { " AND " } else { " WHERE " });
            query.push("event_type = ");
            query.push_bind(etype);
        }
        query.push(" ORDER BY created_at DESC LIMIT ");
        query.push_bind(limit as i64);

        let rows = query.build().fetch_all(&self.pool).await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            events.push(Event {
                event_id: row.try_get("event_id")?,
                aggregate_id: row.try_get("aggregate_id")?,
                event_type: row.try_get("event_type")?,
                payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                actor: row.try_get("actor")?,
                created_at: row.try_get("created_at")?,
                idempotency_key: row.try_get("idempotency_key")?,
            });
        }
        Ok(events)
    }
}
