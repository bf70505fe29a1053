//! PostgreSQL implementation of the EventStore port.
//!
//! Idempotency is backed by the primary key on `event_id`:
//! `record_if_new` uses `ON CONFLICT DO NOTHING`, so concurrent
//! deliveries of the same event resolve to exactly one insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::billing::ProviderEvent;
use crate::domain::foundation::DomainError;
use crate::ports::event_store::{EventStatus, EventStore, RecordOutcome, StoredEvent};

/// PostgreSQL-backed `EventStore`.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_id: String,
    event_type: String,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    status: String,
    error_message: Option<String>,
    payload: serde_json::Value,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let status = EventStatus::parse(&row.status).ok_or_else(|| {
            DomainError::database(format!("Invalid event status value: {}", row.status))
        })?;

        Ok(StoredEvent {
            event_id: row.event_id,
            event_type: row.event_type,
            received_at: row.received_at,
            processed_at: row.processed_at,
            status,
            error_message: row.error_message,
            payload: row.payload,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn record_if_new(&self, event: &ProviderEvent) -> Result<RecordOutcome, DomainError> {
        let record = StoredEvent::received(event);

        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (
                event_id, event_type, received_at, processed_at, status, error_message, payload
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(record.received_at)
        .bind(record.processed_at)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(&record.payload)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to record webhook event: {}", e)))?;

        if result.rows_affected() == 1 {
            return Ok(RecordOutcome::Inserted(record));
        }

        // Lost the race or a true redelivery: read the winner's row.
        let existing = self.find_by_event_id(&record.event_id).await?.ok_or_else(|| {
            DomainError::database(format!(
                "Event {} conflicted on insert but is missing",
                record.event_id
            ))
        })?;
        Ok(RecordOutcome::AlreadyExists(existing))
    }

    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<StoredEvent>, DomainError> {
        let row: Option<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, received_at, processed_at, status, error_message, payload
            FROM webhook_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find webhook event: {}", e)))?;

        row.map(StoredEvent::try_from).transpose()
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'processed', processed_at = NOW(), error_message = NULL
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to mark event processed: {}", e)))?;

        if result.rows_affected() == 0 {
            tracing::warn!(event_id = %event_id, "mark_processed for unknown event");
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: &str, error: &str) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'failed', processed_at = NOW(), error_message = $2
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to mark event failed: {}", e)))?;

        if result.rows_affected() == 0 {
            tracing::warn!(event_id = %event_id, "mark_failed for unknown event");
        }
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE received_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to delete old events: {}", e)))?;

        Ok(result.rows_affected())
    }
}
