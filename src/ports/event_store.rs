//! EventStore port - durable record of received webhook events.
//!
//! The event store is the idempotency barrier for the whole pipeline.
//! The provider delivers at least once: retries after timeouts, retries
//! after 5xx responses, and occasionally redelivers events we already
//! acknowledged. `record_if_new` must be atomic (insert-if-absent under a
//! uniqueness constraint on the event ID) so concurrent deliveries of the
//! same event resolve to exactly one processing attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::billing::ProviderEvent;
use crate::domain::foundation::DomainError;

/// Processing state of a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Recorded, processing not yet finished.
    Received,
    /// Reconciliation completed (including handled-but-skipped).
    Processed,
    /// Reconciliation failed; the provider will redeliver.
    Failed,
}

impl EventStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

/// A webhook event as persisted by the store.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// Provider event ID (evt_xxx format). Primary key.
    pub event_id: String,

    /// Dotted provider event type.
    pub event_type: String,

    /// When we first received the event.
    pub received_at: DateTime<Utc>,

    /// When processing finished, if it has.
    pub processed_at: Option<DateTime<Utc>>,

    pub status: EventStatus,

    /// Error message from the last failed attempt.
    pub error_message: Option<String>,

    /// Full original payload, kept for debugging and replay.
    pub payload: serde_json::Value,
}

impl StoredEvent {
    /// Builds the initial record for a freshly received event.
    pub fn received(event: &ProviderEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            received_at: Utc::now(),
            processed_at: None,
            status: EventStatus::Received,
            error_message: None,
            payload: serde_json::json!({
                "id": event.id,
                "type": event.event_type,
                "created": event.created,
                "data": { "object": event.data.object },
                "livemode": event.livemode,
            }),
        }
    }
}

/// Result of `record_if_new`.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// First time seeing this event; caller owns processing it.
    Inserted(StoredEvent),
    /// Event already recorded; the existing record is returned.
    AlreadyExists(StoredEvent),
}

impl RecordOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, RecordOutcome::Inserted(_))
    }

    pub fn into_record(self) -> StoredEvent {
        match self {
            RecordOutcome::Inserted(record) | RecordOutcome::AlreadyExists(record) => record,
        }
    }
}

/// Port for the durable webhook event store.
///
/// Implementations back `record_if_new` with a uniqueness constraint so
/// two concurrent deliveries cannot both claim the event.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record the event if it has not been seen, atomically.
    async fn record_if_new(&self, event: &ProviderEvent) -> Result<RecordOutcome, DomainError>;

    /// Look up a stored event by provider event ID.
    async fn find_by_event_id(&self, event_id: &str)
        -> Result<Option<StoredEvent>, DomainError>;

    /// Mark the event as successfully processed.
    async fn mark_processed(&self, event_id: &str) -> Result<(), DomainError>;

    /// Mark the event as failed with an error message. The record stays;
    /// a redelivery of the same event ID is treated as a duplicate and
    /// may be retried by the caller.
    async fn mark_failed(&self, event_id: &str, error: &str) -> Result<(), DomainError>;

    /// Delete events received before the cutoff. Returns the count
    /// removed. Used by retention cleanup.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::provider_event::ProviderEventBuilder;

    #[test]
    fn event_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn EventStore) {}
    }

    #[test]
    fn status_roundtrip() {
        for status in [EventStatus::Received, EventStatus::Processed, EventStatus::Failed] {
            assert_eq!(EventStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EventStatus::parse("pending"), None);
    }

    #[test]
    fn received_record_captures_envelope() {
        let event = ProviderEventBuilder::new("invoice.paid")
            .id("evt_1")
            .object(serde_json::json!({"id": "in_1"}))
            .build();

        let record = StoredEvent::received(&event);

        assert_eq!(record.event_id, "evt_1");
        assert_eq!(record.event_type, "invoice.paid");
        assert_eq!(record.status, EventStatus::Received);
        assert!(record.processed_at.is_none());
        assert_eq!(record.payload["data"]["object"]["id"], "in_1");
    }

    #[test]
    fn record_outcome_is_new() {
        let event = ProviderEventBuilder::new("customer.created").build();
        let record = StoredEvent::received(&event);
        assert!(RecordOutcome::Inserted(record.clone()).is_new());
        assert!(!RecordOutcome::AlreadyExists(record).is_new());
    }
}
