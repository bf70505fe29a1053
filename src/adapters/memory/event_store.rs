//! In-memory event store for testing.
//!
//! Holds a map guarded by a single lock so insert-if-absent is atomic,
//! matching the Postgres adapter's ON CONFLICT semantics.
//!
//! # Security Note
//!
//! Test/dev only. Lock operations use `.expect()` and will panic on a
//! poisoned lock.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::billing::ProviderEvent;
use crate::domain::foundation::DomainError;
use crate::ports::event_store::{EventStatus, EventStore, RecordOutcome, StoredEvent};

/// In-memory `EventStore`.
pub struct InMemoryEventStore {
    events: RwLock<HashMap<String, StoredEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored events (for test assertions).
    pub fn event_count(&self) -> usize {
        self.events
            .read()
            .expect("InMemoryEventStore: lock poisoned")
            .len()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn record_if_new(&self, event: &ProviderEvent) -> Result<RecordOutcome, DomainError> {
        let mut events = self
            .events
            .write()
            .expect("InMemoryEventStore: lock poisoned");

        if let Some(existing) = events.get(&event.id) {
            return Ok(RecordOutcome::AlreadyExists(existing.clone()));
        }

        let record = StoredEvent::received(event);
        events.insert(event.id.clone(), record.clone());
        Ok(RecordOutcome::Inserted(record))
    }

    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<StoredEvent>, DomainError> {
        let events = self
            .events
            .read()
            .expect("InMemoryEventStore: lock poisoned");
        Ok(events.get(event_id).cloned())
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), DomainError> {
        let mut events = self
            .events
            .write()
            .expect("InMemoryEventStore: lock poisoned");
        if let Some(record) = events.get_mut(event_id) {
            record.status = EventStatus::Processed;
            record.processed_at = Some(Utc::now());
            record.error_message = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: &str, error: &str) -> Result<(), DomainError> {
        let mut events = self
            .events
            .write()
            .expect("InMemoryEventStore: lock poisoned");
        if let Some(record) = events.get_mut(event_id) {
            record.status = EventStatus::Failed;
            record.processed_at = Some(Utc::now());
            record.error_message = Some(error.to_string());
        }
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut events = self
            .events
            .write()
            .expect("InMemoryEventStore: lock poisoned");
        let before = events.len();
        events.retain(|_, record| record.received_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::provider_event::ProviderEventBuilder;

    #[tokio::test]
    async fn first_record_is_inserted_second_is_duplicate() {
        let store = InMemoryEventStore::new();
        let event = ProviderEventBuilder::new("customer.created").id("evt_1").build();

        let first = store.record_if_new(&event).await.unwrap();
        let second = store.record_if_new(&event).await.unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn mark_processed_sets_status_and_timestamp() {
        let store = InMemoryEventStore::new();
        let event = ProviderEventBuilder::new("invoice.paid").id("evt_1").build();
        store.record_if_new(&event).await.unwrap();

        store.mark_processed("evt_1").await.unwrap();

        let record = store.find_by_event_id("evt_1").await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Processed);
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn mark_failed_records_error_message() {
        let store = InMemoryEventStore::new();
        let event = ProviderEventBuilder::new("invoice.paid").id("evt_1").build();
        store.record_if_new(&event).await.unwrap();

        store.mark_failed("evt_1", "database connection lost").await.unwrap();

        let record = store.find_by_event_id("evt_1").await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("database connection lost")
        );
    }

    #[tokio::test]
    async fn failed_event_stays_recorded_as_duplicate() {
        let store = InMemoryEventStore::new();
        let event = ProviderEventBuilder::new("invoice.paid").id("evt_1").build();
        store.record_if_new(&event).await.unwrap();
        store.mark_failed("evt_1", "boom").await.unwrap();

        let outcome = store.record_if_new(&event).await.unwrap();

        assert!(!outcome.is_new());
        assert_eq!(outcome.into_record().status, EventStatus::Failed);
    }

    #[tokio::test]
    async fn delete_before_removes_old_events() {
        let store = InMemoryEventStore::new();
        let event = ProviderEventBuilder::new("customer.created").id("evt_old").build();
        store.record_if_new(&event).await.unwrap();

        let removed = store
            .delete_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_records_resolve_to_one_insert() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryEventStore::new());
        let event = ProviderEventBuilder::new("invoice.paid").id("evt_race").build();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let event = event.clone();
            handles.push(tokio::spawn(async move {
                store.record_if_new(&event).await.unwrap().is_new()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }
}
