//! PostgreSQL adapters - durable event store and billing repository.

mod billing_repository;
mod event_store;

pub use billing_repository::PostgresBillingRepository;
pub use event_store::PostgresEventStore;
