//! In-memory adapter implementations for tests and local development.

mod billing_repository;
mod event_store;
mod remote_fetcher;

pub use billing_repository::InMemoryBillingRepository;
pub use event_store::InMemoryEventStore;
pub use remote_fetcher::MockRemoteFetcher;
