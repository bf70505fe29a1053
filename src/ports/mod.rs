//! Ports - async trait interfaces between the domain and its adapters.

pub mod billing_repository;
pub mod event_store;
pub mod remote_fetcher;

pub use billing_repository::BillingRepository;
pub use event_store::{EventStatus, EventStore, RecordOutcome, StoredEvent};
pub use remote_fetcher::{FetchError, HostedSession, RemoteFetcher};
