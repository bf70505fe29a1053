//! Errors raised while verifying and reconciling webhook events.

use thiserror::Error;

use crate::domain::foundation::DomainError;
use crate::ports::remote_fetcher::FetchError;

/// Errors from webhook signature verification and envelope parsing.
///
/// All of these map to a rejected delivery (HTTP 400); none of them are
/// retryable by the provider.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature header is structurally invalid.
    #[error("malformed signature header: {0}")]
    MalformedHeader(String),

    /// HMAC did not match the payload.
    #[error("webhook signature mismatch")]
    SignatureMismatch,

    /// Signature timestamp is older than the replay window.
    #[error("webhook timestamp too old")]
    StaleTimestamp,

    /// Signature timestamp is too far ahead of local time.
    #[error("webhook timestamp in the future")]
    FutureTimestamp,

    /// Body is not a valid event envelope.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// Errors from applying a normalized event to local state.
///
/// These surface as HTTP 500 so the provider redelivers the event.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] DomainError),

    /// Refreshing the entity from the provider failed.
    #[error("remote fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Event payload is missing a field the handler requires.
    #[error("event payload missing required field: {0}")]
    MissingField(&'static str),

    /// Payload for a handled event type does not match its object shape.
    #[error("event object malformed: {0}")]
    MalformedObject(String),
}
