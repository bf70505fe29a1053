//! Command handlers.

pub mod process_webhook;

pub use process_webhook::{
    ProcessWebhookCommand, ProcessWebhookError, ProcessWebhookHandler, ProcessWebhookOutcome,
};
