//! ProcessWebhookHandler - command handler for incoming webhook deliveries.
//!
//! Pipeline: verify signature → record-if-new (idempotency barrier) →
//! normalize → reconcile → mark processed/failed. Every step that can
//! fail maps to a deliberate HTTP response class: verification failures
//! are rejected (400, no redelivery wanted), reconciliation failures are
//! marked failed and surfaced (500, provider redelivers), everything
//! else acknowledges with 200 so the provider stops retrying.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::billing::{
    normalize, ReconcileError, ReconcileOutcome, ReconciliationEngine, WebhookError,
    WebhookVerifier,
};
use crate::domain::foundation::DomainError;
use crate::ports::event_store::{EventStatus, RecordOutcome};
use crate::ports::EventStore;

/// Command carrying one raw webhook delivery.
#[derive(Debug, Clone)]
pub struct ProcessWebhookCommand {
    /// Raw request body, exactly as signed by the provider.
    pub payload: Vec<u8>,
    /// Contents of the signature header.
    pub signature: String,
}

/// How the delivery was handled. All variants acknowledge with 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessWebhookOutcome {
    /// Event applied to local state.
    Processed,
    /// Event already processed earlier; nothing re-applied.
    Duplicate,
    /// Event understood but not applicable (e.g. unknown local customer).
    Skipped(String),
    /// Event type not handled by this service.
    Ignored,
}

/// Failures that do not acknowledge the delivery.
#[derive(Debug, Error)]
pub enum ProcessWebhookError {
    /// Verification or envelope parsing failed; respond 400.
    #[error(transparent)]
    Rejected(#[from] WebhookError),

    /// Event store failure; respond 500 so the provider redelivers.
    #[error("event store error: {0}")]
    Storage(#[from] DomainError),

    /// Reconciliation failure; respond 500 so the provider redelivers.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Handler wiring the verifier, event store, and reconciliation engine.
pub struct ProcessWebhookHandler {
    verifier: WebhookVerifier,
    event_store: Arc<dyn EventStore>,
    engine: Arc<ReconciliationEngine>,
}

impl ProcessWebhookHandler {
    pub fn new(
        verifier: WebhookVerifier,
        event_store: Arc<dyn EventStore>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            verifier,
            event_store,
            engine,
        }
    }

    pub async fn handle(
        &self,
        cmd: ProcessWebhookCommand,
    ) -> Result<ProcessWebhookOutcome, ProcessWebhookError> {
        // 1. Verify signature before touching the payload.
        let event = self
            .verifier
            .verify_and_parse(&cmd.payload, &cmd.signature)?;

        // 2. Claim the event. Losing the race (or a redelivery of an
        //    already-processed event) short-circuits here.
        match self.event_store.record_if_new(&event).await? {
            RecordOutcome::Inserted(_) => {}
            RecordOutcome::AlreadyExists(record) => {
                if record.status == EventStatus::Processed {
                    info!(event_id = %event.id, "duplicate delivery, already processed");
                    return Ok(ProcessWebhookOutcome::Duplicate);
                }
                // Previously failed (or still in flight after a crash):
                // this redelivery gets another attempt.
                info!(
                    event_id = %event.id,
                    status = %record.status.as_str(),
                    "redelivery of unfinished event, retrying"
                );
            }
        }

        // 3. Normalize and apply.
        let normalized = normalize(&event);
        match self.engine.apply(&normalized).await {
            Ok(outcome) => {
                self.event_store.mark_processed(&event.id).await?;
                match outcome {
                    ReconcileOutcome::Applied => {
                        info!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            "webhook event processed"
                        );
                        Ok(ProcessWebhookOutcome::Processed)
                    }
                    ReconcileOutcome::Skipped(reason) => {
                        info!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            reason = %reason,
                            "webhook event skipped"
                        );
                        Ok(ProcessWebhookOutcome::Skipped(reason))
                    }
                    ReconcileOutcome::Ignored => Ok(ProcessWebhookOutcome::Ignored),
                }
            }
            Err(err) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %err,
                    "webhook reconciliation failed"
                );
                if let Err(mark_err) = self
                    .event_store
                    .mark_failed(&event.id, &err.to_string())
                    .await
                {
                    warn!(
                        event_id = %event.id,
                        error = %mark_err,
                        "could not record failure state"
                    );
                }
                Err(err.into())
            }
        }
    }
}
