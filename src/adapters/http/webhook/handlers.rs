//! HTTP handler for provider webhook deliveries.
//!
//! Connects the Axum route to the application-layer webhook handler and
//! maps its outcomes to the status codes the provider's retry loop
//! keys on: 2xx acknowledges, 4xx rejects permanently, 5xx asks for a
//! redelivery.

use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::handlers::{
    ProcessWebhookCommand, ProcessWebhookError, ProcessWebhookHandler, ProcessWebhookOutcome,
};

use super::dto::{ErrorResponse, WebhookAck};

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookAppState {
    pub webhook_handler: Arc<ProcessWebhookHandler>,
}

/// POST /api/webhooks/billing - Handle provider webhook events
pub async fn handle_billing_webhook(
    State(state): State<WebhookAppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, WebhookApiError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookApiError::MissingSignatureHeader)?;

    let cmd = ProcessWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    let outcome = state.webhook_handler.handle(cmd).await?;

    let ack = match outcome {
        ProcessWebhookOutcome::Processed => WebhookAck::new("processed"),
        ProcessWebhookOutcome::Duplicate => WebhookAck::new("duplicate"),
        ProcessWebhookOutcome::Skipped(reason) => {
            tracing::info!(reason = %reason, "webhook acknowledged without changes");
            WebhookAck::new("skipped")
        }
        ProcessWebhookOutcome::Ignored => WebhookAck::new("ignored"),
    };

    Ok((StatusCode::OK, Json(ack)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts processing failures to HTTP responses.
#[derive(Debug)]
pub enum WebhookApiError {
    MissingSignatureHeader,
    Processing(ProcessWebhookError),
}

impl From<ProcessWebhookError> for WebhookApiError {
    fn from(err: ProcessWebhookError) -> Self {
        Self::Processing(err)
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            WebhookApiError::MissingSignatureHeader => (
                StatusCode::BAD_REQUEST,
                "MISSING_SIGNATURE",
                "Missing Stripe-Signature header".to_string(),
            ),
            WebhookApiError::Processing(ProcessWebhookError::Rejected(err)) => (
                StatusCode::BAD_REQUEST,
                "WEBHOOK_REJECTED",
                err.to_string(),
            ),
            WebhookApiError::Processing(err) => {
                tracing::error!(error = %err, "webhook processing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PROCESSING_FAILED",
                    "Event processing failed; delivery will be retried".to_string(),
                )
            }
        };

        let body = ErrorResponse::new(code, message);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Bytes;
    use axum::http::{HeaderMap, HeaderValue};
    use chrono::Utc;

    use crate::adapters::memory::{
        InMemoryBillingRepository, InMemoryEventStore, MockRemoteFetcher,
    };
    use crate::domain::billing::webhook_verifier::compute_test_signature;
    use crate::domain::billing::{ProviderEventBuilder, ReconciliationEngine, WebhookVerifier};
    use crate::domain::foundation::DomainError;

    const SECRET: &str = "whsec_handler_test";

    fn test_state() -> WebhookAppState {
        let repository = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = Arc::new(ReconciliationEngine::new(repository, fetcher));
        WebhookAppState {
            webhook_handler: Arc::new(ProcessWebhookHandler::new(
                WebhookVerifier::new(SECRET),
                Arc::new(InMemoryEventStore::new()),
                engine,
            )),
        }
    }

    fn signed_headers(payload: &[u8]) -> HeaderMap {
        let timestamp = Utc::now().timestamp();
        let body = std::str::from_utf8(payload).unwrap();
        let signature = compute_test_signature(SECRET, timestamp, body);
        let header = format!("t={},v1={}", timestamp, signature);
        let mut headers = HeaderMap::new();
        headers.insert(
            "Stripe-Signature",
            HeaderValue::from_str(&header).unwrap(),
        );
        headers
    }

    fn customer_payload() -> Vec<u8> {
        let event = ProviderEventBuilder::new("customer.created")
            .id("evt_http_1")
            .object(serde_json::json!({
                "id": "cus_http_1",
                "object": "customer",
                "email": "webhook@example.com"
            }))
            .build();
        serde_json::to_vec(&event).unwrap()
    }

    #[tokio::test]
    async fn valid_delivery_returns_200() {
        let state = test_state();
        let payload = customer_payload();
        let headers = signed_headers(&payload);

        let result =
            handle_billing_webhook(State(state), headers, Bytes::from(payload)).await;

        let response = result.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_signature_header_returns_400() {
        let state = test_state();
        let payload = customer_payload();

        let result =
            handle_billing_webhook(State(state), HeaderMap::new(), Bytes::from(payload)).await;

        let response = match result {
            Err(err) => err.into_response(),
            Ok(_) => panic!("expected rejection"),
        };
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_signature_returns_400() {
        let state = test_state();
        let payload = customer_payload();
        let timestamp = Utc::now().timestamp();
        let header = format!("t={},v1={}", timestamp, "ab".repeat(32));
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_str(&header).unwrap());

        let result =
            handle_billing_webhook(State(state), headers, Bytes::from(payload)).await;

        let response = match result {
            Err(err) => err.into_response(),
            Ok(_) => panic!("expected rejection"),
        };
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn storage_failure_returns_500() {
        struct FailingEventStore;

        #[async_trait::async_trait]
        impl crate::ports::EventStore for FailingEventStore {
            async fn record_if_new(
                &self,
                _event: &crate::domain::billing::ProviderEvent,
            ) -> Result<crate::ports::RecordOutcome, DomainError> {
                Err(DomainError::database("connection refused"))
            }

            async fn find_by_event_id(
                &self,
                _event_id: &str,
            ) -> Result<Option<crate::ports::StoredEvent>, DomainError> {
                Ok(None)
            }

            async fn mark_processed(&self, _event_id: &str) -> Result<(), DomainError> {
                Ok(())
            }

            async fn mark_failed(
                &self,
                _event_id: &str,
                _error: &str,
            ) -> Result<(), DomainError> {
                Ok(())
            }

            async fn delete_before(
                &self,
                _cutoff: chrono::DateTime<Utc>,
            ) -> Result<u64, DomainError> {
                Ok(0)
            }
        }

        let repository = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = Arc::new(ReconciliationEngine::new(repository, fetcher));
        let state = WebhookAppState {
            webhook_handler: Arc::new(ProcessWebhookHandler::new(
                WebhookVerifier::new(SECRET),
                Arc::new(FailingEventStore),
                engine,
            )),
        };

        let payload = customer_payload();
        let headers = signed_headers(&payload);

        let result =
            handle_billing_webhook(State(state), headers, Bytes::from(payload)).await;

        let response = match result {
            Err(err) => err.into_response(),
            Ok(_) => panic!("expected failure"),
        };
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged() {
        let state = test_state();
        let event = ProviderEventBuilder::new("charge.refunded")
            .id("evt_http_2")
            .object(serde_json::json!({"id": "ch_1", "object": "charge"}))
            .build();
        let payload = serde_json::to_vec(&event).unwrap();
        let headers = signed_headers(&payload);

        let result =
            handle_billing_webhook(State(state), headers, Bytes::from(payload)).await;

        let response = result.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
