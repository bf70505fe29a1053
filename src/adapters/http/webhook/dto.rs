//! Wire types for the webhook endpoint.

use serde::Serialize;

/// Acknowledgement body returned for accepted deliveries.
///
/// `outcome` reports what reconciliation did with the event; the
/// provider only cares about the status code, the body is for
/// operators reading delivery logs.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

impl WebhookAck {
    pub fn new(outcome: &'static str) -> Self {
        Self {
            received: true,
            outcome,
        }
    }
}

/// Standard error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
