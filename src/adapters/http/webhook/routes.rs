//! Axum router configuration for webhook endpoints.

use axum::{routing::post, Router};

use super::handlers::{handle_billing_webhook, WebhookAppState};

/// Create the webhook router.
///
/// Webhook routes carry no user authentication; deliveries are
/// authenticated by the signature header instead.
///
/// # Routes
/// - `POST /billing` - Handle payment provider webhooks
pub fn webhook_routes() -> Router<WebhookAppState> {
    Router::new().route("/billing", post(handle_billing_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapters::memory::{
        InMemoryBillingRepository, InMemoryEventStore, MockRemoteFetcher,
    };
    use crate::application::handlers::ProcessWebhookHandler;
    use crate::domain::billing::{ReconciliationEngine, WebhookVerifier};

    fn test_state() -> WebhookAppState {
        let repository = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = Arc::new(ReconciliationEngine::new(repository, fetcher));
        WebhookAppState {
            webhook_handler: Arc::new(ProcessWebhookHandler::new(
                WebhookVerifier::new("whsec_route_test"),
                Arc::new(InMemoryEventStore::new()),
                engine,
            )),
        }
    }

    #[test]
    fn webhook_routes_creates_router() {
        let router = webhook_routes();
        let _: Router<()> = router.with_state(test_state());
    }
}
