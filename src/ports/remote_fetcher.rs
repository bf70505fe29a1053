//! RemoteFetcher port - reads authoritative objects from the provider.
//!
//! Webhook payloads can be schema-partial (rendered with an older API
//! version than the one this service speaks), so subscription-shaped
//! events re-fetch the current object before upserting. The fetcher also
//! creates hosted checkout/portal sessions, the only writes this service
//! sends to the provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::billing::normalizer::{
    AccountObject, CustomerObject, InvoiceObject, PaymentMethodObject, PriceObject,
    ProductObject, SubscriptionObject,
};

/// Errors from provider API calls.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Provider returned a non-success status.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Request timed out.
    #[error("provider request timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("provider request failed: {0}")]
    Network(String),

    /// Response body did not match the expected shape.
    #[error("provider response malformed: {0}")]
    Decode(String),

    /// The object does not exist at the provider.
    #[error("{object} {id} not found at provider")]
    NotFound { object: &'static str, id: String },
}

impl FetchError {
    /// Timeouts, network failures, and 429/5xx are worth a redelivery.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::Api { status, .. } => *status == 429 || *status >= 500,
            FetchError::Decode(_) | FetchError::NotFound { .. } => false,
        }
    }
}

/// Parameters for creating a hosted checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    /// Provider customer ID; the provider creates one when absent.
    pub customer_id: Option<String>,
    /// Price the session subscribes to or charges.
    pub price_id: String,
    /// "subscription" or "payment".
    pub mode: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Connected account for destination charges.
    pub connected_account_id: Option<String>,
    /// Platform fee percentage for destination charges.
    pub application_fee_percent: Option<f64>,
}

/// A hosted session (checkout or billing portal) the customer is sent to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedSession {
    pub id: String,
    pub url: String,
}

/// Port for reading current state from the payment provider.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch the current customer object.
    async fn fetch_customer(&self, customer_id: &str) -> Result<CustomerObject, FetchError>;

    /// Fetch the current subscription object.
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, FetchError>;

    /// Fetch the current invoice object.
    async fn fetch_invoice(&self, invoice_id: &str) -> Result<InvoiceObject, FetchError>;

    /// Fetch the current payment method object.
    async fn fetch_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<PaymentMethodObject, FetchError>;

    /// Fetch the current product object.
    async fn fetch_product(&self, product_id: &str) -> Result<ProductObject, FetchError>;

    /// Fetch the current price object.
    async fn fetch_price(&self, price_id: &str) -> Result<PriceObject, FetchError>;

    /// Fetch the current connected account object.
    async fn fetch_account(&self, account_id: &str) -> Result<AccountObject, FetchError>;

    /// Create a hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<HostedSession, FetchError>;

    /// Create a billing portal session for self-service management.
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<HostedSession, FetchError>;

    /// Create a dashboard login link for a connected account.
    async fn create_login_link(&self, account_id: &str) -> Result<HostedSession, FetchError>;
}
