//! Stripe-backed `RemoteFetcher`.
//!
//! Reads current objects from the provider REST API and creates hosted
//! sessions. Requests authenticate with the secret key via basic auth
//! and carry an explicit per-request timeout.
//!
//! # Security
//!
//! The API key is held in `secrecy::SecretString` and only exposed at
//! the call site.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::PaymentConfig;
use crate::domain::billing::normalizer::{
    AccountObject, CustomerObject, InvoiceObject, PaymentMethodObject, PriceObject,
    ProductObject, SubscriptionObject,
};
use crate::ports::remote_fetcher::{
    CheckoutSessionRequest, FetchError, HostedSession, RemoteFetcher,
};

/// Stripe REST client implementing `RemoteFetcher`.
pub struct StripeRemoteFetcher {
    api_key: SecretString,
    api_base_url: String,
    timeout: Duration,
    application_fee_percent: Option<f64>,
    http_client: reqwest::Client,
}

impl StripeRemoteFetcher {
    pub fn new(config: &PaymentConfig) -> Self {
        Self {
            api_key: SecretString::new(config.api_key.clone()),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            application_fee_percent: config.application_fee_percent,
            http_client: reqwest::Client::new(),
        }
    }

    /// Override the base URL (for tests against a local stub).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    fn map_send_error(err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }

    async fn get_object<T: DeserializeOwned>(
        &self,
        path: &str,
        object: &'static str,
        id: &str,
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.api_base_url, path);

        let response = self
            .http_client
            .get(&url)
            .basic_auth(self.api_key.expose_secret(), Option::<&str>::None)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                object,
                id: id.to_string(),
            });
        }

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(
                object = object,
                id = %id,
                status = status.as_u16(),
                error = %message,
                "provider fetch failed"
            );
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<SessionResponse, FetchError> {
        let url = format!("{}{}", self.api_base_url, path);

        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.api_key.expose_secret(), Option::<&str>::None)
            .timeout(self.timeout)
            .form(params)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(
                path = path,
                status = status.as_u16(),
                error = %message,
                "provider session creation failed"
            );
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn checkout_params(&self, request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut params = vec![
            ("line_items[0][price]".to_string(), request.price_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("mode".to_string(), request.mode.clone()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];

        if let Some(customer_id) = &request.customer_id {
            params.push(("customer".to_string(), customer_id.clone()));
        }

        if let Some(account_id) = &request.connected_account_id {
            params.push((
                "subscription_data[transfer_data][destination]".to_string(),
                account_id.clone(),
            ));
            let fee = request
                .application_fee_percent
                .or(self.application_fee_percent);
            if let Some(fee) = fee {
                params.push((
                    "subscription_data[application_fee_percent]".to_string(),
                    fee.to_string(),
                ));
            }
        }

        params
    }
}

/// Session object returned by checkout/portal/login-link endpoints.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    id: String,
    url: String,
}

impl From<SessionResponse> for HostedSession {
    fn from(response: SessionResponse) -> Self {
        HostedSession {
            id: response.id,
            url: response.url,
        }
    }
}

#[async_trait]
impl RemoteFetcher for StripeRemoteFetcher {
    async fn fetch_customer(&self, customer_id: &str) -> Result<CustomerObject, FetchError> {
        self.get_object(&format!("/v1/customers/{}", customer_id), "customer", customer_id)
            .await
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, FetchError> {
        self.get_object(
            &format!("/v1/subscriptions/{}", subscription_id),
            "subscription",
            subscription_id,
        )
        .await
    }

    async fn fetch_invoice(&self, invoice_id: &str) -> Result<InvoiceObject, FetchError> {
        self.get_object(&format!("/v1/invoices/{}", invoice_id), "invoice", invoice_id)
            .await
    }

    async fn fetch_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<PaymentMethodObject, FetchError> {
        self.get_object(
            &format!("/v1/payment_methods/{}", payment_method_id),
            "payment_method",
            payment_method_id,
        )
        .await
    }

    async fn fetch_product(&self, product_id: &str) -> Result<ProductObject, FetchError> {
        self.get_object(&format!("/v1/products/{}", product_id), "product", product_id)
            .await
    }

    async fn fetch_price(&self, price_id: &str) -> Result<PriceObject, FetchError> {
        self.get_object(&format!("/v1/prices/{}", price_id), "price", price_id)
            .await
    }

    async fn fetch_account(&self, account_id: &str) -> Result<AccountObject, FetchError> {
        self.get_object(&format!("/v1/accounts/{}", account_id), "account", account_id)
            .await
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<HostedSession, FetchError> {
        let params = self.checkout_params(&request);
        let session = self.post_form("/v1/checkout/sessions", &params).await?;
        Ok(session.into())
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<HostedSession, FetchError> {
        let params = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        let session = self
            .post_form("/v1/billing_portal/sessions", &params)
            .await?;
        Ok(session.into())
    }

    async fn create_login_link(&self, account_id: &str) -> Result<HostedSession, FetchError> {
        let session = self
            .post_form(&format!("/v1/accounts/{}/login_links", account_id), &[])
            .await?;
        Ok(session.into())
    }
}
