//! Payment provider configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Payment provider configuration
///
/// Credentials are injected into the remote fetcher and webhook verifier
/// at construction time. Nothing in this crate reads them from a process
/// global.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentConfig {
    /// Provider secret API key (sk_live_... or sk_test_...)
    pub api_key: String,

    /// Webhook signing secret (whsec_...)
    pub webhook_secret: String,

    /// Provider API base URL (override for testing)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Timeout for provider API calls in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Platform fee percentage applied to destination charges
    #[serde(default)]
    pub application_fee_percent: Option<f64>,
}

impl PaymentConfig {
    /// Check if using provider test mode
    pub fn is_test_mode(&self) -> bool {
        self.api_key.starts_with("sk_test_")
    }

    /// Check if using provider live mode
    pub fn is_live_mode(&self) -> bool {
        self.api_key.starts_with("sk_live_")
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api_key.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__API_KEY"));
        }
        if self.webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__WEBHOOK_SECRET"));
        }

        // Verify key prefixes for safety
        if !self.api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidProviderKey);
        }
        if !self.webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidWebhookSecret);
        }
        if self.fetch_timeout_secs == 0 || self.fetch_timeout_secs > 60 {
            return Err(ValidationError::InvalidProviderTimeout);
        }

        Ok(())
    }
}

fn default_api_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_fetch_timeout() -> u64 {
    10
}
