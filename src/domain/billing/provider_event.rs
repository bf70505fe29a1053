//! Provider webhook event envelope.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Webhook event as delivered by the payment provider.
///
/// The `data.object` payload is kept as raw JSON; the normalizer extracts
/// typed fields from it based on the event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// Provider event ID (evt_xxx format). Globally unique, the
    /// idempotency key for the whole pipeline.
    pub id: String,

    /// Dotted event type ("customer.subscription.updated", ...).
    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp when the provider created the event.
    pub created: i64,

    /// Event payload.
    pub data: ProviderEventData,

    /// Whether this event came from live mode.
    #[serde(default)]
    pub livemode: bool,

    /// Provider API version the payload was rendered with.
    #[serde(default)]
    pub api_version: Option<String>,

    /// Connected account the event originated from, for platform events.
    #[serde(default)]
    pub account: Option<String>,
}

/// Event payload wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEventData {
    /// The object the event describes, as raw JSON.
    pub object: serde_json::Value,

    /// For update events, the previous values of changed attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

impl ProviderEvent {
    /// Parse an event from a raw JSON payload.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Event creation time as a UTC datetime.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// The `id` field of `data.object`, when present.
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }

    /// The `object` type discriminator of `data.object`, when present.
    pub fn object_type(&self) -> Option<&str> {
        self.data.object.get("object").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
pub use builder::ProviderEventBuilder;
