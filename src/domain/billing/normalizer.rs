//! Event normalizer.
//!
//! Maps raw provider event types onto a typed `(EntityKind, EventAction)`
//! pair and extracts the payload fields each entity needs. The mapping is
//! a match over the event type string, fixed at compile time. Types not
//! in the table normalize to `EntityKind::Unknown` and are acknowledged
//! without side effects.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::entities::{
    ConnectedAccount, Customer, Invoice, InvoiceStatus, Payment, PaymentMethod,
    PaymentMethodKind, Price, Product, Subscription, SubscriptionStatus,
};
use super::provider_event::ProviderEvent;

/// Which local entity an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Customer,
    Subscription,
    CheckoutSession,
    Invoice,
    Payment,
    PaymentMethod,
    Product,
    Price,
    ConnectedAccount,
    /// Event type not in the table. Acknowledged, never applied.
    Unknown,
}

/// How the event should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Write the payload's fields over the local row, inserting if absent.
    Upsert,
    /// Re-fetch the authoritative object from the provider, then upsert.
    Refresh,
    /// Remove the local row (or terminate, for subscriptions).
    Delete,
    /// Keep the row but mark it inactive.
    Deactivate,
    /// Checkout completed: ensure customer and subscription exist, then
    /// refresh the subscription.
    Complete,
    /// No-op for unknown event types.
    Ignore,
}

/// Provider event reduced to what the reconciliation engine consumes.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub event_id: String,
    pub event_type: String,
    pub kind: EntityKind,
    pub action: EventAction,
    /// The `data.object.id`, when present.
    pub entity_id: Option<String>,
    /// Raw `data.object` payload for typed extraction.
    pub object: serde_json::Value,
    /// Connected account the event originated from, for platform events.
    pub account: Option<String>,
}

/// Classifies an event type string.
///
/// Every type the service handles appears here; anything else is
/// `(Unknown, Ignore)`.
pub fn classify(event_type: &str) -> (EntityKind, EventAction) {
    match event_type {
        "customer.created" | "customer.updated" => (EntityKind::Customer, EventAction::Upsert),
        "customer.deleted" => (EntityKind::Customer, EventAction::Delete),

        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.trial_will_end" => {
            (EntityKind::Subscription, EventAction::Refresh)
        }
        "customer.subscription.deleted" => (EntityKind::Subscription, EventAction::Delete),

        "checkout.session.completed" => (EntityKind::CheckoutSession, EventAction::Complete),

        "invoice.paid" | "invoice.payment_succeeded" | "invoice.payment_failed" => {
            (EntityKind::Invoice, EventAction::Upsert)
        }

        "payment_intent.succeeded" | "payment_intent.payment_failed" => {
            (EntityKind::Payment, EventAction::Upsert)
        }

        "payment_method.attached"
        | "payment_method.updated"
        | "payment_method.automatically_updated" => {
            (EntityKind::PaymentMethod, EventAction::Upsert)
        }
        "payment_method.detached" => (EntityKind::PaymentMethod, EventAction::Delete),

        "product.created" | "product.updated" => (EntityKind::Product, EventAction::Upsert),
        "product.deleted" => (EntityKind::Product, EventAction::Deactivate),

        "price.created" | "price.updated" => (EntityKind::Price, EventAction::Upsert),
        "price.deleted" => (EntityKind::Price, EventAction::Deactivate),

        "account.updated" => (EntityKind::ConnectedAccount, EventAction::Upsert),

        _ => (EntityKind::Unknown, EventAction::Ignore),
    }
}

/// Normalizes a verified provider event.
pub fn normalize(event: &ProviderEvent) -> NormalizedEvent {
    let (kind, action) = classify(&event.event_type);
    NormalizedEvent {
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        kind,
        action,
        entity_id: event.object_id().map(str::to_string),
        object: event.data.object.clone(),
        account: event.account.clone(),
    }
}

fn ts(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

fn default_metadata() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

// ══════════════════════════════════════════════════════════════════════
// Typed payload objects
//
// Every field is optional or defaulted: webhook payloads are
// schema-partial and a missing field is never an error.
// ══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressObject {
    pub city: Option<String>,
    pub country: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub postal_code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerObject {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<AddressObject>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

impl CustomerObject {
    /// Projects the payload onto a customer row.
    pub fn into_entity(self, now: DateTime<Utc>) -> Customer {
        let address = self.address.unwrap_or_default();
        Customer {
            provider_customer_id: self.id,
            user_id: None,
            email: self.email,
            name: self.name,
            phone: self.phone,
            city: address.city,
            country: address.country,
            line1: address.line1,
            line2: address.line2,
            postal_code: address.postal_code,
            state: address.state,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecurringObject {
    pub interval: Option<String>,
    pub interval_count: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
    #[serde(default)]
    pub recurring: Option<RecurringObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub price: Option<PriceRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferData {
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub cancel_at: Option<i64>,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub trial_start: Option<i64>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub transfer_data: Option<TransferData>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

impl SubscriptionObject {
    fn first_price(&self) -> Option<&PriceRef> {
        self.items.data.first().and_then(|item| item.price.as_ref())
    }

    /// Projects the payload onto a subscription row.
    ///
    /// Unrecognized status strings fall back to `Incomplete` rather than
    /// failing the event.
    pub fn into_entity(self, now: DateTime<Utc>) -> Subscription {
        let status = self
            .status
            .as_deref()
            .and_then(SubscriptionStatus::parse)
            .unwrap_or(SubscriptionStatus::Incomplete);
        let (price_id, interval, interval_count) = match self.first_price() {
            Some(price) => {
                let recurring = price.recurring.clone().unwrap_or_default();
                (
                    Some(price.id.clone()),
                    recurring.interval,
                    recurring.interval_count,
                )
            }
            None => (None, None, None),
        };
        let connected_account_id = self
            .transfer_data
            .as_ref()
            .and_then(|t| t.destination.clone());

        Subscription {
            provider_subscription_id: self.id,
            customer_id: self.customer,
            price_id,
            connected_account_id,
            status,
            current_period_start: ts(self.current_period_start),
            current_period_end: ts(self.current_period_end),
            cancel_at_period_end: self.cancel_at_period_end,
            cancel_at: ts(self.cancel_at),
            canceled_at: ts(self.canceled_at),
            ended_at: ts(self.ended_at),
            trial_start: ts(self.trial_start),
            trial_end: ts(self.trial_end),
            interval,
            interval_count,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub billing_reason: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub invoice_pdf: Option<String>,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub period_start: Option<i64>,
    #[serde(default)]
    pub period_end: Option<i64>,
    #[serde(default)]
    pub transfer_data: Option<TransferData>,
}

impl InvoiceObject {
    /// Connected account the invoice routes charges to, when present.
    pub fn destination_account(&self) -> Option<&str> {
        self.transfer_data
            .as_ref()
            .and_then(|t| t.destination.as_deref())
    }

    /// Projects the payload onto an invoice row. Reference fields are
    /// filled in by the reconciliation engine after local resolution.
    pub fn into_entity(self, now: DateTime<Utc>) -> Invoice {
        let status = self
            .status
            .as_deref()
            .and_then(InvoiceStatus::parse)
            .unwrap_or(InvoiceStatus::Open);
        Invoice {
            provider_invoice_id: self.id,
            customer_id: self.customer,
            subscription_id: None,
            connected_account_id: None,
            status,
            billing_reason: self.billing_reason,
            description: self.description,
            amount_paid: self.amount_paid.max(0),
            currency: self.currency.unwrap_or_else(|| "usd".to_string()),
            invoice_pdf: self.invoice_pdf,
            hosted_invoice_url: self.hosted_invoice_url,
            period_start: ts(self.period_start),
            period_end: ts(self.period_end),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardObject {
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i32>,
    pub exp_year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethodObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub card: Option<CardObject>,
}

impl PaymentMethodObject {
    /// Projects the payload onto a payment method row.
    ///
    /// Card fields are extracted only for card-typed methods.
    pub fn into_entity(self, customer_id: String, now: DateTime<Utc>) -> PaymentMethod {
        let kind = self
            .kind
            .as_deref()
            .map(PaymentMethodKind::parse)
            .unwrap_or(PaymentMethodKind::Other);
        let card = if kind == PaymentMethodKind::Card {
            self.card.unwrap_or_default()
        } else {
            CardObject::default()
        };
        PaymentMethod {
            provider_payment_method_id: self.id,
            customer_id,
            kind,
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl ProductObject {
    pub fn into_entity(self, now: DateTime<Utc>) -> Product {
        Product {
            provider_product_id: self.id,
            name: self.name.unwrap_or_default(),
            description: self.description,
            active: self.active,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceObject {
    pub id: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub recurring: Option<RecurringObject>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

impl PriceObject {
    pub fn into_entity(self, now: DateTime<Utc>) -> Price {
        let recurring = self.recurring.unwrap_or_default();
        Price {
            provider_price_id: self.id,
            product_id: self.product.unwrap_or_default(),
            active: self.active,
            currency: self.currency.unwrap_or_else(|| "usd".to_string()),
            unit_amount: self.unit_amount,
            recurring_interval: recurring.interval,
            recurring_interval_count: recurring.interval_count,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

impl PaymentIntentObject {
    pub fn into_entity(self, customer_id: String, now: DateTime<Utc>) -> Payment {
        Payment {
            provider_payment_intent_id: self.id,
            customer_id,
            amount: self.amount,
            currency: self.currency.unwrap_or_else(|| "usd".to_string()),
            status: self.status.unwrap_or_else(|| "unknown".to_string()),
            description: self.description,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrandingObject {
    pub icon: Option<String>,
    pub logo: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountSettings {
    #[serde(default)]
    pub branding: Option<BrandingObject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusinessProfile {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountObject {
    pub id: String,
    #[serde(default)]
    pub business_profile: Option<BusinessProfile>,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub settings: Option<AccountSettings>,
}

impl AccountObject {
    pub fn into_entity(self, now: DateTime<Utc>) -> ConnectedAccount {
        let branding = self
            .settings
            .and_then(|s| s.branding)
            .unwrap_or_default();
        ConnectedAccount {
            provider_account_id: self.id,
            name: self.business_profile.and_then(|p| p.name),
            charges_enabled: self.charges_enabled,
            details_submitted: self.details_submitted,
            branding_icon_file_id: branding.icon,
            branding_logo_file_id: branding.logo,
            branding_primary_color: branding.primary_color,
            branding_secondary_color: branding.secondary_color,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
}
