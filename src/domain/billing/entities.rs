//! Billing entities mirrored from the payment provider.
//!
//! Every entity is keyed by a provider-assigned identifier (`cus_*`,
//! `sub_*`, `in_*`, ...). The provider is the source of truth: local rows
//! are projections refreshed by webhook reconciliation, never mutated by
//! business logic elsewhere in this service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing identity owned by at most one local user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Provider customer ID (cus_xxx format). Unique.
    pub provider_customer_id: String,

    /// Owning local user, if this customer has been linked to one.
    pub user_id: Option<Uuid>,

    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,

    // Address fields, flattened from the provider's nested address object.
    pub city: Option<String>,
    pub country: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub postal_code: Option<String>,
    pub state: Option<String>,

    /// Free-form provider metadata.
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Creates a customer shell with only the provider ID populated.
    ///
    /// Used when an event references a customer we have not seen yet and
    /// the full object will be refreshed from the provider.
    pub fn shell(provider_customer_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            provider_customer_id: provider_customer_id.into(),
            user_id: None,
            email: None,
            name: None,
            phone: None,
            city: None,
            country: None,
            line1: None,
            line2: None,
            postal_code: None,
            state: None,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Subscription status as reported by the provider.
///
/// All transitions are externally driven; this service mirrors whatever
/// status string arrives and enforces no local transition validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
}

impl SubscriptionStatus {
    /// Parse a provider status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incomplete" => Some(Self::Incomplete),
            "incomplete_expired" => Some(Self::IncompleteExpired),
            "trialing" => Some(Self::Trialing),
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "canceled" => Some(Self::Canceled),
            "unpaid" => Some(Self::Unpaid),
            _ => None,
        }
    }

    /// Provider wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
        }
    }

    /// Check if subscription currently grants access.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::IncompleteExpired)
    }
}

/// Recurring subscription mirrored from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Provider subscription ID (sub_xxx format). Unique.
    pub provider_subscription_id: String,

    /// Provider customer ID of the owning customer.
    pub customer_id: String,

    /// Provider price ID of the subscribed price, when known.
    pub price_id: Option<String>,

    /// Connected account receiving destination charges, if any.
    pub connected_account_id: Option<String>,

    pub status: SubscriptionStatus,

    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub cancel_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,

    /// Billing interval ("month", "year", ...), when known.
    pub interval: Option<String>,
    pub interval_count: Option<i32>,

    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Creates a subscription shell pending a refresh from the provider.
    pub fn shell(
        provider_subscription_id: impl Into<String>,
        customer_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_subscription_id: provider_subscription_id.into(),
            customer_id: customer_id.into(),
            price_id: None,
            connected_account_id: None,
            status: SubscriptionStatus::Incomplete,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            cancel_at: None,
            canceled_at: None,
            ended_at: None,
            trial_start: None,
            trial_end: None,
            interval: None,
            interval_count: None,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if subscription currently grants access.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Invoice status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Uncollectible,
    Void,
}

impl InvoiceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "open" => Some(Self::Open),
            "paid" => Some(Self::Paid),
            "uncollectible" => Some(Self::Uncollectible),
            "void" => Some(Self::Void),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Uncollectible => "uncollectible",
            Self::Void => "void",
        }
    }
}

/// Invoice mirrored from the provider.
///
/// Subscription and connected-account references may be absent locally
/// even when the provider holds them (ordering races); they are stored as
/// nullable provider IDs rather than failing the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Provider invoice ID (in_xxx format). Unique.
    pub provider_invoice_id: String,

    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub connected_account_id: Option<String>,

    pub status: InvoiceStatus,
    pub billing_reason: Option<String>,
    pub description: Option<String>,

    /// Amount paid in minor currency units. Never negative.
    pub amount_paid: i64,

    /// Three-letter lowercase currency code.
    pub currency: String,

    pub invoice_pdf: Option<String>,
    pub hosted_invoice_url: Option<String>,

    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment method kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    Card,
    BankAccount,
    Other,
}

impl PaymentMethodKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "card" => Self::Card,
            "us_bank_account" | "bank_account" => Self::BankAccount,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::BankAccount => "bank_account",
            Self::Other => "other",
        }
    }
}

/// Stored payment method for a customer.
///
/// Invariant: at most one payment method per customer has
/// `is_default = true`. The swap is enforced atomically by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    /// Provider payment method ID (pm_xxx format). Unique.
    pub provider_payment_method_id: String,

    pub customer_id: String,
    pub kind: PaymentMethodKind,

    // Card-specific fields; blank for other kinds.
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i32>,
    pub exp_year: Option<i32>,

    pub is_default: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sellable product mirrored from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Provider product ID (prod_xxx format). Unique.
    pub provider_product_id: String,

    pub name: String,
    pub description: Option<String>,

    /// Deleted products are deactivated, not removed.
    pub active: bool,

    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Price attached to a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// Provider price ID (price_xxx format). Unique.
    pub provider_price_id: String,

    /// Provider product ID this price belongs to.
    pub product_id: String,

    pub active: bool,
    pub currency: String,
    pub unit_amount: Option<i64>,

    /// Recurrence ("month", "year"); None for one-time prices.
    pub recurring_interval: Option<String>,
    pub recurring_interval_count: Option<i32>,

    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One-time payment (payment intent) mirrored from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Provider payment intent ID (pi_xxx format). Unique.
    pub provider_payment_intent_id: String,

    pub customer_id: String,

    /// Amount in minor currency units.
    pub amount: i64,
    pub currency: String,

    /// Provider status string ("succeeded", "failed", ...).
    pub status: String,
    pub description: Option<String>,

    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sub-merchant account in the platform/marketplace model.
///
/// Subscriptions and invoices may route destination charges through a
/// connected account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    /// Provider account ID (acct_xxx format). Unique.
    pub provider_account_id: String,

    pub name: Option<String>,

    pub charges_enabled: bool,
    pub details_submitted: bool,

    // Branding, surfaced in hosted checkout pages.
    pub branding_icon_file_id: Option<String>,
    pub branding_logo_file_id: Option<String>,
    pub branding_primary_color: Option<String>,
    pub branding_secondary_color: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_status_roundtrip() {
        let statuses = [
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Unpaid,
        ];
        for status in statuses {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn subscription_status_rejects_unknown() {
        assert_eq!(SubscriptionStatus::parse("paused"), None);
        assert_eq!(SubscriptionStatus::parse(""), None);
    }

    #[test]
    fn subscription_status_access_checks() {
        assert!(SubscriptionStatus::Active.is_active());
        assert!(SubscriptionStatus::Trialing.is_active());
        assert!(!SubscriptionStatus::PastDue.is_active());
        assert!(!SubscriptionStatus::Canceled.is_active());
    }

    #[test]
    fn subscription_status_terminal_checks() {
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(SubscriptionStatus::IncompleteExpired.is_terminal());
        assert!(!SubscriptionStatus::PastDue.is_terminal());
    }

    #[test]
    fn invoice_status_roundtrip() {
        let statuses = [
            InvoiceStatus::Draft,
            InvoiceStatus::Open,
            InvoiceStatus::Paid,
            InvoiceStatus::Uncollectible,
            InvoiceStatus::Void,
        ];
        for status in statuses {
            assert_eq!(InvoiceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InvoiceStatus::parse("overdue"), None);
    }

    #[test]
    fn payment_method_kind_parses_known_and_falls_back() {
        assert_eq!(PaymentMethodKind::parse("card"), PaymentMethodKind::Card);
        assert_eq!(
            PaymentMethodKind::parse("us_bank_account"),
            PaymentMethodKind::BankAccount
        );
        assert_eq!(
            PaymentMethodKind::parse("alipay"),
            PaymentMethodKind::Other
        );
    }

    #[test]
    fn customer_shell_has_only_provider_id() {
        let now = Utc::now();
        let customer = Customer::shell("cus_123", now);
        assert_eq!(customer.provider_customer_id, "cus_123");
        assert!(customer.email.is_none());
        assert!(customer.user_id.is_none());
    }

    #[test]
    fn subscription_shell_starts_incomplete() {
        let now = Utc::now();
        let sub = Subscription::shell("sub_123", "cus_1", now);
        assert_eq!(sub.status, SubscriptionStatus::Incomplete);
        assert!(!sub.is_active());
        assert!(sub.price_id.is_none());
    }
}
