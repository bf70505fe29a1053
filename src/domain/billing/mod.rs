//! Billing domain - webhook verification, normalization, reconciliation.

pub mod entities;
pub mod errors;
pub mod normalizer;
pub mod provider_event;
pub mod reconciler;
pub mod webhook_verifier;

pub use entities::{
    ConnectedAccount, Customer, Invoice, InvoiceStatus, Payment, PaymentMethod,
    PaymentMethodKind, Price, Product, Subscription, SubscriptionStatus,
};
pub use errors::{ReconcileError, WebhookError};
pub use normalizer::{classify, normalize, EntityKind, EventAction, NormalizedEvent};
pub use provider_event::{ProviderEvent, ProviderEventData};
#[cfg(test)]
pub use provider_event::ProviderEventBuilder;
pub use reconciler::{ReconcileOutcome, ReconciliationEngine};
pub use webhook_verifier::{SignatureHeader, WebhookVerifier};
