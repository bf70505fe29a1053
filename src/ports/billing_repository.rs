//! BillingRepository port - local persistence for mirrored billing state.
//!
//! Every entity is addressed by its provider-assigned ID. Upserts are
//! last-write-wins over the full row; single-entity writes are atomic.
//! `set_default_payment_method` is the one compound operation and must
//! clear-then-set inside a single transaction so the single-default
//! invariant holds under concurrent events.

use async_trait::async_trait;

use crate::domain::billing::entities::{
    ConnectedAccount, Customer, Invoice, Payment, PaymentMethod, Price, Product, Subscription,
};
use crate::domain::foundation::DomainError;

/// Port for the billing state repository.
#[async_trait]
pub trait BillingRepository: Send + Sync {
    // ── Customers ────────────────────────────────────────────────────

    async fn find_customer(&self, provider_customer_id: &str)
        -> Result<Option<Customer>, DomainError>;

    /// Insert or overwrite by provider customer ID. Preserves an existing
    /// `user_id` link when the incoming row has none.
    async fn upsert_customer(&self, customer: &Customer) -> Result<(), DomainError>;

    /// Fetch the customer, inserting a shell row if absent. Returns the
    /// row and whether it was created.
    async fn get_or_create_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<(Customer, bool), DomainError>;

    /// Remove the customer row. Missing rows are not an error.
    async fn delete_customer(&self, provider_customer_id: &str) -> Result<(), DomainError>;

    // ── Subscriptions ────────────────────────────────────────────────

    async fn find_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    async fn upsert_subscription(&self, subscription: &Subscription)
        -> Result<(), DomainError>;

    /// Fetch the subscription, inserting a shell row if absent.
    async fn get_or_create_subscription(
        &self,
        provider_subscription_id: &str,
        provider_customer_id: &str,
    ) -> Result<(Subscription, bool), DomainError>;

    async fn list_subscriptions_for_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Vec<Subscription>, DomainError>;

    // ── Invoices ─────────────────────────────────────────────────────

    async fn find_invoice(&self, provider_invoice_id: &str)
        -> Result<Option<Invoice>, DomainError>;

    async fn upsert_invoice(&self, invoice: &Invoice) -> Result<(), DomainError>;

    // ── Payment methods ──────────────────────────────────────────────

    async fn find_payment_method(
        &self,
        provider_payment_method_id: &str,
    ) -> Result<Option<PaymentMethod>, DomainError>;

    /// Upsert preserving the stored `is_default` flag; the flag changes
    /// only through `set_default_payment_method`.
    async fn upsert_payment_method(&self, method: &PaymentMethod) -> Result<(), DomainError>;

    async fn delete_payment_method(
        &self,
        provider_payment_method_id: &str,
    ) -> Result<(), DomainError>;

    async fn list_payment_methods(
        &self,
        provider_customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, DomainError>;

    /// Atomically clear every default flag for the customer and set the
    /// named method as the default.
    ///
    /// # Errors
    ///
    /// `PaymentMethodNotFound` when the method does not exist or belongs
    /// to a different customer.
    async fn set_default_payment_method(
        &self,
        provider_customer_id: &str,
        provider_payment_method_id: &str,
    ) -> Result<(), DomainError>;

    // ── Catalog ──────────────────────────────────────────────────────

    async fn find_product(&self, provider_product_id: &str)
        -> Result<Option<Product>, DomainError>;

    async fn upsert_product(&self, product: &Product) -> Result<(), DomainError>;

    /// Keep the row, clear `active`. Missing rows are not an error.
    async fn deactivate_product(&self, provider_product_id: &str) -> Result<(), DomainError>;

    async fn find_price(&self, provider_price_id: &str) -> Result<Option<Price>, DomainError>;

    async fn upsert_price(&self, price: &Price) -> Result<(), DomainError>;

    async fn deactivate_price(&self, provider_price_id: &str) -> Result<(), DomainError>;

    // ── Payments ─────────────────────────────────────────────────────

    async fn find_payment(
        &self,
        provider_payment_intent_id: &str,
    ) -> Result<Option<Payment>, DomainError>;

    async fn upsert_payment(&self, payment: &Payment) -> Result<(), DomainError>;

    // ── Connected accounts ───────────────────────────────────────────

    async fn find_connected_account(
        &self,
        provider_account_id: &str,
    ) -> Result<Option<ConnectedAccount>, DomainError>;

    async fn upsert_connected_account(
        &self,
        account: &ConnectedAccount,
    ) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn BillingRepository) {}
    }
}
