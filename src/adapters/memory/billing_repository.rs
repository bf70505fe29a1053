//! In-memory billing repository for testing.
//!
//! All entity maps sit behind one lock so the compound default-swap is
//! atomic, mirroring the transaction the Postgres adapter uses.
//!
//! # Security Note
//!
//! Test/dev only. Lock operations use `.expect()` and will panic on a
//! poisoned lock.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::billing::entities::{
    ConnectedAccount, Customer, Invoice, Payment, PaymentMethod, Price, Product, Subscription,
};
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::BillingRepository;

#[derive(Default)]
struct Inner {
    customers: HashMap<String, Customer>,
    subscriptions: HashMap<String, Subscription>,
    invoices: HashMap<String, Invoice>,
    payment_methods: HashMap<String, PaymentMethod>,
    products: HashMap<String, Product>,
    prices: HashMap<String, Price>,
    payments: HashMap<String, Payment>,
    accounts: HashMap<String, ConnectedAccount>,
}

/// In-memory `BillingRepository`.
pub struct InMemoryBillingRepository {
    inner: RwLock<Inner>,
}

impl InMemoryBillingRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .expect("InMemoryBillingRepository: lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .expect("InMemoryBillingRepository: lock poisoned")
    }
}

impl Default for InMemoryBillingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingRepository for InMemoryBillingRepository {
    // ── Customers ────────────────────────────────────────────────────

    async fn find_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<Customer>, DomainError> {
        Ok(self.read().customers.get(provider_customer_id).cloned())
    }

    async fn upsert_customer(&self, customer: &Customer) -> Result<(), DomainError> {
        let mut inner = self.write();
        let mut row = customer.clone();
        if let Some(existing) = inner.customers.get(&customer.provider_customer_id) {
            // The user link and creation time belong to the local row.
            if row.user_id.is_none() {
                row.user_id = existing.user_id;
            }
            row.created_at = existing.created_at;
        }
        inner.customers.insert(row.provider_customer_id.clone(), row);
        Ok(())
    }

    async fn get_or_create_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<(Customer, bool), DomainError> {
        let mut inner = self.write();
        if let Some(existing) = inner.customers.get(provider_customer_id) {
            return Ok((existing.clone(), false));
        }
        let shell = Customer::shell(provider_customer_id, Utc::now());
        inner
            .customers
            .insert(provider_customer_id.to_string(), shell.clone());
        Ok((shell, true))
    }

    async fn delete_customer(&self, provider_customer_id: &str) -> Result<(), DomainError> {
        self.write().customers.remove(provider_customer_id);
        Ok(())
    }

    // ── Subscriptions ────────────────────────────────────────────────

    async fn find_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .read()
            .subscriptions
            .get(provider_subscription_id)
            .cloned())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut inner = self.write();
        let mut row = subscription.clone();
        if let Some(existing) = inner
            .subscriptions
            .get(&subscription.provider_subscription_id)
        {
            row.created_at = existing.created_at;
        }
        inner
            .subscriptions
            .insert(row.provider_subscription_id.clone(), row);
        Ok(())
    }

    async fn get_or_create_subscription(
        &self,
        provider_subscription_id: &str,
        provider_customer_id: &str,
    ) -> Result<(Subscription, bool), DomainError> {
        let mut inner = self.write();
        if let Some(existing) = inner.subscriptions.get(provider_subscription_id) {
            return Ok((existing.clone(), false));
        }
        let shell =
            Subscription::shell(provider_subscription_id, provider_customer_id, Utc::now());
        inner
            .subscriptions
            .insert(provider_subscription_id.to_string(), shell.clone());
        Ok((shell, true))
    }

    async fn list_subscriptions_for_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Vec<Subscription>, DomainError> {
        let mut subscriptions: Vec<Subscription> = self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.customer_id == provider_customer_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.provider_subscription_id.cmp(&b.provider_subscription_id));
        Ok(subscriptions)
    }

    // ── Invoices ─────────────────────────────────────────────────────

    async fn find_invoice(
        &self,
        provider_invoice_id: &str,
    ) -> Result<Option<Invoice>, DomainError> {
        Ok(self.read().invoices.get(provider_invoice_id).cloned())
    }

    async fn upsert_invoice(&self, invoice: &Invoice) -> Result<(), DomainError> {
        let mut inner = self.write();
        let mut row = invoice.clone();
        if let Some(existing) = inner.invoices.get(&invoice.provider_invoice_id) {
            row.created_at = existing.created_at;
        }
        inner.invoices.insert(row.provider_invoice_id.clone(), row);
        Ok(())
    }

    // ── Payment methods ──────────────────────────────────────────────

    async fn find_payment_method(
        &self,
        provider_payment_method_id: &str,
    ) -> Result<Option<PaymentMethod>, DomainError> {
        Ok(self
            .read()
            .payment_methods
            .get(provider_payment_method_id)
            .cloned())
    }

    async fn upsert_payment_method(&self, method: &PaymentMethod) -> Result<(), DomainError> {
        let mut inner = self.write();
        let mut row = method.clone();
        if let Some(existing) = inner
            .payment_methods
            .get(&method.provider_payment_method_id)
        {
            // The default flag only changes via set_default_payment_method,
            // and a method re-attached to another customer never carries
            // its old default flag with it.
            row.is_default = existing.is_default && existing.customer_id == row.customer_id;
            row.created_at = existing.created_at;
        }
        inner
            .payment_methods
            .insert(row.provider_payment_method_id.clone(), row);
        Ok(())
    }

    async fn delete_payment_method(
        &self,
        provider_payment_method_id: &str,
    ) -> Result<(), DomainError> {
        self.write()
            .payment_methods
            .remove(provider_payment_method_id);
        Ok(())
    }

    async fn list_payment_methods(
        &self,
        provider_customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, DomainError> {
        let mut methods: Vec<PaymentMethod> = self
            .read()
            .payment_methods
            .values()
            .filter(|m| m.customer_id == provider_customer_id)
            .cloned()
            .collect();
        methods.sort_by(|a, b| {
            a.provider_payment_method_id
                .cmp(&b.provider_payment_method_id)
        });
        Ok(methods)
    }

    async fn set_default_payment_method(
        &self,
        provider_customer_id: &str,
        provider_payment_method_id: &str,
    ) -> Result<(), DomainError> {
        let mut inner = self.write();

        let belongs = inner
            .payment_methods
            .get(provider_payment_method_id)
            .map(|m| m.customer_id == provider_customer_id)
            .unwrap_or(false);
        if !belongs {
            return Err(DomainError::not_found(
                ErrorCode::PaymentMethodNotFound,
                provider_payment_method_id,
            ));
        }

        let now = Utc::now();
        for method in inner.payment_methods.values_mut() {
            if method.customer_id == provider_customer_id {
                let make_default =
                    method.provider_payment_method_id == provider_payment_method_id;
                if method.is_default != make_default {
                    method.is_default = make_default;
                    method.updated_at = now;
                }
            }
        }
        Ok(())
    }

    // ── Catalog ──────────────────────────────────────────────────────

    async fn find_product(
        &self,
        provider_product_id: &str,
    ) -> Result<Option<Product>, DomainError> {
        Ok(self.read().products.get(provider_product_id).cloned())
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), DomainError> {
        let mut inner = self.write();
        let mut row = product.clone();
        if let Some(existing) = inner.products.get(&product.provider_product_id) {
            row.created_at = existing.created_at;
        }
        inner.products.insert(row.provider_product_id.clone(), row);
        Ok(())
    }

    async fn deactivate_product(&self, provider_product_id: &str) -> Result<(), DomainError> {
        let mut inner = self.write();
        if let Some(product) = inner.products.get_mut(provider_product_id) {
            product.active = false;
            product.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_price(&self, provider_price_id: &str) -> Result<Option<Price>, DomainError> {
        Ok(self.read().prices.get(provider_price_id).cloned())
    }

    async fn upsert_price(&self, price: &Price) -> Result<(), DomainError> {
        let mut inner = self.write();
        let mut row = price.clone();
        if let Some(existing) = inner.prices.get(&price.provider_price_id) {
            row.created_at = existing.created_at;
        }
        inner.prices.insert(row.provider_price_id.clone(), row);
        Ok(())
    }

    async fn deactivate_price(&self, provider_price_id: &str) -> Result<(), DomainError> {
        let mut inner = self.write();
        if let Some(price) = inner.prices.get_mut(provider_price_id) {
            price.active = false;
            price.updated_at = Utc::now();
        }
        Ok(())
    }

    // ── Payments ─────────────────────────────────────────────────────

    async fn find_payment(
        &self,
        provider_payment_intent_id: &str,
    ) -> Result<Option<Payment>, DomainError> {
        Ok(self
            .read()
            .payments
            .get(provider_payment_intent_id)
            .cloned())
    }

    async fn upsert_payment(&self, payment: &Payment) -> Result<(), DomainError> {
        let mut inner = self.write();
        let mut row = payment.clone();
        if let Some(existing) = inner.payments.get(&payment.provider_payment_intent_id) {
            row.created_at = existing.created_at;
        }
        inner
            .payments
            .insert(row.provider_payment_intent_id.clone(), row);
        Ok(())
    }

    // ── Connected accounts ───────────────────────────────────────────

    async fn find_connected_account(
        &self,
        provider_account_id: &str,
    ) -> Result<Option<ConnectedAccount>, DomainError> {
        Ok(self.read().accounts.get(provider_account_id).cloned())
    }

    async fn upsert_connected_account(
        &self,
        account: &ConnectedAccount,
    ) -> Result<(), DomainError> {
        let mut inner = self.write();
        let mut row = account.clone();
        if let Some(existing) = inner.accounts.get(&account.provider_account_id) {
            row.created_at = existing.created_at;
        }
        inner.accounts.insert(row.provider_account_id.clone(), row);
        Ok(())
    }
}


#[cfg(test)]
mod default_exclusivity_props {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Attach { customer: u8, method: u8 },
        SetDefault { customer: u8, method: u8 },
        Detach { method: u8 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4u8, 0..8u8).prop_map(|(customer, method)| Op::Attach { customer, method }),
            (0..4u8, 0..8u8).prop_map(|(customer, method)| Op::SetDefault { customer, method }),
            (0..8u8).prop_map(|method| Op::Detach { method }),
        ]
    }

    fn method(id: u8, customer: u8) -> PaymentMethod {
        PaymentMethod {
            provider_payment_method_id: format!("pm_{}", id),
            customer_id: format!("cus_{}", customer),
            kind: crate::domain::billing::PaymentMethodKind::Card,
            brand: None,
            last4: None,
            exp_month: None,
            exp_year: None,
            is_default: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    proptest! {
        // Whatever interleaving of attach / set-default / detach the
        // webhook stream produces, each customer ends with at most one
        // default method, and never a default owned by someone else.
        #[test]
        fn at_most_one_default_per_customer(
            ops in proptest::collection::vec(op_strategy(), 1..48)
        ) {
            futures::executor::block_on(async move {
                let repo = InMemoryBillingRepository::new();

                for op in ops {
                    match op {
                        Op::Attach { customer, method: id } => {
                            repo.upsert_payment_method(&method(id, customer))
                                .await
                                .map_err(|e| TestCaseError::fail(e.to_string()))?;
                        }
                        Op::SetDefault { customer, method: id } => {
                            // Fails when the method is missing or owned
                            // by another customer; both are fine here.
                            let _ = repo
                                .set_default_payment_method(
                                    &format!("cus_{}", customer),
                                    &format!("pm_{}", id),
                                )
                                .await;
                        }
                        Op::Detach { method: id } => {
                            repo.delete_payment_method(&format!("pm_{}", id))
                                .await
                                .map_err(|e| TestCaseError::fail(e.to_string()))?;
                        }
                    }
                }

                for customer in 0..4u8 {
                    let customer_id = format!("cus_{}", customer);
                    let methods = repo
                        .list_payment_methods(&customer_id)
                        .await
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    let defaults = methods.iter().filter(|m| m.is_default).count();
                    prop_assert!(defaults <= 1, "customer {} has {} defaults", customer_id, defaults);
                    prop_assert!(methods.iter().all(|m| m.customer_id == customer_id));
                }

                Ok(())
            })?;
        }
    }
}
