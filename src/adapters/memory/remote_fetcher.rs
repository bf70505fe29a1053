//! Configurable mock of the provider API for testing.
//!
//! Objects are registered as raw JSON payloads (the same shape webhook
//! tests use) and deserialized on fetch, so fixtures exercise the same
//! extraction paths as the real client.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::billing::normalizer::{
    AccountObject, CustomerObject, InvoiceObject, PaymentMethodObject, PriceObject,
    ProductObject, SubscriptionObject,
};
use crate::ports::remote_fetcher::{
    CheckoutSessionRequest, FetchError, HostedSession, RemoteFetcher,
};

#[derive(Default)]
struct Inner {
    customers: HashMap<String, serde_json::Value>,
    subscriptions: HashMap<String, serde_json::Value>,
    invoices: HashMap<String, serde_json::Value>,
    payment_methods: HashMap<String, serde_json::Value>,
    products: HashMap<String, serde_json::Value>,
    prices: HashMap<String, serde_json::Value>,
    accounts: HashMap<String, serde_json::Value>,
    fail_network: bool,
    fetch_count: u64,
}

/// Mock `RemoteFetcher` with registered fixtures.
pub struct MockRemoteFetcher {
    inner: RwLock<Inner>,
}

impl MockRemoteFetcher {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn insert(map: &mut HashMap<String, serde_json::Value>, object: serde_json::Value) {
        let id = object
            .get("id")
            .and_then(|v| v.as_str())
            .expect("mock fixture requires an id")
            .to_string();
        map.insert(id, object);
    }

    pub fn add_customer(&self, object: serde_json::Value) {
        Self::insert(&mut self.write().customers, object);
    }

    pub fn add_subscription(&self, object: serde_json::Value) {
        Self::insert(&mut self.write().subscriptions, object);
    }

    pub fn add_invoice(&self, object: serde_json::Value) {
        Self::insert(&mut self.write().invoices, object);
    }

    pub fn add_payment_method(&self, object: serde_json::Value) {
        Self::insert(&mut self.write().payment_methods, object);
    }

    pub fn add_product(&self, object: serde_json::Value) {
        Self::insert(&mut self.write().products, object);
    }

    pub fn add_price(&self, object: serde_json::Value) {
        Self::insert(&mut self.write().prices, object);
    }

    pub fn add_account(&self, object: serde_json::Value) {
        Self::insert(&mut self.write().accounts, object);
    }

    /// Make every subsequent call fail with a network error.
    pub fn fail_with_network_error(&self) {
        self.write().fail_network = true;
    }

    /// Number of fetch calls made (for asserting refresh behavior).
    pub fn fetch_count(&self) -> u64 {
        self.read().fetch_count
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("MockRemoteFetcher: lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("MockRemoteFetcher: lock poisoned")
    }

    fn fetch<T: DeserializeOwned>(
        &self,
        map: impl Fn(&Inner) -> &HashMap<String, serde_json::Value>,
        object: &'static str,
        id: &str,
    ) -> Result<T, FetchError> {
        let mut inner = self.write();
        inner.fetch_count += 1;
        if inner.fail_network {
            return Err(FetchError::Network("connection refused".to_string()));
        }
        let value = map(&*inner).get(id).cloned().ok_or_else(|| FetchError::NotFound {
            object,
            id: id.to_string(),
        })?;
        serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

impl Default for MockRemoteFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFetcher for MockRemoteFetcher {
    async fn fetch_customer(&self, customer_id: &str) -> Result<CustomerObject, FetchError> {
        self.fetch(|i| &i.customers, "customer", customer_id)
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, FetchError> {
        self.fetch(|i| &i.subscriptions, "subscription", subscription_id)
    }

    async fn fetch_invoice(&self, invoice_id: &str) -> Result<InvoiceObject, FetchError> {
        self.fetch(|i| &i.invoices, "invoice", invoice_id)
    }

    async fn fetch_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<PaymentMethodObject, FetchError> {
        self.fetch(|i| &i.payment_methods, "payment_method", payment_method_id)
    }

    async fn fetch_product(&self, product_id: &str) -> Result<ProductObject, FetchError> {
        self.fetch(|i| &i.products, "product", product_id)
    }

    async fn fetch_price(&self, price_id: &str) -> Result<PriceObject, FetchError> {
        self.fetch(|i| &i.prices, "price", price_id)
    }

    async fn fetch_account(&self, account_id: &str) -> Result<AccountObject, FetchError> {
        self.fetch(|i| &i.accounts, "account", account_id)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<HostedSession, FetchError> {
        if self.read().fail_network {
            return Err(FetchError::Network("connection refused".to_string()));
        }
        Ok(HostedSession {
            id: format!("cs_test_{}", request.price_id),
            url: "https://checkout.example.com/session".to_string(),
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        _return_url: &str,
    ) -> Result<HostedSession, FetchError> {
        if self.read().fail_network {
            return Err(FetchError::Network("connection refused".to_string()));
        }
        Ok(HostedSession {
            id: format!("bps_test_{}", customer_id),
            url: "https://billing.example.com/portal".to_string(),
        })
    }

    async fn create_login_link(&self, account_id: &str) -> Result<HostedSession, FetchError> {
        if self.read().fail_network {
            return Err(FetchError::Network("connection refused".to_string()));
        }
        Ok(HostedSession {
            id: format!("link_test_{}", account_id),
            url: "https://connect.example.com/login".to_string(),
        })
    }
}
