//! Reconciliation engine.
//!
//! Applies normalized events to local billing state. Dispatch is a match
//! over the `(EntityKind, EventAction)` pair; each arm implements one of
//! the reconciliation policies:
//!
//! - upsert-by-provider-id for payload-complete objects
//! - refresh-from-remote for subscription-shaped events
//! - soft-delete/terminate for deletions
//! - cross-reference resolution with warn-and-continue for invoices
//!
//! Writes are last-write-wins with no version checks. Events referencing
//! entities we do not hold locally are logged and acknowledged, never
//! failed, so the provider does not redeliver them forever.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::ports::remote_fetcher::FetchError;
use crate::ports::{BillingRepository, RemoteFetcher};

use super::entities::SubscriptionStatus;
use super::errors::ReconcileError;
use super::normalizer::{
    AccountObject, CheckoutSessionObject, CustomerObject, EntityKind, EventAction,
    InvoiceObject, NormalizedEvent, PaymentIntentObject, PaymentMethodObject, PriceObject,
    ProductObject, SubscriptionObject,
};

/// What reconciliation did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local state was updated.
    Applied,
    /// Event was understood but not applicable; acknowledged as handled.
    Skipped(String),
    /// Event type is not in the handler table.
    Ignored,
}

/// Applies normalized events to the repository, refreshing from the
/// provider where payloads are not authoritative.
pub struct ReconciliationEngine {
    repository: Arc<dyn BillingRepository>,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl ReconciliationEngine {
    pub fn new(
        repository: Arc<dyn BillingRepository>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        Self {
            repository,
            fetcher,
        }
    }

    /// Apply one normalized event.
    ///
    /// # Errors
    ///
    /// Storage and retryable fetch failures propagate so the caller can
    /// mark the event failed and return 500 for redelivery. Malformed
    /// payloads for handled types also propagate.
    pub async fn apply(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match (event.kind, event.action) {
            (EntityKind::Customer, EventAction::Upsert) => self.upsert_customer(event).await,
            (EntityKind::Customer, EventAction::Delete) => self.delete_customer(event).await,

            (EntityKind::Subscription, EventAction::Refresh) => {
                self.refresh_subscription(event).await
            }
            (EntityKind::Subscription, EventAction::Delete) => {
                self.terminate_subscription(event).await
            }

            (EntityKind::CheckoutSession, EventAction::Complete) => {
                self.complete_checkout(event).await
            }

            (EntityKind::Invoice, EventAction::Upsert) => self.upsert_invoice(event).await,

            (EntityKind::Payment, EventAction::Upsert) => self.upsert_payment(event).await,

            (EntityKind::PaymentMethod, EventAction::Upsert) => {
                self.upsert_payment_method(event).await
            }
            (EntityKind::PaymentMethod, EventAction::Delete) => {
                self.delete_payment_method(event).await
            }

            (EntityKind::Product, EventAction::Upsert) => self.upsert_product(event).await,
            (EntityKind::Product, EventAction::Deactivate) => {
                self.deactivate_product(event).await
            }

            (EntityKind::Price, EventAction::Upsert) => self.upsert_price(event).await,
            (EntityKind::Price, EventAction::Deactivate) => self.deactivate_price(event).await,

            (EntityKind::ConnectedAccount, EventAction::Upsert) => {
                self.upsert_account(event).await
            }

            (EntityKind::Unknown, _) | (_, EventAction::Ignore) => {
                info!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "ignoring unhandled event type"
                );
                Ok(ReconcileOutcome::Ignored)
            }

            (kind, action) => {
                // Combinations the normalizer never produces.
                warn!(
                    event_id = %event.event_id,
                    ?kind,
                    ?action,
                    "unexpected kind/action pair, ignoring"
                );
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    /// Atomically swap the customer's default payment method.
    ///
    /// Clears every other default for the customer and sets the named
    /// method, inside one repository transaction.
    pub async fn set_default_payment_method(
        &self,
        provider_customer_id: &str,
        provider_payment_method_id: &str,
    ) -> Result<(), ReconcileError> {
        self.repository
            .set_default_payment_method(provider_customer_id, provider_payment_method_id)
            .await?;
        info!(
            customer_id = %provider_customer_id,
            payment_method_id = %provider_payment_method_id,
            "default payment method updated"
        );
        Ok(())
    }

    // ── Customers ────────────────────────────────────────────────────

    async fn upsert_customer(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: CustomerObject = parse_object(&event.object)?;
        let customer = object.into_entity(Utc::now());
        self.repository.upsert_customer(&customer).await?;
        info!(customer_id = %customer.provider_customer_id, "customer upserted");
        Ok(ReconcileOutcome::Applied)
    }

    async fn delete_customer(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(customer_id) = event.entity_id.as_deref() else {
            return Err(ReconcileError::MissingField("id"));
        };
        self.repository.delete_customer(customer_id).await?;
        info!(customer_id = %customer_id, "customer deleted");
        Ok(ReconcileOutcome::Applied)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Created/updated events carry a payload rendered with the account's
    /// pinned API version, which may predate the fields we read. The
    /// payload is used only for IDs; the object itself is re-fetched.
    async fn refresh_subscription(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: SubscriptionObject = parse_object(&event.object)?;

        let (_, customer_created) = self
            .repository
            .get_or_create_customer(&object.customer)
            .await?;
        if customer_created {
            info!(customer_id = %object.customer, "created customer shell for subscription event");
        }

        self.refresh_subscription_by_id(&object.id, &object.customer).await
    }

    async fn refresh_subscription_by_id(
        &self,
        subscription_id: &str,
        customer_id: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let fetched = match self.fetcher.fetch_subscription(subscription_id).await {
            Ok(object) => object,
            Err(FetchError::NotFound { .. }) => {
                warn!(
                    subscription_id = %subscription_id,
                    "subscription gone at provider, skipping refresh"
                );
                return Ok(ReconcileOutcome::Skipped(format!(
                    "subscription {} not found at provider",
                    subscription_id
                )));
            }
            Err(err) => return Err(err.into()),
        };

        let mut subscription = fetched.into_entity(Utc::now());
        if subscription.customer_id.is_empty() {
            subscription.customer_id = customer_id.to_string();
        }
        self.repository.upsert_subscription(&subscription).await?;
        info!(
            subscription_id = %subscription.provider_subscription_id,
            status = %subscription.status.as_str(),
            "subscription refreshed from provider"
        );
        Ok(ReconcileOutcome::Applied)
    }

    /// Termination is a soft delete: the row stays with status canceled
    /// and an `ended_at` timestamp so billing history survives.
    async fn terminate_subscription(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: SubscriptionObject = parse_object(&event.object)?;

        let Some(mut subscription) = self.repository.find_subscription(&object.id).await? else {
            warn!(
                subscription_id = %object.id,
                "deletion event for unknown subscription, skipping"
            );
            return Ok(ReconcileOutcome::Skipped(format!(
                "subscription {} not found locally",
                object.id
            )));
        };

        let now = Utc::now();
        subscription.status = SubscriptionStatus::Canceled;
        subscription.canceled_at = subscription.canceled_at.or(Some(now));
        subscription.ended_at = Some(now);
        subscription.updated_at = now;
        self.repository.upsert_subscription(&subscription).await?;
        info!(subscription_id = %object.id, "subscription terminated");
        Ok(ReconcileOutcome::Applied)
    }

    // ── Checkout ─────────────────────────────────────────────────────

    /// Checkout completion is the entry point for new customers: ensure
    /// the customer and subscription rows exist, then pull the current
    /// subscription state from the provider.
    async fn complete_checkout(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: CheckoutSessionObject = parse_object(&event.object)?;

        let Some(customer_id) = object.customer.as_deref() else {
            warn!(
                session_id = %object.id,
                "checkout session completed without a customer, skipping"
            );
            return Ok(ReconcileOutcome::Skipped(
                "checkout session has no customer".to_string(),
            ));
        };

        let (_, created) = self.repository.get_or_create_customer(customer_id).await?;
        if created {
            info!(customer_id = %customer_id, "created customer from checkout completion");
        }

        let Some(subscription_id) = object.subscription.as_deref() else {
            // One-time payment checkouts carry no subscription; the
            // payment_intent events cover them.
            return Ok(ReconcileOutcome::Applied);
        };

        self.repository
            .get_or_create_subscription(subscription_id, customer_id)
            .await?;
        self.refresh_subscription_by_id(subscription_id, customer_id).await
    }

    // ── Invoices ─────────────────────────────────────────────────────

    /// Invoices resolve their subscription and connected-account
    /// references against local state. A reference we do not hold yet is
    /// logged and left `None`; the invoice persists regardless, since the
    /// referenced entity's own events will arrive in their own time.
    async fn upsert_invoice(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: InvoiceObject = parse_object(&event.object)?;

        if self.repository.find_customer(&object.customer).await?.is_none() {
            warn!(
                invoice_id = %object.id,
                customer_id = %object.customer,
                "invoice event for unknown customer, skipping"
            );
            return Ok(ReconcileOutcome::Skipped(format!(
                "customer {} not found locally",
                object.customer
            )));
        }

        let subscription_ref = match &object.subscription {
            Some(subscription_id) => {
                match self.repository.find_subscription(subscription_id).await? {
                    Some(_) => Some(subscription_id.clone()),
                    None => {
                        warn!(
                            invoice_id = %object.id,
                            subscription_id = %subscription_id,
                            "invoice references unknown subscription, storing without link"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let account_id = object
            .destination_account()
            .map(str::to_string)
            .or_else(|| event.account.clone());
        let account_ref = match &account_id {
            Some(account_id) => {
                match self.repository.find_connected_account(account_id).await? {
                    Some(_) => Some(account_id.clone()),
                    None => {
                        warn!(
                            invoice_id = %object.id,
                            account_id = %account_id,
                            "invoice references unknown connected account, storing without link"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let mut invoice = object.into_entity(Utc::now());
        invoice.subscription_id = subscription_ref;
        invoice.connected_account_id = account_ref;
        self.repository.upsert_invoice(&invoice).await?;
        info!(
            invoice_id = %invoice.provider_invoice_id,
            status = %invoice.status.as_str(),
            amount_paid = invoice.amount_paid,
            "invoice upserted"
        );

        // Payment outcomes move the subscription's status (active to
        // past_due and back); mirror whatever the provider now reports.
        if let Some(subscription_id) = invoice.subscription_id.clone() {
            self.refresh_subscription_by_id(&subscription_id, &invoice.customer_id)
                .await?;
        }
        Ok(ReconcileOutcome::Applied)
    }

    // ── Payments ─────────────────────────────────────────────────────

    async fn upsert_payment(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: PaymentIntentObject = parse_object(&event.object)?;

        let Some(customer_id) = object.customer.clone() else {
            return Ok(ReconcileOutcome::Skipped(
                "payment intent has no customer".to_string(),
            ));
        };
        if self.repository.find_customer(&customer_id).await?.is_none() {
            warn!(
                payment_intent_id = %object.id,
                customer_id = %customer_id,
                "payment event for unknown customer, skipping"
            );
            return Ok(ReconcileOutcome::Skipped(format!(
                "customer {} not found locally",
                customer_id
            )));
        }

        let payment = object.into_entity(customer_id, Utc::now());
        self.repository.upsert_payment(&payment).await?;
        info!(
            payment_intent_id = %payment.provider_payment_intent_id,
            status = %payment.status,
            "payment upserted"
        );
        Ok(ReconcileOutcome::Applied)
    }

    // ── Payment methods ──────────────────────────────────────────────

    async fn upsert_payment_method(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: PaymentMethodObject = parse_object(&event.object)?;

        let Some(customer_id) = object.customer.clone() else {
            // Detached-then-updated methods have no customer; nothing to
            // attach the row to.
            return Ok(ReconcileOutcome::Skipped(
                "payment method has no customer".to_string(),
            ));
        };
        if self.repository.find_customer(&customer_id).await?.is_none() {
            warn!(
                payment_method_id = %object.id,
                customer_id = %customer_id,
                "payment method event for unknown customer, skipping"
            );
            return Ok(ReconcileOutcome::Skipped(format!(
                "customer {} not found locally",
                customer_id
            )));
        }

        let method = object.into_entity(customer_id, Utc::now());
        self.repository.upsert_payment_method(&method).await?;
        info!(
            payment_method_id = %method.provider_payment_method_id,
            "payment method upserted"
        );
        Ok(ReconcileOutcome::Applied)
    }

    async fn delete_payment_method(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(method_id) = event.entity_id.as_deref() else {
            return Err(ReconcileError::MissingField("id"));
        };
        self.repository.delete_payment_method(method_id).await?;
        info!(payment_method_id = %method_id, "payment method removed");
        Ok(ReconcileOutcome::Applied)
    }

    // ── Catalog ──────────────────────────────────────────────────────

    async fn upsert_product(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: ProductObject = parse_object(&event.object)?;
        let product = object.into_entity(Utc::now());
        self.repository.upsert_product(&product).await?;
        info!(product_id = %product.provider_product_id, "product upserted");
        Ok(ReconcileOutcome::Applied)
    }

    async fn deactivate_product(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(product_id) = event.entity_id.as_deref() else {
            return Err(ReconcileError::MissingField("id"));
        };
        self.repository.deactivate_product(product_id).await?;
        info!(product_id = %product_id, "product deactivated");
        Ok(ReconcileOutcome::Applied)
    }

    async fn upsert_price(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: PriceObject = parse_object(&event.object)?;
        let price = object.into_entity(Utc::now());
        self.repository.upsert_price(&price).await?;
        info!(price_id = %price.provider_price_id, "price upserted");
        Ok(ReconcileOutcome::Applied)
    }

    async fn deactivate_price(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(price_id) = event.entity_id.as_deref() else {
            return Err(ReconcileError::MissingField("id"));
        };
        self.repository.deactivate_price(price_id).await?;
        info!(price_id = %price_id, "price deactivated");
        Ok(ReconcileOutcome::Applied)
    }

    // ── Connected accounts ───────────────────────────────────────────

    async fn upsert_account(
        &self,
        event: &NormalizedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let object: AccountObject = parse_object(&event.object)?;
        let account = object.into_entity(Utc::now());
        self.repository.upsert_connected_account(&account).await?;
        info!(account_id = %account.provider_account_id, "connected account upserted");
        Ok(ReconcileOutcome::Applied)
    }
}

fn parse_object<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, ReconcileError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ReconcileError::MalformedObject(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBillingRepository, MockRemoteFetcher};
    use crate::domain::billing::normalizer::normalize;
    use crate::domain::billing::provider_event::ProviderEventBuilder;

    fn engine_with(
        repository: Arc<InMemoryBillingRepository>,
        fetcher: Arc<MockRemoteFetcher>,
    ) -> ReconciliationEngine {
        ReconciliationEngine::new(repository, fetcher)
    }

    fn subscription_payload(id: &str, customer: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "customer": customer,
            "status": status,
            "current_period_start": 1700000000,
            "current_period_end": 1702592000,
            "items": {
                "data": [{
                    "price": {
                        "id": "price_monthly",
                        "recurring": {"interval": "month", "interval_count": 1}
                    }
                }]
            }
        })
    }

    // ══════════════════════════════════════════════════════════════
    // Customer Events
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn customer_created_upserts_row() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let event = ProviderEventBuilder::new("customer.created")
            .object(serde_json::json!({
                "id": "cus_1",
                "email": "jo@example.com",
                "name": "Jo"
            }))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let customer = repo.find_customer("cus_1").await.unwrap().unwrap();
        assert_eq!(customer.email.as_deref(), Some("jo@example.com"));
    }

    #[tokio::test]
    async fn customer_updated_overwrites_fields() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        for email in ["old@example.com", "new@example.com"] {
            let event = ProviderEventBuilder::new("customer.updated")
                .object(serde_json::json!({"id": "cus_1", "email": email}))
                .build();
            engine.apply(&normalize(&event)).await.unwrap();
        }

        let customer = repo.find_customer("cus_1").await.unwrap().unwrap();
        assert_eq!(customer.email.as_deref(), Some("new@example.com"));
    }

    #[tokio::test]
    async fn customer_deleted_removes_row() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let created = ProviderEventBuilder::new("customer.created")
            .object(serde_json::json!({"id": "cus_1"}))
            .build();
        engine.apply(&normalize(&created)).await.unwrap();

        let deleted = ProviderEventBuilder::new("customer.deleted")
            .object(serde_json::json!({"id": "cus_1"}))
            .build();
        let outcome = engine.apply(&normalize(&deleted)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert!(repo.find_customer("cus_1").await.unwrap().is_none());
    }

    // ══════════════════════════════════════════════════════════════
    // Subscription Events (refresh-from-remote)
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn subscription_updated_refreshes_from_provider() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        // Provider holds a newer status than the webhook payload.
        fetcher.add_subscription(subscription_payload("sub_1", "cus_1", "active"));
        let engine = engine_with(repo.clone(), fetcher);

        let event = ProviderEventBuilder::new("customer.subscription.updated")
            .object(subscription_payload("sub_1", "cus_1", "incomplete"))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let sub = repo.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.price_id.as_deref(), Some("price_monthly"));
        // Customer shell was created for the referenced customer.
        assert!(repo.find_customer("cus_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn subscription_gone_at_provider_is_skipped() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let event = ProviderEventBuilder::new("customer.subscription.created")
            .object(subscription_payload("sub_missing", "cus_1", "active"))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
        assert!(repo.find_subscription("sub_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscription_fetch_outage_propagates() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        fetcher.fail_with_network_error();
        let engine = engine_with(repo, fetcher);

        let event = ProviderEventBuilder::new("customer.subscription.created")
            .object(subscription_payload("sub_1", "cus_1", "active"))
            .build();

        let result = engine.apply(&normalize(&event)).await;

        assert!(matches!(result, Err(ReconcileError::Fetch(_))));
    }

    #[tokio::test]
    async fn subscription_deleted_terminates_without_removing() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        fetcher.add_subscription(subscription_payload("sub_1", "cus_1", "active"));
        let engine = engine_with(repo.clone(), fetcher);

        let created = ProviderEventBuilder::new("customer.subscription.created")
            .object(subscription_payload("sub_1", "cus_1", "active"))
            .build();
        engine.apply(&normalize(&created)).await.unwrap();

        let deleted = ProviderEventBuilder::new("customer.subscription.deleted")
            .object(subscription_payload("sub_1", "cus_1", "canceled"))
            .build();
        let outcome = engine.apply(&normalize(&deleted)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let sub = repo.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(sub.ended_at.is_some());
    }

    #[tokio::test]
    async fn subscription_deleted_for_unknown_subscription_is_skipped() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo, fetcher);

        let event = ProviderEventBuilder::new("customer.subscription.deleted")
            .object(subscription_payload("sub_ghost", "cus_1", "canceled"))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn later_event_still_updates_canceled_subscription() {
        // Last-write-wins baseline: a redelivered update after
        // cancellation writes whatever the provider currently reports.
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        fetcher.add_subscription(subscription_payload("sub_1", "cus_1", "active"));
        let engine = engine_with(repo.clone(), fetcher.clone());

        let created = ProviderEventBuilder::new("customer.subscription.created")
            .object(subscription_payload("sub_1", "cus_1", "active"))
            .build();
        engine.apply(&normalize(&created)).await.unwrap();

        let deleted = ProviderEventBuilder::new("customer.subscription.deleted")
            .object(subscription_payload("sub_1", "cus_1", "canceled"))
            .build();
        engine.apply(&normalize(&deleted)).await.unwrap();

        // Provider now reports canceled; an out-of-order update refreshes
        // to the provider's current truth, not the stale payload.
        fetcher.add_subscription(subscription_payload("sub_1", "cus_1", "canceled"));
        let updated = ProviderEventBuilder::new("customer.subscription.updated")
            .object(subscription_payload("sub_1", "cus_1", "active"))
            .build();
        engine.apply(&normalize(&updated)).await.unwrap();

        let sub = repo.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
    }

    // ══════════════════════════════════════════════════════════════
    // Checkout Completion
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn checkout_completed_creates_customer_and_subscription() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        fetcher.add_subscription(subscription_payload("sub_new", "cus_new", "active"));
        let engine = engine_with(repo.clone(), fetcher);

        let event = ProviderEventBuilder::new("checkout.session.completed")
            .object(serde_json::json!({
                "id": "cs_1",
                "customer": "cus_new",
                "subscription": "sub_new",
                "mode": "subscription",
                "payment_status": "paid"
            }))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert!(repo.find_customer("cus_new").await.unwrap().is_some());
        let sub = repo.find_subscription("sub_new").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn checkout_without_subscription_only_ensures_customer() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let event = ProviderEventBuilder::new("checkout.session.completed")
            .object(serde_json::json!({
                "id": "cs_2",
                "customer": "cus_pay",
                "mode": "payment",
                "payment_status": "paid"
            }))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert!(repo.find_customer("cus_pay").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn checkout_without_customer_is_skipped() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo, fetcher);

        let event = ProviderEventBuilder::new("checkout.session.completed")
            .object(serde_json::json!({"id": "cs_3", "mode": "payment"}))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
    }

    // ══════════════════════════════════════════════════════════════
    // Invoice Events (cross-reference resolution)
    // ══════════════════════════════════════════════════════════════

    async fn seed_customer(engine: &ReconciliationEngine, id: &str) {
        let event = ProviderEventBuilder::new("customer.created")
            .object(serde_json::json!({"id": id}))
            .build();
        engine.apply(&normalize(&event)).await.unwrap();
    }

    #[tokio::test]
    async fn invoice_paid_upserts_with_resolved_subscription() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        fetcher.add_subscription(subscription_payload("sub_1", "cus_1", "active"));
        let engine = engine_with(repo.clone(), fetcher);

        seed_customer(&engine, "cus_1").await;
        let sub_event = ProviderEventBuilder::new("customer.subscription.created")
            .object(subscription_payload("sub_1", "cus_1", "active"))
            .build();
        engine.apply(&normalize(&sub_event)).await.unwrap();

        let invoice_event = ProviderEventBuilder::new("invoice.paid")
            .object(serde_json::json!({
                "id": "in_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "status": "paid",
                "amount_paid": 2500,
                "currency": "usd"
            }))
            .build();
        let outcome = engine.apply(&normalize(&invoice_event)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let invoice = repo.find_invoice("in_1").await.unwrap().unwrap();
        assert_eq!(invoice.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(invoice.amount_paid, 2500);
    }

    #[tokio::test]
    async fn invoice_before_subscription_persists_with_null_reference() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        seed_customer(&engine, "cus_1").await;

        // Invoice arrives before its subscription's created event.
        let invoice_event = ProviderEventBuilder::new("invoice.payment_succeeded")
            .object(serde_json::json!({
                "id": "in_early",
                "customer": "cus_1",
                "subscription": "sub_later",
                "status": "paid",
                "amount_paid": 999,
                "currency": "usd"
            }))
            .build();
        let outcome = engine.apply(&normalize(&invoice_event)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let invoice = repo.find_invoice("in_early").await.unwrap().unwrap();
        assert!(invoice.subscription_id.is_none());
        assert_eq!(invoice.amount_paid, 999);
    }

    #[tokio::test]
    async fn invoice_for_unknown_customer_is_skipped() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let event = ProviderEventBuilder::new("invoice.paid")
            .object(serde_json::json!({
                "id": "in_orphan",
                "customer": "cus_stranger",
                "amount_paid": 100
            }))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
        assert!(repo.find_invoice("in_orphan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invoice_payment_failed_records_status() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        seed_customer(&engine, "cus_1").await;

        let event = ProviderEventBuilder::new("invoice.payment_failed")
            .object(serde_json::json!({
                "id": "in_failed",
                "customer": "cus_1",
                "status": "open",
                "amount_paid": 0,
                "currency": "usd",
                "billing_reason": "subscription_cycle"
            }))
            .build();
        engine.apply(&normalize(&event)).await.unwrap();

        let invoice = repo.find_invoice("in_failed").await.unwrap().unwrap();
        assert_eq!(invoice.status.as_str(), "open");
        assert_eq!(invoice.amount_paid, 0);
    }

    #[tokio::test]
    async fn invoice_payment_failed_degrades_subscription_status() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        fetcher.add_subscription(subscription_payload("sub_123", "cus_1", "active"));
        let engine = engine_with(repo.clone(), fetcher.clone());

        seed_customer(&engine, "cus_1").await;
        let sub_event = ProviderEventBuilder::new("customer.subscription.created")
            .object(subscription_payload("sub_123", "cus_1", "active"))
            .build();
        engine.apply(&normalize(&sub_event)).await.unwrap();

        // The failed payment already moved the subscription at the
        // provider; the invoice event is what tells us to look.
        fetcher.add_subscription(subscription_payload("sub_123", "cus_1", "past_due"));
        let invoice_event = ProviderEventBuilder::new("invoice.payment_failed")
            .object(serde_json::json!({
                "id": "in_late",
                "customer": "cus_1",
                "subscription": "sub_123",
                "status": "open",
                "amount_paid": 0,
                "currency": "usd"
            }))
            .build();
        let outcome = engine.apply(&normalize(&invoice_event)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let subscription = repo.find_subscription("sub_123").await.unwrap().unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn invoice_paid_restores_subscription_status() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        fetcher.add_subscription(subscription_payload("sub_123", "cus_1", "past_due"));
        let engine = engine_with(repo.clone(), fetcher.clone());

        seed_customer(&engine, "cus_1").await;
        let sub_event = ProviderEventBuilder::new("customer.subscription.updated")
            .object(subscription_payload("sub_123", "cus_1", "past_due"))
            .build();
        engine.apply(&normalize(&sub_event)).await.unwrap();

        fetcher.add_subscription(subscription_payload("sub_123", "cus_1", "active"));
        let invoice_event = ProviderEventBuilder::new("invoice.paid")
            .object(serde_json::json!({
                "id": "in_recover",
                "customer": "cus_1",
                "subscription": "sub_123",
                "status": "paid",
                "amount_paid": 2500,
                "currency": "usd"
            }))
            .build();
        engine.apply(&normalize(&invoice_event)).await.unwrap();

        let subscription = repo.find_subscription("sub_123").await.unwrap().unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Active);
    }

    // ══════════════════════════════════════════════════════════════
    // Payment Method Events
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn payment_method_attached_then_detached() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        seed_customer(&engine, "cus_1").await;

        let attached = ProviderEventBuilder::new("payment_method.attached")
            .object(serde_json::json!({
                "id": "pm_1",
                "customer": "cus_1",
                "type": "card",
                "card": {"brand": "visa", "last4": "4242"}
            }))
            .build();
        engine.apply(&normalize(&attached)).await.unwrap();
        assert!(repo.find_payment_method("pm_1").await.unwrap().is_some());

        let detached = ProviderEventBuilder::new("payment_method.detached")
            .object(serde_json::json!({"id": "pm_1", "type": "card"}))
            .build();
        engine.apply(&normalize(&detached)).await.unwrap();
        assert!(repo.find_payment_method("pm_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payment_method_update_preserves_default_flag() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        seed_customer(&engine, "cus_1").await;

        let attached = ProviderEventBuilder::new("payment_method.attached")
            .object(serde_json::json!({
                "id": "pm_1",
                "customer": "cus_1",
                "type": "card",
                "card": {"brand": "visa", "last4": "4242", "exp_year": 2027}
            }))
            .build();
        engine.apply(&normalize(&attached)).await.unwrap();
        engine.set_default_payment_method("cus_1", "pm_1").await.unwrap();

        // Card network reissues the card; the default flag must survive.
        let updated = ProviderEventBuilder::new("payment_method.automatically_updated")
            .object(serde_json::json!({
                "id": "pm_1",
                "customer": "cus_1",
                "type": "card",
                "card": {"brand": "visa", "last4": "4242", "exp_year": 2031}
            }))
            .build();
        engine.apply(&normalize(&updated)).await.unwrap();

        let pm = repo.find_payment_method("pm_1").await.unwrap().unwrap();
        assert!(pm.is_default);
        assert_eq!(pm.exp_year, Some(2031));
    }

    #[tokio::test]
    async fn set_default_swaps_exclusively() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        seed_customer(&engine, "cus_1").await;
        for pm_id in ["pm_a", "pm_b"] {
            let event = ProviderEventBuilder::new("payment_method.attached")
                .object(serde_json::json!({
                    "id": pm_id,
                    "customer": "cus_1",
                    "type": "card",
                    "card": {"brand": "visa", "last4": "4242"}
                }))
                .build();
            engine.apply(&normalize(&event)).await.unwrap();
        }

        engine.set_default_payment_method("cus_1", "pm_a").await.unwrap();
        engine.set_default_payment_method("cus_1", "pm_b").await.unwrap();

        let methods = repo.list_payment_methods("cus_1").await.unwrap();
        let defaults: Vec<_> = methods.iter().filter(|m| m.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].provider_payment_method_id, "pm_b");
    }

    // ══════════════════════════════════════════════════════════════
    // Catalog and Account Events
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn product_deleted_deactivates_in_place() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let created = ProviderEventBuilder::new("product.created")
            .object(serde_json::json!({"id": "prod_1", "name": "Pro Plan", "active": true}))
            .build();
        engine.apply(&normalize(&created)).await.unwrap();

        let deleted = ProviderEventBuilder::new("product.deleted")
            .object(serde_json::json!({"id": "prod_1"}))
            .build();
        engine.apply(&normalize(&deleted)).await.unwrap();

        let product = repo.find_product("prod_1").await.unwrap().unwrap();
        assert!(!product.active);
        assert_eq!(product.name, "Pro Plan");
    }

    #[tokio::test]
    async fn price_deleted_deactivates_in_place() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let created = ProviderEventBuilder::new("price.created")
            .object(serde_json::json!({
                "id": "price_1",
                "product": "prod_1",
                "currency": "usd",
                "unit_amount": 2500
            }))
            .build();
        engine.apply(&normalize(&created)).await.unwrap();

        let deleted = ProviderEventBuilder::new("price.deleted")
            .object(serde_json::json!({"id": "price_1"}))
            .build();
        engine.apply(&normalize(&deleted)).await.unwrap();

        let price = repo.find_price("price_1").await.unwrap().unwrap();
        assert!(!price.active);
    }

    #[tokio::test]
    async fn account_updated_upserts_branding() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let event = ProviderEventBuilder::new("account.updated")
            .object(serde_json::json!({
                "id": "acct_1",
                "charges_enabled": true,
                "details_submitted": true,
                "business_profile": {"name": "Studio"},
                "settings": {"branding": {"primary_color": "#000000"}}
            }))
            .build();
        engine.apply(&normalize(&event)).await.unwrap();

        let account = repo.find_connected_account("acct_1").await.unwrap().unwrap();
        assert!(account.charges_enabled);
        assert_eq!(account.branding_primary_color.as_deref(), Some("#000000"));
    }

    // ══════════════════════════════════════════════════════════════
    // Unknown Events
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unknown_event_type_is_ignored_without_side_effects() {
        let repo = Arc::new(InMemoryBillingRepository::new());
        let fetcher = Arc::new(MockRemoteFetcher::new());
        let engine = engine_with(repo.clone(), fetcher);

        let event = ProviderEventBuilder::new("charge.dispute.created")
            .object(serde_json::json!({"id": "dp_1", "customer": "cus_1"}))
            .build();

        let outcome = engine.apply(&normalize(&event)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert!(repo.find_customer("cus_1").await.unwrap().is_none());
    }
}
