//! PostgreSQL implementation of the BillingRepository port.
//!
//! Upserts use `ON CONFLICT ... DO UPDATE` keyed on the provider ID so
//! created/updated events collapse to one code path. `created_at` is
//! never overwritten on conflict, `is_default` only changes through the
//! transactional default swap, and a webhook upsert never clears an
//! existing `user_id` link.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::entities::{
    ConnectedAccount, Customer, Invoice, InvoiceStatus, Payment, PaymentMethod,
    PaymentMethodKind, Price, Product, Subscription, SubscriptionStatus,
};
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::BillingRepository;

/// PostgreSQL-backed `BillingRepository`.
pub struct PostgresBillingRepository {
    pool: PgPool,
}

impl PostgresBillingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ══════════════════════════════════════════════════════════════════════
// Row types
// ══════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    provider_customer_id: String,
    user_id: Option<Uuid>,
    email: Option<String>,
    name: Option<String>,
    phone: Option<String>,
    city: Option<String>,
    country: Option<String>,
    line1: Option<String>,
    line2: Option<String>,
    postal_code: Option<String>,
    state: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            provider_customer_id: row.provider_customer_id,
            user_id: row.user_id,
            email: row.email,
            name: row.name,
            phone: row.phone,
            city: row.city,
            country: row.country,
            line1: row.line1,
            line2: row.line2,
            postal_code: row.postal_code,
            state: row.state,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    provider_subscription_id: String,
    customer_id: String,
    price_id: Option<String>,
    connected_account_id: Option<String>,
    status: String,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    cancel_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    trial_start: Option<DateTime<Utc>>,
    trial_end: Option<DateTime<Utc>>,
    billing_interval: Option<String>,
    billing_interval_count: Option<i32>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = SubscriptionStatus::parse(&row.status).ok_or_else(|| {
            DomainError::database(format!("Invalid subscription status: {}", row.status))
        })?;

        Ok(Subscription {
            provider_subscription_id: row.provider_subscription_id,
            customer_id: row.customer_id,
            price_id: row.price_id,
            connected_account_id: row.connected_account_id,
            status,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
            cancel_at: row.cancel_at,
            canceled_at: row.canceled_at,
            ended_at: row.ended_at,
            trial_start: row.trial_start,
            trial_end: row.trial_end,
            interval: row.billing_interval,
            interval_count: row.billing_interval_count,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    provider_invoice_id: String,
    customer_id: String,
    subscription_id: Option<String>,
    connected_account_id: Option<String>,
    status: String,
    billing_reason: Option<String>,
    description: Option<String>,
    amount_paid: i64,
    currency: String,
    invoice_pdf: Option<String>,
    hosted_invoice_url: Option<String>,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = DomainError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let status = InvoiceStatus::parse(&row.status).ok_or_else(|| {
            DomainError::database(format!("Invalid invoice status: {}", row.status))
        })?;

        Ok(Invoice {
            provider_invoice_id: row.provider_invoice_id,
            customer_id: row.customer_id,
            subscription_id: row.subscription_id,
            connected_account_id: row.connected_account_id,
            status,
            billing_reason: row.billing_reason,
            description: row.description,
            amount_paid: row.amount_paid,
            currency: row.currency,
            invoice_pdf: row.invoice_pdf,
            hosted_invoice_url: row.hosted_invoice_url,
            period_start: row.period_start,
            period_end: row.period_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentMethodRow {
    provider_payment_method_id: String,
    customer_id: String,
    kind: String,
    brand: Option<String>,
    last4: Option<String>,
    exp_month: Option<i32>,
    exp_year: Option<i32>,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PaymentMethodRow> for PaymentMethod {
    fn from(row: PaymentMethodRow) -> Self {
        PaymentMethod {
            provider_payment_method_id: row.provider_payment_method_id,
            customer_id: row.customer_id,
            kind: PaymentMethodKind::parse(&row.kind),
            brand: row.brand,
            last4: row.last4,
            exp_month: row.exp_month,
            exp_year: row.exp_year,
            is_default: row.is_default,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    provider_product_id: String,
    name: String,
    description: Option<String>,
    active: bool,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            provider_product_id: row.provider_product_id,
            name: row.name,
            description: row.description,
            active: row.active,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PriceRow {
    provider_price_id: String,
    product_id: String,
    active: bool,
    currency: String,
    unit_amount: Option<i64>,
    recurring_interval: Option<String>,
    recurring_interval_count: Option<i32>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PriceRow> for Price {
    fn from(row: PriceRow) -> Self {
        Price {
            provider_price_id: row.provider_price_id,
            product_id: row.product_id,
            active: row.active,
            currency: row.currency,
            unit_amount: row.unit_amount,
            recurring_interval: row.recurring_interval,
            recurring_interval_count: row.recurring_interval_count,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    provider_payment_intent_id: String,
    customer_id: String,
    amount: i64,
    currency: String,
    status: String,
    description: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            provider_payment_intent_id: row.provider_payment_intent_id,
            customer_id: row.customer_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConnectedAccountRow {
    provider_account_id: String,
    name: Option<String>,
    charges_enabled: bool,
    details_submitted: bool,
    branding_icon_file_id: Option<String>,
    branding_logo_file_id: Option<String>,
    branding_primary_color: Option<String>,
    branding_secondary_color: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConnectedAccountRow> for ConnectedAccount {
    fn from(row: ConnectedAccountRow) -> Self {
        ConnectedAccount {
            provider_account_id: row.provider_account_id,
            name: row.name,
            charges_enabled: row.charges_enabled,
            details_submitted: row.details_submitted,
            branding_icon_file_id: row.branding_icon_file_id,
            branding_logo_file_id: row.branding_logo_file_id,
            branding_primary_color: row.branding_primary_color,
            branding_secondary_color: row.branding_secondary_color,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════
// Repository implementation
// ══════════════════════════════════════════════════════════════════════

#[async_trait]
impl BillingRepository for PostgresBillingRepository {
    // ── Customers ────────────────────────────────────────────────────

    async fn find_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<Customer>, DomainError> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"
            SELECT provider_customer_id, user_id, email, name, phone, city, country,
                   line1, line2, postal_code, state, metadata, created_at, updated_at
            FROM billing_customers
            WHERE provider_customer_id = $1
            "#,
        )
        .bind(provider_customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find customer: {}", e)))?;

        Ok(row.map(Customer::from))
    }

    async fn upsert_customer(&self, customer: &Customer) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_customers (
                provider_customer_id, user_id, email, name, phone, city, country,
                line1, line2, postal_code, state, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (provider_customer_id) DO UPDATE SET
                user_id = COALESCE(EXCLUDED.user_id, billing_customers.user_id),
                email = EXCLUDED.email,
                name = EXCLUDED.name,
                phone = EXCLUDED.phone,
                city = EXCLUDED.city,
                country = EXCLUDED.country,
                line1 = EXCLUDED.line1,
                line2 = EXCLUDED.line2,
                postal_code = EXCLUDED.postal_code,
                state = EXCLUDED.state,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&customer.provider_customer_id)
        .bind(customer.user_id)
        .bind(&customer.email)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(&customer.city)
        .bind(&customer.country)
        .bind(&customer.line1)
        .bind(&customer.line2)
        .bind(&customer.postal_code)
        .bind(&customer.state)
        .bind(&customer.metadata)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to upsert customer: {}", e)))?;

        Ok(())
    }

    async fn get_or_create_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<(Customer, bool), DomainError> {
        let shell = Customer::shell(provider_customer_id, Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO billing_customers (
                provider_customer_id, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider_customer_id) DO NOTHING
            "#,
        )
        .bind(&shell.provider_customer_id)
        .bind(&shell.metadata)
        .bind(shell.created_at)
        .bind(shell.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to create customer: {}", e)))?;

        let created = result.rows_affected() == 1;
        let customer = self
            .find_customer(provider_customer_id)
            .await?
            .ok_or_else(|| {
                DomainError::database(format!(
                    "Customer {} missing after insert",
                    provider_customer_id
                ))
            })?;
        Ok((customer, created))
    }

    async fn delete_customer(&self, provider_customer_id: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM billing_customers WHERE provider_customer_id = $1")
            .bind(provider_customer_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database(format!("Failed to delete customer: {}", e)))?;
        Ok(())
    }

    // ── Subscriptions ────────────────────────────────────────────────

    async fn find_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT provider_subscription_id, customer_id, price_id, connected_account_id,
                   status, current_period_start, current_period_end, cancel_at_period_end,
                   cancel_at, canceled_at, ended_at, trial_start, trial_end,
                   billing_interval, billing_interval_count, metadata, created_at, updated_at
            FROM billing_subscriptions
            WHERE provider_subscription_id = $1
            "#,
        )
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find subscription: {}", e)))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_subscriptions (
                provider_subscription_id, customer_id, price_id, connected_account_id,
                status, current_period_start, current_period_end, cancel_at_period_end,
                cancel_at, canceled_at, ended_at, trial_start, trial_end,
                billing_interval, billing_interval_count, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (provider_subscription_id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                price_id = EXCLUDED.price_id,
                connected_account_id = EXCLUDED.connected_account_id,
                status = EXCLUDED.status,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                cancel_at = EXCLUDED.cancel_at,
                canceled_at = EXCLUDED.canceled_at,
                ended_at = EXCLUDED.ended_at,
                trial_start = EXCLUDED.trial_start,
                trial_end = EXCLUDED.trial_end,
                billing_interval = EXCLUDED.billing_interval,
                billing_interval_count = EXCLUDED.billing_interval_count,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&subscription.provider_subscription_id)
        .bind(&subscription.customer_id)
        .bind(&subscription.price_id)
        .bind(&subscription.connected_account_id)
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.cancel_at)
        .bind(subscription.canceled_at)
        .bind(subscription.ended_at)
        .bind(subscription.trial_start)
        .bind(subscription.trial_end)
        .bind(&subscription.interval)
        .bind(subscription.interval_count)
        .bind(&subscription.metadata)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to upsert subscription: {}", e)))?;

        Ok(())
    }

    async fn get_or_create_subscription(
        &self,
        provider_subscription_id: &str,
        provider_customer_id: &str,
    ) -> Result<(Subscription, bool), DomainError> {
        let shell =
            Subscription::shell(provider_subscription_id, provider_customer_id, Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO billing_subscriptions (
                provider_subscription_id, customer_id, status, cancel_at_period_end,
                metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (provider_subscription_id) DO NOTHING
            "#,
        )
        .bind(&shell.provider_subscription_id)
        .bind(&shell.customer_id)
        .bind(shell.status.as_str())
        .bind(shell.cancel_at_period_end)
        .bind(&shell.metadata)
        .bind(shell.created_at)
        .bind(shell.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to create subscription: {}", e)))?;

        let created = result.rows_affected() == 1;
        let subscription = self
            .find_subscription(provider_subscription_id)
            .await?
            .ok_or_else(|| {
                DomainError::database(format!(
                    "Subscription {} missing after insert",
                    provider_subscription_id
                ))
            })?;
        Ok((subscription, created))
    }

    async fn list_subscriptions_for_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT provider_subscription_id, customer_id, price_id, connected_account_id,
                   status, current_period_start, current_period_end, cancel_at_period_end,
                   cancel_at, canceled_at, ended_at, trial_start, trial_end,
                   billing_interval, billing_interval_count, metadata, created_at, updated_at
            FROM billing_subscriptions
            WHERE customer_id = $1
            ORDER BY provider_subscription_id
            "#,
        )
        .bind(provider_customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to list subscriptions: {}", e)))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    // ── Invoices ─────────────────────────────────────────────────────

    async fn find_invoice(
        &self,
        provider_invoice_id: &str,
    ) -> Result<Option<Invoice>, DomainError> {
        let row: Option<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT provider_invoice_id, customer_id, subscription_id, connected_account_id,
                   status, billing_reason, description, amount_paid, currency, invoice_pdf,
                   hosted_invoice_url, period_start, period_end, created_at, updated_at
            FROM billing_invoices
            WHERE provider_invoice_id = $1
            "#,
        )
        .bind(provider_invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find invoice: {}", e)))?;

        row.map(Invoice::try_from).transpose()
    }

    async fn upsert_invoice(&self, invoice: &Invoice) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_invoices (
                provider_invoice_id, customer_id, subscription_id, connected_account_id,
                status, billing_reason, description, amount_paid, currency, invoice_pdf,
                hosted_invoice_url, period_start, period_end, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (provider_invoice_id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                subscription_id = EXCLUDED.subscription_id,
                connected_account_id = EXCLUDED.connected_account_id,
                status = EXCLUDED.status,
                billing_reason = EXCLUDED.billing_reason,
                description = EXCLUDED.description,
                amount_paid = EXCLUDED.amount_paid,
                currency = EXCLUDED.currency,
                invoice_pdf = EXCLUDED.invoice_pdf,
                hosted_invoice_url = EXCLUDED.hosted_invoice_url,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&invoice.provider_invoice_id)
        .bind(&invoice.customer_id)
        .bind(&invoice.subscription_id)
        .bind(&invoice.connected_account_id)
        .bind(invoice.status.as_str())
        .bind(&invoice.billing_reason)
        .bind(&invoice.description)
        .bind(invoice.amount_paid)
        .bind(&invoice.currency)
        .bind(&invoice.invoice_pdf)
        .bind(&invoice.hosted_invoice_url)
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to upsert invoice: {}", e)))?;

        Ok(())
    }

    // ── Payment methods ──────────────────────────────────────────────

    async fn find_payment_method(
        &self,
        provider_payment_method_id: &str,
    ) -> Result<Option<PaymentMethod>, DomainError> {
        let row: Option<PaymentMethodRow> = sqlx::query_as(
            r#"
            SELECT provider_payment_method_id, customer_id, kind, brand, last4,
                   exp_month, exp_year, is_default, created_at, updated_at
            FROM billing_payment_methods
            WHERE provider_payment_method_id = $1
            "#,
        )
        .bind(provider_payment_method_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find payment method: {}", e)))?;

        Ok(row.map(PaymentMethod::from))
    }

    async fn upsert_payment_method(&self, method: &PaymentMethod) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_payment_methods (
                provider_payment_method_id, customer_id, kind, brand, last4,
                exp_month, exp_year, is_default, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_payment_method_id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                kind = EXCLUDED.kind,
                brand = EXCLUDED.brand,
                last4 = EXCLUDED.last4,
                exp_month = EXCLUDED.exp_month,
                exp_year = EXCLUDED.exp_year,
                -- A re-attach to another customer drops the default flag;
                -- only set_default_payment_method grants it.
                is_default = CASE
                    WHEN billing_payment_methods.customer_id = EXCLUDED.customer_id
                        THEN billing_payment_methods.is_default
                    ELSE FALSE
                END,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&method.provider_payment_method_id)
        .bind(&method.customer_id)
        .bind(method.kind.as_str())
        .bind(&method.brand)
        .bind(&method.last4)
        .bind(method.exp_month)
        .bind(method.exp_year)
        .bind(method.is_default)
        .bind(method.created_at)
        .bind(method.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to upsert payment method: {}", e)))?;

        Ok(())
    }

    async fn delete_payment_method(
        &self,
        provider_payment_method_id: &str,
    ) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM billing_payment_methods WHERE provider_payment_method_id = $1")
            .bind(provider_payment_method_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DomainError::database(format!("Failed to delete payment method: {}", e))
            })?;
        Ok(())
    }

    async fn list_payment_methods(
        &self,
        provider_customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, DomainError> {
        let rows: Vec<PaymentMethodRow> = sqlx::query_as(
            r#"
            SELECT provider_payment_method_id, customer_id, kind, brand, last4,
                   exp_month, exp_year, is_default, created_at, updated_at
            FROM billing_payment_methods
            WHERE customer_id = $1
            ORDER BY provider_payment_method_id
            "#,
        )
        .bind(provider_customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to list payment methods: {}", e)))?;

        Ok(rows.into_iter().map(PaymentMethod::from).collect())
    }

    async fn set_default_payment_method(
        &self,
        provider_customer_id: &str,
        provider_payment_method_id: &str,
    ) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            DomainError::database(format!("Failed to begin transaction: {}", e))
        })?;

        // Lock the target row and verify ownership before touching flags.
        let owned: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT provider_payment_method_id
            FROM billing_payment_methods
            WHERE provider_payment_method_id = $1 AND customer_id = $2
            FOR UPDATE
            "#,
        )
        .bind(provider_payment_method_id)
        .bind(provider_customer_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| DomainError::database(format!("Failed to lock payment method: {}", e)))?;

        if owned.is_none() {
            return Err(DomainError::not_found(
                ErrorCode::PaymentMethodNotFound,
                provider_payment_method_id,
            ));
        }

        sqlx::query(
            r#"
            UPDATE billing_payment_methods
            SET is_default = FALSE, updated_at = NOW()
            WHERE customer_id = $1 AND is_default = TRUE
            "#,
        )
        .bind(provider_customer_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| DomainError::database(format!("Failed to clear default flags: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE billing_payment_methods
            SET is_default = TRUE, updated_at = NOW()
            WHERE provider_payment_method_id = $1
            "#,
        )
        .bind(provider_payment_method_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| DomainError::database(format!("Failed to set default flag: {}", e)))?;

        tx.commit().await.map_err(|e| {
            DomainError::database(format!("Failed to commit default swap: {}", e))
        })?;

        Ok(())
    }

    // ── Catalog ──────────────────────────────────────────────────────

    async fn find_product(
        &self,
        provider_product_id: &str,
    ) -> Result<Option<Product>, DomainError> {
        let row: Option<ProductRow> = sqlx::query_as(
            r#"
            SELECT provider_product_id, name, description, active, metadata,
                   created_at, updated_at
            FROM billing_products
            WHERE provider_product_id = $1
            "#,
        )
        .bind(provider_product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find product: {}", e)))?;

        Ok(row.map(Product::from))
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_products (
                provider_product_id, name, description, active, metadata,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (provider_product_id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                active = EXCLUDED.active,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&product.provider_product_id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.active)
        .bind(&product.metadata)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to upsert product: {}", e)))?;

        Ok(())
    }

    async fn deactivate_product(&self, provider_product_id: &str) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE billing_products
            SET active = FALSE, updated_at = NOW()
            WHERE provider_product_id = $1
            "#,
        )
        .bind(provider_product_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to deactivate product: {}", e)))?;
        Ok(())
    }

    async fn find_price(&self, provider_price_id: &str) -> Result<Option<Price>, DomainError> {
        let row: Option<PriceRow> = sqlx::query_as(
            r#"
            SELECT provider_price_id, product_id, active, currency, unit_amount,
                   recurring_interval, recurring_interval_count, metadata,
                   created_at, updated_at
            FROM billing_prices
            WHERE provider_price_id = $1
            "#,
        )
        .bind(provider_price_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find price: {}", e)))?;

        Ok(row.map(Price::from))
    }

    async fn upsert_price(&self, price: &Price) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_prices (
                provider_price_id, product_id, active, currency, unit_amount,
                recurring_interval, recurring_interval_count, metadata,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_price_id) DO UPDATE SET
                product_id = EXCLUDED.product_id,
                active = EXCLUDED.active,
                currency = EXCLUDED.currency,
                unit_amount = EXCLUDED.unit_amount,
                recurring_interval = EXCLUDED.recurring_interval,
                recurring_interval_count = EXCLUDED.recurring_interval_count,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&price.provider_price_id)
        .bind(&price.product_id)
        .bind(price.active)
        .bind(&price.currency)
        .bind(price.unit_amount)
        .bind(&price.recurring_interval)
        .bind(price.recurring_interval_count)
        .bind(&price.metadata)
        .bind(price.created_at)
        .bind(price.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to upsert price: {}", e)))?;

        Ok(())
    }

    async fn deactivate_price(&self, provider_price_id: &str) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE billing_prices
            SET active = FALSE, updated_at = NOW()
            WHERE provider_price_id = $1
            "#,
        )
        .bind(provider_price_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to deactivate price: {}", e)))?;
        Ok(())
    }

    // ── Payments ─────────────────────────────────────────────────────

    async fn find_payment(
        &self,
        provider_payment_intent_id: &str,
    ) -> Result<Option<Payment>, DomainError> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r#"
            SELECT provider_payment_intent_id, customer_id, amount, currency, status,
                   description, metadata, created_at, updated_at
            FROM billing_payments
            WHERE provider_payment_intent_id = $1
            "#,
        )
        .bind(provider_payment_intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find payment: {}", e)))?;

        Ok(row.map(Payment::from))
    }

    async fn upsert_payment(&self, payment: &Payment) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_payments (
                provider_payment_intent_id, customer_id, amount, currency, status,
                description, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (provider_payment_intent_id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status,
                description = EXCLUDED.description,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&payment.provider_payment_intent_id)
        .bind(&payment.customer_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.status)
        .bind(&payment.description)
        .bind(&payment.metadata)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to upsert payment: {}", e)))?;

        Ok(())
    }

    // ── Connected accounts ───────────────────────────────────────────

    async fn find_connected_account(
        &self,
        provider_account_id: &str,
    ) -> Result<Option<ConnectedAccount>, DomainError> {
        let row: Option<ConnectedAccountRow> = sqlx::query_as(
            r#"
            SELECT provider_account_id, name, charges_enabled, details_submitted,
                   branding_icon_file_id, branding_logo_file_id, branding_primary_color,
                   branding_secondary_color, created_at, updated_at
            FROM billing_connected_accounts
            WHERE provider_account_id = $1
            "#,
        )
        .bind(provider_account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find connected account: {}", e)))?;

        Ok(row.map(ConnectedAccount::from))
    }

    async fn upsert_connected_account(
        &self,
        account: &ConnectedAccount,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_connected_accounts (
                provider_account_id, name, charges_enabled, details_submitted,
                branding_icon_file_id, branding_logo_file_id, branding_primary_color,
                branding_secondary_color, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_account_id) DO UPDATE SET
                name = EXCLUDED.name,
                charges_enabled = EXCLUDED.charges_enabled,
                details_submitted = EXCLUDED.details_submitted,
                branding_icon_file_id = EXCLUDED.branding_icon_file_id,
                branding_logo_file_id = EXCLUDED.branding_logo_file_id,
                branding_primary_color = EXCLUDED.branding_primary_color,
                branding_secondary_color = EXCLUDED.branding_secondary_color,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&account.provider_account_id)
        .bind(&account.name)
        .bind(account.charges_enabled)
        .bind(account.details_submitted)
        .bind(&account.branding_icon_file_id)
        .bind(&account.branding_logo_file_id)
        .bind(&account.branding_primary_color)
        .bind(&account.branding_secondary_color)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::database(format!("Failed to upsert connected account: {}", e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_row_rejects_unknown_status() {
        let row = SubscriptionRow {
            provider_subscription_id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            price_id: None,
            connected_account_id: None,
            status: "paused".to_string(),
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            cancel_at: None,
            canceled_at: None,
            ended_at: None,
            trial_start: None,
            trial_end: None,
            billing_interval: None,
            billing_interval_count: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(Subscription::try_from(row).is_err());
    }

    #[test]
    fn payment_method_row_maps_kind() {
        let row = PaymentMethodRow {
            provider_payment_method_id: "pm_1".to_string(),
            customer_id: "cus_1".to_string(),
            kind: "card".to_string(),
            brand: Some("visa".to_string()),
            last4: Some("4242".to_string()),
            exp_month: Some(12),
            exp_year: Some(2030),
            is_default: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let method = PaymentMethod::from(row);
        assert_eq!(method.kind, PaymentMethodKind::Card);
        assert!(method.is_default);
    }
}
