//! Backing store port.
//!
//! The import core does not own the persistence engine; it owns what
//! is sent to it and in what order. Each method is one chunked,
//! idempotent upsert keyed by the entity's natural key.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::debug;

use crate::models::{
    CanonicalCustomer, CanonicalItemSale, CanonicalPayment, CanonicalServiceSale,
    CanonicalTransaction, UpsertOutcome, VisitSummary,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn upsert_customers(
        &self,
        rows: &[CanonicalCustomer],
    ) -> Result<UpsertOutcome, StoreError>;
    async fn upsert_visit_summaries(
        &self,
        rows: &[VisitSummary],
    ) -> Result<UpsertOutcome, StoreError>;
    async fn upsert_transactions(
        &self,
        rows: &[CanonicalTransaction],
    ) -> Result<UpsertOutcome, StoreError>;
    async fn upsert_payments(&self, rows: &[CanonicalPayment])
        -> Result<UpsertOutcome, StoreError>;
    async fn upsert_item_sales(
        &self,
        rows: &[CanonicalItemSale],
    ) -> Result<UpsertOutcome, StoreError>;
    async fn upsert_service_sales(
        &self,
        rows: &[CanonicalServiceSale],
    ) -> Result<UpsertOutcome, StoreError>;
}

// =============================================================================
// POSTGRES STORE
// =============================================================================

/// Postgres-backed store. `RETURNING (xmax = 0)` distinguishes fresh
/// inserts from conflict updates without a second query.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    async fn fetch_outcome(
        &self,
        mut builder: QueryBuilder<'_, Postgres>,
    ) -> Result<UpsertOutcome, StoreError> {
        let flags: Vec<(bool,)> = builder.build_query_as().fetch_all(&self.pool).await?;
        let mut outcome = UpsertOutcome::default();
        for (inserted,) in flags {
            if inserted {
                outcome.inserted += 1;
            } else {
                outcome.updated += 1;
            }
        }
        debug!(inserted = outcome.inserted, updated = outcome.updated, "chunk upserted");
        Ok(outcome)
    }
}

#[async_trait]
impl ImportStore for PgStore {
    async fn upsert_customers(
        &self,
        rows: &[CanonicalCustomer],
    ) -> Result<UpsertOutcome, StoreError> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO customers (membership_no, name, gender, phone, email, address, city, \
             state, postcode, country, date_of_birth, registration_date, total_spending, \
             visit_count, last_visit_date) ",
        );
        builder.push_values(rows, |mut b, c| {
            b.push_bind(&c.membership_number)
                .push_bind(&c.name)
                .push_bind(c.gender.as_str())
                .push_bind(&c.phone)
                .push_bind(&c.email)
                .push_bind(&c.address)
                .push_bind(&c.city)
                .push_bind(&c.state)
                .push_bind(&c.postcode)
                .push_bind(&c.country)
                .push_bind(c.date_of_birth)
                .push_bind(c.registration_date)
                .push_bind(c.total_spending)
                .push_bind(c.visit_count)
                .push_bind(c.last_visit_date);
        });
        // Spending/visit aggregates are recomputed by a separate pass
        // and deliberately left alone on conflict.
        builder.push(
            " ON CONFLICT (membership_no) DO UPDATE SET \
             name = EXCLUDED.name, gender = EXCLUDED.gender, phone = EXCLUDED.phone, \
             email = EXCLUDED.email, address = EXCLUDED.address, city = EXCLUDED.city, \
             state = EXCLUDED.state, postcode = EXCLUDED.postcode, country = EXCLUDED.country, \
             date_of_birth = EXCLUDED.date_of_birth, \
             registration_date = EXCLUDED.registration_date \
             RETURNING (xmax = 0)",
        );
        self.fetch_outcome(builder).await
    }

    async fn upsert_visit_summaries(
        &self,
        rows: &[VisitSummary],
    ) -> Result<UpsertOutcome, StoreError> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO visit_summaries (membership_no, visit_count, last_visit_date, total_spent) ",
        );
        builder.push_values(rows, |mut b, v| {
            b.push_bind(&v.membership_number)
                .push_bind(v.visit_count)
                .push_bind(v.last_visit_date)
                .push_bind(v.total_spent);
        });
        builder.push(
            " ON CONFLICT (membership_no) DO UPDATE SET \
             visit_count = EXCLUDED.visit_count, \
             last_visit_date = EXCLUDED.last_visit_date, \
             total_spent = EXCLUDED.total_spent \
             RETURNING (xmax = 0)",
        );
        self.fetch_outcome(builder).await
    }

    async fn upsert_transactions(
        &self,
        rows: &[CanonicalTransaction],
    ) -> Result<UpsertOutcome, StoreError> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO transactions (transaction_id, membership_no, transaction_date, total_amount) ",
        );
        builder.push_values(rows, |mut b, t| {
            b.push_bind(&t.transaction_id)
                .push_bind(&t.membership_number)
                .push_bind(t.transaction_date)
                .push_bind(t.total_amount);
        });
        builder.push(
            " ON CONFLICT (transaction_id) DO UPDATE SET \
             membership_no = EXCLUDED.membership_no, \
             transaction_date = EXCLUDED.transaction_date, \
             total_amount = EXCLUDED.total_amount \
             RETURNING (xmax = 0)",
        );
        self.fetch_outcome(builder).await
    }

    async fn upsert_payments(
        &self,
        rows: &[CanonicalPayment],
    ) -> Result<UpsertOutcome, StoreError> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO payments (payment_id, membership_no, payment_date, amount, method) ",
        );
        builder.push_values(rows, |mut b, p| {
            b.push_bind(&p.payment_id)
                .push_bind(&p.membership_number)
                .push_bind(p.payment_date)
                .push_bind(p.amount)
                .push_bind(&p.method);
        });
        builder.push(
            " ON CONFLICT (payment_id) DO UPDATE SET \
             membership_no = EXCLUDED.membership_no, \
             payment_date = EXCLUDED.payment_date, \
             amount = EXCLUDED.amount, method = EXCLUDED.method \
             RETURNING (xmax = 0)",
        );
        self.fetch_outcome(builder).await
    }

    async fn upsert_item_sales(
        &self,
        rows: &[CanonicalItemSale],
    ) -> Result<UpsertOutcome, StoreError> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO item_sales (sale_id, membership_no, item_name, quantity, amount, sale_date) ",
        );
        builder.push_values(rows, |mut b, s| {
            b.push_bind(&s.sale_id)
                .push_bind(&s.membership_number)
                .push_bind(&s.item_name)
                .push_bind(s.quantity)
                .push_bind(s.amount)
                .push_bind(s.sale_date);
        });
        builder.push(
            " ON CONFLICT (sale_id) DO UPDATE SET \
             membership_no = EXCLUDED.membership_no, item_name = EXCLUDED.item_name, \
             quantity = EXCLUDED.quantity, amount = EXCLUDED.amount, \
             sale_date = EXCLUDED.sale_date \
             RETURNING (xmax = 0)",
        );
        self.fetch_outcome(builder).await
    }

    async fn upsert_service_sales(
        &self,
        rows: &[CanonicalServiceSale],
    ) -> Result<UpsertOutcome, StoreError> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO service_sales (sale_id, membership_no, service_name, amount, sale_date) ",
        );
        builder.push_values(rows, |mut b, s| {
            b.push_bind(&s.sale_id)
                .push_bind(&s.membership_number)
                .push_bind(&s.service_name)
                .push_bind(s.amount)
                .push_bind(s.sale_date);
        });
        builder.push(
            " ON CONFLICT (sale_id) DO UPDATE SET \
             membership_no = EXCLUDED.membership_no, service_name = EXCLUDED.service_name, \
             amount = EXCLUDED.amount, sale_date = EXCLUDED.sale_date \
             RETURNING (xmax = 0)",
        );
        self.fetch_outcome(builder).await
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// HashMap-backed store for tests and `--dry-run`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    customers: Mutex<HashMap<String, CanonicalCustomer>>,
    visit_summaries: Mutex<HashMap<String, VisitSummary>>,
    transactions: Mutex<HashMap<String, CanonicalTransaction>>,
    payments: Mutex<HashMap<String, CanonicalPayment>>,
    item_sales: Mutex<HashMap<String, CanonicalItemSale>>,
    service_sales: Mutex<HashMap<String, CanonicalServiceSale>>,
}

fn upsert_into<T: Clone>(
    map: &Mutex<HashMap<String, T>>,
    rows: &[T],
    key: impl Fn(&T) -> &str,
) -> UpsertOutcome {
    let mut guard = map.lock().expect("store mutex poisoned");
    let mut outcome = UpsertOutcome::default();
    for row in rows {
        if guard.insert(key(row).to_string(), row.clone()).is_some() {
            outcome.updated += 1;
        } else {
            outcome.inserted += 1;
        }
    }
    outcome
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn customer_count(&self) -> usize {
        self.customers.lock().expect("store mutex poisoned").len()
    }

    pub fn visit_summary_count(&self) -> usize {
        self.visit_summaries
            .lock()
            .expect("store mutex poisoned")
            .len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().expect("store mutex poisoned").len()
    }

    pub fn payment_count(&self) -> usize {
        self.payments.lock().expect("store mutex poisoned").len()
    }

    pub fn item_sale_count(&self) -> usize {
        self.item_sales.lock().expect("store mutex poisoned").len()
    }

    pub fn service_sale_count(&self) -> usize {
        self.service_sales.lock().expect("store mutex poisoned").len()
    }

    pub fn get_payment(&self, payment_id: &str) -> Option<CanonicalPayment> {
        self.payments
            .lock()
            .expect("store mutex poisoned")
            .get(payment_id)
            .cloned()
    }

    pub fn get_customer(&self, membership_number: &str) -> Option<CanonicalCustomer> {
        self.customers
            .lock()
            .expect("store mutex poisoned")
            .get(membership_number)
            .cloned()
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn upsert_customers(
        &self,
        rows: &[CanonicalCustomer],
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(upsert_into(&self.customers, rows, |c| &c.membership_number))
    }

    async fn upsert_visit_summaries(
        &self,
        rows: &[VisitSummary],
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(upsert_into(&self.visit_summaries, rows, |v| {
            &v.membership_number
        }))
    }

    async fn upsert_transactions(
        &self,
        rows: &[CanonicalTransaction],
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(upsert_into(&self.transactions, rows, |t| &t.transaction_id))
    }

    async fn upsert_payments(
        &self,
        rows: &[CanonicalPayment],
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(upsert_into(&self.payments, rows, |p| &p.payment_id))
    }

    async fn upsert_item_sales(
        &self,
        rows: &[CanonicalItemSale],
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(upsert_into(&self.item_sales, rows, |s| &s.sale_id))
    }

    async fn upsert_service_sales(
        &self,
        rows: &[CanonicalServiceSale],
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(upsert_into(&self.service_sales, rows, |s| &s.sale_id))
    }
}
