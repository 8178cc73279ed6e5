//! Canonical record types produced by the cleaning pipeline and the
//! progress/stats types surfaced to callers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::gender::Gender;

/// Country filled in when the export leaves the column blank.
pub const DEFAULT_COUNTRY: &str = "Malaysia";

/// The six POS export files, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFile {
    Customers,
    VisitFrequency,
    Sales,
    Payments,
    ItemSales,
    ServiceSales,
}

impl SourceFile {
    pub const ALL: [SourceFile; 6] = [
        SourceFile::Customers,
        SourceFile::VisitFrequency,
        SourceFile::Sales,
        SourceFile::Payments,
        SourceFile::ItemSales,
        SourceFile::ServiceSales,
    ];

    /// Stable machine key, used in the rejection log and surrogate ids.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFile::Customers => "customers",
            SourceFile::VisitFrequency => "visit_frequency",
            SourceFile::Sales => "sales",
            SourceFile::Payments => "payments",
            SourceFile::ItemSales => "item_sales",
            SourceFile::ServiceSales => "service_sales",
        }
    }

    /// Human label used in progress messages and the CLI summary.
    pub fn label(self) -> &'static str {
        match self {
            SourceFile::Customers => "customer info",
            SourceFile::VisitFrequency => "visit frequency",
            SourceFile::Sales => "detailed sales",
            SourceFile::Payments => "payments",
            SourceFile::ItemSales => "item sales",
            SourceFile::ServiceSales => "service sales",
        }
    }

    /// Header offsets observed in the reference POS exports: the sales
    /// and service reports carry a 15-line preamble, item sales an
    /// 18-line one.
    pub fn default_skip_rows(self) -> usize {
        match self {
            SourceFile::Customers => 0,
            SourceFile::VisitFrequency => 0,
            SourceFile::Sales => 15,
            SourceFile::Payments => 0,
            SourceFile::ItemSales => 18,
            SourceFile::ServiceSales => 15,
        }
    }
}

impl std::fmt::Display for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cleaned customer row, keyed by membership number.
///
/// The spending/visit aggregates start at zero; they are recomputed by
/// a separate statistics pass, never by the import pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCustomer {
    pub membership_number: String,
    pub name: String,
    pub gender: Gender,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postcode: Option<String>,
    pub country: String,
    pub date_of_birth: Option<NaiveDate>,
    pub registration_date: Option<NaiveDate>,
    pub total_spending: f64,
    pub visit_count: i64,
    pub last_visit_date: Option<NaiveDate>,
}

/// Per-customer visit aggregate from the visit-frequency report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitSummary {
    pub membership_number: String,
    pub visit_count: i64,
    pub last_visit_date: Option<NaiveDate>,
    pub total_spent: f64,
}

/// One receipt from the detailed sales report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub transaction_id: String,
    pub membership_number: String,
    pub transaction_date: Option<NaiveDate>,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPayment {
    pub payment_id: String,
    pub membership_number: String,
    pub payment_date: Option<NaiveDate>,
    pub amount: f64,
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalItemSale {
    pub sale_id: String,
    pub membership_number: String,
    pub item_name: String,
    pub quantity: f64,
    pub amount: f64,
    pub sale_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalServiceSale {
    pub sale_id: String,
    pub membership_number: String,
    pub service_name: String,
    pub amount: f64,
    pub sale_date: Option<NaiveDate>,
}

/// Snapshot emitted repeatedly while an import run progresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportProgress {
    pub step_label: String,
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    pub message: String,
}

/// Inserted/updated split for one chunked upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertOutcome {
    pub fn total(self) -> u64 {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: UpsertOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Per-entity write counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub customers: UpsertOutcome,
    pub visit_summaries: UpsertOutcome,
    pub transactions: UpsertOutcome,
    pub payments: UpsertOutcome,
    pub item_sales: UpsertOutcome,
    pub service_sales: UpsertOutcome,
}

impl ImportStats {
    pub fn total_written(&self) -> u64 {
        self.customers.total()
            + self.visit_summaries.total()
            + self.transactions.total()
            + self.payments.total()
            + self.item_sales.total()
            + self.service_sales.total()
    }
}
