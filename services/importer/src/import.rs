//! Batch import orchestrator.
//!
//! Sequences the six export files in dependency order (customers first
//! so the resolution index exists before anything references it),
//! cleans each row, uploads in fixed-size chunks with bounded retries,
//! and streams progress snapshots to a caller-supplied sink. One
//! invocation is one logical operation; the run owns its own index and
//! ledger.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::clean;
use crate::error::{ReasonCode, RejectionLedger, RejectionRecord};
use crate::index::CustomerIndex;
use crate::models::{ImportProgress, ImportStats, SourceFile, UpsertOutcome};
use crate::reader::{self, ParsedTable, RawRow};
use crate::store::{ImportStore, StoreError};

/// Store-side batch limit.
pub const CHUNK_SIZE: usize = 1000;
/// A chunk write is attempted this many times before the run fails.
pub const WRITE_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(250);
const CLEAN_PROGRESS_EVERY: usize = 200;
const SOURCE_COUNT: f64 = 6.0;

// Phase weights within one source's progress span.
const PARSE_DONE: f64 = 0.1;
const CLEAN_SPAN: f64 = 0.4;
const UPLOAD_BASE: f64 = 0.5;
const UPLOAD_SPAN: f64 = 0.5;

/// The six input files for one run.
#[derive(Debug, Clone)]
pub struct ImportFiles {
    pub customers: PathBuf,
    pub visit_frequency: PathBuf,
    pub sales: PathBuf,
    pub payments: PathBuf,
    pub item_sales: PathBuf,
    pub service_sales: PathBuf,
}

impl ImportFiles {
    fn plans(&self) -> [SourcePlan; 6] {
        let plan = |source: SourceFile, path: &PathBuf| SourcePlan {
            source,
            path: path.clone(),
            skip_rows: source.default_skip_rows(),
        };
        [
            plan(SourceFile::Customers, &self.customers),
            plan(SourceFile::VisitFrequency, &self.visit_frequency),
            plan(SourceFile::Sales, &self.sales),
            plan(SourceFile::Payments, &self.payments),
            plan(SourceFile::ItemSales, &self.item_sales),
            plan(SourceFile::ServiceSales, &self.service_sales),
        ]
    }
}

#[derive(Debug, Clone)]
struct SourcePlan {
    source: SourceFile,
    path: PathBuf,
    skip_rows: usize,
}

/// Consumer of progress snapshots. Implemented for any `FnMut` so a
/// closure can be passed directly.
pub trait ProgressSink {
    fn emit(&mut self, progress: &ImportProgress);
}

impl<F: FnMut(&ImportProgress)> ProgressSink for F {
    fn emit(&mut self, progress: &ImportProgress) {
        self(progress)
    }
}

/// Terminal artifact of one run. On failure, `stats` still reports the
/// entity types committed before the abort; partial success is
/// reported, not hidden.
#[derive(Debug)]
pub struct ImportResult {
    pub success: bool,
    pub message: String,
    pub stats: ImportStats,
    pub rejections: RejectionLedger,
}

enum RunError {
    Fatal(String),
    Store { source: SourceFile, error: StoreError },
}

/// Run one full import against the given store, streaming progress to
/// `sink`. Never panics; every outcome is an `ImportResult`.
pub async fn run_import<S: ImportStore + ?Sized>(
    store: &S,
    files: &ImportFiles,
    sink: &mut dyn ProgressSink,
) -> ImportResult {
    let mut runner = Runner {
        store,
        index: CustomerIndex::new(),
        ledger: RejectionLedger::new(),
        stats: ImportStats::default(),
        tracker: ProgressTracker {
            sink,
            last_percentage: 0,
        },
    };

    match runner.execute(files).await {
        Ok(()) => {
            let message = format!(
                "Import complete: {} rows written, {} rejected",
                runner.stats.total_written(),
                runner.ledger.len()
            );
            runner
                .tracker
                .force(100, "Done", 0, 0, message.clone());
            info!(
                written = runner.stats.total_written(),
                rejected = runner.ledger.len(),
                "import finished"
            );
            ImportResult {
                success: true,
                message,
                stats: runner.stats,
                rejections: runner.ledger,
            }
        }
        Err(RunError::Fatal(message)) => {
            warn!(%message, "import aborted");
            ImportResult {
                success: false,
                message,
                stats: runner.stats,
                rejections: runner.ledger,
            }
        }
        Err(RunError::Store { source, error }) => {
            let message = format!(
                "{} while uploading {}: {}",
                ReasonCode::StoreWriteFailure.as_str(),
                source.label(),
                error
            );
            warn!(%message, "import aborted");
            ImportResult {
                success: false,
                message,
                stats: runner.stats,
                rejections: runner.ledger,
            }
        }
    }
}

struct ProgressTracker<'a> {
    sink: &'a mut dyn ProgressSink,
    last_percentage: u8,
}

impl ProgressTracker<'_> {
    /// Emit a snapshot for phase `fraction` (0..=1) of source
    /// `source_index`. The overall percentage never decreases within a
    /// run.
    fn emit(
        &mut self,
        source_index: usize,
        fraction: f64,
        step_label: &str,
        current: usize,
        total: usize,
        message: String,
    ) {
        let overall = ((source_index as f64 + fraction) / SOURCE_COUNT * 100.0).round() as u8;
        self.force(overall.min(100), step_label, current, total, message);
    }

    fn force(&mut self, percentage: u8, step_label: &str, current: usize, total: usize, message: String) {
        let percentage = percentage.max(self.last_percentage);
        self.last_percentage = percentage;
        self.sink.emit(&ImportProgress {
            step_label: step_label.to_string(),
            current,
            total,
            percentage,
            message,
        });
    }
}

/// Chunk-uploadable entity: carries its natural key and knows which
/// stats slot it fills and which store method writes it.
#[async_trait::async_trait]
trait Upsert: Sized + Send + Sync {
    fn key(&self) -> &str;
    fn slot(stats: &mut ImportStats) -> &mut UpsertOutcome;
    async fn upsert<S: ImportStore + ?Sized>(
        store: &S,
        chunk: &[Self],
    ) -> Result<UpsertOutcome, StoreError>;
}

macro_rules! impl_upsert {
    ($ty:ty, $key:ident, $slot:ident, $method:ident) => {
        #[async_trait::async_trait]
        impl Upsert for $ty {
            fn key(&self) -> &str {
                &self.$key
            }
            fn slot(stats: &mut ImportStats) -> &mut UpsertOutcome {
                &mut stats.$slot
            }
            async fn upsert<S: ImportStore + ?Sized>(
                store: &S,
                chunk: &[Self],
            ) -> Result<UpsertOutcome, StoreError> {
                store.$method(chunk).await
            }
        }
    };
}

impl_upsert!(
    crate::models::CanonicalCustomer,
    membership_number,
    customers,
    upsert_customers
);
impl_upsert!(
    crate::models::VisitSummary,
    membership_number,
    visit_summaries,
    upsert_visit_summaries
);
impl_upsert!(
    crate::models::CanonicalTransaction,
    transaction_id,
    transactions,
    upsert_transactions
);
impl_upsert!(
    crate::models::CanonicalPayment,
    payment_id,
    payments,
    upsert_payments
);
impl_upsert!(
    crate::models::CanonicalItemSale,
    sale_id,
    item_sales,
    upsert_item_sales
);
impl_upsert!(
    crate::models::CanonicalServiceSale,
    sale_id,
    service_sales,
    upsert_service_sales
);

struct Runner<'a, S: ImportStore + ?Sized> {
    store: &'a S,
    index: CustomerIndex,
    ledger: RejectionLedger,
    stats: ImportStats,
    tracker: ProgressTracker<'a>,
}

impl<S: ImportStore + ?Sized> Runner<'_, S> {
    async fn execute(&mut self, files: &ImportFiles) -> Result<(), RunError> {
        let plans = files.plans();

        // Customers populate the resolution index and must land first.
        let table = self.parse(&plans[0], 0)?;
        let accepted = self.clean_customers(&table, 0);
        if accepted == 0 {
            return Err(RunError::Fatal(format!(
                "no valid rows in {} file ({} rejected)",
                plans[0].source.label(),
                table.rows.len()
            )));
        }
        let customers = self.index.sorted();
        info!(customers = customers.len(), "customer index built");
        self.upload(&customers, 0, plans[0].source).await?;

        self.import_dependent(&plans[1], 1, clean::clean_visit_summary)
            .await?;
        self.import_dependent(&plans[2], 2, clean::clean_transaction)
            .await?;
        self.import_dependent(&plans[3], 3, clean::clean_payment)
            .await?;
        self.import_dependent(&plans[4], 4, clean::clean_item_sale)
            .await?;
        self.import_dependent(&plans[5], 5, clean::clean_service_sale)
            .await?;
        Ok(())
    }

    async fn import_dependent<T: Upsert>(
        &mut self,
        plan: &SourcePlan,
        source_index: usize,
        clean_fn: fn(&RawRow, &CustomerIndex) -> Result<T, ReasonCode>,
    ) -> Result<(), RunError> {
        let table = self.parse(plan, source_index)?;
        let rows = self.clean_rows(&table, source_index, clean_fn);
        if rows.is_empty() {
            return Err(RunError::Fatal(format!(
                "no valid rows in {} file ({} rejected)",
                plan.source.label(),
                table.rows.len()
            )));
        }
        self.upload(&rows, source_index, plan.source).await
    }

    fn parse(&mut self, plan: &SourcePlan, source_index: usize) -> Result<ParsedTable, RunError> {
        let label = plan.source.label();
        self.tracker.emit(
            source_index,
            0.0,
            label,
            0,
            0,
            format!("Parsing {} file", label),
        );

        let mut table = reader::read_table(&plan.path, plan.source, plan.skip_rows)
            .map_err(|e| RunError::Fatal(format!("failed to parse {} file: {e:#}", label)))?;

        for rejection in table.rejections.drain(..) {
            self.ledger.push(rejection);
        }

        let total = table.rows.len();
        self.tracker.emit(
            source_index,
            PARSE_DONE,
            label,
            total,
            total,
            format!("Parsed {} rows from {} file", total, label),
        );
        Ok(table)
    }

    fn clean_customers(&mut self, table: &ParsedTable, source_index: usize) -> usize {
        let total = table.rows.len();
        let mut accepted = 0;
        for (done, row) in table.rows.iter().enumerate() {
            match clean::clean_customer(row, &self.index) {
                Ok(customer) => match self.index.insert(customer) {
                    Ok(()) => accepted += 1,
                    Err(reason) => self.reject(table.source, row, reason),
                },
                Err(reason) => self.reject(table.source, row, reason),
            }
            self.clean_progress(source_index, table.source, done + 1, total);
        }
        accepted
    }

    /// A natural key seen twice within one file keeps its first row and
    /// ledgers the rest; an upsert chunk must never target the same key
    /// twice (Postgres rejects the whole statement if it does).
    fn clean_rows<T: Upsert>(
        &mut self,
        table: &ParsedTable,
        source_index: usize,
        clean_fn: fn(&RawRow, &CustomerIndex) -> Result<T, ReasonCode>,
    ) -> Vec<T> {
        let total = table.rows.len();
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(total);
        for (done, row) in table.rows.iter().enumerate() {
            match clean_fn(row, &self.index) {
                Ok(record) => {
                    if seen.insert(record.key().to_string()) {
                        out.push(record);
                    } else {
                        self.reject(table.source, row, ReasonCode::DuplicateKey);
                    }
                }
                Err(reason) => self.reject(table.source, row, reason),
            }
            self.clean_progress(source_index, table.source, done + 1, total);
        }
        out
    }

    fn reject(&mut self, source: SourceFile, row: &RawRow, reason: ReasonCode) {
        self.ledger.push(RejectionRecord {
            source_file: source,
            row_index: row.index,
            reason,
            raw_snapshot: row.snapshot(),
        });
    }

    fn clean_progress(&mut self, source_index: usize, source: SourceFile, done: usize, total: usize) {
        if done % CLEAN_PROGRESS_EVERY != 0 && done != total {
            return;
        }
        let fraction = PARSE_DONE + CLEAN_SPAN * done as f64 / total as f64;
        self.tracker.emit(
            source_index,
            fraction,
            source.label(),
            done,
            total,
            format!("Cleaned {}/{} {} rows", done, total, source.label()),
        );
    }

    async fn upload<T: Upsert>(
        &mut self,
        rows: &[T],
        source_index: usize,
        source: SourceFile,
    ) -> Result<(), RunError> {
        let total = rows.len();
        let mut written = 0;
        for chunk in rows.chunks(CHUNK_SIZE) {
            let outcome = self.write_chunk(chunk, source).await?;
            T::slot(&mut self.stats).merge(outcome);
            written += chunk.len();
            let fraction = UPLOAD_BASE + UPLOAD_SPAN * written as f64 / total as f64;
            self.tracker.emit(
                source_index,
                fraction,
                source.label(),
                written,
                total,
                format!("Uploaded {}/{} {} rows", written, total, source.label()),
            );
        }
        Ok(())
    }

    /// One chunk is written atomically from the pipeline's point of
    /// view: it either commits or, after `WRITE_ATTEMPTS` tries, fails
    /// the run.
    async fn write_chunk<T: Upsert>(
        &mut self,
        chunk: &[T],
        source: SourceFile,
    ) -> Result<UpsertOutcome, RunError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match T::upsert(self.store, chunk).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if attempt < WRITE_ATTEMPTS => {
                    warn!(
                        attempt,
                        source = source.as_str(),
                        error = %error,
                        "chunk write failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(error) => return Err(RunError::Store { source, error }),
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Preamble lines matching the report layouts the skip offsets
    /// exist for.
    fn pad(lines: usize) -> String {
        "Clinic POS Export,,,\n".repeat(lines)
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn standard_files(dir: &Path) -> ImportFiles {
        let customers = write_file(
            dir,
            "customers.csv",
            "Membership No,Customer Name,Gender,Mobile,Email,State,Postcode\n\
             M001,Ahmad bin Abdullah,,012-3456789,ahmad@example.com,SGR,47300\n\
             M002,Siti binti Hassan,,+60198765432,noemail,KL,50000\n\
             M003,Kumar a/l Rajan,,03 1234 5678,kumar@example.com,PNG,10400\n",
        );
        let visit_frequency = write_file(
            dir,
            "visits.csv",
            "Membership No,Visit Count,Last Visit Date,Total Spent\n\
             M001,4,05/02/2024,1200.50\n\
             M002,1,10/01/2024,80.00\n",
        );
        let sales = write_file(
            dir,
            "sales.csv",
            &format!(
                "{}Receipt No,Membership No,Date,Grand Total\n\
                 R100,M001,05/02/2024,RM 150.00\n\
                 R101,M002,10/01/2024,80.00\n",
                pad(15)
            ),
        );
        let payments = write_file(
            dir,
            "payments.csv",
            "Receipt No,Membership No,Date,Amount,Payment Method\n\
             R100,M001,05/02/2024,150.00,Cash\n",
        );
        let item_sales = write_file(
            dir,
            "items.csv",
            &format!(
                "{}Receipt No,Membership No,Item Name,Qty,Amount,Date\n\
                 R100,M001,Vitamin C Serum,1,150.00,05/02/2024\n",
                pad(18)
            ),
        );
        let service_sales = write_file(
            dir,
            "services.csv",
            &format!(
                "{}Receipt No,Membership No,Service Name,Amount,Date\n\
                 R101,M002,Facial Treatment,80.00,10/01/2024\n",
                pad(15)
            ),
        );
        ImportFiles {
            customers,
            visit_frequency,
            sales,
            payments,
            item_sales,
            service_sales,
        }
    }

    async fn run(store: &MemoryStore, files: &ImportFiles) -> (ImportResult, Vec<ImportProgress>) {
        let mut events: Vec<ImportProgress> = Vec::new();
        let mut sink = |p: &ImportProgress| events.push(p.clone());
        let result = run_import(store, files, &mut sink).await;
        (result, events)
    }

    #[tokio::test]
    async fn full_import_writes_every_entity_type() {
        let dir = tempfile::tempdir().unwrap();
        let files = standard_files(dir.path());
        let store = MemoryStore::new();

        let (result, events) = run(&store, &files).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.stats.customers.inserted, 3);
        assert_eq!(result.stats.visit_summaries.inserted, 2);
        assert_eq!(result.stats.transactions.inserted, 2);
        assert_eq!(result.stats.payments.inserted, 1);
        assert_eq!(result.stats.item_sales.inserted, 1);
        assert_eq!(result.stats.service_sales.inserted, 1);
        assert!(result.rejections.is_empty());

        assert_eq!(store.customer_count(), 3);
        assert_eq!(store.transaction_count(), 2);

        // Gender back-filled, placeholder email nulled.
        let siti = store.get_customer("M002").unwrap();
        assert_eq!(siti.gender, crate::gender::Gender::Female);
        assert_eq!(siti.email, None);
        assert_eq!(siti.phone.as_deref(), Some("0198765432"));
        assert_eq!(siti.state, "Kuala Lumpur");

        // Progress is monotone and terminates at 100.
        assert!(events.windows(2).all(|w| w[0].percentage <= w[1].percentage));
        assert_eq!(events.last().unwrap().percentage, 100);
    }

    #[tokio::test]
    async fn rerun_on_unchanged_files_inserts_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let files = standard_files(dir.path());
        let store = MemoryStore::new();

        let (first, _) = run(&store, &files).await;
        assert!(first.success);
        let customers_before = store.customer_count();
        let transactions_before = store.transaction_count();

        let (second, _) = run(&store, &files).await;
        assert!(second.success);
        assert_eq!(second.stats.customers.inserted, 0);
        assert_eq!(second.stats.customers.updated, 3);
        assert_eq!(second.stats.transactions.inserted, 0);
        assert_eq!(store.customer_count(), customers_before);
        assert_eq!(store.transaction_count(), transactions_before);
    }

    #[tokio::test]
    async fn duplicate_membership_keeps_first_and_rejects_second() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = standard_files(dir.path());
        files.customers = write_file(
            dir.path(),
            "dup_customers.csv",
            "Membership No,Customer Name\n\
             M001,First Occurrence\n\
             M001,Second Occurrence\n\
             M002,Siti binti Hassan\n\
             M003,Kumar a/l Rajan\n",
        );
        let store = MemoryStore::new();

        let (result, _) = run(&store, &files).await;

        assert!(result.success);
        assert_eq!(result.stats.customers.inserted, 3);
        assert_eq!(result.rejections.count_by(ReasonCode::DuplicateKey), 1);
        assert_eq!(
            store.get_customer("M001").unwrap().name,
            "First Occurrence"
        );
    }

    #[tokio::test]
    async fn split_payment_on_one_receipt_keeps_first_and_rejects_second() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = standard_files(dir.path());
        // Cash plus card settling the same receipt.
        files.payments = write_file(
            dir.path(),
            "split_payments.csv",
            "Receipt No,Membership No,Date,Amount,Payment Method\n\
             R100,M001,05/02/2024,100.00,Cash\n\
             R100,M001,05/02/2024,50.00,Credit Card\n",
        );
        let store = MemoryStore::new();

        let (result, _) = run(&store, &files).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(
            result.stats.payments,
            UpsertOutcome { inserted: 1, updated: 0 }
        );
        assert_eq!(result.rejections.count_by(ReasonCode::DuplicateKey), 1);
        let rejection = result
            .rejections
            .records()
            .iter()
            .find(|r| r.reason == ReasonCode::DuplicateKey)
            .unwrap();
        assert_eq!(rejection.source_file, SourceFile::Payments);

        assert_eq!(store.payment_count(), 1);
        let kept = store.get_payment("R100").unwrap();
        assert_eq!(kept.amount, 100.0);
        assert_eq!(kept.method.as_deref(), Some("Cash"));
    }

    #[tokio::test]
    async fn unknown_customer_reference_is_rejected_others_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = standard_files(dir.path());
        files.sales = write_file(
            dir.path(),
            "bad_sales.csv",
            &format!(
                "{}Receipt No,Membership No,Date,Grand Total\n\
                 R100,M001,05/02/2024,150.00\n\
                 R200,M999,05/02/2024,60.00\n",
                pad(15)
            ),
        );
        let store = MemoryStore::new();

        let (result, _) = run(&store, &files).await;

        assert!(result.success);
        assert_eq!(result.stats.transactions.inserted, 1);
        assert_eq!(
            result.rejections.count_by(ReasonCode::UnknownCustomerReference),
            1
        );
        let rejection = result
            .rejections
            .records()
            .iter()
            .find(|r| r.reason == ReasonCode::UnknownCustomerReference)
            .unwrap();
        assert_eq!(rejection.source_file, SourceFile::Sales);
        assert!(rejection.raw_snapshot.contains("M999"));
    }

    #[tokio::test]
    async fn empty_name_row_is_rejected_but_run_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = standard_files(dir.path());
        files.customers = write_file(
            dir.path(),
            "gap_customers.csv",
            "Membership No,Customer Name\n\
             M001,Ahmad bin Abdullah\n\
             M002,\n\
             M003,Kumar a/l Rajan\n",
        );
        // Drop the rows referencing the now-missing M002.
        files.visit_frequency = write_file(
            dir.path(),
            "gap_visits.csv",
            "Membership No,Visit Count,Last Visit Date,Total Spent\nM001,4,05/02/2024,1200.50\n",
        );
        files.sales = write_file(
            dir.path(),
            "gap_sales.csv",
            &format!(
                "{}Receipt No,Membership No,Date,Grand Total\nR100,M001,05/02/2024,150.00\n",
                pad(15)
            ),
        );
        files.service_sales = write_file(
            dir.path(),
            "gap_services.csv",
            &format!(
                "{}Receipt No,Membership No,Service Name,Amount,Date\n\
                 R100,M001,Facial Treatment,80.00,10/01/2024\n",
                pad(15)
            ),
        );
        let store = MemoryStore::new();

        let (result, _) = run(&store, &files).await;

        assert!(result.success);
        assert_eq!(result.stats.customers.inserted, 2);
        assert_eq!(result.rejections.len(), 1);
        assert_eq!(
            result.rejections.records()[0].reason,
            ReasonCode::MissingRequiredField
        );
    }

    #[tokio::test]
    async fn unreadable_customer_file_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = standard_files(dir.path());
        files.customers = dir.path().join("does_not_exist.csv");
        let store = MemoryStore::new();

        let (result, _) = run(&store, &files).await;

        assert!(!result.success);
        assert!(result.message.contains("customer info"));
        assert_eq!(store.customer_count(), 0);
    }

    #[tokio::test]
    async fn all_rows_rejected_in_dependent_file_aborts_later_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = standard_files(dir.path());
        files.visit_frequency = write_file(
            dir.path(),
            "orphan_visits.csv",
            "Membership No,Visit Count\nM999,3\n",
        );
        let store = MemoryStore::new();

        let (result, _) = run(&store, &files).await;

        assert!(!result.success);
        assert!(result.message.contains("visit frequency"));
        // Customers committed before the abort are reported, not
        // rolled back.
        assert_eq!(result.stats.customers.inserted, 3);
        assert_eq!(store.customer_count(), 3);
        assert_eq!(store.transaction_count(), 0);
    }

    // -------------------------------------------------------------------------
    // RETRY BEHAVIOR
    // -------------------------------------------------------------------------

    /// Fails the first `failures` customer writes, then delegates to an
    /// inner MemoryStore.
    struct FlakyStore {
        inner: MemoryStore,
        remaining_failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                remaining_failures: AtomicU32::new(failures),
            }
        }

        fn take_failure(&self) -> bool {
            self.remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait::async_trait]
    impl ImportStore for FlakyStore {
        async fn upsert_customers(
            &self,
            rows: &[crate::models::CanonicalCustomer],
        ) -> Result<UpsertOutcome, StoreError> {
            if self.take_failure() {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            self.inner.upsert_customers(rows).await
        }
        async fn upsert_visit_summaries(
            &self,
            rows: &[crate::models::VisitSummary],
        ) -> Result<UpsertOutcome, StoreError> {
            self.inner.upsert_visit_summaries(rows).await
        }
        async fn upsert_transactions(
            &self,
            rows: &[crate::models::CanonicalTransaction],
        ) -> Result<UpsertOutcome, StoreError> {
            self.inner.upsert_transactions(rows).await
        }
        async fn upsert_payments(
            &self,
            rows: &[crate::models::CanonicalPayment],
        ) -> Result<UpsertOutcome, StoreError> {
            self.inner.upsert_payments(rows).await
        }
        async fn upsert_item_sales(
            &self,
            rows: &[crate::models::CanonicalItemSale],
        ) -> Result<UpsertOutcome, StoreError> {
            self.inner.upsert_item_sales(rows).await
        }
        async fn upsert_service_sales(
            &self,
            rows: &[crate::models::CanonicalServiceSale],
        ) -> Result<UpsertOutcome, StoreError> {
            self.inner.upsert_service_sales(rows).await
        }
    }

    #[tokio::test]
    async fn transient_chunk_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let files = standard_files(dir.path());
        let store = FlakyStore::new(WRITE_ATTEMPTS - 1);

        let mut sink = |_: &ImportProgress| {};
        let result = run_import(&store, &files, &mut sink).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.stats.customers.inserted, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run_with_store_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let files = standard_files(dir.path());
        let store = FlakyStore::new(WRITE_ATTEMPTS);

        let mut sink = |_: &ImportProgress| {};
        let result = run_import(&store, &files, &mut sink).await;

        assert!(!result.success);
        assert!(result.message.contains("STORE_WRITE_FAILURE"));
        assert_eq!(result.stats.customers.inserted, 0);
    }
}
