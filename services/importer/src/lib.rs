//! Batch importer for clinic POS spreadsheet exports.
//!
//! Takes the six files one POS export produces (customer info, visit
//! frequency, detailed sales, payments, item sales, service sales),
//! normalizes every field into a canonical form, and upserts the result
//! into the store idempotently. Bad rows are rejected with a reason
//! code and a raw snapshot, never silently dropped.

pub mod clean;
pub mod error;
pub mod gender;
pub mod import;
pub mod index;
pub mod models;
pub mod normalize;
pub mod reader;
pub mod store;

pub use error::{ReasonCode, RejectionLedger, RejectionRecord};
pub use import::{run_import, ImportFiles, ImportResult, ProgressSink};
pub use models::{ImportProgress, ImportStats, SourceFile};
pub use store::{ImportStore, MemoryStore, PgStore};
