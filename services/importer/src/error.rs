//! Rejection taxonomy and the append-only rejection ledger.
//!
//! Row-level failures are data, not control flow: every rejected row is
//! recorded with enough context for an operator to review the full log
//! after the run.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SourceFile;

/// Why a row (or chunk) was not accepted.
///
/// The first four are row-local and non-fatal; `StoreWriteFailure` is
/// chunk-local and fatal once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ReasonCode {
    #[error("MALFORMED_ROW")]
    #[serde(rename = "MALFORMED_ROW")]
    MalformedRow,
    #[error("MISSING_REQUIRED_FIELD")]
    #[serde(rename = "MISSING_REQUIRED_FIELD")]
    MissingRequiredField,
    #[error("DUPLICATE_KEY")]
    #[serde(rename = "DUPLICATE_KEY")]
    DuplicateKey,
    #[error("UNKNOWN_CUSTOMER_REFERENCE")]
    #[serde(rename = "UNKNOWN_CUSTOMER_REFERENCE")]
    UnknownCustomerReference,
    #[error("STORE_WRITE_FAILURE")]
    #[serde(rename = "STORE_WRITE_FAILURE")]
    StoreWriteFailure,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::MalformedRow => "MALFORMED_ROW",
            ReasonCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ReasonCode::DuplicateKey => "DUPLICATE_KEY",
            ReasonCode::UnknownCustomerReference => "UNKNOWN_CUSTOMER_REFERENCE",
            ReasonCode::StoreWriteFailure => "STORE_WRITE_FAILURE",
        }
    }
}

/// One rejected row, with a snapshot of the offending raw cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectionRecord {
    pub source_file: SourceFile,
    /// 0-based index among the data rows of the source file.
    pub row_index: usize,
    pub reason: ReasonCode,
    pub raw_snapshot: String,
}

/// Append-only collection of rejections accumulated over one run.
#[derive(Debug, Default, Serialize)]
pub struct RejectionLedger {
    records: Vec<RejectionRecord>,
}

impl RejectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: RejectionRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RejectionRecord] {
        &self.records
    }

    pub fn count_by(&self, reason: ReasonCode) -> usize {
        self.records.iter().filter(|r| r.reason == reason).count()
    }

    /// Write the full ledger as CSV for operator download.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(["source_file", "row_index", "reason", "raw"])?;
        for record in &self.records {
            out.write_record([
                record.source_file.as_str(),
                &record.row_index.to_string(),
                record.reason.as_str(),
                &record.raw_snapshot,
            ])?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_have_stable_wire_names() {
        assert_eq!(ReasonCode::MalformedRow.as_str(), "MALFORMED_ROW");
        assert_eq!(ReasonCode::DuplicateKey.to_string(), "DUPLICATE_KEY");
        assert_eq!(
            serde_json::to_string(&ReasonCode::UnknownCustomerReference).unwrap(),
            "\"UNKNOWN_CUSTOMER_REFERENCE\""
        );
    }

    #[test]
    fn ledger_exports_csv() {
        let mut ledger = RejectionLedger::new();
        ledger.push(RejectionRecord {
            source_file: SourceFile::Customers,
            row_index: 3,
            reason: ReasonCode::MissingRequiredField,
            raw_snapshot: "membership no=M001".to_string(),
        });

        let mut buf = Vec::new();
        ledger.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("source_file,row_index,reason,raw"));
        assert!(text.contains("customers,3,MISSING_REQUIRED_FIELD,membership no=M001"));
    }

    #[test]
    fn count_by_filters_on_reason() {
        let mut ledger = RejectionLedger::new();
        for reason in [
            ReasonCode::DuplicateKey,
            ReasonCode::DuplicateKey,
            ReasonCode::MalformedRow,
        ] {
            ledger.push(RejectionRecord {
                source_file: SourceFile::Sales,
                row_index: 0,
                reason,
                raw_snapshot: String::new(),
            });
        }
        assert_eq!(ledger.count_by(ReasonCode::DuplicateKey), 2);
        assert_eq!(ledger.count_by(ReasonCode::StoreWriteFailure), 0);
    }
}
