use chrono::{DateTime, NaiveDate, Utc};
use core_types::{LoanRecord, PaymentRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A non-fatal finding about the input. Recorded on the run outcome and in the
/// data-quality notes; never stops the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityWarning {
    pub code: WarningCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    StaleData,
    ReferentialIntegrity,
    CoercionFailures,
    DroppedRows,
    DuplicatesRemoved,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::StaleData => "stale_data",
            WarningCode::ReferentialIntegrity => "referential_integrity",
            WarningCode::CoercionFailures => "coercion_failures",
            WarningCode::DroppedRows => "dropped_rows",
            WarningCode::DuplicatesRemoved => "duplicates_removed",
        }
    }
}

impl DataQualityWarning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

/// `1 - nulls / total_cells`; an empty snapshot counts as fully complete.
pub fn completeness(null_cells: usize, total_cells: usize) -> f64 {
    if total_cells == 0 {
        return 1.0;
    }
    1.0 - null_cells as f64 / total_cells as f64
}

/// Hours between `now` and the newest `updated_at` in the loan tape, falling back to
/// the snapshot's business date when no row carries a timestamp. Never negative.
pub fn freshness_hours(loans: &[LoanRecord], as_of: NaiveDate, now: DateTime<Utc>) -> f64 {
    let newest = loans
        .iter()
        .filter_map(|l| l.updated_at)
        .max()
        .or_else(|| as_of.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()));
    match newest {
        Some(newest) => ((now - newest).num_seconds() as f64 / 3600.0).max(0.0),
        None => 0.0,
    }
}

#[derive(Serialize)]
struct CanonicalPayload<'a> {
    loans: &'a [LoanRecord],
    payments: &'a [PaymentRecord],
}

/// Hex sha-256 of the canonical rows. Inputs must already be sorted by primary key,
/// which makes the hash independent of source row order.
pub fn canonical_hash(loans: &[LoanRecord], payments: &[PaymentRecord]) -> String {
    let payload = CanonicalPayload { loans, payments };
    // Serializing plain structs of strings, decimals and dates cannot fail.
    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
