use crate::normalize::{normalize_segment, parse_date, parse_days, parse_decimal, parse_timestamp};
use crate::schema::{resolve_columns, ColumnMap, TableSchema, LOAN_SCHEMA, PAYMENT_SCHEMA};
use chrono::{DateTime, NaiveDate, Utc};
use configuration::ValidationSettings;
use core_types::{CanonicalTable, DataQualityResult, LoanRecord, LoanStatus, PaymentRecord, RawTable};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

pub mod error;
pub mod normalize;
pub mod quality;
pub mod schema;

pub use error::ValidationError;
pub use quality::{DataQualityWarning, WarningCode};

/// The output of the validate phase.
#[derive(Debug, Clone)]
pub struct Validated {
    pub table: CanonicalTable,
    pub quality: DataQualityResult,
    pub warnings: Vec<DataQualityWarning>,
}

/// Running tallies for one table while its rows are coerced.
#[derive(Debug, Default)]
struct TableStats {
    received: usize,
    dropped: usize,
    duplicates: usize,
    null_cells: usize,
    total_cells: usize,
    coercion_failures: BTreeMap<&'static str, usize>,
}

impl TableStats {
    /// Reads a typed cell, counting nulls and cells that were present but unparseable.
    fn coerce<T>(
        &mut self,
        map: &ColumnMap,
        row: &[Option<String>],
        column: &'static str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        if !map.has(column) {
            return None;
        }
        match map.get(row, column) {
            None => {
                self.null_cells += 1;
                None
            }
            Some(text) => {
                let parsed = parse(text);
                if parsed.is_none() {
                    self.null_cells += 1;
                    *self.coercion_failures.entry(column).or_default() += 1;
                }
                parsed
            }
        }
    }

    /// Reads a text cell; only nulls are counted.
    fn text(&mut self, map: &ColumnMap, row: &[Option<String>], column: &'static str) -> Option<String> {
        if !map.has(column) {
            return None;
        }
        let value = map.get(row, column).map(str::to_string);
        if value.is_none() {
            self.null_cells += 1;
        }
        value
    }

    /// Returns false (and counts the drop) when any identifier column is null.
    fn has_identifiers(&mut self, map: &ColumnMap, row: &[Option<String>], schema: &TableSchema) -> bool {
        let ok = schema.identifiers.iter().all(|c| map.get(row, c).is_some());
        if !ok {
            self.dropped += 1;
        }
        ok
    }
}

/// Enforces the canonical schema on the raw loan tape (and optional payment table)
/// and produces the immutable snapshot every KPI is computed from.
///
/// Missing required columns are fatal. Everything else is repaired and reported:
/// unparseable cells become nulls, rows without identifiers are dropped, duplicate
/// primary keys keep the most recently updated row (ties keep the later row), and
/// dates are normalized. `now` is injected so freshness is reproducible in tests.
pub fn transform(
    raw_loans: &RawTable,
    raw_payments: Option<&RawTable>,
    run_id: Uuid,
    as_of: NaiveDate,
    now: DateTime<Utc>,
    settings: &ValidationSettings,
) -> Result<Validated, ValidationError> {
    let loan_map = resolve_columns(raw_loans, &LOAN_SCHEMA)?;
    let payment_map = raw_payments
        .map(|raw| resolve_columns(raw, &PAYMENT_SCHEMA).map(|map| (raw, map)))
        .transpose()?;

    let mut loan_stats = TableStats { received: raw_loans.len(), ..Default::default() };
    let loans = canonical_loans(raw_loans, &loan_map, &mut loan_stats);

    let mut payment_stats = TableStats::default();
    let payments = match payment_map {
        Some((raw, map)) => {
            payment_stats.received = raw.len();
            canonical_payments(raw, &map, &mut payment_stats)
        }
        None => Vec::new(),
    };

    let mut warnings = Vec::new();
    let mut notes = Vec::new();

    for (label, stats) in [("loan", &loan_stats), ("payment", &payment_stats)] {
        if raw_payments.is_none() && label == "payment" {
            continue;
        }
        notes.push(format!(
            "dropped {} {} row(s) with null identifiers",
            stats.dropped, label
        ));
        if stats.dropped > 0 {
            warnings.push(DataQualityWarning::new(
                WarningCode::DroppedRows,
                format!("{} {} row(s) dropped for null identifiers", stats.dropped, label),
            ));
        }
        if stats.duplicates > 0 {
            notes.push(format!("removed {} duplicate {} row(s)", stats.duplicates, label));
            warnings.push(DataQualityWarning::new(
                WarningCode::DuplicatesRemoved,
                format!("{} duplicate {} row(s) removed", stats.duplicates, label),
            ));
        }
        for (column, count) in &stats.coercion_failures {
            notes.push(format!("{} {} cell(s) in '{}' could not be coerced", count, label, column));
            warnings.push(DataQualityWarning::new(
                WarningCode::CoercionFailures,
                format!("{} value(s) in {}.{} set to null", count, label, column),
            ));
        }
    }

    let known_loans: HashSet<&str> = loans.iter().map(|l| l.loan_id.as_str()).collect();
    let orphans = payments.iter().filter(|p| !known_loans.contains(p.loan_id.as_str())).count();
    let referential_integrity_pass = orphans == 0;
    if !referential_integrity_pass {
        notes.push(format!("{} payment(s) reference unknown loan ids", orphans));
        warnings.push(DataQualityWarning::new(
            WarningCode::ReferentialIntegrity,
            format!("{} payment(s) reference a loan_id missing from the loan tape", orphans),
        ));
    }

    let freshness_hours = quality::freshness_hours(&loans, as_of, now);
    if freshness_hours > settings.max_staleness_hours {
        notes.push(format!("snapshot is {:.1}h old", freshness_hours));
        warnings.push(DataQualityWarning::new(
            WarningCode::StaleData,
            format!(
                "newest record is {:.1}h old (limit {:.1}h)",
                freshness_hours, settings.max_staleness_hours
            ),
        ));
    }

    let null_cells = loan_stats.null_cells + payment_stats.null_cells;
    let total_cells = loan_stats.total_cells + payment_stats.total_cells;
    let content_hash = quality::canonical_hash(&loans, &payments);

    let quality = DataQualityResult {
        run_id,
        completeness: quality::completeness(null_cells, total_cells),
        freshness_hours,
        referential_integrity_pass,
        notes,
        rows_received: loan_stats.received + payment_stats.received,
        rows_accepted: loans.len() + payments.len(),
        duplicates_removed: loan_stats.duplicates + payment_stats.duplicates,
        null_cells,
    };

    for w in &warnings {
        warn!(code = w.code.as_str(), "{}", w.message);
    }
    info!(
        loans = loans.len(),
        payments = payments.len(),
        completeness = quality.completeness,
        freshness_hours = quality.freshness_hours,
        content_hash = %content_hash,
        "Canonical snapshot built"
    );

    Ok(Validated {
        table: CanonicalTable { as_of, loans, payments, content_hash },
        quality,
        warnings,
    })
}

fn canonical_loans(raw: &RawTable, map: &ColumnMap, stats: &mut TableStats) -> Vec<LoanRecord> {
    // BTreeMap keyed by loan_id gives the sorted order the canonical hash relies on.
    let mut by_id: BTreeMap<String, LoanRecord> = BTreeMap::new();

    for row in &raw.rows {
        if !stats.has_identifiers(map, row, &LOAN_SCHEMA) {
            continue;
        }
        let loan_id = stats.text(map, row, "loan_id").unwrap_or_default();
        let customer_id = stats.text(map, row, "customer_id").unwrap_or_default();
        let segment = map.get(row, "segment");
        if segment.is_none() && map.has("segment") {
            stats.null_cells += 1;
        }

        let disbursement_date = stats.coerce(map, row, "disbursement_date", parse_date);
        let updated_at = stats
            .coerce(map, row, "updated_at", parse_timestamp)
            .or_else(|| disbursement_date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc()));

        let record = LoanRecord {
            loan_id,
            customer_id,
            segment: normalize_segment(segment),
            status: stats.coerce(map, row, "status", LoanStatus::parse_normalized),
            disbursement_date,
            disbursement_amount: stats.coerce(map, row, "disbursement_amount", parse_decimal),
            interest_rate: stats.coerce(map, row, "interest_rate", parse_decimal),
            origination_fee: stats.coerce(map, row, "origination_fee", parse_decimal),
            total_receivable: stats.coerce(map, row, "total_receivable", parse_decimal),
            days_past_due: stats.coerce(map, row, "days_past_due", parse_days),
            total_eligible: stats.coerce(map, row, "total_eligible", parse_decimal),
            cash_available: stats.coerce(map, row, "cash_available", parse_decimal),
            updated_at,
        };
        stats.total_cells += map.width();

        match by_id.get(&record.loan_id) {
            Some(existing) => {
                stats.duplicates += 1;
                // `>=` so that on equal timestamps the later row wins.
                if record.updated_at >= existing.updated_at {
                    by_id.insert(record.loan_id.clone(), record);
                }
            }
            None => {
                by_id.insert(record.loan_id.clone(), record);
            }
        }
    }

    by_id.into_values().collect()
}

fn canonical_payments(raw: &RawTable, map: &ColumnMap, stats: &mut TableStats) -> Vec<PaymentRecord> {
    let mut by_id: BTreeMap<String, PaymentRecord> = BTreeMap::new();

    for row in &raw.rows {
        if !stats.has_identifiers(map, row, &PAYMENT_SCHEMA) {
            continue;
        }
        let record = PaymentRecord {
            payment_id: stats.text(map, row, "payment_id").unwrap_or_default(),
            loan_id: stats.text(map, row, "loan_id").unwrap_or_default(),
            due_date: stats.coerce(map, row, "due_date", parse_date),
            paid_date: stats.coerce(map, row, "paid_date", parse_date),
            scheduled_amount: stats.coerce(map, row, "scheduled_amount", parse_decimal),
            paid_amount: stats.coerce(map, row, "paid_amount", parse_decimal),
        };
        stats.total_cells += map.width();

        // Payments carry no timestamp; the later row wins.
        if by_id.insert(record.payment_id.clone(), record).is_some() {
            stats.duplicates += 1;
        }
    }

    by_id.into_values().collect()
}
