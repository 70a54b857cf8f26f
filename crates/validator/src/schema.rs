use crate::error::ValidationError;
use core_types::{RawTable, SourceTable};
use std::collections::HashMap;

/// Column layout of one canonical table.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: SourceTable,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    /// Columns that must be non-null for a row to be kept at all.
    pub identifiers: &'static [&'static str],
    pub primary_key: &'static str,
}

pub const LOAN_SCHEMA: TableSchema = TableSchema {
    table: SourceTable::Loans,
    required: &[
        "loan_id",
        "customer_id",
        "disbursement_date",
        "disbursement_amount",
        "interest_rate",
        "origination_fee",
        "total_receivable",
        "days_past_due",
        "total_eligible",
        "cash_available",
    ],
    optional: &["segment", "status", "updated_at"],
    identifiers: &["loan_id", "customer_id"],
    primary_key: "loan_id",
};

pub const PAYMENT_SCHEMA: TableSchema = TableSchema {
    table: SourceTable::Payments,
    required: &["payment_id", "loan_id", "due_date", "scheduled_amount", "paid_amount"],
    optional: &["paid_date"],
    identifiers: &["payment_id", "loan_id"],
    primary_key: "payment_id",
};

/// Header names are matched case-insensitively with spaces and dashes folded to `_`.
pub fn normalize_header(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

/// Resolved positions of the schema's columns within a raw table.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    positions: HashMap<&'static str, usize>,
}

impl ColumnMap {
    /// Reads `column` from `row`. Absent optional columns read as null.
    pub fn get<'a>(&self, row: &'a [Option<String>], column: &str) -> Option<&'a str> {
        self.positions
            .get(column)
            .and_then(|&idx| row.get(idx))
            .and_then(|cell| cell.as_deref())
    }

    pub fn has(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    /// Number of schema columns present, i.e. the cells each accepted row contributes.
    pub fn width(&self) -> usize {
        self.positions.len()
    }
}

/// Checks that every required column is present and builds the column map.
/// Extra columns are ignored.
pub fn resolve_columns(raw: &RawTable, schema: &TableSchema) -> Result<ColumnMap, ValidationError> {
    let table = schema.table.as_str().to_string();
    if raw.columns.is_empty() {
        return Err(ValidationError::NoHeader { table });
    }

    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (idx, column) in raw.columns.iter().enumerate() {
        let name = normalize_header(column);
        if by_name.insert(name.clone(), idx).is_some()
            && schema.required.iter().chain(schema.optional).any(|c| *c == name)
        {
            return Err(ValidationError::DuplicateColumn { table, column: name });
        }
    }

    let missing: Vec<String> = schema
        .required
        .iter()
        .filter(|c| !by_name.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingColumns { table, columns: missing });
    }

    let positions = schema
        .required
        .iter()
        .chain(schema.optional)
        .filter_map(|c| by_name.get(*c).map(|&idx| (*c, idx)))
        .collect();
    Ok(ColumnMap { positions })
}
