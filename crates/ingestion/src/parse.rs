use core_types::RawTable;
use polars::prelude::*;
use serde_json::Value;
use std::io::Cursor;

use crate::source::SourceFormat;

/// Parses raw bytes into a text-only table. Errors are plain messages; the caller
/// wraps them into `IngestionError::Schema` with the source name.
pub fn parse_table(bytes: &[u8], format: SourceFormat) -> Result<RawTable, String> {
    match format {
        SourceFormat::Csv => parse_csv(bytes),
        SourceFormat::Json => parse_json(bytes),
    }
}

/// Reads a delimited file with every column kept as a string. Type coercion is the
/// validator's job, so schema inference is switched off.
fn parse_csv(bytes: &[u8]) -> Result<RawTable, String> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err("empty file".to_string());
    }

    let df = CsvReader::new(Cursor::new(bytes.to_vec()))
        .has_header(true)
        .infer_schema(Some(0))
        .finish()
        .map_err(|e| e.to_string())?;

    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.trim().to_string())
        .collect();
    let mut table = RawTable::new(columns);
    table.rows = vec![vec![None; table.columns.len()]; df.height()];

    for (col_idx, series) in df.get_columns().iter().enumerate() {
        let values = series.str().map_err(|e| e.to_string())?;
        for (row_idx, cell) in values.into_iter().enumerate() {
            table.rows[row_idx][col_idx] = clean_cell(cell);
        }
    }

    Ok(table)
}

/// Accepts either a top-level array of records or an object with a `records` array.
fn parse_json(bytes: &[u8]) -> Result<RawTable, String> {
    let document: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    let records = match document {
        Value::Array(records) => records,
        Value::Object(mut map) => match map.remove("records") {
            Some(Value::Array(records)) => records,
            _ => return Err("expected an array of records or an object with a 'records' array".to_string()),
        },
        _ => return Err("expected an array of records".to_string()),
    };

    // Columns keep first-seen order so exports mirror the source layout.
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        let Value::Object(fields) = record else {
            return Err("every record must be a JSON object".to_string());
        };
        for key in fields.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = RawTable::new(columns);
    for record in records {
        let Value::Object(fields) = record else { continue };
        let row = table
            .columns
            .iter()
            .map(|column| match fields.get(column) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => clean_cell(Some(s.as_str())),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(Value::Bool(b)) => Some(b.to_string()),
                Some(other) => Some(other.to_string()),
            })
            .collect();
        table.rows.push(row);
    }

    Ok(table)
}

fn clean_cell(cell: Option<&str>) -> Option<String> {
    cell.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_cells_stay_text_and_blanks_become_null() {
        let csv = b"loan_id,disbursement_amount,segment\nL1,1000.50,retail\nL2,,  sme \n";
        let table = parse_table(csv, SourceFormat::Csv).unwrap();
        assert_eq!(table.columns, vec!["loan_id", "disbursement_amount", "segment"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0][1].as_deref(), Some("1000.50"));
        assert_eq!(table.rows[1][1], None);
        assert_eq!(table.rows[1][2].as_deref(), Some("sme"));
    }

    #[test]
    fn json_records_union_their_keys() {
        let json = br#"[{"loan_id": "L1", "days_past_due": 0}, {"loan_id": "L2", "segment": "sme", "days_past_due": null}]"#;
        let table = parse_table(json, SourceFormat::Json).unwrap();
        assert_eq!(table.columns, vec!["loan_id", "days_past_due", "segment"]);
        assert_eq!(table.rows[0][1].as_deref(), Some("0"));
        assert_eq!(table.rows[0][2], None);
        assert_eq!(table.rows[1][1], None);
    }

    #[test]
    fn json_wrapped_in_records_object() {
        let json = br#"{"records": [{"loan_id": "L1"}]}"#;
        let table = parse_table(json, SourceFormat::Json).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(parse_table(b"", SourceFormat::Csv).is_err());
        assert!(parse_table(b"{not json", SourceFormat::Json).is_err());
        assert!(parse_table(br#"[1, 2]"#, SourceFormat::Json).is_err());
    }
}
