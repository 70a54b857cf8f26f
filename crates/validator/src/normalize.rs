//! Cell-level coercion from loan-tape text into typed values.
//!
//! Every parser returns `None` for text it cannot interpret; the caller counts
//! those as coercion failures and carries on with a null cell.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parses a monetary or rate cell. Tolerates currency symbols, thousands
/// separators, a trailing `%`, and scientific notation.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(['$', '€', '£'])
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
        .map(|d| d.normalize())
}

/// Days past due must be a non-negative whole number (`30` and `30.0` both work).
pub fn parse_days(raw: &str) -> Option<u32> {
    let value = parse_decimal(raw)?;
    if value.is_sign_negative() || value.fract() != Decimal::ZERO {
        return None;
    }
    value.to_u32()
}

/// Accepts ISO dates, `YYYY/MM/DD`, `DD.MM.YYYY`, RFC 3339 timestamps, and
/// `YYYY-MM-DD HH:MM:SS`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date_naive()))
}

/// Timestamps without an offset are taken as UTC; bare dates become midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Some(naive) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(naive.and_utc());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn normalize_segment(raw: Option<&str>) -> String {
    raw.map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unassigned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decimals_tolerate_formatting_noise() {
        assert_eq!(parse_decimal("1,250.50"), Some(dec!(1250.5)));
        assert_eq!(parse_decimal("$ 1 000"), Some(dec!(1000)));
        assert_eq!(parse_decimal("18.5%"), Some(dec!(18.5)));
        assert_eq!(parse_decimal("1e3"), Some(dec!(1000)));
        assert_eq!(parse_decimal("-42.10"), Some(dec!(-42.1)));
        assert_eq!(parse_decimal("n/a"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn days_must_be_whole_and_non_negative() {
        assert_eq!(parse_days("30"), Some(30));
        assert_eq!(parse_days("30.0"), Some(30));
        assert_eq!(parse_days("0"), Some(0));
        assert_eq!(parse_days("-1"), None);
        assert_eq!(parse_days("2.5"), None);
    }

    #[test]
    fn dates_in_every_accepted_spelling() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        for raw in ["2026-03-07", "2026/03/07", "07.03.2026", "2026-03-07T10:15:00Z", "2026-03-07 23:59:59"] {
            assert_eq!(parse_date(raw), Some(expected), "failed on {raw}");
        }
        assert_eq!(parse_date("03/07/2026"), None);
        assert_eq!(parse_date("2026-02-30"), None);
    }

    #[test]
    fn offsets_are_converted_to_utc() {
        let ts = parse_timestamp("2026-03-07T01:00:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-03-06T23:00:00+00:00");
        let midnight = parse_timestamp("2026-03-07").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2026-03-07T00:00:00+00:00");
    }

    #[test]
    fn segments_default_to_unassigned() {
        assert_eq!(normalize_segment(Some("  SME ")), "sme");
        assert_eq!(normalize_segment(Some("   ")), "unassigned");
        assert_eq!(normalize_segment(None), "unassigned");
    }
}
