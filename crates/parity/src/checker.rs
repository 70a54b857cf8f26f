use crate::error::ParityError;
use crate::reference::ReferenceEngine;
use chrono::NaiveDate;
use configuration::ParitySettings;
use core_types::KpiValue;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// One KPI's comparison between the primary and reference engines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParityEntry {
    pub kpi_name: String,
    pub primary: Option<Decimal>,
    pub reference: Option<f64>,
    pub abs_delta: Option<Decimal>,
    /// `|primary - reference| / max(|reference|, epsilon)`.
    pub rel_delta: Option<Decimal>,
    pub tolerance: Decimal,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParityReport {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub reference_engine: String,
    pub entries: Vec<ParityEntry>,
    /// KPIs only one of the two engines knows about. Listed, never failed.
    pub unmatched: Vec<String>,
}

impl ParityReport {
    pub fn mismatches(&self) -> impl Iterator<Item = &ParityEntry> {
        self.entries.iter().filter(|e| !e.passed)
    }

    pub fn mismatch_count(&self) -> usize {
        self.mismatches().count()
    }

    pub fn passed(&self) -> bool {
        self.mismatch_count() == 0
    }

    pub fn entry(&self, kpi_name: &str) -> Option<&ParityEntry> {
        self.entries.iter().find(|e| e.kpi_name == kpi_name)
    }
}

/// Compares primary-engine values against a reference engine under the
/// configured per-KPI tolerances.
#[derive(Debug, Clone)]
pub struct ParityChecker {
    settings: ParitySettings,
}

impl ParityChecker {
    pub fn new(settings: ParitySettings) -> Self {
        Self { settings }
    }

    /// A mismatch is reported, never raised: only a reference engine that cannot
    /// answer at all is an error.
    #[instrument(skip(self, primary, reference), fields(engine = reference.name()))]
    pub fn check_parity(
        &self,
        run_id: Uuid,
        as_of: NaiveDate,
        primary: &[KpiValue],
        reference: &dyn ReferenceEngine,
    ) -> Result<ParityReport, ParityError> {
        let reference_names = reference.kpi_names(as_of)?;
        let primary_names: BTreeSet<&str> = primary.iter().map(|v| v.kpi_name.as_str()).collect();

        let mut entries = Vec::with_capacity(primary.len());
        for value in primary {
            if !reference_names.contains(&value.kpi_name) {
                continue;
            }
            let reference_value = reference.query(as_of, &value.kpi_name)?;
            let entry = self.compare(value, reference_value);
            if !entry.passed {
                error!(
                    kpi = %entry.kpi_name,
                    primary = ?entry.primary,
                    reference = ?entry.reference,
                    rel_delta = ?entry.rel_delta,
                    tolerance = %entry.tolerance,
                    "Parity mismatch"
                );
            }
            entries.push(entry);
        }

        let mut unmatched: Vec<String> = primary
            .iter()
            .filter(|v| !reference_names.contains(&v.kpi_name))
            .map(|v| v.kpi_name.clone())
            .collect();
        unmatched.extend(reference_names.iter().filter(|n| !primary_names.contains(n.as_str())).cloned());

        let report = ParityReport {
            run_id,
            as_of,
            reference_engine: reference.name().to_string(),
            entries,
            unmatched,
        };
        info!(
            compared = report.entries.len(),
            mismatches = report.mismatch_count(),
            unmatched = report.unmatched.len(),
            "Parity check complete"
        );
        Ok(report)
    }

    fn compare(&self, value: &KpiValue, reference: Option<f64>) -> ParityEntry {
        let tolerance = self.settings.tolerance_for(&value.kpi_name);
        let mut entry = ParityEntry {
            kpi_name: value.kpi_name.clone(),
            primary: value.value,
            reference,
            abs_delta: None,
            rel_delta: None,
            tolerance,
            passed: false,
        };

        match (value.value, reference) {
            (None, None) => entry.passed = true,
            (Some(primary), Some(reference)) => {
                // NaN and infinities have no decimal form and can never agree.
                let Some(reference) = Decimal::from_f64(reference) else {
                    return entry;
                };
                let abs_delta = (primary - reference).abs();
                let floor = reference.abs().max(self.settings.epsilon);
                let rel_delta = abs_delta.checked_div(floor);
                // One unit in the last persisted decimal place.
                let granularity = Decimal::new(1, value.precision.min(28));

                entry.passed = rel_delta.is_some_and(|rel| rel <= tolerance) || abs_delta <= granularity;
                entry.abs_delta = Some(abs_delta);
                entry.rel_delta = rel_delta;
            }
            _ => {}
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::StaticReferenceEngine;
    use core_types::{KpiContext, ThresholdStatus};
    use rust_decimal_macros::dec;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 30).unwrap()
    }

    fn value(kpi_name: &str, value: Option<Decimal>, precision: u32) -> KpiValue {
        KpiValue {
            run_id: Uuid::nil(),
            as_of: as_of(),
            kpi_name: kpi_name.to_string(),
            value,
            precision,
            raw_content_hash: "raw".to_string(),
            canonical_hash: "canonical".to_string(),
            kpi_def_version: "1.0.0".to_string(),
            threshold_status: ThresholdStatus::Unknown,
            context: KpiContext::new("test"),
        }
    }

    fn reference(values: &str) -> StaticReferenceEngine {
        StaticReferenceEngine::from_json_str(&format!(r#"{{"as_of": "2026-09-30", "values": {values}}}"#))
            .unwrap()
    }

    fn check(primary: &[KpiValue], values: &str) -> ParityReport {
        ParityChecker::new(ParitySettings::default())
            .check_parity(Uuid::nil(), as_of(), primary, &reference(values))
            .unwrap()
    }

    #[test]
    fn small_relative_drift_passes_the_default_tolerance() {
        let report = check(&[value("collection_rate_pct", Some(dec!(96.9)), 2)], r#"{"collection_rate_pct": 97.11}"#);
        let entry = report.entry("collection_rate_pct").unwrap();

        assert!(entry.passed);
        assert_eq!(entry.abs_delta, Some(dec!(0.21)));
        let rel = entry.rel_delta.unwrap();
        assert!(rel > dec!(0.0021) && rel < dec!(0.0022), "{rel}");
        assert!(report.passed());
    }

    #[test]
    fn per_kpi_tolerance_is_tighter_for_rate_fields() {
        let report = check(
            &[value("weighted_avg_interest_rate_pct", Some(dec!(12.5)), 4)],
            r#"{"weighted_avg_interest_rate_pct": 12.52}"#,
        );
        let entry = report.entry("weighted_avg_interest_rate_pct").unwrap();
        assert_eq!(entry.tolerance, dec!(0.001));
        assert!(!entry.passed);
        assert_eq!(report.mismatch_count(), 1);
    }

    #[test]
    fn rounding_granularity_absorbs_deltas_near_zero() {
        // 0.004 vs 0.00 is a huge relative delta but below one cent.
        let report = check(&[value("par_90_pct", Some(dec!(0.00)), 2)], r#"{"par_90_pct": 0.004}"#);
        assert!(report.entry("par_90_pct").unwrap().passed);
    }

    #[test]
    fn nulls_agree_only_with_nulls() {
        let report = check(
            &[value("par_30_pct", None, 2), value("par_60_pct", None, 2), value("par_90_pct", Some(dec!(1)), 2)],
            r#"{"par_30_pct": null, "par_60_pct": 4.2, "par_90_pct": null}"#,
        );
        assert!(report.entry("par_30_pct").unwrap().passed);
        assert!(!report.entry("par_60_pct").unwrap().passed);
        assert!(!report.entry("par_90_pct").unwrap().passed);
        assert_eq!(report.mismatch_count(), 2);
    }

    #[test]
    fn one_sided_kpis_are_unmatched_not_failed() {
        let report = check(
            &[value("collection_rate_pct", Some(dec!(90)), 2), value("custom_kpi", Some(dec!(1)), 2)],
            r#"{"collection_rate_pct": 90.0, "legacy_kpi": 3.0}"#,
        );
        assert!(report.passed());
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.unmatched, vec!["custom_kpi".to_string(), "legacy_kpi".to_string()]);
    }

    #[test]
    fn reference_for_another_date_is_an_error() {
        let engine = StaticReferenceEngine::from_json_str(r#"{"as_of": "2026-08-31", "values": {}}"#).unwrap();
        let result = ParityChecker::new(ParitySettings::default()).check_parity(
            Uuid::nil(),
            as_of(),
            &[value("collection_rate_pct", Some(dec!(90)), 2)],
            &engine,
        );
        assert!(matches!(result, Err(ParityError::AsOfMismatch { .. })));
    }
}
