use crate::error::ParityError;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A second, independently maintained source of KPI values, queryable by
/// `(as_of, kpi_name)`.
pub trait ReferenceEngine: Send + Sync {
    /// Short label recorded in the parity report.
    fn name(&self) -> &str;

    /// The KPIs this engine can answer for `as_of`.
    fn kpi_names(&self, as_of: NaiveDate) -> Result<BTreeSet<String>, ParityError>;

    /// `Ok(None)` means the engine computed the KPI and it is legitimately null.
    fn query(&self, as_of: NaiveDate, kpi_name: &str) -> Result<Option<f64>, ParityError>;
}

/// Reference values held in memory for a single business date.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceValues {
    as_of: NaiveDate,
    values: BTreeMap<String, Option<f64>>,
}

impl ReferenceValues {
    pub fn new(as_of: NaiveDate, values: BTreeMap<String, Option<f64>>) -> Self {
        Self { as_of, values }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub(crate) fn ensure_date(&self, requested: NaiveDate) -> Result<(), ParityError> {
        if requested != self.as_of {
            return Err(ParityError::AsOfMismatch { reference: self.as_of, requested });
        }
        Ok(())
    }

    pub(crate) fn names(&self, as_of: NaiveDate) -> Result<BTreeSet<String>, ParityError> {
        self.ensure_date(as_of)?;
        Ok(self.values.keys().cloned().collect())
    }

    pub(crate) fn get(&self, as_of: NaiveDate, kpi_name: &str) -> Result<Option<f64>, ParityError> {
        self.ensure_date(as_of)?;
        Ok(self.values.get(kpi_name).copied().flatten())
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceDocument {
    as_of: NaiveDate,
    values: BTreeMap<String, Option<f64>>,
}

/// Externally computed reference values loaded from a JSON document:
///
/// ```json
/// { "as_of": "2026-09-30", "values": { "collection_rate_pct": 97.11 } }
/// ```
#[derive(Debug, Clone)]
pub struct StaticReferenceEngine {
    values: ReferenceValues,
}

impl StaticReferenceEngine {
    pub fn from_json_str(json: &str) -> Result<Self, ParityError> {
        let document: ReferenceDocument = serde_json::from_str(json)?;
        Ok(Self { values: ReferenceValues::new(document.as_of, document.values) })
    }

    pub fn from_path(path: &Path) -> Result<Self, ParityError> {
        let json = std::fs::read_to_string(path)
            .map_err(|source| ParityError::Io { path: path.display().to_string(), source })?;
        Self::from_json_str(&json)
    }

    pub fn as_of(&self) -> NaiveDate {
        self.values.as_of()
    }
}

impl ReferenceEngine for StaticReferenceEngine {
    fn name(&self) -> &str {
        "static"
    }

    fn kpi_names(&self, as_of: NaiveDate) -> Result<BTreeSet<String>, ParityError> {
        self.values.names(as_of)
    }

    fn query(&self, as_of: NaiveDate, kpi_name: &str) -> Result<Option<f64>, ParityError> {
        self.values.get(as_of, kpi_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 30).unwrap()
    }

    #[test]
    fn loads_values_and_explicit_nulls() {
        let engine = StaticReferenceEngine::from_json_str(
            r#"{"as_of": "2026-09-30", "values": {"collection_rate_pct": 97.11, "par_30_pct": null}}"#,
        )
        .unwrap();

        assert_eq!(engine.query(date(), "collection_rate_pct").unwrap(), Some(97.11));
        assert_eq!(engine.query(date(), "par_30_pct").unwrap(), None);
        assert_eq!(engine.kpi_names(date()).unwrap().len(), 2);
    }

    #[test]
    fn refuses_a_different_business_date() {
        let engine =
            StaticReferenceEngine::from_json_str(r#"{"as_of": "2026-08-31", "values": {}}"#).unwrap();
        let err = engine.query(date(), "collection_rate_pct").unwrap_err();
        assert!(matches!(err, ParityError::AsOfMismatch { .. }));
    }

    #[test]
    fn malformed_documents_are_errors() {
        assert!(matches!(
            StaticReferenceEngine::from_json_str(r#"{"values": {}}"#),
            Err(ParityError::Json(_))
        ));
    }
}
