use crate::error::PipelineError;
use crate::output::Manifest;
use analytics::ResultBundle;
use chrono::NaiveDate;
use core_types::{AuditLog, Phase, RunStatus};
use parity::ParityReport;
use serde::Serialize;
use uuid::Uuid;
use validator::DataQualityWarning;

/// One entry of the outcome's `errors` list, with enough context to act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    pub phase: Phase,
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kpi_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl RunError {
    pub fn from_pipeline(phase: Phase, error: &PipelineError) -> Self {
        Self {
            phase,
            kind: error.kind(),
            message: error.to_string(),
            kpi_name: None,
            columns: error.columns(),
            attempt: error.attempt(),
        }
    }

    pub fn kpi(kpi_name: &str, kind: &str, message: &str) -> Self {
        Self {
            phase: Phase::Calculate,
            kind: kind.to_string(),
            message: message.to_string(),
            kpi_name: Some(kpi_name.to_string()),
            columns: Vec::new(),
            attempt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParitySummary {
    pub reference_engine: String,
    pub compared: usize,
    pub mismatches: usize,
    pub unmatched: usize,
}

impl From<&ParityReport> for ParitySummary {
    fn from(report: &ParityReport) -> Self {
        Self {
            reference_engine: report.reference_engine.clone(),
            compared: report.entries.len(),
            mismatches: report.mismatch_count(),
            unmatched: report.unmatched.len(),
        }
    }
}

/// The structured result of a run, returned to the caller and printed by the CLI.
///
/// `phase` is the phase the run stopped in: the failing or canceled phase, or
/// the last phase executed on success.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub status: RunStatus,
    pub phase: Phase,
    pub errors: Vec<RunError>,
    pub warnings: Vec<DataQualityWarning>,
    pub kpi_count: usize,
    pub failed_kpis: usize,
    /// Whether the values were committed to the audit ledger.
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parity: Option<ParitySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    /// Computed values stay available even when they could not be made durable.
    #[serde(skip)]
    pub bundle: Option<ResultBundle>,
    #[serde(skip)]
    pub parity_report: Option<ParityReport>,
    #[serde(skip)]
    pub audit: AuditLog,
}

impl RunOutcome {
    pub fn parity_failed(&self) -> bool {
        self.parity.as_ref().is_some_and(|p| p.mismatches > 0)
    }

    /// `0` success, `1` failed, `2` canceled, `3` parity mismatch when parity is strict.
    pub fn exit_code(&self, strict_parity: bool) -> i32 {
        match self.status {
            RunStatus::Success if strict_parity && self.parity_failed() => 3,
            RunStatus::Success => 0,
            RunStatus::Canceled => 2,
            RunStatus::Failed | RunStatus::Running => 1,
        }
    }
}
