use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::enums::{
    AggregationWindow, Direction, KpiGroup, LoanStatus, NullReason, RunStatus, SourceTable,
    ThresholdStatus, Unit,
};
use crate::error::CoreError;

/// One execution of the pipeline over one input snapshot.
///
/// Only the orchestrator mutates a run, and only through [`PipelineRun::transition`],
/// which refuses to leave a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config_version: String,
    pub source_revision: String,
    pub status: RunStatus,
}

impl PipelineRun {
    pub fn new(run_id: Uuid, config_version: &str, source_revision: &str) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            ended_at: None,
            config_version: config_version.to_string(),
            source_revision: source_revision.to_string(),
            status: RunStatus::Running,
        }
    }

    /// Moves the run to a terminal status and stamps `ended_at`.
    pub fn transition(&mut self, to: RunStatus) -> Result<(), CoreError> {
        if self.status.is_terminal() || !to.is_terminal() {
            return Err(CoreError::IllegalTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}

/// The immutable record of one raw input acquired for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArtifact {
    pub artifact_id: String,
    pub run_id: Uuid,
    pub source: String,
    pub as_of: NaiveDate,
    /// Hex sha-256 of the raw bytes as received.
    pub content_hash: String,
    pub storage_uri: String,
    pub byte_len: u64,
}

/// A parsed but unvalidated table: every cell is kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: Option<Decimal>,
    pub critical: Option<Decimal>,
}

/// The versioned, static description of a KPI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub kpi_name: String,
    /// Semantic version of the formula. Any formula change bumps it.
    pub formula_version: String,
    pub formula: String,
    pub window: AggregationWindow,
    pub direction: Direction,
    pub thresholds: Thresholds,
    pub owning_group: KpiGroup,
    pub source_table: SourceTable,
    pub source_columns: BTreeSet<String>,
    pub unit: Unit,
    /// Decimal places kept when the value is persisted.
    pub precision: u32,
}

impl KpiDefinition {
    /// Places a value against the warning/critical thresholds, honouring the KPI's direction.
    pub fn classify(&self, value: Option<Decimal>) -> ThresholdStatus {
        let Some(value) = value else {
            return ThresholdStatus::Unknown;
        };
        let breaches = |limit: Decimal| match self.direction {
            Direction::HigherIsBetter => value < limit,
            Direction::LowerIsBetter => value > limit,
        };
        if self.thresholds.critical.is_some_and(breaches) {
            ThresholdStatus::Critical
        } else if self.thresholds.warning.is_some_and(breaches) {
            ThresholdStatus::Warning
        } else {
            ThresholdStatus::Ok
        }
    }
}

/// The self-explaining audit context that accompanies every computed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiContext {
    pub rows_processed: usize,
    pub null_count: usize,
    pub formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<NullReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl KpiContext {
    pub fn new(formula: impl Into<String>) -> Self {
        Self { formula: formula.into(), ..Self::default() }
    }

    pub fn with_reason(mut self, reason: NullReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn insert_detail(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.details.insert(key.to_string(), value.into());
    }
}

/// One computed KPI, stamped with everything needed to trace it back to its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiValue {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub kpi_name: String,
    pub value: Option<Decimal>,
    pub precision: u32,
    pub raw_content_hash: String,
    pub canonical_hash: String,
    pub kpi_def_version: String,
    pub threshold_status: ThresholdStatus,
    pub context: KpiContext,
}

impl KpiValue {
    /// A value is failed when its calculator errored, as opposed to being legitimately null.
    pub fn is_failed(&self) -> bool {
        self.context.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityResult {
    pub run_id: Uuid,
    pub completeness: f64,
    pub freshness_hours: f64,
    pub referential_integrity_pass: bool,
    pub notes: Vec<String>,
    pub rows_received: usize,
    pub rows_accepted: usize,
    pub duplicates_removed: usize,
    pub null_cells: usize,
}

/// A validated loan-tape row. Numeric cells that failed coercion are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub loan_id: String,
    pub customer_id: String,
    pub segment: String,
    pub status: Option<LoanStatus>,
    pub disbursement_date: Option<NaiveDate>,
    pub disbursement_amount: Option<Decimal>,
    pub interest_rate: Option<Decimal>,
    pub origination_fee: Option<Decimal>,
    pub total_receivable: Option<Decimal>,
    pub days_past_due: Option<u32>,
    pub total_eligible: Option<Decimal>,
    pub cash_available: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub loan_id: String,
    pub due_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub scheduled_amount: Option<Decimal>,
    pub paid_amount: Option<Decimal>,
}

/// The validated snapshot every KPI is computed from. Shared read-only during calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTable {
    pub as_of: NaiveDate,
    pub loans: Vec<LoanRecord>,
    pub payments: Vec<PaymentRecord>,
    /// Hex sha-256 of the canonical serialization; the lineage anchor of the run.
    pub content_hash: String,
}

impl CanonicalTable {
    pub fn is_empty(&self) -> bool {
        self.loans.is_empty() && self.payments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn definition(direction: Direction) -> KpiDefinition {
        KpiDefinition {
            kpi_name: "par_30_pct".to_string(),
            formula_version: "1.0.0".to_string(),
            formula: "x".to_string(),
            window: AggregationWindow::Snapshot,
            direction,
            thresholds: Thresholds { warning: Some(dec!(5)), critical: Some(dec!(10)) },
            owning_group: KpiGroup::Risk,
            source_table: SourceTable::Loans,
            source_columns: BTreeSet::new(),
            unit: Unit::Percent,
            precision: 2,
        }
    }

    #[test]
    fn lower_is_better_thresholds() {
        let def = definition(Direction::LowerIsBetter);
        assert_eq!(def.classify(Some(dec!(3))), ThresholdStatus::Ok);
        assert_eq!(def.classify(Some(dec!(7))), ThresholdStatus::Warning);
        assert_eq!(def.classify(Some(dec!(12))), ThresholdStatus::Critical);
        assert_eq!(def.classify(None), ThresholdStatus::Unknown);
    }

    #[test]
    fn higher_is_better_thresholds() {
        let mut def = definition(Direction::HigherIsBetter);
        def.thresholds = Thresholds { warning: Some(dec!(95)), critical: Some(dec!(90)) };
        assert_eq!(def.classify(Some(dec!(97))), ThresholdStatus::Ok);
        assert_eq!(def.classify(Some(dec!(92))), ThresholdStatus::Warning);
        assert_eq!(def.classify(Some(dec!(80))), ThresholdStatus::Critical);
    }

    #[test]
    fn run_cannot_leave_a_terminal_state() {
        let mut run = PipelineRun::new(Uuid::new_v4(), "2026.10", "abc123");
        run.transition(RunStatus::Failed).unwrap();
        assert!(run.ended_at.is_some());
        assert!(run.transition(RunStatus::Success).is_err());
    }

    #[test]
    fn run_cannot_transition_back_to_running() {
        let mut run = PipelineRun::new(Uuid::new_v4(), "2026.10", "abc123");
        assert!(run.transition(RunStatus::Running).is_err());
        assert_eq!(run.status, RunStatus::Running);
    }
}
