use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }

    /// Every status except `Running` is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "canceled" => Ok(RunStatus::Canceled),
            other => Err(CoreError::InvalidInput("run status".to_string(), other.to_string())),
        }
    }
}

/// The phases of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Ingest,
    Validate,
    Calculate,
    Persist,
    Parity,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Ingest => "ingest",
            Phase::Validate => "validate",
            Phase::Calculate => "calculate",
            Phase::Persist => "persist",
            Phase::Parity => "parity",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::HigherIsBetter => "higher_is_better",
            Direction::LowerIsBetter => "lower_is_better",
        }
    }
}

/// The business group that owns a KPI definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiGroup {
    Collections,
    Risk,
    Pricing,
    Customers,
    Concentration,
    Composite,
}

impl KpiGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            KpiGroup::Collections => "collections",
            KpiGroup::Risk => "risk",
            KpiGroup::Pricing => "pricing",
            KpiGroup::Customers => "customers",
            KpiGroup::Concentration => "concentration",
            KpiGroup::Composite => "composite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Percent,
    Currency,
    Days,
    Score,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Percent => "percent",
            Unit::Currency => "currency",
            Unit::Days => "days",
            Unit::Score => "score",
        }
    }
}

/// The time window a KPI aggregates over, relative to the snapshot's `as_of` date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationWindow {
    Snapshot,
    Monthly,
    TrailingTwelveMonths,
}

impl AggregationWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationWindow::Snapshot => "snapshot",
            AggregationWindow::Monthly => "monthly",
            AggregationWindow::TrailingTwelveMonths => "trailing_12m",
        }
    }
}

/// Which canonical table a KPI reads from. Drives the raw-artifact back-pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    Loans,
    Payments,
}

impl SourceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTable::Loans => "loans",
            SourceTable::Payments => "payments",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Closed,
    Defaulted,
    WrittenOff,
}

impl LoanStatus {
    /// Parses the loan-tape spellings seen in the wild into one canonical value.
    pub fn parse_normalized(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "active" | "current" | "open" | "performing" => Some(LoanStatus::Active),
            "closed" | "paid" | "paid_off" | "repaid" => Some(LoanStatus::Closed),
            "defaulted" | "default" | "delinquent" => Some(LoanStatus::Defaulted),
            "written_off" | "writeoff" | "charged_off" | "chargeoff" => Some(LoanStatus::WrittenOff),
            _ => None,
        }
    }
}

/// Why a KPI value is null without anything having gone wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullReason {
    NoData,
    ZeroDenominator,
    ComponentUnavailable,
}

impl NullReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NullReason::NoData => "no_data",
            NullReason::ZeroDenominator => "zero_denominator",
            NullReason::ComponentUnavailable => "component_unavailable",
        }
    }
}

/// Where a KPI value sits relative to its warning/critical thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl ThresholdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdStatus::Ok => "ok",
            ThresholdStatus::Warning => "warning",
            ThresholdStatus::Critical => "critical",
            ThresholdStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Succeeded,
    Failed,
    Skipped,
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
    }

    #[test]
    fn run_status_round_trips_through_its_string_form() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Failed, RunStatus::Canceled] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn loan_status_aliases() {
        assert_eq!(LoanStatus::parse_normalized(" Current "), Some(LoanStatus::Active));
        assert_eq!(LoanStatus::parse_normalized("Charged-Off"), Some(LoanStatus::WrittenOff));
        assert_eq!(LoanStatus::parse_normalized("paid off"), Some(LoanStatus::Closed));
        assert_eq!(LoanStatus::parse_normalized("unknown"), None);
    }

    #[test]
    fn null_reason_serializes_snake_case() {
        let json = serde_json::to_string(&NullReason::ZeroDenominator).unwrap();
        assert_eq!(json, "\"zero_denominator\"");
    }
}
