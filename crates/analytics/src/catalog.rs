//! The KPI definition catalog: one static row per KPI, turned into
//! `KpiDefinition`s at start-up.
//!
//! Changing a formula means bumping its `formula_version`; values computed under
//! the old version stay distinguishable in the ledger.

use crate::measure::{LoanField, Measure, PaymentField};
use core_types::{
    AggregationWindow, Direction, KpiDefinition, KpiGroup, SourceTable, Thresholds, Unit,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;

pub const CATALOG_VERSION: &str = "2026.10";

/// The closed set of calculator families. Each KPI row names exactly one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalculatorFamily {
    Ratio { numerator: Measure, denominator: Measure, scale: Decimal },
    WeightedAverage { value: LoanField, weight: LoanField },
    BucketedSum { amount: LoanField, min_days_past_due: u32 },
    Concentration { amount: LoanField, top_n: usize },
    /// Weighted blend of other catalog KPIs, by name.
    CompositeScore { components: &'static [(&'static str, Decimal)], scale: Decimal },
}

impl CalculatorFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculatorFamily::Ratio { .. } => "ratio",
            CalculatorFamily::WeightedAverage { .. } => "weighted_average",
            CalculatorFamily::BucketedSum { .. } => "bucketed_sum",
            CalculatorFamily::Concentration { .. } => "concentration",
            CalculatorFamily::CompositeScore { .. } => "composite_score",
        }
    }
}

/// One row of the static catalog table.
#[derive(Debug, Clone, Copy)]
pub struct CatalogRow {
    pub kpi_name: &'static str,
    pub formula_version: &'static str,
    pub formula: &'static str,
    pub family: CalculatorFamily,
    pub group: KpiGroup,
    pub source_table: SourceTable,
    pub unit: Unit,
    pub direction: Direction,
    pub window: AggregationWindow,
    pub warning: Option<Decimal>,
    pub critical: Option<Decimal>,
    pub precision: u32,
}

pub const CATALOG: &[CatalogRow] = &[
    CatalogRow {
        kpi_name: "collection_rate_pct",
        formula_version: "1.0.0",
        formula: "sum(cash_available) / sum(total_eligible) * 100",
        family: CalculatorFamily::Ratio {
            numerator: Measure::SumLoans(LoanField::CashAvailable),
            denominator: Measure::SumLoans(LoanField::TotalEligible),
            scale: dec!(100),
        },
        group: KpiGroup::Collections,
        source_table: SourceTable::Loans,
        unit: Unit::Percent,
        direction: Direction::HigherIsBetter,
        window: AggregationWindow::Monthly,
        warning: Some(dec!(95)),
        critical: Some(dec!(90)),
        precision: 2,
    },
    CatalogRow {
        kpi_name: "on_time_payment_rate_pct",
        formula_version: "1.0.0",
        formula: "sum(paid_amount where paid_date <= due_date) / sum(scheduled_amount) * 100",
        family: CalculatorFamily::Ratio {
            numerator: Measure::SumPaymentsOnTime(PaymentField::PaidAmount),
            denominator: Measure::SumPayments(PaymentField::ScheduledAmount),
            scale: dec!(100),
        },
        group: KpiGroup::Collections,
        source_table: SourceTable::Payments,
        unit: Unit::Percent,
        direction: Direction::HigherIsBetter,
        window: AggregationWindow::Monthly,
        warning: Some(dec!(90)),
        critical: Some(dec!(80)),
        precision: 2,
    },
    CatalogRow {
        kpi_name: "par_30_pct",
        formula_version: "1.0.0",
        formula: "sum(total_receivable where days_past_due >= 30) / sum(total_receivable) * 100",
        family: CalculatorFamily::BucketedSum { amount: LoanField::TotalReceivable, min_days_past_due: 30 },
        group: KpiGroup::Risk,
        source_table: SourceTable::Loans,
        unit: Unit::Percent,
        direction: Direction::LowerIsBetter,
        window: AggregationWindow::Snapshot,
        warning: Some(dec!(5)),
        critical: Some(dec!(10)),
        precision: 2,
    },
    CatalogRow {
        kpi_name: "par_60_pct",
        formula_version: "1.0.0",
        formula: "sum(total_receivable where days_past_due >= 60) / sum(total_receivable) * 100",
        family: CalculatorFamily::BucketedSum { amount: LoanField::TotalReceivable, min_days_past_due: 60 },
        group: KpiGroup::Risk,
        source_table: SourceTable::Loans,
        unit: Unit::Percent,
        direction: Direction::LowerIsBetter,
        window: AggregationWindow::Snapshot,
        warning: Some(dec!(3)),
        critical: Some(dec!(6)),
        precision: 2,
    },
    CatalogRow {
        kpi_name: "par_90_pct",
        formula_version: "1.0.0",
        formula: "sum(total_receivable where days_past_due >= 90) / sum(total_receivable) * 100",
        family: CalculatorFamily::BucketedSum { amount: LoanField::TotalReceivable, min_days_past_due: 90 },
        group: KpiGroup::Risk,
        source_table: SourceTable::Loans,
        unit: Unit::Percent,
        direction: Direction::LowerIsBetter,
        window: AggregationWindow::Snapshot,
        warning: Some(dec!(2)),
        critical: Some(dec!(4)),
        precision: 2,
    },
    CatalogRow {
        kpi_name: "weighted_avg_interest_rate_pct",
        formula_version: "1.0.0",
        formula: "sum(interest_rate * disbursement_amount) / sum(disbursement_amount)",
        family: CalculatorFamily::WeightedAverage {
            value: LoanField::InterestRate,
            weight: LoanField::DisbursementAmount,
        },
        group: KpiGroup::Pricing,
        source_table: SourceTable::Loans,
        unit: Unit::Percent,
        direction: Direction::HigherIsBetter,
        window: AggregationWindow::Snapshot,
        warning: None,
        critical: None,
        precision: 4,
    },
    CatalogRow {
        kpi_name: "weighted_avg_dpd",
        formula_version: "1.0.0",
        formula: "sum(days_past_due * total_receivable) / sum(total_receivable)",
        family: CalculatorFamily::WeightedAverage {
            value: LoanField::DaysPastDue,
            weight: LoanField::TotalReceivable,
        },
        group: KpiGroup::Risk,
        source_table: SourceTable::Loans,
        unit: Unit::Days,
        direction: Direction::LowerIsBetter,
        window: AggregationWindow::Snapshot,
        warning: Some(dec!(15)),
        critical: Some(dec!(30)),
        precision: 2,
    },
    CatalogRow {
        kpi_name: "fee_yield_pct",
        formula_version: "1.0.0",
        formula: "sum(origination_fee) / sum(disbursement_amount) * 100",
        family: CalculatorFamily::Ratio {
            numerator: Measure::SumLoans(LoanField::OriginationFee),
            denominator: Measure::SumLoans(LoanField::DisbursementAmount),
            scale: dec!(100),
        },
        group: KpiGroup::Pricing,
        source_table: SourceTable::Loans,
        unit: Unit::Percent,
        direction: Direction::HigherIsBetter,
        window: AggregationWindow::Snapshot,
        warning: None,
        critical: None,
        precision: 4,
    },
    CatalogRow {
        kpi_name: "avg_ticket_size",
        formula_version: "1.0.0",
        formula: "sum(disbursement_amount) / count(disbursement_amount)",
        family: CalculatorFamily::Ratio {
            numerator: Measure::SumLoans(LoanField::DisbursementAmount),
            denominator: Measure::CountLoans(LoanField::DisbursementAmount),
            scale: dec!(1),
        },
        group: KpiGroup::Pricing,
        source_table: SourceTable::Loans,
        unit: Unit::Currency,
        direction: Direction::HigherIsBetter,
        window: AggregationWindow::Snapshot,
        warning: None,
        critical: None,
        precision: 2,
    },
    CatalogRow {
        kpi_name: "repeat_customer_pct",
        formula_version: "1.0.0",
        formula: "count(customers with > 1 loan) / count(distinct customers) * 100",
        family: CalculatorFamily::Ratio {
            numerator: Measure::RepeatCustomers,
            denominator: Measure::DistinctCustomers,
            scale: dec!(100),
        },
        group: KpiGroup::Customers,
        source_table: SourceTable::Loans,
        unit: Unit::Percent,
        direction: Direction::HigherIsBetter,
        window: AggregationWindow::Snapshot,
        warning: Some(dec!(20)),
        critical: Some(dec!(10)),
        precision: 2,
    },
    CatalogRow {
        kpi_name: "top10_customer_concentration_pct",
        formula_version: "1.0.0",
        formula: "sum(total_receivable of 10 largest customers) / sum(total_receivable) * 100",
        family: CalculatorFamily::Concentration { amount: LoanField::TotalReceivable, top_n: 10 },
        group: KpiGroup::Concentration,
        source_table: SourceTable::Loans,
        unit: Unit::Percent,
        direction: Direction::LowerIsBetter,
        window: AggregationWindow::Snapshot,
        warning: Some(dec!(30)),
        critical: Some(dec!(50)),
        precision: 2,
    },
    CatalogRow {
        kpi_name: "portfolio_health_score",
        formula_version: "1.0.0",
        formula: "10 * (0.6 * collection_rate_pct / 100 + 0.4 * (1 - par_30_pct / 100)), clamped to [0, 10]",
        family: CalculatorFamily::CompositeScore {
            components: &[("collection_rate_pct", dec!(0.6)), ("par_30_pct", dec!(0.4))],
            scale: dec!(10),
        },
        group: KpiGroup::Composite,
        source_table: SourceTable::Loans,
        unit: Unit::Score,
        direction: Direction::HigherIsBetter,
        window: AggregationWindow::Snapshot,
        warning: Some(dec!(7)),
        critical: Some(dec!(5)),
        precision: 2,
    },
];

pub fn find_row(kpi_name: &str) -> Option<&'static CatalogRow> {
    CATALOG.iter().find(|row| row.kpi_name == kpi_name)
}

impl CatalogRow {
    /// Columns the KPI reads, including those read through composite components.
    pub fn source_columns(&self) -> BTreeSet<String> {
        let columns: Vec<&str> = match self.family {
            CalculatorFamily::Ratio { numerator, denominator, .. } => {
                numerator.columns().into_iter().chain(denominator.columns()).collect()
            }
            CalculatorFamily::WeightedAverage { value, weight } => vec![value.column(), weight.column()],
            CalculatorFamily::BucketedSum { amount, .. } => vec![amount.column(), "days_past_due"],
            CalculatorFamily::Concentration { amount, .. } => vec![amount.column(), "customer_id"],
            CalculatorFamily::CompositeScore { components, .. } => {
                return components
                    .iter()
                    .filter_map(|(name, _)| find_row(name))
                    .flat_map(|row| row.source_columns())
                    .collect();
            }
        };
        columns.into_iter().map(str::to_string).collect()
    }

    pub fn definition(&self) -> KpiDefinition {
        KpiDefinition {
            kpi_name: self.kpi_name.to_string(),
            formula_version: self.formula_version.to_string(),
            formula: self.formula.to_string(),
            window: self.window,
            direction: self.direction,
            thresholds: Thresholds { warning: self.warning, critical: self.critical },
            owning_group: self.group,
            source_table: self.source_table,
            source_columns: self.source_columns(),
            unit: self.unit,
            precision: self.precision,
        }
    }
}

/// Every definition in catalog order.
pub fn definitions() -> Vec<KpiDefinition> {
    CATALOG.iter().map(CatalogRow::definition).collect()
}

#[cfg(test)]
pub(crate) fn definition_for(kpi_name: &str) -> KpiDefinition {
    find_row(kpi_name).map(CatalogRow::definition).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let names: HashSet<&str> = CATALOG.iter().map(|r| r.kpi_name).collect();
        assert_eq!(names.len(), CATALOG.len());
        assert_eq!(CATALOG.len(), 12);
    }

    #[test]
    fn composite_columns_are_the_union_of_its_components() {
        let def = definition_for("portfolio_health_score");
        let expected: BTreeSet<String> = ["cash_available", "total_eligible", "total_receivable", "days_past_due"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(def.source_columns, expected);
    }

    #[test]
    fn composite_components_exist_in_the_catalog() {
        for row in CATALOG {
            if let CalculatorFamily::CompositeScore { components, .. } = row.family {
                for (name, _) in components {
                    assert!(find_row(name).is_some(), "{} references unknown {}", row.kpi_name, name);
                }
            }
        }
    }
}
