use crate::error::ParityError;
use crate::reference::{ReferenceEngine, ReferenceValues};
use chrono::{Datelike, NaiveDate};
use core_types::{CanonicalTable, LoanRecord};
use polars::prelude::*;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A columnar f64 projection of the canonical snapshot.
struct Frames {
    loans: DataFrame,
    payments: DataFrame,
}

type View = fn(&Frames) -> PolarsResult<Option<f64>>;

/// One lazy aggregation view per KPI name.
const VIEWS: &[(&str, View)] = &[
    ("collection_rate_pct", collection_rate),
    ("on_time_payment_rate_pct", on_time_payment_rate),
    ("par_30_pct", par_30),
    ("par_60_pct", par_60),
    ("par_90_pct", par_90),
    ("weighted_avg_interest_rate_pct", weighted_interest_rate),
    ("weighted_avg_dpd", weighted_days_past_due),
    ("fee_yield_pct", fee_yield),
    ("avg_ticket_size", average_ticket),
    ("repeat_customer_pct", repeat_customers),
    ("top10_customer_concentration_pct", top_ten_concentration),
];

/// The reference engine: recomputes the catalog's KPIs with polars lazy
/// aggregations in floating point, independently of the decimal calculators.
///
/// All views are evaluated once, when the engine is built over a snapshot.
#[derive(Debug, Clone)]
pub struct PolarsReferenceEngine {
    values: ReferenceValues,
}

impl PolarsReferenceEngine {
    pub fn evaluate(table: &CanonicalTable) -> Result<Self, ParityError> {
        let frames = Frames { loans: loan_frame(table)?, payments: payment_frame(table)? };

        let mut values = BTreeMap::new();
        for (name, view) in VIEWS {
            let value = view(&frames)?.filter(|v| v.is_finite());
            debug!(kpi = %name, ?value, "Reference view evaluated");
            values.insert(name.to_string(), value);
        }
        let score = health_score(&values);
        values.insert("portfolio_health_score".to_string(), score);

        Ok(Self { values: ReferenceValues::new(table.as_of, values) })
    }
}

impl ReferenceEngine for PolarsReferenceEngine {
    fn name(&self) -> &str {
        "polars"
    }

    fn kpi_names(&self, as_of: NaiveDate) -> Result<BTreeSet<String>, ParityError> {
        self.values.names(as_of)
    }

    fn query(&self, as_of: NaiveDate, kpi_name: &str) -> Result<Option<f64>, ParityError> {
        self.values.get(as_of, kpi_name)
    }
}

fn float(value: Option<Decimal>) -> Option<f64> {
    value.and_then(|v| v.to_f64())
}

fn amount_column(name: &str, loans: &[LoanRecord], get: fn(&LoanRecord) -> Option<Decimal>) -> Series {
    Series::new(name, loans.iter().map(|l| float(get(l))).collect::<Vec<Option<f64>>>())
}

fn loan_frame(table: &CanonicalTable) -> PolarsResult<DataFrame> {
    let loans = &table.loans;
    let column = |name: &str, get: fn(&LoanRecord) -> Option<Decimal>| amount_column(name, loans, get);
    DataFrame::new(vec![
        Series::new("loan_id", loans.iter().map(|l| l.loan_id.as_str()).collect::<Vec<&str>>()),
        Series::new("customer_id", loans.iter().map(|l| l.customer_id.as_str()).collect::<Vec<&str>>()),
        column("disbursement_amount", |l| l.disbursement_amount),
        column("interest_rate", |l| l.interest_rate),
        column("origination_fee", |l| l.origination_fee),
        column("total_receivable", |l| l.total_receivable),
        column("total_eligible", |l| l.total_eligible),
        column("cash_available", |l| l.cash_available),
        Series::new(
            "days_past_due",
            loans.iter().map(|l| l.days_past_due.map(f64::from)).collect::<Vec<Option<f64>>>(),
        ),
    ])
}

fn payment_frame(table: &CanonicalTable) -> PolarsResult<DataFrame> {
    let payments = &table.payments;
    // Dates become day numbers so the on-time comparison stays numeric.
    let day = |d: Option<NaiveDate>| d.map(|d| d.num_days_from_ce());
    DataFrame::new(vec![
        Series::new("due_date", payments.iter().map(|p| day(p.due_date)).collect::<Vec<Option<i32>>>()),
        Series::new("paid_date", payments.iter().map(|p| day(p.paid_date)).collect::<Vec<Option<i32>>>()),
        Series::new(
            "scheduled_amount",
            payments.iter().map(|p| float(p.scheduled_amount)).collect::<Vec<Option<f64>>>(),
        ),
        Series::new(
            "paid_amount",
            payments.iter().map(|p| float(p.paid_amount)).collect::<Vec<Option<f64>>>(),
        ),
    ])
}

fn scalar(frame: &DataFrame, name: &str) -> PolarsResult<Option<f64>> {
    Ok(frame.column(name)?.f64()?.get(0))
}

/// Evaluates `scale × numerator / denominator` as a single lazy select.
/// A zero or missing denominator is a null, not an error.
fn ratio(frame: LazyFrame, numerator: Expr, denominator: Expr, scale: f64) -> PolarsResult<Option<f64>> {
    let out = frame
        .select([
            numerator.cast(DataType::Float64).alias("numerator"),
            denominator.cast(DataType::Float64).alias("denominator"),
        ])
        .collect()?;
    Ok(match (scalar(&out, "numerator")?, scalar(&out, "denominator")?) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d * scale),
        _ => None,
    })
}

fn non_null_count(name: &str) -> Expr {
    col(name).is_not_null().cast(DataType::Float64).sum()
}

fn collection_rate(f: &Frames) -> PolarsResult<Option<f64>> {
    ratio(f.loans.clone().lazy(), col("cash_available").sum(), col("total_eligible").sum(), 100.0)
}

fn on_time_payment_rate(f: &Frames) -> PolarsResult<Option<f64>> {
    let on_time = when(col("paid_date").lt_eq(col("due_date")))
        .then(col("paid_amount"))
        .otherwise(lit(0.0))
        .sum();
    ratio(f.payments.clone().lazy(), on_time, col("scheduled_amount").sum(), 100.0)
}

fn portfolio_at_risk(f: &Frames, min_days: f64) -> PolarsResult<Option<f64>> {
    let at_risk = when(col("days_past_due").gt_eq(lit(min_days)))
        .then(col("total_receivable"))
        .otherwise(lit(0.0))
        .sum();
    ratio(f.loans.clone().lazy(), at_risk, col("total_receivable").sum(), 100.0)
}

fn par_30(f: &Frames) -> PolarsResult<Option<f64>> {
    portfolio_at_risk(f, 30.0)
}

fn par_60(f: &Frames) -> PolarsResult<Option<f64>> {
    portfolio_at_risk(f, 60.0)
}

fn par_90(f: &Frames) -> PolarsResult<Option<f64>> {
    portfolio_at_risk(f, 90.0)
}

fn weighted_interest_rate(f: &Frames) -> PolarsResult<Option<f64>> {
    weighted_average(f, "interest_rate", "disbursement_amount")
}

fn weighted_days_past_due(f: &Frames) -> PolarsResult<Option<f64>> {
    weighted_average(f, "days_past_due", "total_receivable")
}

fn weighted_average(f: &Frames, value: &str, weight: &str) -> PolarsResult<Option<f64>> {
    let weighted = (col(value) * col(weight)).sum();
    let weights = when(col(value).is_not_null()).then(col(weight)).otherwise(lit(0.0)).sum();
    ratio(f.loans.clone().lazy(), weighted, weights, 1.0)
}

fn fee_yield(f: &Frames) -> PolarsResult<Option<f64>> {
    ratio(f.loans.clone().lazy(), col("origination_fee").sum(), col("disbursement_amount").sum(), 100.0)
}

fn average_ticket(f: &Frames) -> PolarsResult<Option<f64>> {
    ratio(
        f.loans.clone().lazy(),
        col("disbursement_amount").sum(),
        non_null_count("disbursement_amount"),
        1.0,
    )
}

fn repeat_customers(f: &Frames) -> PolarsResult<Option<f64>> {
    let per_customer = f
        .loans
        .clone()
        .lazy()
        .group_by([col("customer_id")])
        .agg([non_null_count("loan_id").alias("loans")]);
    ratio(
        per_customer,
        col("loans").gt(lit(1.0)).cast(DataType::Float64).sum(),
        non_null_count("loans"),
        100.0,
    )
}

fn top_ten_concentration(f: &Frames) -> PolarsResult<Option<f64>> {
    let exposures = f
        .loans
        .clone()
        .lazy()
        .group_by([col("customer_id")])
        .agg([col("total_receivable").sum().alias("exposure")]);

    let top = exposures
        .clone()
        .sort("exposure", SortOptions { descending: true, nulls_last: true, ..Default::default() })
        .limit(10)
        .select([col("exposure").sum().cast(DataType::Float64).alias("top")])
        .collect()?;
    let total = exposures
        .select([col("exposure").sum().cast(DataType::Float64).alias("total")])
        .collect()?;

    Ok(match (scalar(&top, "top")?, scalar(&total, "total")?) {
        (Some(top), Some(total)) if total != 0.0 => Some(top / total * 100.0),
        _ => None,
    })
}

/// `10 × (0.6 × collection/100 + 0.4 × (1 − par30/100))`, clamped to `[0, 10]`.
fn health_score(values: &BTreeMap<String, Option<f64>>) -> Option<f64> {
    let collection = values.get("collection_rate_pct").copied().flatten()?;
    let par_30 = values.get("par_30_pct").copied().flatten()?;
    let score = 10.0 * (0.6 * collection / 100.0 + 0.4 * (1.0 - par_30 / 100.0));
    Some(score.clamp(0.0, 10.0))
}
