//! Column accessors and the aggregate measures calculators are composed from.
//!
//! Every measure skips null inputs on its own; a ratio's numerator and denominator
//! may therefore see different row counts.

use crate::error::KpiComputationError;
use core_types::{LoanRecord, PaymentRecord};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// A numeric loan-tape column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanField {
    DisbursementAmount,
    InterestRate,
    OriginationFee,
    TotalReceivable,
    DaysPastDue,
    TotalEligible,
    CashAvailable,
}

impl LoanField {
    pub fn column(&self) -> &'static str {
        match self {
            LoanField::DisbursementAmount => "disbursement_amount",
            LoanField::InterestRate => "interest_rate",
            LoanField::OriginationFee => "origination_fee",
            LoanField::TotalReceivable => "total_receivable",
            LoanField::DaysPastDue => "days_past_due",
            LoanField::TotalEligible => "total_eligible",
            LoanField::CashAvailable => "cash_available",
        }
    }

    pub fn get(&self, loan: &LoanRecord) -> Option<Decimal> {
        match self {
            LoanField::DisbursementAmount => loan.disbursement_amount,
            LoanField::InterestRate => loan.interest_rate,
            LoanField::OriginationFee => loan.origination_fee,
            LoanField::TotalReceivable => loan.total_receivable,
            LoanField::DaysPastDue => loan.days_past_due.map(Decimal::from),
            LoanField::TotalEligible => loan.total_eligible,
            LoanField::CashAvailable => loan.cash_available,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentField {
    ScheduledAmount,
    PaidAmount,
}

impl PaymentField {
    pub fn column(&self) -> &'static str {
        match self {
            PaymentField::ScheduledAmount => "scheduled_amount",
            PaymentField::PaidAmount => "paid_amount",
        }
    }

    pub fn get(&self, payment: &PaymentRecord) -> Option<Decimal> {
        match self {
            PaymentField::ScheduledAmount => payment.scheduled_amount,
            PaymentField::PaidAmount => payment.paid_amount,
        }
    }
}

/// An aggregate over one canonical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "measure", content = "field")]
pub enum Measure {
    /// Σ field over loans where the field is present.
    SumLoans(LoanField),
    /// Number of loans where the field is present.
    CountLoans(LoanField),
    /// Σ field over payments where the field is present.
    SumPayments(PaymentField),
    /// Σ field over payments settled on or before their due date.
    SumPaymentsOnTime(PaymentField),
    /// Number of distinct customers.
    DistinctCustomers,
    /// Number of customers holding more than one loan.
    RepeatCustomers,
}

/// The result of evaluating a measure, with its row accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub value: Decimal,
    /// Rows that contributed.
    pub rows: usize,
    /// Rows skipped because an input was null.
    pub nulls: usize,
}

impl Measure {
    /// Columns this measure reads, for the KPI definition's lineage.
    pub fn columns(&self) -> Vec<&'static str> {
        match self {
            Measure::SumLoans(f) | Measure::CountLoans(f) => vec![f.column()],
            Measure::SumPayments(f) => vec![f.column()],
            Measure::SumPaymentsOnTime(f) => vec![f.column(), "paid_date", "due_date"],
            Measure::DistinctCustomers | Measure::RepeatCustomers => vec!["customer_id"],
        }
    }

    pub fn evaluate(
        &self,
        kpi: &str,
        loans: &[LoanRecord],
        payments: &[PaymentRecord],
    ) -> Result<Aggregate, KpiComputationError> {
        match self {
            Measure::SumLoans(field) => checked_sum(kpi, loans.iter().map(|l| field.get(l))),
            Measure::CountLoans(field) => {
                let rows = loans.iter().filter(|l| field.get(l).is_some()).count();
                Ok(Aggregate { value: Decimal::from(rows), rows, nulls: loans.len() - rows })
            }
            Measure::SumPayments(field) => checked_sum(kpi, payments.iter().map(|p| field.get(p))),
            Measure::SumPaymentsOnTime(field) => checked_sum(
                kpi,
                payments.iter().map(|p| match (field.get(p), p.paid_date, p.due_date) {
                    (Some(amount), Some(paid), Some(due)) if paid <= due => Some(amount),
                    (Some(_), Some(_), Some(_)) => Some(Decimal::ZERO),
                    // Unpaid or undated instalments cannot be on time.
                    (Some(_), None, Some(_)) => Some(Decimal::ZERO),
                    _ => None,
                }),
            ),
            Measure::DistinctCustomers => {
                let counts = loans_per_customer(loans);
                Ok(Aggregate { value: Decimal::from(counts.len()), rows: loans.len(), nulls: 0 })
            }
            Measure::RepeatCustomers => {
                let repeat = loans_per_customer(loans).values().filter(|n| **n > 1).count();
                Ok(Aggregate { value: Decimal::from(repeat), rows: loans.len(), nulls: 0 })
            }
        }
    }
}

fn loans_per_customer(loans: &[LoanRecord]) -> HashMap<&str, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for loan in loans {
        *counts.entry(loan.customer_id.as_str()).or_default() += 1;
    }
    counts
}

/// Sums the present values, failing instead of panicking on overflow.
pub fn checked_sum(
    kpi: &str,
    values: impl Iterator<Item = Option<Decimal>>,
) -> Result<Aggregate, KpiComputationError> {
    let mut total = Decimal::ZERO;
    let mut rows = 0;
    let mut nulls = 0;
    for value in values {
        match value {
            Some(v) => {
                total = total.checked_add(v).ok_or_else(|| overflow(kpi, "sum"))?;
                rows += 1;
            }
            None => nulls += 1,
        }
    }
    Ok(Aggregate { value: total, rows, nulls })
}

pub(crate) fn overflow(kpi: &str, operation: &str) -> KpiComputationError {
    KpiComputationError::Overflow { kpi: kpi.to_string(), operation: operation.to_string() }
}
