use crate::calculator::{start, KpiCalculator, KpiOutput};
use crate::error::KpiComputationError;
use crate::measure::{overflow, LoanField};
use core_types::{CanonicalTable, KpiDefinition, NullReason};
use rust_decimal::Decimal;

/// Delinquency buckets by days past due, as `(label, lower bound inclusive)`.
pub const DPD_BUCKETS: [(&str, u32); 5] =
    [("current", 0), ("1_29", 1), ("30_59", 30), ("60_89", 60), ("90_plus", 90)];

pub fn bucket_index(days_past_due: u32) -> usize {
    DPD_BUCKETS.iter().rposition(|(_, lower)| days_past_due >= *lower).unwrap_or(0)
}

pub fn bucket_for(days_past_due: u32) -> &'static str {
    DPD_BUCKETS[bucket_index(days_past_due)].0
}

/// Portfolio-at-risk: `Σ amount(dpd ≥ threshold) / Σ amount × 100`.
///
/// The denominator covers every loan with a known amount; the numerator only loans
/// whose delinquency is also known. Every bucket's total goes into the context.
pub struct BucketedSumCalculator {
    definition: KpiDefinition,
    amount: LoanField,
    min_days_past_due: u32,
}

impl BucketedSumCalculator {
    pub fn new(definition: KpiDefinition, amount: LoanField, min_days_past_due: u32) -> Self {
        Self { definition, amount, min_days_past_due }
    }
}

impl KpiCalculator for BucketedSumCalculator {
    fn describe(&self) -> &KpiDefinition {
        &self.definition
    }

    fn compute(&self, table: &CanonicalTable) -> Result<KpiOutput, KpiComputationError> {
        let mut context = match start(&self.definition, table) {
            Ok(context) => context,
            Err(no_data) => return Ok(no_data),
        };
        let kpi = self.definition.kpi_name.as_str();

        let mut buckets = [Decimal::ZERO; DPD_BUCKETS.len()];
        let mut at_risk = Decimal::ZERO;
        let mut total = Decimal::ZERO;

        for loan in &table.loans {
            let Some(amount) = self.amount.get(loan) else {
                context.null_count += 1;
                continue;
            };
            total = total.checked_add(amount).ok_or_else(|| overflow(kpi, "sum"))?;
            context.rows_processed += 1;

            let Some(dpd) = loan.days_past_due else {
                context.null_count += 1;
                continue;
            };
            let idx = bucket_index(dpd);
            buckets[idx] = buckets[idx].checked_add(amount).ok_or_else(|| overflow(kpi, "sum"))?;
            if dpd >= self.min_days_past_due {
                at_risk = at_risk.checked_add(amount).ok_or_else(|| overflow(kpi, "sum"))?;
            }
        }

        let bucket_detail: serde_json::Map<String, serde_json::Value> = DPD_BUCKETS
            .iter()
            .zip(buckets.iter())
            .map(|((label, _), sum)| (label.to_string(), serde_json::Value::String(sum.to_string())))
            .collect();
        context.insert_detail("buckets", serde_json::Value::Object(bucket_detail));
        context.insert_detail("min_days_past_due", self.min_days_past_due);

        if total.is_zero() {
            return Ok(KpiOutput::null(context, NullReason::ZeroDenominator));
        }
        let value = at_risk
            .checked_div(total)
            .and_then(|share| share.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or_else(|| overflow(kpi, "ratio"))?;
        Ok(KpiOutput::value(value, context))
    }
}
