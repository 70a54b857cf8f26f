use crate::calculator::{start, KpiCalculator, KpiOutput};
use crate::error::KpiComputationError;
use crate::measure::{overflow, LoanField};
use core_types::{CanonicalTable, KpiDefinition, NullReason};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Share of the portfolio held by the largest `top_n` customers.
pub struct ConcentrationCalculator {
    definition: KpiDefinition,
    amount: LoanField,
    top_n: usize,
}

impl ConcentrationCalculator {
    pub fn new(definition: KpiDefinition, amount: LoanField, top_n: usize) -> Self {
        Self { definition, amount, top_n }
    }
}

impl KpiCalculator for ConcentrationCalculator {
    fn describe(&self) -> &KpiDefinition {
        &self.definition
    }

    fn compute(&self, table: &CanonicalTable) -> Result<KpiOutput, KpiComputationError> {
        let mut context = match start(&self.definition, table) {
            Ok(context) => context,
            Err(no_data) => return Ok(no_data),
        };
        let kpi = self.definition.kpi_name.as_str();

        let mut exposure: HashMap<&str, Decimal> = HashMap::new();
        for loan in &table.loans {
            let Some(amount) = self.amount.get(loan) else {
                context.null_count += 1;
                continue;
            };
            let entry = exposure.entry(loan.customer_id.as_str()).or_default();
            *entry = entry.checked_add(amount).ok_or_else(|| overflow(kpi, "sum"))?;
            context.rows_processed += 1;
        }

        let mut ranked: Vec<Decimal> = exposure.values().copied().collect();
        ranked.sort_unstable_by(|a, b| b.cmp(a));

        let mut total = Decimal::ZERO;
        for v in &ranked {
            total = total.checked_add(*v).ok_or_else(|| overflow(kpi, "sum"))?;
        }
        // Prefix of an overflow-checked total cannot overflow.
        let top: Decimal = ranked.iter().take(self.top_n).copied().sum();

        context.insert_detail("customers", ranked.len());
        context.insert_detail("top_n", self.top_n);

        if total.is_zero() {
            return Ok(KpiOutput::null(context, NullReason::ZeroDenominator));
        }
        let value = top
            .checked_div(total)
            .and_then(|share| share.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or_else(|| overflow(kpi, "ratio"))?;
        Ok(KpiOutput::value(value, context))
    }
}
