use crate::calculator::{start, KpiCalculator, KpiOutput};
use crate::error::KpiComputationError;
use crate::measure::{overflow, LoanField};
use core_types::{CanonicalTable, KpiDefinition, NullReason};
use rust_decimal::Decimal;

/// `Σ(value × weight) / Σ weight` over loans where both columns are present.
pub struct WeightedAverageCalculator {
    definition: KpiDefinition,
    value: LoanField,
    weight: LoanField,
}

impl WeightedAverageCalculator {
    pub fn new(definition: KpiDefinition, value: LoanField, weight: LoanField) -> Self {
        Self { definition, value, weight }
    }
}

impl KpiCalculator for WeightedAverageCalculator {
    fn describe(&self) -> &KpiDefinition {
        &self.definition
    }

    fn compute(&self, table: &CanonicalTable) -> Result<KpiOutput, KpiComputationError> {
        let mut context = match start(&self.definition, table) {
            Ok(context) => context,
            Err(no_data) => return Ok(no_data),
        };
        let kpi = self.definition.kpi_name.as_str();

        let mut weighted = Decimal::ZERO;
        let mut total_weight = Decimal::ZERO;
        for loan in &table.loans {
            let (Some(value), Some(weight)) = (self.value.get(loan), self.weight.get(loan)) else {
                context.null_count += 1;
                continue;
            };
            let product = value.checked_mul(weight).ok_or_else(|| overflow(kpi, "product"))?;
            weighted = weighted.checked_add(product).ok_or_else(|| overflow(kpi, "sum"))?;
            total_weight = total_weight.checked_add(weight).ok_or_else(|| overflow(kpi, "sum"))?;
            context.rows_processed += 1;
        }
        context.insert_detail("total_weight", total_weight.to_string());

        if total_weight.is_zero() {
            return Ok(KpiOutput::null(context, NullReason::ZeroDenominator));
        }
        let value = weighted.checked_div(total_weight).ok_or_else(|| overflow(kpi, "division"))?;
        Ok(KpiOutput::value(value, context))
    }
}
