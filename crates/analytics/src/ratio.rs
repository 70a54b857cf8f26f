use crate::calculator::{start, KpiCalculator, KpiOutput};
use crate::error::KpiComputationError;
use crate::measure::{overflow, Measure};
use core_types::{CanonicalTable, KpiDefinition, NullReason};
use rust_decimal::Decimal;

/// `numerator / denominator × scale`.
pub struct RatioCalculator {
    definition: KpiDefinition,
    numerator: Measure,
    denominator: Measure,
    scale: Decimal,
}

impl RatioCalculator {
    pub fn new(definition: KpiDefinition, numerator: Measure, denominator: Measure, scale: Decimal) -> Self {
        Self { definition, numerator, denominator, scale }
    }
}

impl KpiCalculator for RatioCalculator {
    fn describe(&self) -> &KpiDefinition {
        &self.definition
    }

    fn compute(&self, table: &CanonicalTable) -> Result<KpiOutput, KpiComputationError> {
        let mut context = match start(&self.definition, table) {
            Ok(context) => context,
            Err(no_data) => return Ok(no_data),
        };
        let kpi = self.definition.kpi_name.as_str();

        let num = self.numerator.evaluate(kpi, &table.loans, &table.payments)?;
        let den = self.denominator.evaluate(kpi, &table.loans, &table.payments)?;

        context.rows_processed = num.rows.max(den.rows);
        context.null_count = num.nulls.max(den.nulls);
        context.insert_detail("numerator", num.value.to_string());
        context.insert_detail("denominator", den.value.to_string());

        if den.value.is_zero() {
            return Ok(KpiOutput::null(context, NullReason::ZeroDenominator));
        }

        let value = num
            .value
            .checked_div(den.value)
            .and_then(|ratio| ratio.checked_mul(self.scale))
            .ok_or_else(|| overflow(kpi, "ratio"))?;
        Ok(KpiOutput::value(value, context))
    }
}
