use crate::calculator::{start, KpiCalculator, KpiOutput};
use crate::error::KpiComputationError;
use crate::measure::overflow;
use core_types::{CanonicalTable, Direction, KpiDefinition, NullReason};
use rust_decimal::Decimal;

/// One weighted input of a composite score. The component is a percentage KPI;
/// lower-is-better components enter the score as `1 - v/100`.
pub struct Component {
    pub weight: Decimal,
    pub calculator: Box<dyn KpiCalculator>,
}

impl Component {
    fn normalized(&self, percent: Decimal) -> Option<Decimal> {
        let share = percent.checked_div(Decimal::ONE_HUNDRED)?;
        match self.calculator.describe().direction {
            Direction::HigherIsBetter => Some(share),
            Direction::LowerIsBetter => Some(Decimal::ONE - share),
        }
    }
}

/// `scale × Σ weight × normalized(component)`, clamped to `[0, scale]`.
///
/// Components are recomputed from the canonical table so the composite stays a pure
/// function of the snapshot. Any null component makes the score null.
pub struct CompositeScoreCalculator {
    definition: KpiDefinition,
    components: Vec<Component>,
    scale: Decimal,
}

impl CompositeScoreCalculator {
    pub fn new(definition: KpiDefinition, components: Vec<Component>, scale: Decimal) -> Self {
        Self { definition, components, scale }
    }
}

impl KpiCalculator for CompositeScoreCalculator {
    fn describe(&self) -> &KpiDefinition {
        &self.definition
    }

    fn compute(&self, table: &CanonicalTable) -> Result<KpiOutput, KpiComputationError> {
        let mut context = match start(&self.definition, table) {
            Ok(context) => context,
            Err(no_data) => return Ok(no_data),
        };
        let kpi = self.definition.kpi_name.as_str();

        let mut score = Decimal::ZERO;
        let mut missing = Vec::new();
        for component in &self.components {
            let name = component.calculator.describe().kpi_name.clone();
            let output = component.calculator.compute(table)?;
            context.rows_processed = context.rows_processed.max(output.context.rows_processed);
            context.null_count = context.null_count.max(output.context.null_count);

            let Some(value) = output.value else {
                missing.push(name);
                continue;
            };
            context.insert_detail(&name, value.to_string());
            let term = component
                .normalized(value)
                .and_then(|n| n.checked_mul(component.weight))
                .ok_or_else(|| overflow(kpi, "component"))?;
            score = score.checked_add(term).ok_or_else(|| overflow(kpi, "sum"))?;
        }

        if !missing.is_empty() {
            context.insert_detail("missing_components", missing);
            return Ok(KpiOutput::null(context, NullReason::ComponentUnavailable));
        }

        let raw = score.checked_mul(self.scale).ok_or_else(|| overflow(kpi, "scale"))?;
        let clamped = raw.clamp(Decimal::ZERO, self.scale);
        if clamped != raw {
            context.insert_detail("clamped_from", raw.to_string());
        }
        Ok(KpiOutput::value(clamped, context))
    }
}
