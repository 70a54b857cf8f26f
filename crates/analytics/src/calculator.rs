use crate::error::KpiComputationError;
use core_types::{CanonicalTable, KpiContext, KpiDefinition, NullReason, SourceTable};
use rust_decimal::Decimal;

/// What a calculator hands back: the unrounded value and its audit context.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiOutput {
    pub value: Option<Decimal>,
    pub context: KpiContext,
}

impl KpiOutput {
    pub fn value(value: Decimal, context: KpiContext) -> Self {
        Self { value: Some(value), context }
    }

    /// A legitimate null. Not a failure.
    pub fn null(context: KpiContext, reason: NullReason) -> Self {
        Self { value: None, context: context.with_reason(reason) }
    }
}

/// The uniform contract every KPI implements.
///
/// Calculators are pure: the same canonical table always yields the same output.
/// A zero denominator or an empty source table is reported as a null value with a
/// reason, never as an error. `Send + Sync` lets the engine fan calculators out
/// across the rayon pool.
pub trait KpiCalculator: Send + Sync {
    fn describe(&self) -> &KpiDefinition;

    fn compute(&self, table: &CanonicalTable) -> Result<KpiOutput, KpiComputationError>;
}

/// Shared preamble: a fresh context and the `no_data` short-circuit.
pub(crate) fn start(definition: &KpiDefinition, table: &CanonicalTable) -> Result<KpiContext, KpiOutput> {
    let context = KpiContext::new(definition.formula.clone());
    let source_empty = match definition.source_table {
        SourceTable::Loans => table.loans.is_empty(),
        SourceTable::Payments => table.payments.is_empty(),
    };
    if source_empty {
        Err(KpiOutput::null(context, NullReason::NoData))
    } else {
        Ok(context)
    }
}
