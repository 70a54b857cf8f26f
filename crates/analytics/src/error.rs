use thiserror::Error;

/// A single calculator's failure. Isolated to its KPI: the engine records it in the
/// value's context and carries on with the rest of the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KpiComputationError {
    #[error("Arithmetic overflow while computing '{kpi}': {operation}")]
    Overflow { kpi: String, operation: String },

    #[error("Invalid input for '{kpi}': {message}")]
    InvalidInput { kpi: String, message: String },

    #[error("Calculator for '{kpi}' panicked: {message}")]
    Panicked { kpi: String, message: String },
}

impl KpiComputationError {
    /// The short tag stored in `KpiContext.error`.
    pub fn kind(&self) -> &'static str {
        match self {
            KpiComputationError::Overflow { .. } => "arithmetic_overflow",
            KpiComputationError::InvalidInput { .. } => "invalid_input",
            KpiComputationError::Panicked { .. } => "panic",
        }
    }
}

/// Errors building the registry or the calculation engine.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("KPI '{0}' is registered more than once")]
    DuplicateKpi(String),

    #[error("Composite KPI '{composite}' references unknown component '{component}'")]
    UnknownComponent { composite: String, component: String },

    #[error("Failed to build the calculation thread pool: {0}")]
    ThreadPool(String),
}
