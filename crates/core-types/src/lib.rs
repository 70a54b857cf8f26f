pub mod audit;
pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use audit::{AuditEvent, AuditLog};
pub use enums::{
    AggregationWindow, Direction, EventStatus, KpiGroup, LoanStatus, NullReason, Phase, RunStatus,
    SourceTable, ThresholdStatus, Unit,
};
pub use error::CoreError;
pub use structs::{
    CanonicalTable, DataQualityResult, KpiContext, KpiDefinition, KpiValue, LoanRecord,
    PaymentRecord, PipelineRun, RawArtifact, RawTable, Thresholds,
};
