//! # KPI Pipeline Engine
//!
//! The master orchestrator. It wires ingestion, validation, calculation,
//! persistence and the parity check into one run with a single, structured outcome.
//!
//! ## Architectural Principles
//!
//! - **Layer 4 Orchestrator:** The only crate that knows about every other crate.
//! - **Two Error Channels:** Phase failures are `PipelineError`s and end the run;
//!   per-KPI failures stay in-band on the value and never stop it.
//! - **Explicit State Machine:** A run moves from `running` to exactly one of
//!   `success`, `failed` or `canceled`, and `success` only after the ledger commit.
//!
//! ## Public API
//!
//! - `Pipeline`: Holds the configured components and executes `RunRequest`s.
//! - `RunOutcome`: The structured result (`status`, `phase`, `errors`, `warnings`).
//! - `CancelFlag`: Cooperative cancellation, checked at phase boundaries.
//! - `LedgerSink`: The persistence seam, implemented by `database::DbRepository`.

pub mod cancel;
pub mod error;
pub mod outcome;
pub mod output;
pub mod pipeline;
pub mod sink;

// Re-export the key components to create a clean, public-facing API.
pub use cancel::CancelFlag;
pub use error::PipelineError;
pub use outcome::{ParitySummary, RunError, RunOutcome};
pub use output::{FileDigest, Manifest, OutputWriter};
pub use pipeline::{Pipeline, RunRequest};
pub use sink::LedgerSink;
