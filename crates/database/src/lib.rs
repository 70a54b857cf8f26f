//! # KPI Audit Ledger
//!
//! This crate is the pipeline's "permanent archive": the durable record of every
//! run, the raw artifacts it consumed, the KPI definitions it applied and the
//! values it produced.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** All SQL lives here. The rest of the workspace talks to the
//!   ledger through `DbRepository` and never sees a query.
//! - **Atomic Runs:** A run's values, artifacts and data-quality record are written
//!   in one transaction. A failed or canceled run leaves only its run row.
//! - **Idempotent Writes:** Every insert is keyed by the natural identity of the row,
//!   so saving the same run twice leaves the ledger unchanged.
//! - **Asynchronous & Pooled:** All operations are asynchronous over a `SqlitePool`.
//!
//! ## Public API
//!
//! - `connect`: Opens the ledger, creating the database file when missing.
//! - `run_migrations`: Applies the embedded schema migrations.
//! - `DbRepository`: Holds the pool and exposes the ledger's read/write operations.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod repository;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::{DbDataQuality, DbKpiValue, DbPipelineRun, DbRawArtifact, DbRepository, RunRecord};
