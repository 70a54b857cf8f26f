//! # KPI Parity
//!
//! The "second engine": an independent recomputation of the KPI catalog and the
//! checker that holds the primary engine's values to it.
//!
//! ## Architectural Principles
//!
//! - **Layer 1 Logic:** No I/O beyond loading a static reference document.
//! - **Different Substrate:** The reference views are polars lazy aggregations in
//!   floating point. They share no code with the decimal calculators, so a bug in
//!   one is unlikely to be mirrored in the other.
//! - **Reported, Not Raised:** Disagreement is data in a `ParityReport`. It never
//!   aborts or alters the run it checks.

pub mod checker;
pub mod error;
pub mod polars_engine;
pub mod reference;

// Re-export the key components to create a clean, public-facing API.
pub use checker::{ParityChecker, ParityEntry, ParityReport};
pub use error::ParityError;
pub use polars_engine::PolarsReferenceEngine;
pub use reference::{ReferenceEngine, ReferenceValues, StaticReferenceEngine};
