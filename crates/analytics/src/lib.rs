//! # KPI Analytics
//!
//! The calculator side of the pipeline: a uniform `KpiCalculator` contract, the
//! calculator families that implement it, the static KPI catalog, and the
//! `CalculationEngine` that evaluates a registry in parallel.
//!
//! ## Architectural Principles
//!
//! - **Layer 1 Logic:** A pure logic crate. It depends only on `core-types` and has no
//!   knowledge of files, databases or networks.
//! - **Pure Calculators:** Calculators are stateless functions of the canonical table.
//!   Nulls are values with reasons; only genuinely unexpected conditions are errors.
//! - **Closed Registry:** Every KPI belongs to one of a fixed set of families, and
//!   `create_calculator` matches on them exhaustively.

pub mod bucketed_sum;
pub mod calculator;
pub mod catalog;
pub mod composite;
pub mod concentration;
pub mod engine;
pub mod error;
pub mod measure;
pub mod ratio;
pub mod registry;
pub mod weighted_average;

#[cfg(test)]
mod test_support;

// Re-export the key components to create a clean, public-facing API.
pub use calculator::{KpiCalculator, KpiOutput};
pub use catalog::{CalculatorFamily, CatalogRow, CATALOG, CATALOG_VERSION};
pub use engine::{CalculationEngine, LineageAnchors, ResultBundle};
pub use error::{AnalyticsError, KpiComputationError};
pub use registry::{create_calculator, KpiRegistry};
