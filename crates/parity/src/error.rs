use chrono::NaiveDate;
use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParityError {
    #[error("Reference engine evaluation failed: {0}")]
    Polars(#[from] PolarsError),

    #[error("Failed to read reference values from '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid reference document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reference values are as of {reference}, but the snapshot is as of {requested}")]
    AsOfMismatch { reference: NaiveDate, requested: NaiveDate },
}
