use thiserror::Error;

/// Raised at start-up; a run never begins with an invalid configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read pipeline configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid pipeline configuration: {0}")]
    ValidationError(String),
}
