use thiserror::Error;

/// Fatal failures of a pipeline phase. Per-KPI failures never appear here; they
/// travel in-band on the value's context.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Ingestion failed: {0}")]
    Ingestion(#[from] ingestion::error::IngestionError),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationError),

    #[error("Failed to build the calculation engine: {0}")]
    Analytics(#[from] analytics::AnalyticsError),

    #[error("Persistence failed after {attempts} attempt(s): {source}")]
    Persistence {
        attempts: u32,
        #[source]
        source: database::DbError,
    },

    #[error("Failed to write output file '{path}': {message}")]
    Output { path: String, message: String },

    #[error("Parity check could not run: {0}")]
    Parity(#[from] parity::ParityError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Run state error: {0}")]
    State(#[from] core_types::CoreError),
}

impl PipelineError {
    /// Short machine-readable kind used in the run outcome.
    pub fn kind(&self) -> String {
        match self {
            PipelineError::Ingestion(e) => format!("ingestion_{}", e.kind()),
            PipelineError::Validation(_) => "schema".to_string(),
            PipelineError::Analytics(_) => "engine_setup".to_string(),
            PipelineError::Persistence { .. } => "persistence".to_string(),
            PipelineError::Output { .. } => "output".to_string(),
            PipelineError::Parity(_) => "parity".to_string(),
            PipelineError::Configuration(_) => "configuration".to_string(),
            PipelineError::State(_) => "state".to_string(),
        }
    }

    /// The retry attempt the error surfaced on, when there was one.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            PipelineError::Ingestion(ingestion::error::IngestionError::Network { attempts, .. }) => {
                Some(*attempts)
            }
            PipelineError::Persistence { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The offending column(s), for schema failures.
    pub fn columns(&self) -> Vec<String> {
        match self {
            PipelineError::Validation(e) => e.columns(),
            _ => Vec::new(),
        }
    }
}
