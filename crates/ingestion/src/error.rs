use thiserror::Error;

/// Every way acquiring a raw dataset can fail. All of them are fatal to the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestionError {
    #[error("Network error reading '{source_name}' (attempt {attempts}): {message}")]
    Network {
        source_name: String,
        attempts: u32,
        message: String,
        /// Whether another attempt could plausibly succeed.
        transient: bool,
    },

    #[error("Authentication rejected by '{source_name}' (HTTP {status})")]
    Auth { source_name: String, status: u16 },

    #[error("Source '{source_name}' returned data that cannot be parsed as a table: {message}")]
    Schema { source_name: String, message: String },

    #[error("Source '{source_name}' is unavailable: {message}")]
    Unavailable { source_name: String, message: String },

    #[error("Circuit breaker open for '{source_name}'; retry in {retry_after_secs}s")]
    CircuitOpen { source_name: String, retry_after_secs: u64 },

    #[error("Failed to build the HTTP client: {0}")]
    ClientBuild(String),
}

impl IngestionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestionError::Network { transient: true, .. })
    }

    /// Short machine-readable kind used in run outcomes and audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestionError::Network { .. } => "network",
            IngestionError::Auth { .. } => "auth",
            IngestionError::Schema { .. } => "schema",
            IngestionError::Unavailable { .. } => "unavailable",
            IngestionError::CircuitOpen { .. } => "circuit_open",
            IngestionError::ClientBuild(_) => "client_build",
        }
    }

    /// Stamps the attempt number onto errors that carry one.
    pub(crate) fn at_attempt(mut self, attempt: u32) -> Self {
        if let IngestionError::Network { attempts, .. } = &mut self {
            *attempts = attempt;
        }
        self
    }
}
