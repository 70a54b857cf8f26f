use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid database configuration: {0}")]
    ConnectionConfigError(String),

    #[error("Database operation failed: {0}")]
    QueryError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Stored value in column '{column}' is corrupt: {message}")]
    CorruptRow { column: String, message: String },

    #[error("Run {run_id} already ended as '{status}'; its values cannot be committed")]
    RunAlreadyTerminal { run_id: String, status: String },

    #[error("The requested data was not found in the database.")]
    NotFound,
}

impl DbError {
    /// Lock contention and pool exhaustion are worth retrying; schema and data
    /// problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::QueryError(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            DbError::QueryError(sqlx::Error::Database(db)) => {
                let message = db.message().to_ascii_lowercase();
                message.contains("locked") || message.contains("busy")
            }
            _ => false,
        }
    }
}
