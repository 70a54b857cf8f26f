use thiserror::Error;

/// Schema violations. Any of these aborts the run in the validate phase.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{table} is missing required column(s): {}", columns.join(", "))]
    MissingColumns { table: String, columns: Vec<String> },

    #[error("{table} has no header row")]
    NoHeader { table: String },

    #[error("{table} declares column '{column}' more than once")]
    DuplicateColumn { table: String, column: String },
}

impl ValidationError {
    /// The offending column(s), for the run outcome.
    pub fn columns(&self) -> Vec<String> {
        match self {
            ValidationError::MissingColumns { columns, .. } => columns.clone(),
            ValidationError::DuplicateColumn { column, .. } => vec![column.clone()],
            ValidationError::NoHeader { .. } => Vec::new(),
        }
    }
}
