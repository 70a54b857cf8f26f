use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Illegal run status transition from '{from}' to '{to}'")]
    IllegalTransition { from: String, to: String },
}
