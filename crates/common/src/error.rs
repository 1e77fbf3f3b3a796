//! Common error types for Pairline components.

use thiserror::Error;

/// Errors shared by Pairline components
#[derive(Error, Debug)]
pub enum PairlineError {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PairlineError {
    fn from(err: serde_json::Error) -> Self {
        PairlineError::Serialization(err.to_string())
    }
}

/// Result type alias using `PairlineError`
pub type Result<T> = std::result::Result<T, PairlineError>;
