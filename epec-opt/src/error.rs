//! Error types for the optimizer backend.

use thiserror::Error;

/// Errors that can occur while building or solving a model.
#[derive(Error, Debug)]
pub enum OptError {
    /// Model validation failed (bad index, inconsistent dimensions).
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// A query was made on a model with no solution available.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The pivoting algorithm hit its iteration cap.
    #[error("Iteration limit reached in {0}")]
    IterationLimit(&'static str),

    /// Numerical breakdown during pivoting.
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// A capability the backend does not offer was requested.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Result type for backend operations.
pub type OptResult<T> = Result<T, OptError>;
