//! Error types for the engine.

use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Recoverable conditions inside inner loops (an infeasible tentative
/// branch, an empty relaxation) are ordinary return values, not errors;
/// these variants cover genuinely exceptional outcomes.
#[derive(Error, Debug)]
pub enum EpecError {
    /// Allocation or capacity failure.
    #[error("Memory error: {0}")]
    MemoryError(String),

    /// The queried attribute or data is not available.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The input data is dimensionally inconsistent or otherwise invalid.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The optimizer backend failed; carries the backend's own error.
    #[error("Solver error: {0}")]
    SolverError(#[from] epec_opt::OptError),

    /// An index or parameter is out of range.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// A numerical invariant was violated (e.g. a relaxation payoff below
    /// the true best-response value).
    #[error("Numeric error: {0}")]
    Numeric(String),

    /// An error involving the IO interface.
    #[error("IO error: {0}")]
    IoError(String),

    /// An internal contract was violated, including unknown solver statuses.
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Anything else.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Result type for engine operations.
pub type EpecResult<T> = Result<T, EpecError>;
