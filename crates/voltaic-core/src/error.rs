//! Error types for voltaic-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Fatal configuration error: bad pin count, unresolved dependency,
    /// lifecycle violation. The analysis must not proceed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The matrix could not be factorized. Recoverable: the caller may retry
    /// with remediation (gmin/source stepping) or report non-convergence.
    #[error("singular matrix")]
    SingularMatrix,

    /// A solve was requested before a successful factorization.
    #[error("matrix has not been factorized")]
    NotFactored,

    #[error("invalid vector dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl Error {
    /// Whether the caller may retry after remediation. Configuration errors
    /// are fatal; numerical failures are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
