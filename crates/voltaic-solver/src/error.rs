//! Error types for voltaic-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] voltaic_core::Error),

    #[error("convergence failed after {iterations} iterations")]
    ConvergenceFailed { iterations: usize },

    #[error("timestep {delta:.3e} below minimum {minimum:.3e} at t = {time:.6e}")]
    TimestepTooSmall { time: f64, delta: f64, minimum: f64 },
}

impl Error {
    /// Whether a remediation strategy (gmin stepping, source stepping, step
    /// cutting) may still rescue the analysis.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Core(e) => e.is_recoverable(),
            Error::ConvergenceFailed { .. } => true,
            Error::TimestepTooSmall { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
