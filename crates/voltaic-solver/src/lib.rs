//! Analyses for Voltaic.
//!
//! This crate provides:
//! - The analysis engine that assembles behaviors into an MNA system
//! - DC operating point with Newton-Raphson and a remediation ladder
//! - Adaptive transient analysis with breakpoints and truncation control
//! - AC small-signal analysis with an incremental per-frequency solver
//! - Noise analysis over the linearized system

pub mod ac;
pub mod engine;
pub mod error;
pub mod newton;
pub mod noise;
pub mod transient;

pub use ac::{AcResult, AcSolver, FrequencySweep};
pub use engine::Engine;
pub use error::{Error, Result};
pub use newton::NewtonConfig;
pub use noise::{NoiseConfig, NoiseResult};
pub use transient::{TransientConfig, TransientResult};
