//! Core equation-system structures for Voltaic.
//!
//! This crate provides the building blocks every analysis is assembled from:
//! the unknown-variable map, the sparse MNA matrix with stable element
//! handles, the per-device behavior contract and its lifecycle container,
//! integration states for transient analysis, and noise source descriptors.

pub mod behavior;
pub mod breakpoints;
pub mod error;
pub mod integration;
pub mod node;
pub mod noise;
pub mod sparse;
pub mod state;

pub use behavior::{
    AcceptContext, Behavior, BehaviorContainer, Catalog, Constructor, DependencyKey, DeviceSpec,
    Provider,
};
pub use breakpoints::Breakpoints;
pub use error::{Error, Result};
pub use integration::{
    HISTORY_DEPTH, IntegrationConfig, Method, StateDerivative, StateHistory, StatePool,
};
pub use node::{BranchId, NodeId, Variables};
pub use noise::{NoiseDensity, NoiseSource, BOLTZMANN, ELECTRON_CHARGE};
pub use sparse::{MatrixElement, SparseMatrix};
pub use state::{AnalysisMode, ComplexState, RealState};
