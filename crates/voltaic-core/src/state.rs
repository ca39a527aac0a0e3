//! Per-analysis simulation state.

use nalgebra::DVector;
use num_complex::Complex;

/// What the real-valued solve is computing. Behaviors that distinguish a DC
/// operating point from a time-domain step (e.g. a delay line that is a short
/// at DC) branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// DC operating point (also the bias point preceding AC/noise).
    #[default]
    Dc,
    /// Time-domain step at [`RealState::time`].
    Transient,
}

/// Real-valued simulation state for DC and transient analysis.
///
/// Solution and RHS vectors carry a ground slot at index 0 so behaviors can
/// index by node number directly; the ground slot always reads 0 and writes
/// to it are discarded at solve time.
#[derive(Debug, Clone)]
pub struct RealState {
    /// Current solution iterate.
    pub solution: DVector<f64>,
    /// Previous solution iterate.
    pub old_solution: DVector<f64>,
    /// Right-hand-side vector, zeroed before each load pass.
    pub rhs: DVector<f64>,
    /// Analysis mode for the current solve.
    pub mode: AnalysisMode,
    /// Simulation time of the candidate point (0 for DC).
    pub time: f64,
    /// Minimum conductance added to node diagonals; also ramped during
    /// gmin stepping.
    pub gmin: f64,
    /// Source magnitude ramp in [0, 1] used by source stepping. Behaviors
    /// scale their independent-source values by this factor.
    pub source_factor: f64,
    /// Total Newton iterations performed in this run.
    pub iteration: usize,
    /// Convergence flag. Set before each load pass; a behavior clears it to
    /// signal that its internal state has not converged, keeping control in
    /// the iteration loop rather than raising an error.
    pub is_convergent: bool,
}

impl RealState {
    /// Create a state for `size` unknowns (excluding ground).
    pub fn new(size: usize) -> Self {
        Self {
            solution: DVector::zeros(size + 1),
            old_solution: DVector::zeros(size + 1),
            rhs: DVector::zeros(size + 1),
            mode: AnalysisMode::Dc,
            time: 0.0,
            gmin: 1e-12,
            source_factor: 1.0,
            iteration: 0,
            is_convergent: true,
        }
    }

    /// Zero the RHS vector.
    pub fn clear_rhs(&mut self) {
        self.rhs.fill(0.0);
    }

    /// Shift the current solution into the previous iterate.
    pub fn store_solution(&mut self) {
        std::mem::swap(&mut self.solution, &mut self.old_solution);
    }
}

/// Complex-valued simulation state for frequency-domain and noise analysis.
///
/// Created per analysis, with a lifecycle independent of the real state.
#[derive(Debug, Clone)]
pub struct ComplexState {
    /// The complex frequency variable: `j*2*pi*f` for AC, 0 at the DC point,
    /// or an arbitrary Laplace point for pole-zero style queries.
    pub laplace: Complex<f64>,
    /// Complex solution vector.
    pub solution: DVector<Complex<f64>>,
    /// Complex right-hand side.
    pub rhs: DVector<Complex<f64>>,
}

impl ComplexState {
    /// Create a state for `size` unknowns (excluding ground).
    pub fn new(size: usize) -> Self {
        Self {
            laplace: Complex::new(0.0, 0.0),
            solution: DVector::from_element(size + 1, Complex::new(0.0, 0.0)),
            rhs: DVector::from_element(size + 1, Complex::new(0.0, 0.0)),
        }
    }

    /// Zero the RHS vector.
    pub fn clear_rhs(&mut self) {
        self.rhs.fill(Complex::new(0.0, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_slot() {
        let state = RealState::new(3);
        assert_eq!(state.solution.len(), 4);
        assert_eq!(state.solution[0], 0.0);
    }

    #[test]
    fn test_store_solution_swaps() {
        let mut state = RealState::new(1);
        state.solution[1] = 2.5;
        state.store_solution();
        assert_eq!(state.old_solution[1], 2.5);
        state.solution[1] = 3.0;
        assert_eq!(state.old_solution[1], 2.5);
    }
}
