//! AC small-signal frequency-domain analysis.
//!
//! The circuit is linearized once around the DC operating point; after that
//! each frequency is an independent complex linear solve. [`AcSolver`] keeps
//! the linearization alive between calls, so callers may interleave
//! arbitrary frequencies (a tracking sweep, a bisection on a corner
//! frequency) without recomputing the bias point.

use std::f64::consts::PI;

use nalgebra::DVector;
use num_complex::Complex;
use voltaic_core::{ComplexState, NodeId, SparseMatrix};

use crate::engine::Engine;
use crate::error::Result;
use crate::newton::NewtonConfig;

/// Frequency grid of an AC or noise sweep.
#[derive(Debug, Clone)]
pub enum FrequencySweep {
    /// Linearly spaced points from `start` to `stop` inclusive.
    Linear { start: f64, stop: f64, points: usize },
    /// Logarithmically spaced, `points` per decade.
    Decade { start: f64, stop: f64, points: usize },
    /// Logarithmically spaced, `points` per octave.
    Octave { start: f64, stop: f64, points: usize },
}

impl FrequencySweep {
    /// Materialize the grid.
    pub fn frequencies(&self) -> Vec<f64> {
        match *self {
            FrequencySweep::Linear { start, stop, points } => {
                if points <= 1 {
                    return vec![start];
                }
                let step = (stop - start) / (points - 1) as f64;
                (0..points).map(|i| start + step * i as f64).collect()
            }
            FrequencySweep::Decade { start, stop, points } => {
                Self::log_spaced(start, stop, points, 10.0)
            }
            FrequencySweep::Octave { start, stop, points } => {
                Self::log_spaced(start, stop, points, 2.0)
            }
        }
    }

    fn log_spaced(start: f64, stop: f64, points_per_interval: usize, base: f64) -> Vec<f64> {
        let ratio = base.powf(1.0 / points_per_interval.max(1) as f64);
        let mut freqs = Vec::new();
        let mut f = start;
        while f < stop * (1.0 + 1e-12) {
            freqs.push(f.min(stop));
            f *= ratio;
        }
        freqs
    }
}

/// One AC sweep: frequencies and the complex solution at each.
#[derive(Debug, Clone)]
pub struct AcResult {
    pub frequencies: Vec<f64>,
    pub solutions: Vec<DVector<Complex<f64>>>,
}

impl AcResult {
    /// Complex node voltage across the sweep.
    pub fn voltage(&self, node: NodeId) -> Vec<Complex<f64>> {
        self.solutions.iter().map(|s| s[node.index()]).collect()
    }

    /// Magnitude in dB of a node voltage across the sweep.
    pub fn magnitude_db(&self, node: NodeId) -> Vec<f64> {
        self.solutions
            .iter()
            .map(|s| 20.0 * s[node.index()].norm().log10())
            .collect()
    }

    /// Phase in degrees of a node voltage across the sweep.
    pub fn phase_deg(&self, node: NodeId) -> Vec<f64> {
        self.solutions
            .iter()
            .map(|s| s[node.index()].arg().to_degrees())
            .collect()
    }
}

/// Incremental frequency-domain solver bound to a linearized engine.
pub struct AcSolver<'a> {
    engine: &'a mut Engine,
    matrix: SparseMatrix<Complex<f64>>,
    state: ComplexState,
}

impl Engine {
    /// Solve the operating point, linearize every behavior around it and
    /// return a solver for arbitrary single-frequency queries.
    pub fn ac_solver(&mut self, newton: &NewtonConfig) -> Result<AcSolver<'_>> {
        self.check_set_up()?;
        self.solve_op(newton)?;
        self.container.init_frequency_all(&self.state)?;

        let mut matrix = SparseMatrix::new(self.vars.size());
        self.container
            .complex_pointers_all(&self.vars, &mut matrix)?;
        let state = ComplexState::new(self.vars.size());
        Ok(AcSolver {
            engine: self,
            matrix,
            state,
        })
    }

    /// Run a full AC sweep.
    pub fn solve_ac(&mut self, sweep: &FrequencySweep, newton: &NewtonConfig) -> Result<AcResult> {
        let frequencies = sweep.frequencies();
        let mut solver = self.ac_solver(newton)?;
        let mut solutions = Vec::with_capacity(frequencies.len());
        for &f in &frequencies {
            solutions.push(solver.solve_at(f)?.clone());
        }
        Ok(AcResult {
            frequencies,
            solutions,
        })
    }
}

impl AcSolver<'_> {
    /// Solve the linearized system at `frequency` (Hz) and return the
    /// complex solution (ground slot at index 0).
    pub fn solve_at(&mut self, frequency: f64) -> Result<&DVector<Complex<f64>>> {
        self.state.laplace = Complex::new(0.0, 2.0 * PI * frequency);
        self.load_and_factor()?;
        self.matrix
            .solve_into(&self.state.rhs, &mut self.state.solution)?;
        Ok(&self.state.solution)
    }

    /// Reload and refactor at the state's current Laplace point. Used by the
    /// noise analysis, which solves several right-hand sides per frequency.
    pub(crate) fn load_and_factor(&mut self) -> Result<()> {
        self.matrix.clear();
        self.state.clear_rhs();
        self.engine
            .container
            .frequency_load_all(&mut self.state, &mut self.matrix)?;
        self.matrix.factor()?;
        Ok(())
    }

    pub(crate) fn engine(&self) -> &Engine {
        self.engine
    }

    pub(crate) fn state_mut(&mut self) -> &mut ComplexState {
        &mut self.state
    }

    pub(crate) fn solve_rhs(&mut self) -> Result<&DVector<Complex<f64>>> {
        self.matrix
            .solve_into(&self.state.rhs, &mut self.state.solution)?;
        Ok(&self.state.solution)
    }

    pub(crate) fn set_frequency(&mut self, frequency: f64) {
        self.state.laplace = Complex::new(0.0, 2.0 * PI * frequency);
    }
}
