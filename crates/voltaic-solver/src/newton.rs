//! Newton-Raphson iteration and the DC operating point.

use log::debug;
use voltaic_core::AnalysisMode;

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Convergence criteria and remediation limits for Newton-Raphson iteration.
#[derive(Debug, Clone)]
pub struct NewtonConfig {
    /// Absolute voltage tolerance (V).
    pub v_abstol: f64,
    /// Absolute current tolerance (A), applied to branch unknowns.
    pub i_abstol: f64,
    /// Relative tolerance, applied against the larger iterate magnitude.
    pub reltol: f64,
    /// Maximum iterations per solve before failure.
    pub max_iterations: usize,
    /// Number of gmin stepping decades tried when the plain solve fails.
    pub gmin_steps: usize,
    /// Number of source stepping increments tried when gmin stepping fails.
    pub source_steps: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            v_abstol: 1e-6,
            i_abstol: 1e-12,
            reltol: 1e-3,
            max_iterations: 100,
            gmin_steps: 10,
            source_steps: 10,
        }
    }
}

impl Engine {
    /// Run Newton-Raphson at the current mode/time until every unknown's
    /// update is within tolerance and every behavior reports convergence.
    ///
    /// Returns the number of iterations on success.
    pub(crate) fn solve_nonlinear(&mut self, config: &NewtonConfig) -> Result<usize> {
        for iteration in 0..config.max_iterations {
            self.state.iteration += 1;
            self.state.is_convergent = true;
            self.matrix.clear();
            self.state.clear_rhs();
            self.container.load_all(&mut self.state, &mut self.matrix)?;
            if self.state.mode == AnalysisMode::Transient {
                self.container
                    .transient_all(&mut self.state, &mut self.matrix, &mut self.pool)?;
            }
            for &diag in &self.diagonals {
                self.matrix.add(diag, self.state.gmin);
            }

            self.matrix.factor()?;
            self.state.store_solution();
            let (rhs, solution) = (&self.state.rhs, &mut self.state.solution);
            self.matrix.solve_into(rhs, solution)?;

            // The first iterate has no meaningful predecessor to compare to.
            if iteration > 0
                && self.converged(config)
                && self.state.is_convergent
                && self.container.all_convergent(&self.state)
            {
                return Ok(iteration + 1);
            }
        }
        Err(Error::ConvergenceFailed {
            iterations: config.max_iterations,
        })
    }

    /// Per-unknown update check: `|dx| <= abstol + reltol * max(|x|, |x_old|)`.
    fn converged(&self, config: &NewtonConfig) -> bool {
        let num_nodes = self.vars.num_nodes();
        for i in 1..self.state.solution.len() {
            let new = self.state.solution[i];
            let old = self.state.old_solution[i];
            let abstol = if i <= num_nodes {
                config.v_abstol
            } else {
                config.i_abstol
            };
            let tol = abstol + config.reltol * new.abs().max(old.abs());
            if (new - old).abs() > tol {
                return false;
            }
        }
        true
    }

    /// Solve the DC operating point.
    ///
    /// On failure of the plain solve the remediation ladder is tried in
    /// order: gmin stepping (ramp the diagonal conductance down decade by
    /// decade), then source stepping (ramp all independent sources up from
    /// zero), then a single retry from a cleared solution. Configuration
    /// errors abort immediately.
    pub fn solve_op(&mut self, config: &NewtonConfig) -> Result<()> {
        self.check_set_up()?;
        self.state.mode = AnalysisMode::Dc;
        self.state.time = 0.0;

        match self.solve_nonlinear(config) {
            Ok(iters) => {
                debug!("operating point converged in {iters} iterations");
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                debug!("operating point failed ({e}), starting remediation");
            }
            Err(e) => return Err(e),
        }

        if self.gmin_stepping(config)? {
            return Ok(());
        }
        if self.source_stepping(config)? {
            return Ok(());
        }

        // Last resort: a fresh start sometimes escapes a bad region left
        // behind by the failed attempts.
        self.state.solution.fill(0.0);
        self.state.old_solution.fill(0.0);
        self.solve_nonlinear(config).map(|_| ())
    }

    /// Gmin stepping: solve with a large diagonal conductance and ramp it
    /// down one decade at a time, reusing each solution as the next guess.
    fn gmin_stepping(&mut self, config: &NewtonConfig) -> Result<bool> {
        if config.gmin_steps == 0 {
            return Ok(false);
        }
        let base_gmin = self.state.gmin;
        self.state.solution.fill(0.0);
        self.state.old_solution.fill(0.0);

        for step in (0..=config.gmin_steps as i32).rev() {
            self.state.gmin = base_gmin * 10f64.powi(step);
            match self.solve_nonlinear(config) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    debug!("gmin stepping stalled at gmin = {:.1e}", self.state.gmin);
                    self.state.gmin = base_gmin;
                    return Ok(false);
                }
                Err(e) => {
                    self.state.gmin = base_gmin;
                    return Err(e);
                }
            }
        }
        self.state.gmin = base_gmin;
        debug!("gmin stepping succeeded");
        Ok(true)
    }

    /// Source stepping: ramp all independent sources from zero to full
    /// strength, reusing each solution as the next guess.
    fn source_stepping(&mut self, config: &NewtonConfig) -> Result<bool> {
        if config.source_steps == 0 {
            return Ok(false);
        }
        self.state.solution.fill(0.0);
        self.state.old_solution.fill(0.0);

        for step in 1..=config.source_steps {
            self.state.source_factor = step as f64 / config.source_steps as f64;
            match self.solve_nonlinear(config) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    debug!(
                        "source stepping stalled at factor {:.2}",
                        self.state.source_factor
                    );
                    self.state.source_factor = 1.0;
                    return Ok(false);
                }
                Err(e) => {
                    self.state.source_factor = 1.0;
                    return Err(e);
                }
            }
        }
        self.state.source_factor = 1.0;
        debug!("source stepping succeeded");
        Ok(true)
    }
}
