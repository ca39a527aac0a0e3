//! Adaptive time-domain analysis.
//!
//! The step controller proposes a timestep, solves the nonlinear system at
//! the candidate timepoint, and asks every reactive state for its truncation
//! bound. A candidate whose bound comes in well below the attempted step is
//! rejected and retried; Newton failures cut the step by eight. Accepted
//! steps may grow by at most a fixed factor per step, and the step always
//! lands exactly on pending breakpoints.

use log::{debug, trace};
use nalgebra::DVector;
use voltaic_core::{AcceptContext, AnalysisMode, NodeId};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::newton::NewtonConfig;

/// Transient analysis parameters.
#[derive(Debug, Clone)]
pub struct TransientConfig {
    /// Stop time (s).
    pub tstop: f64,
    /// Initial timestep, also the step resumed after every breakpoint (s).
    pub initial_step: f64,
    /// Maximum timestep (s).
    pub max_step: f64,
    /// Minimum timestep before the analysis gives up (s).
    pub min_step: f64,
    /// Maximum step growth per accepted step.
    pub max_growth: f64,
    /// Step division applied on a Newton failure.
    pub cut_factor: f64,
    /// Rejection threshold: a truncation proposal below this fraction of the
    /// attempted step rejects the candidate point.
    pub reject_fraction: f64,
    /// Newton settings for each timepoint solve.
    pub newton: NewtonConfig,
}

impl TransientConfig {
    /// Conventional defaults for a run to `tstop` with steps around `step`.
    pub fn new(tstop: f64, step: f64) -> Self {
        Self {
            tstop,
            initial_step: step,
            max_step: step,
            min_step: step * 1e-9,
            max_growth: 2.0,
            cut_factor: 8.0,
            reject_fraction: 0.9,
            newton: NewtonConfig::default(),
        }
    }
}

/// Accepted timepoints of a transient run.
#[derive(Debug, Clone)]
pub struct TransientResult {
    pub time: Vec<f64>,
    pub solutions: Vec<DVector<f64>>,
}

impl TransientResult {
    /// Voltage waveform of `node` over the accepted timepoints.
    pub fn voltage(&self, node: NodeId) -> Vec<f64> {
        self.solutions.iter().map(|s| s[node.index()]).collect()
    }

    /// Number of accepted timepoints (including t = 0).
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

impl Engine {
    /// Run a transient analysis from a fresh DC operating point.
    pub fn solve_transient(&mut self, config: &TransientConfig) -> Result<TransientResult> {
        self.solve_transient_with(config, |_, _| true)
    }

    /// Like [`Self::solve_transient`], with a caller callback invoked after
    /// every accepted timepoint. Returning `false` cancels the run between
    /// steps; the result holds the points accepted so far.
    pub fn solve_transient_with(
        &mut self,
        config: &TransientConfig,
        mut on_point: impl FnMut(f64, &DVector<f64>) -> bool,
    ) -> Result<TransientResult> {
        self.check_set_up()?;
        self.solve_op(&config.newton)?;

        // Seed the integration history from the operating point and let
        // behaviors schedule their initial breakpoints.
        self.breakpoints = voltaic_core::Breakpoints::default();
        self.container
            .get_dc_state_all(&self.state, &mut self.pool)?;
        self.pool.initialize(config.initial_step);
        self.accept_point(0.0, true);
        self.breakpoints.clear(0.0);

        let mut result = TransientResult {
            time: vec![0.0],
            solutions: vec![self.state.solution.clone()],
        };
        if !on_point(0.0, &self.state.solution) {
            return Ok(result);
        }

        let mut time = 0.0;
        let mut delta = config.initial_step;
        let mut accepted = self.state.solution.clone();

        while config.tstop - time > config.min_step {
            delta = delta.min(config.max_step).min(config.tstop - time);

            // Land exactly on the next breakpoint when the step reaches it.
            let min_break = self.breakpoints.min_break();
            let mut on_breakpoint = false;
            if let Some(bp) = self.breakpoints.first() {
                if time + delta >= bp - min_break {
                    delta = bp - time;
                    on_breakpoint = true;
                }
            }

            self.pool.set_delta(delta);
            self.state.mode = AnalysisMode::Transient;
            self.state.time = time + delta;

            match self.solve_nonlinear(&config.newton) {
                Ok(iters) => {
                    trace!("t = {:.6e}: converged in {iters} iterations", self.state.time)
                }
                Err(e) if e.is_recoverable() => {
                    debug!("t = {:.6e}: {e}, cutting step", self.state.time);
                    self.state.solution.copy_from(&accepted);
                    self.state.old_solution.copy_from(&accepted);
                    delta /= config.cut_factor;
                    if delta < config.min_step {
                        return Err(Error::TimestepTooSmall {
                            time,
                            delta,
                            minimum: config.min_step,
                        });
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }

            // Truncation check over every reactive state.
            let mut proposal = f64::INFINITY;
            self.container.truncate_all(&self.pool, &mut proposal);
            if proposal < config.reject_fraction * delta {
                trace!(
                    "t = {:.6e}: truncation proposes {proposal:.3e}, rejecting step {delta:.3e}",
                    self.state.time
                );
                self.state.solution.copy_from(&accepted);
                self.state.old_solution.copy_from(&accepted);
                delta = proposal;
                if delta < config.min_step {
                    return Err(Error::TimestepTooSmall {
                        time,
                        delta,
                        minimum: config.min_step,
                    });
                }
                continue;
            }

            time = self.state.time;
            accepted.copy_from(&self.state.solution);
            self.accept_point(time, on_breakpoint);
            result.time.push(time);
            result.solutions.push(accepted.clone());
            if !on_point(time, &accepted) {
                return Ok(result);
            }

            delta = if on_breakpoint {
                self.breakpoints.clear(time);
                config.initial_step
            } else {
                proposal.min(delta * config.max_growth)
            };
        }

        Ok(result)
    }

    /// Commit the candidate point: notify behaviors (history recording,
    /// breakpoint scheduling) and rotate the integration history.
    fn accept_point(&mut self, time: f64, on_breakpoint: bool) {
        let mut ctx = AcceptContext {
            time,
            on_breakpoint,
            breakpoints: &mut self.breakpoints,
            solution: &self.state.solution,
        };
        self.container.accept_all(&mut ctx);
        self.pool.accept();
    }
}
