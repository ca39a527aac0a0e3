//! Integration states for transient analysis.
//!
//! Reactive behaviors allocate a [`StateDerivative`] per charge/flux at setup
//! and a [`StateHistory`] per quantity that only needs past values. The
//! [`StatePool`] owns the shared history storage and the coefficients of the
//! active multistep method; `integrate` must be called exactly once per Newton
//! iteration before the derivative or Jacobian contribution is read.

/// Numerical integration method for transient analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Backward Euler (first order, A-stable).
    BackwardEuler,
    /// Trapezoidal (second order, A-stable).
    #[default]
    Trapezoidal,
}

impl Method {
    /// Order of the local truncation error estimate.
    pub fn order(self) -> usize {
        match self {
            Method::BackwardEuler => 1,
            Method::Trapezoidal => 2,
        }
    }
}

/// Depth of the shared history ring: the current point plus three accepted
/// timepoints, enough for the order-2 truncation estimate.
pub const HISTORY_DEPTH: usize = 4;

/// Handle to a derivative-bearing reactive state (value + derivative slots).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDerivative(usize);

/// Handle to a plain history state (value slot only, no integration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHistory(usize);

/// Tolerances of the local truncation error estimate.
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    /// Relative charge tolerance.
    pub reltol: f64,
    /// Absolute charge tolerance (chgtol).
    pub chgtol: f64,
    /// Truncation error overestimation factor (trtol).
    pub trtol: f64,
    /// Integration method.
    pub method: Method,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            reltol: 1e-3,
            chgtol: 1e-14,
            trtol: 7.0,
            method: Method::Trapezoidal,
        }
    }
}

/// Pool of integration states for one analysis run.
///
/// Storage layout: `history[k][slot]` is the value of `slot` at `k` accepted
/// steps in the past (`k = 0` is the candidate point being solved).
#[derive(Debug)]
pub struct StatePool {
    config: IntegrationConfig,
    num_slots: usize,
    history: Vec<Vec<f64>>,
    deltas: [f64; HISTORY_DEPTH],
    /// Leading integration coefficient of the active method (1/h for
    /// backward Euler, 2/h for trapezoidal).
    ag0: f64,
    built: bool,
}

impl StatePool {
    pub fn new(config: IntegrationConfig) -> Self {
        Self {
            config,
            num_slots: 0,
            history: Vec::new(),
            deltas: [0.0; HISTORY_DEPTH],
            ag0: 0.0,
            built: false,
        }
    }

    /// The active integration method.
    pub fn method(&self) -> Method {
        self.config.method
    }

    /// Allocate a derivative-bearing state. Called from behavior
    /// `create_states`, before the pool is built.
    pub fn create_derivative(&mut self) -> StateDerivative {
        debug_assert!(!self.built, "states must be created before the pool is built");
        let slot = self.num_slots;
        self.num_slots += 2;
        StateDerivative(slot)
    }

    /// Allocate a history-only state.
    pub fn create_history(&mut self) -> StateHistory {
        debug_assert!(!self.built, "states must be created before the pool is built");
        let slot = self.num_slots;
        self.num_slots += 1;
        StateHistory(slot)
    }

    /// Allocate the history storage once all states are created.
    pub fn build(&mut self) {
        self.history = (0..HISTORY_DEPTH).map(|_| vec![0.0; self.num_slots]).collect();
        self.built = true;
    }

    /// Number of allocated slots.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Fill all history columns with the current values and seed the delta
    /// history. Called once after the DC state is computed at t = 0.
    pub fn initialize(&mut self, delta: f64) {
        let current = self.history[0].clone();
        for k in 1..HISTORY_DEPTH {
            self.history[k].copy_from_slice(&current);
        }
        self.deltas = [delta; HISTORY_DEPTH];
        self.set_delta(delta);
    }

    /// Set the candidate timestep and recompute the method coefficients.
    pub fn set_delta(&mut self, delta: f64) {
        self.deltas[0] = delta;
        self.ag0 = match self.config.method {
            Method::BackwardEuler => 1.0 / delta,
            Method::Trapezoidal => 2.0 / delta,
        };
    }

    /// The candidate timestep.
    pub fn delta(&self) -> f64 {
        self.deltas[0]
    }

    /// Accept the candidate point: rotate histories and record the delta.
    /// The current values remain in place as the starting point of the next
    /// step.
    pub fn accept(&mut self) {
        for k in (1..HISTORY_DEPTH).rev() {
            let (front, back) = self.history.split_at_mut(k);
            back[0].copy_from_slice(&front[k - 1]);
        }
        for k in (1..HISTORY_DEPTH).rev() {
            self.deltas[k] = self.deltas[k - 1];
        }
    }

    // --- derivative states ---

    /// Set the current value of a derivative state (e.g. the charge at the
    /// present iterate).
    pub fn set_current(&mut self, d: StateDerivative, value: f64) {
        self.history[0][d.0] = value;
    }

    /// Current value of a derivative state.
    pub fn current(&self, d: StateDerivative) -> f64 {
        self.history[0][d.0]
    }

    /// Value of a derivative state `k` accepted steps ago.
    pub fn previous(&self, d: StateDerivative, k: usize) -> f64 {
        self.history[k][d.0]
    }

    /// Integrate the state: compute its time derivative at the candidate
    /// point from the current value and the history, using the active
    /// method's coefficients. Must be called once per Newton iteration
    /// before [`Self::jacobian`], [`Self::derivative`] or
    /// [`Self::rhs_current`].
    pub fn integrate(&mut self, d: StateDerivative) {
        let q0 = self.history[0][d.0];
        let q1 = self.history[1][d.0];
        self.history[0][d.0 + 1] = match self.config.method {
            Method::BackwardEuler => self.ag0 * (q0 - q1),
            Method::Trapezoidal => self.ag0 * (q0 - q1) - self.history[1][d.0 + 1],
        };
    }

    /// Jacobian contribution of the integrated state: the equivalent
    /// conductance `geq = ag0 * dQ/dV`.
    pub fn jacobian(&self, _d: StateDerivative, cap: f64) -> f64 {
        self.ag0 * cap
    }

    /// The computed time derivative (equivalent current through the
    /// reactive element).
    pub fn derivative(&self, d: StateDerivative) -> f64 {
        self.history[0][d.0 + 1]
    }

    /// Equivalent RHS current linearizing the charge around the iterate:
    /// `ieq = dQ/dt - geq * v`.
    pub fn rhs_current(&self, d: StateDerivative, geq: f64, v: f64) -> f64 {
        self.derivative(d) - geq * v
    }

    /// Lower `timestep` so the local truncation error of this state stays
    /// within tolerance.
    ///
    /// The error is estimated from divided differences of the stored values:
    /// `h^2 |q''| / 2` for backward Euler and `h^3 |q'''| / 12` for
    /// trapezoidal, against `trtol * (reltol * max|q| + chgtol)`.
    pub fn truncate(&self, d: StateDerivative, timestep: &mut f64) {
        let q = |k: usize| self.history[k][d.0];
        let tol = self.config.reltol * q(0).abs().max(q(1).abs()) + self.config.chgtol;
        let budget = self.config.trtol * tol;

        let d0 = self.deltas[0];
        let d1 = self.deltas[1];
        let dd1a = (q(0) - q(1)) / d0;
        let dd1b = (q(1) - q(2)) / d1;
        let dd2 = (dd1a - dd1b) / (d0 + d1);

        let del = match self.config.method {
            Method::BackwardEuler => {
                // lte ~ h^2 * |dd2|  (q'' = 2 * dd2, factor 1/2)
                if dd2.abs() < 1e-30 {
                    return;
                }
                (budget / dd2.abs()).sqrt()
            }
            Method::Trapezoidal => {
                let d2 = self.deltas[2];
                let dd1c = (q(2) - q(3)) / d2;
                let dd2b = (dd1b - dd1c) / (d1 + d2);
                let dd3 = (dd2 - dd2b) / (d0 + d1 + d2);
                // lte ~ h^3 * |dd3| / 2  (q''' = 6 * dd3, factor 1/12)
                if dd3.abs() < 1e-30 {
                    return;
                }
                (2.0 * budget / dd3.abs()).cbrt()
            }
        };
        *timestep = timestep.min(del);
    }

    // --- history-only states ---

    /// Set the current value of a history state.
    pub fn set_history_current(&mut self, h: StateHistory, value: f64) {
        self.history[0][h.0] = value;
    }

    /// Current value of a history state.
    pub fn history_current(&self, h: StateHistory) -> f64 {
        self.history[0][h.0]
    }

    /// Value of a history state `k` accepted steps ago.
    pub fn history_previous(&self, h: StateHistory, k: usize) -> f64 {
        self.history[k][h.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(method: Method) -> StatePool {
        StatePool::new(IntegrationConfig {
            method,
            ..Default::default()
        })
    }

    #[test]
    fn test_backward_euler_derivative() {
        let mut pool = pool(Method::BackwardEuler);
        let q = pool.create_derivative();
        pool.build();

        pool.set_current(q, 1.0);
        pool.initialize(0.5);
        pool.accept();

        // q goes 1.0 -> 2.0 over h = 0.5: dq/dt = 2.0
        pool.set_delta(0.5);
        pool.set_current(q, 2.0);
        pool.integrate(q);
        assert!((pool.derivative(q) - 2.0).abs() < 1e-12);
        // geq = C/h
        assert!((pool.jacobian(q, 1e-6) - 2e-6).abs() < 1e-18);
    }

    #[test]
    fn test_trapezoidal_derivative() {
        let mut pool = pool(Method::Trapezoidal);
        let q = pool.create_derivative();
        pool.build();

        pool.set_current(q, 0.0);
        pool.initialize(1.0);
        pool.accept();

        // First step from rest: dq1 = 0, so dq0 = 2/h * (q0 - q1)
        pool.set_delta(1.0);
        pool.set_current(q, 3.0);
        pool.integrate(q);
        assert!((pool.derivative(q) - 6.0).abs() < 1e-12);

        pool.accept();
        pool.set_delta(1.0);
        pool.set_current(q, 6.0);
        pool.integrate(q);
        // dq = 2/h * (6 - 3) - 6 = 0: constant slope has settled
        assert!(pool.derivative(q).abs() < 1e-12);
    }

    #[test]
    fn test_integrate_once_per_iteration_is_stable() {
        // Re-running load in the same iteration recomputes, not accumulates.
        let mut pool = pool(Method::BackwardEuler);
        let q = pool.create_derivative();
        pool.build();
        pool.set_current(q, 0.0);
        pool.initialize(1.0);
        pool.accept();

        pool.set_current(q, 4.0);
        pool.integrate(q);
        let first = pool.derivative(q);
        pool.integrate(q);
        assert_eq!(first, pool.derivative(q));
    }

    #[test]
    fn test_truncate_flat_history_unconstrained() {
        let mut pool = pool(Method::Trapezoidal);
        let q = pool.create_derivative();
        pool.build();
        pool.set_current(q, 5.0);
        pool.initialize(1e-6);

        let mut step = 1.0;
        pool.truncate(q, &mut step);
        assert_eq!(step, 1.0, "constant charge must not limit the step");
    }

    #[test]
    fn test_truncate_limits_on_curvature() {
        let mut pool = pool(Method::BackwardEuler);
        let q = pool.create_derivative();
        pool.build();
        pool.set_current(q, 0.0);
        pool.initialize(1.0);

        // Quadratic charge: q(t) = t^2 over unit steps -> q'' = 2
        for value in [1.0, 4.0, 9.0] {
            pool.accept();
            pool.set_delta(1.0);
            pool.set_current(q, value);
        }
        let mut step = f64::INFINITY;
        pool.truncate(q, &mut step);
        assert!(step.is_finite(), "curvature must bound the step");
        assert!(step > 0.0);
    }

    #[test]
    fn test_history_state_shifts() {
        let mut pool = pool(Method::BackwardEuler);
        let h = pool.create_history();
        pool.build();
        pool.set_history_current(h, 1.0);
        pool.initialize(1.0);

        pool.accept();
        pool.set_history_current(h, 2.0);
        assert_eq!(pool.history_previous(h, 1), 1.0);
        assert_eq!(pool.history_current(h), 2.0);
    }
}
