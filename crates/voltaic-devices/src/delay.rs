//! Ideal voltage delay: the output port reproduces the input port voltage
//! `delay` seconds in the past.
//!
//! The output is a controlled voltage source with its own branch equation.
//! During transient analysis the source value is interpolated from the
//! recorded input history; edges arriving at the output are announced ahead
//! of time as breakpoints so the integrator does not step over them. At DC
//! the element degenerates to a unity-gain coupling, and in the frequency
//! domain to the transfer factor `exp(-s*T)`.

use num_complex::Complex;
use voltaic_core::{
    AcceptContext, AnalysisMode, Behavior, BranchId, ComplexState, Error, MatrixElement, NodeId,
    Provider, RealState, Result, SparseMatrix, Variables,
};

use crate::passive::check_pins;

pub struct VoltageDelay {
    name: String,
    delay: f64,
    // in_p, in_n, out_p, out_n
    nodes: [NodeId; 4],
    branch: Option<BranchId>,
    branch_row: usize,
    // (outp,b), (outn,b), (b,outp), (b,outn), (b,inp), (b,inn)
    elements: [MatrixElement; 6],
    c_elements: [MatrixElement; 6],
    /// Accepted input samples (time, voltage), monotone in time.
    history: Vec<(f64, f64)>,
}

impl VoltageDelay {
    pub fn new(name: impl Into<String>, delay: f64) -> Self {
        Self {
            name: name.into(),
            delay,
            nodes: [NodeId::GROUND; 4],
            branch: None,
            branch_row: 0,
            elements: [MatrixElement::TRASHCAN; 6],
            c_elements: [MatrixElement::TRASHCAN; 6],
            history: Vec::new(),
        }
    }

    fn input_voltage(&self, solution: &nalgebra::DVector<f64>) -> f64 {
        solution[self.nodes[0].index()] - solution[self.nodes[1].index()]
    }

    /// Input voltage at `time`, from the recorded history. Clamps to the
    /// first sample before the recording started and to the last sample
    /// beyond it.
    fn delayed_voltage(&self, time: f64) -> f64 {
        match self.history.as_slice() {
            [] => 0.0,
            [(t0, v0), ..] if time <= *t0 => *v0,
            samples => {
                for pair in samples.windows(2) {
                    let (t0, v0) = pair[0];
                    let (t1, v1) = pair[1];
                    if time <= t1 {
                        return v0 + (v1 - v0) * (time - t0) / (t1 - t0);
                    }
                }
                samples[samples.len() - 1].1
            }
        }
    }
}

impl Behavior for VoltageDelay {
    fn name(&self) -> &str {
        &self.name
    }

    fn pin_count(&self) -> usize {
        4
    }

    fn connect(&mut self, pins: &[NodeId]) -> Result<()> {
        check_pins(&self.name, 4, pins)?;
        self.nodes = [pins[0], pins[1], pins[2], pins[3]];
        Ok(())
    }

    fn setup(&mut self, vars: &mut Variables, _provider: &mut Provider) -> Result<()> {
        if self.delay <= 0.0 {
            return Err(Error::Config(format!(
                "{}: delay must be positive",
                self.name
            )));
        }
        self.branch = Some(vars.alloc_branch());
        self.history.clear();
        Ok(())
    }

    fn get_matrix_pointers(&mut self, vars: &Variables, matrix: &mut SparseMatrix<f64>) {
        let Some(b) = self.branch else { return };
        self.branch_row = vars.branch_index(b);
        let (inp, inn) = (self.nodes[0].index(), self.nodes[1].index());
        let (outp, outn) = (self.nodes[2].index(), self.nodes[3].index());
        self.elements = [
            matrix.get_element(outp, self.branch_row),
            matrix.get_element(outn, self.branch_row),
            matrix.get_element(self.branch_row, outp),
            matrix.get_element(self.branch_row, outn),
            matrix.get_element(self.branch_row, inp),
            matrix.get_element(self.branch_row, inn),
        ];
    }

    fn load(&mut self, state: &mut RealState, matrix: &mut SparseMatrix<f64>) {
        matrix.add(self.elements[0], 1.0);
        matrix.sub(self.elements[1], 1.0);
        matrix.add(self.elements[2], 1.0);
        matrix.sub(self.elements[3], 1.0);
        match state.mode {
            AnalysisMode::Dc => {
                // V(out) = V(in): the delay has no effect on the bias point.
                matrix.sub(self.elements[4], 1.0);
                matrix.add(self.elements[5], 1.0);
            }
            AnalysisMode::Transient => {
                state.rhs[self.branch_row] += self.delayed_voltage(state.time - self.delay);
            }
        }
    }

    fn accept(&mut self, ctx: &mut AcceptContext<'_>) {
        self.history.push((ctx.time, self.input_voltage(ctx.solution)));
        // Whatever made this point mandatory reaches the output one delay
        // later.
        if ctx.on_breakpoint {
            ctx.breakpoints.set_breakpoint(ctx.time + self.delay);
        }
    }

    fn get_complex_pointers(&mut self, vars: &Variables, matrix: &mut SparseMatrix<Complex<f64>>) {
        let Some(b) = self.branch else { return };
        let row = vars.branch_index(b);
        let (inp, inn) = (self.nodes[0].index(), self.nodes[1].index());
        let (outp, outn) = (self.nodes[2].index(), self.nodes[3].index());
        self.c_elements = [
            matrix.get_element(outp, row),
            matrix.get_element(outn, row),
            matrix.get_element(row, outp),
            matrix.get_element(row, outn),
            matrix.get_element(row, inp),
            matrix.get_element(row, inn),
        ];
    }

    fn frequency_load(&mut self, state: &mut ComplexState, matrix: &mut SparseMatrix<Complex<f64>>) {
        let one = Complex::new(1.0, 0.0);
        let transfer = (-state.laplace * self.delay).exp();
        matrix.add(self.c_elements[0], one);
        matrix.sub(self.c_elements[1], one);
        matrix.add(self.c_elements[2], one);
        matrix.sub(self.c_elements[3], one);
        matrix.sub(self.c_elements[4], transfer);
        matrix.add(self.c_elements[5], transfer);
    }

    fn unsetup(&mut self) {
        self.branch = None;
        self.elements = [MatrixElement::TRASHCAN; 6];
        self.c_elements = [MatrixElement::TRASHCAN; 6];
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delayed_voltage_interpolates() {
        let mut d = VoltageDelay::new("T1", 1e-6);
        d.history = vec![(0.0, 0.0), (1e-6, 1.0), (2e-6, 1.0)];
        assert_eq!(d.delayed_voltage(-1.0), 0.0);
        assert!((d.delayed_voltage(0.5e-6) - 0.5).abs() < 1e-12);
        assert_eq!(d.delayed_voltage(1.5e-6), 1.0);
        assert_eq!(d.delayed_voltage(9e-6), 1.0);
    }
}
