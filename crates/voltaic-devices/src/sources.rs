//! Independent and controlled sources.

use num_complex::Complex;
use voltaic_core::{
    AcceptContext, Behavior, BranchId, ComplexState, MatrixElement, NodeId, Provider, RealState,
    Result, SparseMatrix, Variables,
};

use crate::passive::check_pins;
use crate::waveforms::Waveform;

/// Small-signal excitation of an independent source.
#[derive(Debug, Clone, Copy)]
pub struct AcExcitation {
    /// Magnitude.
    pub magnitude: f64,
    /// Phase in degrees.
    pub phase: f64,
}

impl AcExcitation {
    pub fn new(magnitude: f64, phase: f64) -> Self {
        Self { magnitude, phase }
    }

    fn phasor(&self) -> Complex<f64> {
        Complex::from_polar(self.magnitude, self.phase.to_radians())
    }
}

/// An independent voltage source with its own branch-current equation.
pub struct VoltageSource {
    name: String,
    waveform: Waveform,
    ac: Option<AcExcitation>,
    nodes: [NodeId; 2],
    branch: Option<BranchId>,
    branch_row: usize,
    // (p,b), (n,b), (b,p), (b,n)
    elements: [MatrixElement; 4],
    c_elements: [MatrixElement; 4],
}

impl VoltageSource {
    pub fn new(name: impl Into<String>, waveform: Waveform) -> Self {
        Self {
            name: name.into(),
            waveform,
            ac: None,
            nodes: [NodeId::GROUND; 2],
            branch: None,
            branch_row: 0,
            elements: [MatrixElement::TRASHCAN; 4],
            c_elements: [MatrixElement::TRASHCAN; 4],
        }
    }

    pub fn dc(name: impl Into<String>, voltage: f64) -> Self {
        Self::new(name, Waveform::dc(voltage))
    }

    /// Attach a small-signal excitation for AC analysis.
    pub fn with_ac(mut self, ac: AcExcitation) -> Self {
        self.ac = Some(ac);
        self
    }

    /// Unknown index of the source current (valid after matrix pointers are
    /// acquired).
    pub fn current_index(&self) -> usize {
        self.branch_row
    }
}

fn source_elements<T: nalgebra::ComplexField + Copy>(
    matrix: &mut SparseMatrix<T>,
    p: usize,
    n: usize,
    b: usize,
) -> [MatrixElement; 4] {
    [
        matrix.get_element(p, b),
        matrix.get_element(n, b),
        matrix.get_element(b, p),
        matrix.get_element(b, n),
    ]
}

impl Behavior for VoltageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn pin_count(&self) -> usize {
        2
    }

    fn connect(&mut self, pins: &[NodeId]) -> Result<()> {
        check_pins(&self.name, 2, pins)?;
        self.nodes = [pins[0], pins[1]];
        Ok(())
    }

    fn setup(&mut self, vars: &mut Variables, _provider: &mut Provider) -> Result<()> {
        self.branch = Some(vars.alloc_branch());
        Ok(())
    }

    fn get_matrix_pointers(&mut self, vars: &Variables, matrix: &mut SparseMatrix<f64>) {
        if let Some(b) = self.branch {
            self.branch_row = vars.branch_index(b);
            self.elements = source_elements(
                matrix,
                self.nodes[0].index(),
                self.nodes[1].index(),
                self.branch_row,
            );
        }
    }

    fn load(&mut self, state: &mut RealState, matrix: &mut SparseMatrix<f64>) {
        matrix.add(self.elements[0], 1.0);
        matrix.sub(self.elements[1], 1.0);
        matrix.add(self.elements[2], 1.0);
        matrix.sub(self.elements[3], 1.0);
        state.rhs[self.branch_row] += self.waveform.value_at(state.time) * state.source_factor;
    }

    fn accept(&mut self, ctx: &mut AcceptContext<'_>) {
        if let Some(corner) = self.waveform.next_corner(ctx.time) {
            ctx.breakpoints.set_breakpoint(corner);
        }
    }

    fn get_complex_pointers(&mut self, vars: &Variables, matrix: &mut SparseMatrix<Complex<f64>>) {
        if let Some(b) = self.branch {
            self.c_elements = source_elements(
                matrix,
                self.nodes[0].index(),
                self.nodes[1].index(),
                vars.branch_index(b),
            );
        }
    }

    fn frequency_load(&mut self, state: &mut ComplexState, matrix: &mut SparseMatrix<Complex<f64>>) {
        let one = Complex::new(1.0, 0.0);
        matrix.add(self.c_elements[0], one);
        matrix.sub(self.c_elements[1], one);
        matrix.add(self.c_elements[2], one);
        matrix.sub(self.c_elements[3], one);
        if let Some(ac) = self.ac {
            state.rhs[self.branch_row] += ac.phasor();
        }
    }

    fn unsetup(&mut self) {
        self.branch = None;
        self.elements = [MatrixElement::TRASHCAN; 4];
        self.c_elements = [MatrixElement::TRASHCAN; 4];
    }
}

/// An independent current source. Positive current flows from the positive
/// terminal through the source to the negative terminal.
pub struct CurrentSource {
    name: String,
    waveform: Waveform,
    ac: Option<AcExcitation>,
    nodes: [NodeId; 2],
}

impl CurrentSource {
    pub fn new(name: impl Into<String>, waveform: Waveform) -> Self {
        Self {
            name: name.into(),
            waveform,
            ac: None,
            nodes: [NodeId::GROUND; 2],
        }
    }

    pub fn dc(name: impl Into<String>, current: f64) -> Self {
        Self::new(name, Waveform::dc(current))
    }

    pub fn with_ac(mut self, ac: AcExcitation) -> Self {
        self.ac = Some(ac);
        self
    }
}

impl Behavior for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn pin_count(&self) -> usize {
        2
    }

    fn connect(&mut self, pins: &[NodeId]) -> Result<()> {
        check_pins(&self.name, 2, pins)?;
        self.nodes = [pins[0], pins[1]];
        Ok(())
    }

    fn get_matrix_pointers(&mut self, _vars: &Variables, _matrix: &mut SparseMatrix<f64>) {}

    fn load(&mut self, state: &mut RealState, _matrix: &mut SparseMatrix<f64>) {
        let i = self.waveform.value_at(state.time) * state.source_factor;
        state.rhs[self.nodes[0].index()] -= i;
        state.rhs[self.nodes[1].index()] += i;
    }

    fn accept(&mut self, ctx: &mut AcceptContext<'_>) {
        if let Some(corner) = self.waveform.next_corner(ctx.time) {
            ctx.breakpoints.set_breakpoint(corner);
        }
    }

    fn frequency_load(&mut self, state: &mut ComplexState, _matrix: &mut SparseMatrix<Complex<f64>>) {
        if let Some(ac) = self.ac {
            let i = ac.phasor();
            state.rhs[self.nodes[0].index()] -= i;
            state.rhs[self.nodes[1].index()] += i;
        }
    }

    fn unsetup(&mut self) {}
}

/// A voltage-controlled current source: `i = gm * (V(cp) - V(cn))` injected
/// from the positive output terminal to the negative one.
pub struct Vccs {
    name: String,
    gm: f64,
    // out_p, out_n, ctrl_p, ctrl_n
    nodes: [NodeId; 4],
    elements: [MatrixElement; 4],
    c_elements: [MatrixElement; 4],
}

impl Vccs {
    pub fn new(name: impl Into<String>, gm: f64) -> Self {
        Self {
            name: name.into(),
            gm,
            nodes: [NodeId::GROUND; 4],
            elements: [MatrixElement::TRASHCAN; 4],
            c_elements: [MatrixElement::TRASHCAN; 4],
        }
    }
}

fn vccs_elements<T: nalgebra::ComplexField + Copy>(
    matrix: &mut SparseMatrix<T>,
    nodes: &[NodeId; 4],
) -> [MatrixElement; 4] {
    let (p, n) = (nodes[0].index(), nodes[1].index());
    let (cp, cn) = (nodes[2].index(), nodes[3].index());
    [
        matrix.get_element(p, cp),
        matrix.get_element(p, cn),
        matrix.get_element(n, cp),
        matrix.get_element(n, cn),
    ]
}

impl Behavior for Vccs {
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

    fn get_matrix_pointers(&mut self, _vars: &Variables, matrix: &mut SparseMatrix<f64>) {
        self.elements = vccs_elements(matrix, &self.nodes);
    }

    fn load(&mut self, _state: &mut RealState, matrix: &mut SparseMatrix<f64>) {
        matrix.add(self.elements[0], self.gm);
        matrix.sub(self.elements[1], self.gm);
        matrix.sub(self.elements[2], self.gm);
        matrix.add(self.elements[3], self.gm);
    }

    fn get_complex_pointers(&mut self, _vars: &Variables, matrix: &mut SparseMatrix<Complex<f64>>) {
        self.c_elements = vccs_elements(matrix, &self.nodes);
    }

    fn frequency_load(&mut self, _state: &mut ComplexState, matrix: &mut SparseMatrix<Complex<f64>>) {
        let gm = Complex::new(self.gm, 0.0);
        matrix.add(self.c_elements[0], gm);
        matrix.sub(self.c_elements[1], gm);
        matrix.sub(self.c_elements[2], gm);
        matrix.add(self.c_elements[3], gm);
    }

    fn unsetup(&mut self) {
        self.elements = [MatrixElement::TRASHCAN; 4];
        self.c_elements = [MatrixElement::TRASHCAN; 4];
    }
}
