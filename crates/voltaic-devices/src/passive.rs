//! Passive two-terminal devices: resistor, capacitor, inductor.

use num_complex::Complex;
use voltaic_core::{
    Behavior, BranchId, ComplexState, DependencyKey, Error, MatrixElement, NodeId, NoiseDensity,
    NoiseSource, Provider, RealState, Result, SparseMatrix, StateDerivative, StatePool, Variables,
};

/// Resistances below this clamp to a fixed large conductance instead of
/// producing an unbounded or infinite stamp.
const MIN_RESISTANCE: f64 = 1e-12;

pub(crate) fn check_pins(name: &str, expected: usize, pins: &[NodeId]) -> Result<()> {
    if pins.len() != expected {
        return Err(Error::Config(format!(
            "{name}: expected {expected} pins, got {}",
            pins.len()
        )));
    }
    Ok(())
}

/// A linear resistor.
///
/// The resistance is either given directly or fetched from a
/// [`ResistorModel`] published under the model's name.
pub struct Resistor {
    name: String,
    resistance: f64,
    model: Option<String>,
    conductance: f64,
    nodes: [NodeId; 2],
    elements: [MatrixElement; 4],
    c_elements: [MatrixElement; 4],
}

impl Resistor {
    pub fn new(name: impl Into<String>, resistance: f64) -> Self {
        Self {
            name: name.into(),
            resistance,
            model: None,
            conductance: 0.0,
            nodes: [NodeId::GROUND; 2],
            elements: [MatrixElement::TRASHCAN; 4],
            c_elements: [MatrixElement::TRASHCAN; 4],
        }
    }

    /// Resistor taking its resistance from a named model.
    pub fn with_model(name: impl Into<String>, model: impl Into<String>) -> Self {
        let mut r = Self::new(name, 0.0);
        r.model = Some(model.into());
        r
    }

    /// The resolved conductance (valid after setup).
    pub fn conductance(&self) -> f64 {
        self.conductance
    }
}

fn pair_elements<T: nalgebra::ComplexField + Copy>(
    matrix: &mut SparseMatrix<T>,
    p: usize,
    n: usize,
) -> [MatrixElement; 4] {
    [
        matrix.get_element(p, p),
        matrix.get_element(p, n),
        matrix.get_element(n, p),
        matrix.get_element(n, n),
    ]
}

impl Behavior for Resistor {
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

    fn requires(&self) -> Vec<DependencyKey> {
        match &self.model {
            Some(m) => vec![DependencyKey::new(m.clone(), "resistance")],
            None => Vec::new(),
        }
    }

    fn setup(&mut self, _vars: &mut Variables, provider: &mut Provider) -> Result<()> {
        let r = match &self.model {
            Some(m) => *provider.get::<f64>(m, "resistance")?,
            None => self.resistance,
        };
        self.conductance = if r.abs() < MIN_RESISTANCE {
            log::warn!("{}: resistance {r:.3e} clamped", self.name);
            1.0 / MIN_RESISTANCE
        } else {
            1.0 / r
        };
        Ok(())
    }

    fn get_matrix_pointers(&mut self, _vars: &Variables, matrix: &mut SparseMatrix<f64>) {
        self.elements = pair_elements(matrix, self.nodes[0].index(), self.nodes[1].index());
    }

    fn load(&mut self, _state: &mut RealState, matrix: &mut SparseMatrix<f64>) {
        let g = self.conductance;
        matrix.add(self.elements[0], g);
        matrix.sub(self.elements[1], g);
        matrix.sub(self.elements[2], g);
        matrix.add(self.elements[3], g);
    }

    fn get_complex_pointers(&mut self, _vars: &Variables, matrix: &mut SparseMatrix<Complex<f64>>) {
        self.c_elements = pair_elements(matrix, self.nodes[0].index(), self.nodes[1].index());
    }

    fn frequency_load(&mut self, _state: &mut ComplexState, matrix: &mut SparseMatrix<Complex<f64>>) {
        let g = Complex::new(self.conductance, 0.0);
        matrix.add(self.c_elements[0], g);
        matrix.sub(self.c_elements[1], g);
        matrix.sub(self.c_elements[2], g);
        matrix.add(self.c_elements[3], g);
    }

    fn noise_sources(&self) -> Vec<NoiseSource> {
        vec![NoiseSource::new(
            self.name.clone(),
            self.nodes[0],
            self.nodes[1],
            NoiseDensity::Thermal {
                conductance: self.conductance,
            },
        )]
    }

    fn unsetup(&mut self) {
        self.elements = [MatrixElement::TRASHCAN; 4];
        self.c_elements = [MatrixElement::TRASHCAN; 4];
    }
}

/// A resistance model shared by several resistors. Zero pins; exists only to
/// publish its value into the dependency provider during setup.
pub struct ResistorModel {
    name: String,
    resistance: f64,
}

impl ResistorModel {
    pub fn new(name: impl Into<String>, resistance: f64) -> Self {
        Self {
            name: name.into(),
            resistance,
        }
    }
}

impl Behavior for ResistorModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn pin_count(&self) -> usize {
        0
    }

    fn connect(&mut self, pins: &[NodeId]) -> Result<()> {
        check_pins(&self.name, 0, pins)
    }

    fn provides(&self) -> Vec<DependencyKey> {
        vec![DependencyKey::new(self.name.clone(), "resistance")]
    }

    fn setup(&mut self, _vars: &mut Variables, provider: &mut Provider) -> Result<()> {
        provider.publish(
            DependencyKey::new(self.name.clone(), "resistance"),
            self.resistance,
        );
        Ok(())
    }

    fn get_matrix_pointers(&mut self, _vars: &Variables, _matrix: &mut SparseMatrix<f64>) {}

    fn load(&mut self, _state: &mut RealState, _matrix: &mut SparseMatrix<f64>) {}

    fn unsetup(&mut self) {}
}

/// A linear capacitor, `i = C dv/dt`.
///
/// Open at DC; in transient analysis the stored charge is integrated into a
/// conductance/current companion model.
pub struct Capacitor {
    name: String,
    capacitance: f64,
    nodes: [NodeId; 2],
    elements: [MatrixElement; 4],
    c_elements: [MatrixElement; 4],
    charge: Option<StateDerivative>,
}

impl Capacitor {
    pub fn new(name: impl Into<String>, capacitance: f64) -> Self {
        Self {
            name: name.into(),
            capacitance,
            nodes: [NodeId::GROUND; 2],
            elements: [MatrixElement::TRASHCAN; 4],
            c_elements: [MatrixElement::TRASHCAN; 4],
            charge: None,
        }
    }

    fn voltage(&self, state: &RealState) -> f64 {
        state.solution[self.nodes[0].index()] - state.solution[self.nodes[1].index()]
    }
}

impl Behavior for Capacitor {
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

    fn get_matrix_pointers(&mut self, _vars: &Variables, matrix: &mut SparseMatrix<f64>) {
        self.elements = pair_elements(matrix, self.nodes[0].index(), self.nodes[1].index());
    }

    fn load(&mut self, _state: &mut RealState, _matrix: &mut SparseMatrix<f64>) {
        // Open at DC; the transient hook carries the companion model.
    }

    fn create_states(&mut self, pool: &mut StatePool) {
        self.charge = Some(pool.create_derivative());
    }

    fn get_dc_state(&mut self, state: &RealState, pool: &mut StatePool) {
        if let Some(q) = self.charge {
            pool.set_current(q, self.capacitance * self.voltage(state));
        }
    }

    fn transient(&mut self, state: &mut RealState, matrix: &mut SparseMatrix<f64>, pool: &mut StatePool) {
        let Some(q) = self.charge else { return };
        let v = self.voltage(state);
        pool.set_current(q, self.capacitance * v);
        pool.integrate(q);
        let geq = pool.jacobian(q, self.capacitance);
        let ieq = pool.rhs_current(q, geq, v);

        matrix.add(self.elements[0], geq);
        matrix.sub(self.elements[1], geq);
        matrix.sub(self.elements[2], geq);
        matrix.add(self.elements[3], geq);
        state.rhs[self.nodes[0].index()] -= ieq;
        state.rhs[self.nodes[1].index()] += ieq;
    }

    fn truncate(&self, pool: &StatePool, timestep: &mut f64) {
        if let Some(q) = self.charge {
            pool.truncate(q, timestep);
        }
    }

    fn get_complex_pointers(&mut self, _vars: &Variables, matrix: &mut SparseMatrix<Complex<f64>>) {
        self.c_elements = pair_elements(matrix, self.nodes[0].index(), self.nodes[1].index());
    }

    fn frequency_load(&mut self, state: &mut ComplexState, matrix: &mut SparseMatrix<Complex<f64>>) {
        let y = state.laplace * self.capacitance;
        matrix.add(self.c_elements[0], y);
        matrix.sub(self.c_elements[1], y);
        matrix.sub(self.c_elements[2], y);
        matrix.add(self.c_elements[3], y);
    }

    fn unsetup(&mut self) {
        self.elements = [MatrixElement::TRASHCAN; 4];
        self.c_elements = [MatrixElement::TRASHCAN; 4];
        self.charge = None;
    }
}

/// A linear inductor, `v = L di/dt`, carrying its own branch-current
/// equation. A short at DC.
pub struct Inductor {
    name: String,
    inductance: f64,
    nodes: [NodeId; 2],
    branch: Option<BranchId>,
    branch_row: usize,
    // (p,b), (n,b), (b,p), (b,n), (b,b)
    elements: [MatrixElement; 5],
    c_elements: [MatrixElement; 5],
    flux: Option<StateDerivative>,
}

impl Inductor {
    pub fn new(name: impl Into<String>, inductance: f64) -> Self {
        Self {
            name: name.into(),
            inductance,
            nodes: [NodeId::GROUND; 2],
            branch: None,
            branch_row: 0,
            elements: [MatrixElement::TRASHCAN; 5],
            c_elements: [MatrixElement::TRASHCAN; 5],
            flux: None,
        }
    }

    /// Unknown index of the inductor current (valid after matrix pointers
    /// are acquired).
    pub fn current_index(&self) -> usize {
        self.branch_row
    }
}

fn branch_elements<T: nalgebra::ComplexField + Copy>(
    matrix: &mut SparseMatrix<T>,
    p: usize,
    n: usize,
    b: usize,
) -> [MatrixElement; 5] {
    [
        matrix.get_element(p, b),
        matrix.get_element(n, b),
        matrix.get_element(b, p),
        matrix.get_element(b, n),
        matrix.get_element(b, b),
    ]
}

impl Behavior for Inductor {
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
            self.elements = branch_elements(
                matrix,
                self.nodes[0].index(),
                self.nodes[1].index(),
                self.branch_row,
            );
        }
    }

    fn load(&mut self, _state: &mut RealState, matrix: &mut SparseMatrix<f64>) {
        matrix.add(self.elements[0], 1.0);
        matrix.sub(self.elements[1], 1.0);
        matrix.add(self.elements[2], 1.0);
        matrix.sub(self.elements[3], 1.0);
        // At DC the branch equation is v_p - v_n = 0; the transient hook
        // adds the L di/dt term.
    }

    fn create_states(&mut self, pool: &mut StatePool) {
        self.flux = Some(pool.create_derivative());
    }

    fn get_dc_state(&mut self, state: &RealState, pool: &mut StatePool) {
        if let Some(f) = self.flux {
            pool.set_current(f, self.inductance * state.solution[self.branch_row]);
        }
    }

    fn transient(&mut self, state: &mut RealState, matrix: &mut SparseMatrix<f64>, pool: &mut StatePool) {
        let Some(f) = self.flux else { return };
        let i = state.solution[self.branch_row];
        pool.set_current(f, self.inductance * i);
        pool.integrate(f);
        let req = pool.jacobian(f, self.inductance);
        let veq = pool.rhs_current(f, req, i);

        matrix.sub(self.elements[4], req);
        state.rhs[self.branch_row] += veq;
    }

    fn truncate(&self, pool: &StatePool, timestep: &mut f64) {
        if let Some(f) = self.flux {
            pool.truncate(f, timestep);
        }
    }

    fn get_complex_pointers(&mut self, vars: &Variables, matrix: &mut SparseMatrix<Complex<f64>>) {
        if let Some(b) = self.branch {
            self.c_elements = branch_elements(
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
        matrix.sub(self.c_elements[4], state.laplace * self.inductance);
    }

    fn unsetup(&mut self) {
        self.branch = None;
        self.elements = [MatrixElement::TRASHCAN; 5];
        self.c_elements = [MatrixElement::TRASHCAN; 5];
        self.flux = None;
    }
}
