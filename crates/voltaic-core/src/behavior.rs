//! The per-device behavior contract and its lifecycle container.
//!
//! Each device instance owns one behavior. The container drives the strict
//! lifecycle `Uninitialized -> Bound -> SetUp -> TornDown`; loading before
//! setup is a configuration error. Cross-behavior dependencies are resolved
//! by name through a [`Provider`] before simulation starts: producers declare
//! what they publish, dependents what they require, and setup runs in an
//! order that guarantees producers first.

use std::any::Any;
use std::collections::{HashMap, VecDeque};

use nalgebra::DVector;
use num_complex::Complex;

use crate::breakpoints::Breakpoints;
use crate::error::{Error, Result};
use crate::integration::StatePool;
use crate::node::{NodeId, Variables};
use crate::noise::NoiseSource;
use crate::sparse::SparseMatrix;
use crate::state::{ComplexState, RealState};

/// Name of a value exchanged between behaviors: `(entity, key)`, where the
/// entity is typically a device or model name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    pub entity: String,
    pub key: String,
}

impl DependencyKey {
    pub fn new(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            key: key.into(),
        }
    }
}

/// Dependency provider: typed values published by producer behaviors during
/// setup and fetched by dependents. Absence is a setup-time error.
#[derive(Default)]
pub struct Provider {
    values: HashMap<DependencyKey, Box<dyn Any>>,
}

impl Provider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a value under `(entity, key)`.
    pub fn publish<T: 'static>(&mut self, key: DependencyKey, value: T) {
        self.values.insert(key, Box::new(value));
    }

    /// Fetch a published value, failing with a configuration error naming
    /// the missing dependency.
    pub fn get<T: 'static>(&self, entity: &str, key: &str) -> Result<&T> {
        let dep = DependencyKey::new(entity, key);
        self.values
            .get(&dep)
            .and_then(|v| v.downcast_ref::<T>())
            .ok_or_else(|| {
                Error::Config(format!("unresolved dependency: {entity}.{key}"))
            })
    }

    fn contains(&self, key: &DependencyKey) -> bool {
        self.values.contains_key(key)
    }
}

/// Context handed to behaviors when a timepoint is accepted.
pub struct AcceptContext<'a> {
    /// The accepted simulation time.
    pub time: f64,
    /// Whether this point landed on a scheduled breakpoint.
    pub on_breakpoint: bool,
    /// Breakpoint set for scheduling upcoming discontinuities.
    pub breakpoints: &'a mut Breakpoints,
    /// The accepted solution vector (ground slot at index 0).
    pub solution: &'a DVector<f64>,
}

/// The per-device behavior contract.
///
/// Required: `connect`, `get_matrix_pointers`, `load`. Everything else is an
/// optional capability with a no-op default; a resistor implements the noise
/// hook, a capacitor the transient hooks, a source the accept hook.
pub trait Behavior {
    /// Device instance name (unique within a container).
    fn name(&self) -> &str;

    /// Terminal arity of the device archetype.
    fn pin_count(&self) -> usize;

    /// Bind the behavior to its terminal nodes. Pin count mismatch is a
    /// fatal configuration error; node indices are immutable afterwards.
    fn connect(&mut self, pins: &[NodeId]) -> Result<()>;

    /// Dependency keys this behavior publishes during setup.
    fn provides(&self) -> Vec<DependencyKey> {
        Vec::new()
    }

    /// Dependency keys this behavior requires at setup.
    fn requires(&self) -> Vec<DependencyKey> {
        Vec::new()
    }

    /// Resolve parameters and dependencies, and allocate branch equations.
    /// Producer behaviors publish into the provider here.
    fn setup(&mut self, vars: &mut Variables, provider: &mut Provider) -> Result<()> {
        let _ = (vars, provider);
        Ok(())
    }

    /// Acquire matrix element handles for the real system. Called once after
    /// all behaviors are set up and the system size is final.
    fn get_matrix_pointers(&mut self, vars: &Variables, matrix: &mut SparseMatrix<f64>);

    /// Accumulate conductance/current contributions into the acquired
    /// handles and the state RHS, using the current solution iterate.
    /// Devices apply step limiting here, transparently to the controller.
    fn load(&mut self, state: &mut RealState, matrix: &mut SparseMatrix<f64>);

    /// Allocate integration states for reactive quantities.
    fn create_states(&mut self, pool: &mut StatePool) {
        let _ = pool;
    }

    /// Seed integration states from the DC operating point at t = 0.
    fn get_dc_state(&mut self, state: &RealState, pool: &mut StatePool) {
        let _ = (state, pool);
    }

    /// Transient contribution: update reactive state, integrate, and stamp
    /// the companion model. Called after `load` in every transient Newton
    /// iteration.
    fn transient(&mut self, state: &mut RealState, matrix: &mut SparseMatrix<f64>, pool: &mut StatePool) {
        let _ = (state, matrix, pool);
    }

    /// Lower `timestep` to keep this device's local truncation error within
    /// tolerance.
    fn truncate(&self, pool: &StatePool, timestep: &mut f64) {
        let _ = (pool, timestep);
    }

    /// A timepoint was accepted: record history, schedule breakpoints for
    /// upcoming excitation corners.
    fn accept(&mut self, ctx: &mut AcceptContext<'_>) {
        let _ = ctx;
    }

    /// Linearize around the operating point for frequency-domain analysis.
    fn init_frequency(&mut self, op: &RealState) {
        let _ = op;
    }

    /// Acquire complex matrix element handles.
    fn get_complex_pointers(&mut self, vars: &Variables, matrix: &mut SparseMatrix<Complex<f64>>) {
        let _ = (vars, matrix);
    }

    /// Accumulate small-signal admittance/excitation terms at the state's
    /// Laplace point.
    fn frequency_load(&mut self, state: &mut ComplexState, matrix: &mut SparseMatrix<Complex<f64>>) {
        let _ = (state, matrix);
    }

    /// Noise sources of this device at the present operating point.
    fn noise_sources(&self) -> Vec<NoiseSource> {
        Vec::new()
    }

    /// Device-level convergence check beyond the per-unknown deltas (e.g. a
    /// junction comparing its computed and predicted currents).
    fn is_convergent(&self, state: &RealState) -> bool {
        let _ = state;
        true
    }

    /// Release all handles so a new analysis run can rebuild cleanly.
    fn unsetup(&mut self);
}

/// Lifecycle stage of one behavior instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Uninitialized,
    Bound,
    SetUp,
    TornDown,
}

struct Entry {
    stage: Stage,
    behavior: Box<dyn Behavior>,
}

/// Owns all behaviors of one analysis and drives their lifecycle in order.
#[derive(Default)]
pub struct BehaviorContainer {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
    setup_order: Vec<usize>,
}

impl BehaviorContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered behaviors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a behavior. Duplicate names are configuration errors.
    pub fn add(&mut self, behavior: Box<dyn Behavior>) -> Result<()> {
        let name = behavior.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(Error::Config(format!("duplicate device name: {name}")));
        }
        self.by_name.insert(name, self.entries.len());
        self.entries.push(Entry {
            stage: Stage::Uninitialized,
            behavior,
        });
        Ok(())
    }

    /// Bind a behavior to its terminal nodes.
    pub fn connect(&mut self, name: &str, pins: &[NodeId]) -> Result<()> {
        let idx = *self
            .by_name
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown device: {name}")))?;
        let entry = &mut self.entries[idx];
        if entry.stage != Stage::Uninitialized {
            return Err(Error::Config(format!(
                "{name}: connect called in stage {:?}",
                entry.stage
            )));
        }
        entry.behavior.connect(pins)?;
        entry.stage = Stage::Bound;
        Ok(())
    }

    /// Set up all behaviors in dependency order and record that order for
    /// the rest of the run. Unresolved or cyclic dependencies are reported
    /// here, before any solving starts.
    pub fn setup_all(&mut self, vars: &mut Variables, provider: &mut Provider) -> Result<()> {
        let order = self.resolve_setup_order(provider)?;
        log::debug!(
            "behavior setup order: {:?}",
            order
                .iter()
                .map(|&i| self.entries[i].behavior.name())
                .collect::<Vec<_>>()
        );
        for &idx in &order {
            let entry = &mut self.entries[idx];
            if entry.stage != Stage::Bound {
                return Err(Error::Config(format!(
                    "{}: setup called in stage {:?} (connect first)",
                    entry.behavior.name(),
                    entry.stage
                )));
            }
            entry.behavior.setup(vars, provider)?;
            entry.stage = Stage::SetUp;
        }
        self.setup_order = order;
        Ok(())
    }

    /// Topological order over the provides/requires graph.
    fn resolve_setup_order(&self, provider: &Provider) -> Result<Vec<usize>> {
        let mut producer: HashMap<DependencyKey, usize> = HashMap::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            for key in entry.behavior.provides() {
                producer.insert(key, idx);
            }
        }

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); self.entries.len()];
        for (idx, entry) in self.entries.iter().enumerate() {
            for key in entry.behavior.requires() {
                if let Some(&p) = producer.get(&key) {
                    if p != idx {
                        deps[idx].push(p);
                    }
                } else if !provider.contains(&key) {
                    return Err(Error::Config(format!(
                        "{}: unresolved dependency {}.{}",
                        entry.behavior.name(),
                        key.entity,
                        key.key
                    )));
                }
            }
        }

        // Kahn's algorithm, preserving registration order among ready nodes.
        let mut indegree: Vec<usize> = vec![0; self.entries.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.entries.len()];
        for (idx, d) in deps.iter().enumerate() {
            indegree[idx] = d.len();
            for &p in d {
                dependents[p].push(idx);
            }
        }
        let mut ready: VecDeque<usize> =
            (0..self.entries.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.entries.len());
        while let Some(idx) = ready.pop_front() {
            order.push(idx);
            for &dep in &dependents[idx] {
                indegree[dep] -= 1;
                if indegree[dep] == 0 {
                    ready.push_back(dep);
                }
            }
        }
        if order.len() != self.entries.len() {
            let cyclic: Vec<&str> = (0..self.entries.len())
                .filter(|i| !order.contains(i))
                .map(|i| self.entries[i].behavior.name())
                .collect();
            return Err(Error::Config(format!(
                "cyclic behavior dependencies: {}",
                cyclic.join(", ")
            )));
        }
        Ok(order)
    }

    fn check_set_up(&self, what: &str) -> Result<()> {
        for entry in &self.entries {
            if entry.stage != Stage::SetUp {
                return Err(Error::Config(format!(
                    "{}: {what} called in stage {:?} (setup first)",
                    entry.behavior.name(),
                    entry.stage
                )));
            }
        }
        Ok(())
    }

    /// Acquire real matrix handles for every behavior.
    pub fn pointers_all(&mut self, vars: &Variables, matrix: &mut SparseMatrix<f64>) -> Result<()> {
        self.check_set_up("get_matrix_pointers")?;
        for &idx in &self.setup_order {
            self.entries[idx].behavior.get_matrix_pointers(vars, matrix);
        }
        Ok(())
    }

    /// Allocate integration states for every behavior.
    pub fn create_states_all(&mut self, pool: &mut StatePool) -> Result<()> {
        self.check_set_up("create_states")?;
        for &idx in &self.setup_order {
            self.entries[idx].behavior.create_states(pool);
        }
        Ok(())
    }

    /// Run one load pass over every behavior.
    pub fn load_all(&mut self, state: &mut RealState, matrix: &mut SparseMatrix<f64>) -> Result<()> {
        self.check_set_up("load")?;
        for &idx in &self.setup_order {
            self.entries[idx].behavior.load(state, matrix);
        }
        Ok(())
    }

    /// Run one transient pass over every behavior.
    pub fn transient_all(
        &mut self,
        state: &mut RealState,
        matrix: &mut SparseMatrix<f64>,
        pool: &mut StatePool,
    ) -> Result<()> {
        self.check_set_up("transient")?;
        for &idx in &self.setup_order {
            self.entries[idx].behavior.transient(state, matrix, pool);
        }
        Ok(())
    }

    /// Seed DC integration states.
    pub fn get_dc_state_all(&mut self, state: &RealState, pool: &mut StatePool) -> Result<()> {
        self.check_set_up("get_dc_state")?;
        for &idx in &self.setup_order {
            self.entries[idx].behavior.get_dc_state(state, pool);
        }
        Ok(())
    }

    /// Fold every device's truncation bound into `timestep`.
    pub fn truncate_all(&self, pool: &StatePool, timestep: &mut f64) {
        for entry in &self.entries {
            entry.behavior.truncate(pool, timestep);
        }
    }

    /// Notify every behavior of an accepted timepoint.
    pub fn accept_all(&mut self, ctx: &mut AcceptContext<'_>) {
        for entry in &mut self.entries {
            entry.behavior.accept(ctx);
        }
    }

    /// Linearize every behavior around the operating point.
    pub fn init_frequency_all(&mut self, op: &RealState) -> Result<()> {
        self.check_set_up("init_frequency")?;
        for &idx in &self.setup_order {
            self.entries[idx].behavior.init_frequency(op);
        }
        Ok(())
    }

    /// Acquire complex matrix handles for every behavior.
    pub fn complex_pointers_all(
        &mut self,
        vars: &Variables,
        matrix: &mut SparseMatrix<Complex<f64>>,
    ) -> Result<()> {
        self.check_set_up("get_complex_pointers")?;
        for &idx in &self.setup_order {
            self.entries[idx].behavior.get_complex_pointers(vars, matrix);
        }
        Ok(())
    }

    /// Run one complex load pass over every behavior.
    pub fn frequency_load_all(
        &mut self,
        state: &mut ComplexState,
        matrix: &mut SparseMatrix<Complex<f64>>,
    ) -> Result<()> {
        self.check_set_up("frequency_load")?;
        for &idx in &self.setup_order {
            self.entries[idx].behavior.frequency_load(state, matrix);
        }
        Ok(())
    }

    /// Collect every device's noise sources.
    pub fn noise_sources_all(&self) -> Vec<NoiseSource> {
        self.entries
            .iter()
            .flat_map(|e| e.behavior.noise_sources())
            .collect()
    }

    /// True when every device-level convergence check passes.
    pub fn all_convergent(&self, state: &RealState) -> bool {
        self.entries.iter().all(|e| e.behavior.is_convergent(state))
    }

    /// Tear down every behavior, releasing all handles.
    pub fn unsetup_all(&mut self) {
        for entry in &mut self.entries {
            if entry.stage == Stage::SetUp {
                entry.behavior.unsetup();
                entry.stage = Stage::TornDown;
            }
        }
    }
}

/// Device specification consumed by catalog constructors.
#[derive(Debug, Clone, Default)]
pub struct DeviceSpec {
    pub name: String,
    pub params: HashMap<String, f64>,
    pub pins: Vec<NodeId>,
}

impl DeviceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn param(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn pins(mut self, pins: &[NodeId]) -> Self {
        self.pins = pins.to_vec();
        self
    }

    /// Fetch a required parameter, failing with a configuration error.
    pub fn require(&self, key: &str) -> Result<f64> {
        self.params.get(key).copied().ok_or_else(|| {
            Error::Config(format!("{}: missing parameter '{key}'", self.name))
        })
    }
}

/// Constructor registered for a device-kind tag.
pub type Constructor = fn(&DeviceSpec) -> Result<Box<dyn Behavior>>;

/// Registry mapping device-kind tags to behavior constructors. Populated by
/// a registration step at startup; keeps the behavior set closed while
/// staying extensible.
#[derive(Default)]
pub struct Catalog {
    constructors: HashMap<String, Constructor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `kind`.
    pub fn register(&mut self, kind: &str, ctor: Constructor) {
        self.constructors.insert(kind.to_string(), ctor);
    }

    /// Instantiate a behavior for `kind`, or fail with a configuration
    /// error for an unknown tag.
    pub fn create(&self, kind: &str, spec: &DeviceSpec) -> Result<Box<dyn Behavior>> {
        let ctor = self.constructors.get(kind).ok_or_else(|| {
            Error::Config(format!("unknown device kind: {kind}"))
        })?;
        ctor(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Producer {
        name: String,
    }

    impl Behavior for Producer {
        fn name(&self) -> &str {
            &self.name
        }
        fn pin_count(&self) -> usize {
            0
        }
        fn connect(&mut self, _pins: &[NodeId]) -> Result<()> {
            Ok(())
        }
        fn provides(&self) -> Vec<DependencyKey> {
            vec![DependencyKey::new(&self.name, "conductance")]
        }
        fn setup(&mut self, _vars: &mut Variables, provider: &mut Provider) -> Result<()> {
            provider.publish(DependencyKey::new(&self.name, "conductance"), 0.5_f64);
            Ok(())
        }
        fn get_matrix_pointers(&mut self, _vars: &Variables, _matrix: &mut SparseMatrix<f64>) {}
        fn load(&mut self, _state: &mut RealState, _matrix: &mut SparseMatrix<f64>) {}
        fn unsetup(&mut self) {}
    }

    struct Consumer {
        name: String,
        model: String,
    }

    impl Behavior for Consumer {
        fn name(&self) -> &str {
            &self.name
        }
        fn pin_count(&self) -> usize {
            0
        }
        fn connect(&mut self, _pins: &[NodeId]) -> Result<()> {
            Ok(())
        }
        fn requires(&self) -> Vec<DependencyKey> {
            vec![DependencyKey::new(&self.model, "conductance")]
        }
        fn setup(&mut self, _vars: &mut Variables, provider: &mut Provider) -> Result<()> {
            provider.get::<f64>(&self.model, "conductance")?;
            Ok(())
        }
        fn get_matrix_pointers(&mut self, _vars: &Variables, _matrix: &mut SparseMatrix<f64>) {}
        fn load(&mut self, _state: &mut RealState, _matrix: &mut SparseMatrix<f64>) {}
        fn unsetup(&mut self) {}
    }

    #[test]
    fn test_producer_set_up_before_consumer() {
        // Register the consumer first; setup must still run the producer first.
        let mut container = BehaviorContainer::new();
        container
            .add(Box::new(Consumer {
                name: "C1".into(),
                model: "M1".into(),
            }))
            .unwrap();
        container
            .add(Box::new(Producer { name: "M1".into() }))
            .unwrap();
        container.connect("C1", &[]).unwrap();
        container.connect("M1", &[]).unwrap();

        let mut vars = Variables::new();
        let mut provider = Provider::new();
        container.setup_all(&mut vars, &mut provider).unwrap();
        assert_eq!(*provider.get::<f64>("M1", "conductance").unwrap(), 0.5);
    }

    #[test]
    fn test_unresolved_dependency_is_config_error() {
        let mut container = BehaviorContainer::new();
        container
            .add(Box::new(Consumer {
                name: "C1".into(),
                model: "MISSING".into(),
            }))
            .unwrap();
        container.connect("C1", &[]).unwrap();

        let mut vars = Variables::new();
        let mut provider = Provider::new();
        let err = container.setup_all(&mut vars, &mut provider).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("MISSING"));
    }

    #[test]
    fn test_load_before_setup_is_error() {
        let mut container = BehaviorContainer::new();
        container
            .add(Box::new(Producer { name: "M1".into() }))
            .unwrap();
        container.connect("M1", &[]).unwrap();

        let mut state = RealState::new(0);
        let mut matrix = SparseMatrix::new(0);
        let err = container.load_all(&mut state, &mut matrix).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut container = BehaviorContainer::new();
        container
            .add(Box::new(Producer { name: "M1".into() }))
            .unwrap();
        let err = container
            .add(Box::new(Producer { name: "M1".into() }))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
