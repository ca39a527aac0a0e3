//! The analysis engine: owns the circuit's behaviors, the unknown map and
//! the assembled real system.
//!
//! Build order is strict: add every device, then [`Engine::setup`], then run
//! analyses. Setup resolves behavior dependencies, sizes the system, hands
//! out matrix handles and allocates integration states; after it the matrix
//! pattern and unknown indices are frozen for the run.

use voltaic_core::{
    Behavior, BehaviorContainer, Breakpoints, IntegrationConfig, MatrixElement, NodeId, Provider,
    RealState, SparseMatrix, StatePool, Variables,
};

use crate::error::{Error, Result};

pub struct Engine {
    pub(crate) vars: Variables,
    pub(crate) container: BehaviorContainer,
    pub(crate) provider: Provider,
    pub(crate) matrix: SparseMatrix<f64>,
    pub(crate) state: RealState,
    pub(crate) pool: StatePool,
    pub(crate) breakpoints: Breakpoints,
    /// Node diagonal handles, for the controller's gmin contribution.
    pub(crate) diagonals: Vec<MatrixElement>,
    set_up: bool,
}

impl Engine {
    pub fn new(integration: IntegrationConfig) -> Self {
        Self {
            vars: Variables::new(),
            container: BehaviorContainer::new(),
            provider: Provider::new(),
            matrix: SparseMatrix::new(0),
            state: RealState::new(0),
            pool: StatePool::new(integration),
            breakpoints: Breakpoints::default(),
            diagonals: Vec::new(),
            set_up: false,
        }
    }

    /// Add a device behavior and bind it to its terminal nodes.
    pub fn add(&mut self, behavior: Box<dyn Behavior>, pins: &[NodeId]) -> Result<()> {
        if self.set_up {
            return Err(Error::Core(voltaic_core::Error::Config(format!(
                "{}: cannot add devices after setup",
                behavior.name()
            ))));
        }
        if pins.len() != behavior.pin_count() {
            return Err(Error::Core(voltaic_core::Error::Config(format!(
                "{}: expected {} pins, got {}",
                behavior.name(),
                behavior.pin_count(),
                pins.len()
            ))));
        }
        for &pin in pins {
            self.vars.register_node(pin);
        }
        let name = behavior.name().to_string();
        self.container.add(behavior)?;
        self.container.connect(&name, pins)?;
        Ok(())
    }

    /// Publish an external dependency value (e.g. a global model parameter)
    /// before setup.
    pub fn publish<T: 'static>(&mut self, key: voltaic_core::DependencyKey, value: T) {
        self.provider.publish(key, value);
    }

    /// Resolve dependencies, size the system and freeze the matrix pattern.
    pub fn setup(&mut self) -> Result<()> {
        self.container
            .setup_all(&mut self.vars, &mut self.provider)?;

        let size = self.vars.size();
        self.matrix = SparseMatrix::new(size);
        self.state = RealState::new(size);
        self.container.pointers_all(&self.vars, &mut self.matrix)?;

        self.diagonals = (1..=self.vars.num_nodes())
            .map(|n| self.matrix.get_element(n, n))
            .collect();

        self.container.create_states_all(&mut self.pool)?;
        self.pool.build();
        self.set_up = true;
        Ok(())
    }

    /// Tear down all behaviors. The engine cannot be reused afterwards.
    pub fn unsetup(&mut self) {
        self.container.unsetup_all();
        self.set_up = false;
    }

    pub(crate) fn check_set_up(&self) -> Result<()> {
        if !self.set_up {
            return Err(Error::Core(voltaic_core::Error::Config(
                "analysis requested before setup".into(),
            )));
        }
        Ok(())
    }

    /// The unknown map of this run.
    pub fn variables(&self) -> &Variables {
        &self.vars
    }

    /// The real simulation state (solution of the last solve).
    pub fn state(&self) -> &RealState {
        &self.state
    }

    /// Voltage of `node` in the last solution.
    pub fn node_voltage(&self, node: NodeId) -> f64 {
        self.state.solution[node.index()]
    }
}
