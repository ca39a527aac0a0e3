//! Integration tests for the DC operating point.

use approx::assert_relative_eq;
use voltaic_core::{IntegrationConfig, NodeId};
use voltaic_devices::passive::{Inductor, Resistor, ResistorModel};
use voltaic_devices::sources::{Vccs, VoltageSource};
use voltaic_devices::{Diode, DiodeParams};
use voltaic_solver::{Engine, NewtonConfig};

fn engine() -> Engine {
    Engine::new(IntegrationConfig::default())
}

/// Voltage divider:
///
/// ```text
///   V1 = 10V -- node1 -- R1 = 1k -- node2 -- R2 = 1k -- GND
/// ```
///
/// Expected: V(node1) = 10V, V(node2) = 5V, I(V1) = -5mA.
#[test]
fn test_voltage_divider() {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let mut engine = engine();
    engine
        .add(Box::new(VoltageSource::dc("V1", 10.0)), &[n1, gnd])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R1", 1000.0)), &[n1, n2])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R2", 1000.0)), &[n2, gnd])
        .unwrap();
    engine.setup().unwrap();
    engine.solve_op(&NewtonConfig::default()).unwrap();

    assert!(
        (engine.node_voltage(n1) - 10.0).abs() < 1e-9,
        "V(node1) = {} (expected 10.0)",
        engine.node_voltage(n1)
    );
    assert!(
        (engine.node_voltage(n2) - 5.0).abs() < 1e-9,
        "V(node2) = {} (expected 5.0)",
        engine.node_voltage(n2)
    );
    assert_eq!(engine.node_voltage(gnd), 0.0);

    // Branch rows follow the node rows; V1 allocated the only branch.
    let i_v1 = engine.state().solution[3];
    assert!(
        (i_v1 + 0.005).abs() < 1e-9,
        "I(V1) = {i_v1} (expected -0.005)"
    );
}

/// Resistors taking their value from a shared model. The model is registered
/// last; dependency-ordered setup must still run it first.
#[test]
fn test_model_resolved_before_dependents() {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let mut engine = engine();
    engine
        .add(Box::new(VoltageSource::dc("V1", 6.0)), &[n1, gnd])
        .unwrap();
    engine
        .add(Box::new(Resistor::with_model("R1", "RMOD")), &[n1, n2])
        .unwrap();
    engine
        .add(Box::new(Resistor::with_model("R2", "RMOD")), &[n2, gnd])
        .unwrap();
    engine
        .add(Box::new(ResistorModel::new("RMOD", 2000.0)), &[])
        .unwrap();
    engine.setup().unwrap();
    engine.solve_op(&NewtonConfig::default()).unwrap();

    assert_relative_eq!(engine.node_voltage(n2), 3.0, epsilon = 1e-9);
}

/// Diode with a series resistor:
///
/// ```text
///   V1 = 5V -- node1 -- R1 = 1k -- node2 -- D1 -- GND
/// ```
///
/// The resistor current and the Shockley current must agree at the solved
/// junction voltage, which sits near the knee.
#[test]
fn test_diode_conduction_consistent() {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let params = DiodeParams::default();
    let mut engine = engine();
    engine
        .add(Box::new(VoltageSource::dc("V1", 5.0)), &[n1, gnd])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R1", 1000.0)), &[n1, n2])
        .unwrap();
    engine
        .add(Box::new(Diode::new("D1", params.clone())), &[n2, gnd])
        .unwrap();
    engine.setup().unwrap();
    engine.solve_op(&NewtonConfig::default()).unwrap();

    let vd = engine.node_voltage(n2);
    assert!(
        vd > 0.5 && vd < 0.8,
        "V(diode) = {vd} (expected near the knee)"
    );

    let i_resistor = (engine.node_voltage(n1) - vd) / 1000.0;
    let vte = voltaic_devices::thermal_voltage(params.temperature) * params.n;
    let i_diode = params.is * ((vd / vte).exp() - 1.0);
    let rel = (i_resistor - i_diode).abs() / i_resistor.abs();
    assert!(
        rel < 5e-3,
        "resistor current {i_resistor} disagrees with diode current {i_diode}"
    );
}

/// Inductor is a short at DC:
///
/// ```text
///   V1 = 1V -- node1 -- R1 = 100 -- node2 -- L1 = 1mH -- GND
/// ```
///
/// Expected: V(node2) = 0, I(L1) = 10mA.
#[test]
fn test_inductor_short_at_dc() {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let mut engine = engine();
    engine
        .add(Box::new(VoltageSource::dc("V1", 1.0)), &[n1, gnd])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R1", 100.0)), &[n1, n2])
        .unwrap();
    engine
        .add(Box::new(Inductor::new("L1", 1e-3)), &[n2, gnd])
        .unwrap();
    engine.setup().unwrap();
    engine.solve_op(&NewtonConfig::default()).unwrap();

    assert!(
        engine.node_voltage(n2).abs() < 1e-9,
        "V(node2) = {} (expected 0)",
        engine.node_voltage(n2)
    );
    // Branches in setup order: V1 is row 3, L1 is row 4.
    let i_l = engine.state().solution[4];
    assert!((i_l - 0.01).abs() < 1e-9, "I(L1) = {i_l} (expected 0.01)");
}

/// VCCS sinking current from a resistive load:
///
/// ```text
///   V1 = 1V -- node1 (control)
///   G1: i = 1mS * V(node1), from node2 to GND
///   R1 = 1k from node2 to GND
/// ```
///
/// Expected: V(node2) = -1V.
#[test]
fn test_vccs_gain() {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let mut engine = engine();
    engine
        .add(Box::new(VoltageSource::dc("V1", 1.0)), &[n1, gnd])
        .unwrap();
    engine
        .add(Box::new(Vccs::new("G1", 1e-3)), &[n2, gnd, n1, gnd])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R1", 1000.0)), &[n2, gnd])
        .unwrap();
    engine.setup().unwrap();
    engine.solve_op(&NewtonConfig::default()).unwrap();

    assert!(
        (engine.node_voltage(n2) + 1.0).abs() < 1e-9,
        "V(node2) = {} (expected -1.0)",
        engine.node_voltage(n2)
    );
}

/// An exhausted iteration budget surfaces as a recoverable convergence
/// failure, not a panic or a config error.
#[test]
fn test_convergence_failure_reported() {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let mut engine = engine();
    engine
        .add(Box::new(VoltageSource::dc("V1", 5.0)), &[n1, gnd])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R1", 1000.0)), &[n1, n2])
        .unwrap();
    engine
        .add(Box::new(Diode::new("D1", DiodeParams::default())), &[n2, gnd])
        .unwrap();
    engine.setup().unwrap();

    // Three iterations cannot climb the junction exponential, and the
    // remediation ladder is disabled.
    let config = NewtonConfig {
        max_iterations: 3,
        gmin_steps: 0,
        source_steps: 0,
        ..NewtonConfig::default()
    };
    let err = engine.solve_op(&config).unwrap_err();
    assert!(matches!(
        err,
        voltaic_solver::Error::ConvergenceFailed { iterations: 3 }
    ));
    assert!(err.is_recoverable());
}

/// A device added with the wrong pin count is rejected before setup.
#[test]
fn test_wrong_pin_count_rejected() {
    let n1 = NodeId::new(1);
    let mut engine = engine();
    let err = engine
        .add(Box::new(Resistor::new("R1", 1000.0)), &[n1])
        .unwrap_err();
    assert!(err.to_string().contains("pins"));
}
