//! Integration tests for AC and noise analysis.

use std::f64::consts::PI;

use num_complex::Complex;
use voltaic_core::{IntegrationConfig, NodeId, BOLTZMANN};
use voltaic_devices::delay::VoltageDelay;
use voltaic_devices::passive::{Capacitor, Resistor};
use voltaic_devices::sources::{AcExcitation, VoltageSource};
use voltaic_solver::{Engine, FrequencySweep, NewtonConfig, NoiseConfig};

fn engine() -> Engine {
    Engine::new(IntegrationConfig::default())
}

/// RC low-pass driven by a unit AC source:
///
/// ```text
///   V1 (ac 1) -- node1 -- R1 = 1k -- node2 -- C1 = 1uF -- GND
/// ```
fn rc_lowpass() -> (Engine, NodeId) {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let mut engine = engine();
    engine
        .add(
            Box::new(VoltageSource::dc("V1", 0.0).with_ac(AcExcitation::new(1.0, 0.0))),
            &[n1, gnd],
        )
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R1", 1000.0)), &[n1, n2])
        .unwrap();
    engine
        .add(Box::new(Capacitor::new("C1", 1e-6)), &[n2, gnd])
        .unwrap();
    (engine, n2)
}

/// The solved transfer function must match 1 / (1 + j*w*R*C) across nine
/// decades.
#[test]
fn test_rc_lowpass_matches_analytic() {
    let (mut engine, out) = rc_lowpass();
    engine.setup().unwrap();

    let sweep = FrequencySweep::Decade {
        start: 1.0,
        stop: 1e9,
        points: 10,
    };
    let result = engine.solve_ac(&sweep, &NewtonConfig::default()).unwrap();

    for (f, v) in result.frequencies.iter().zip(result.voltage(out)) {
        let expected = Complex::new(1.0, 0.0) / Complex::new(1.0, 2.0 * PI * f * 1e-3);
        let err = (v - expected).norm() / expected.norm();
        assert!(err < 1e-9, "H({f}) = {v}, expected {expected}");
    }
}

/// The incremental solver keeps the operating point across arbitrary
/// frequency order: f1, f2, then f1 again must reproduce the first answer.
#[test]
fn test_ac_solver_reentrant() {
    let (mut engine, out) = rc_lowpass();
    engine.setup().unwrap();

    let mut solver = engine.ac_solver(&NewtonConfig::default()).unwrap();
    let first = solver.solve_at(1e3).unwrap()[out.index()];
    let other = solver.solve_at(1e6).unwrap()[out.index()];
    let again = solver.solve_at(1e3).unwrap()[out.index()];

    assert!((first - again).norm() < 1e-15, "{first} != {again}");
    assert!((first - other).norm() > 1e-3, "distinct frequencies must differ");
}

/// An ideal delay is all-pass with linear phase: H = exp(-j*w*T).
#[test]
fn test_delay_is_linear_phase_allpass() {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let mut engine = engine();
    engine
        .add(
            Box::new(VoltageSource::dc("V1", 0.0).with_ac(AcExcitation::new(1.0, 0.0))),
            &[n1, gnd],
        )
        .unwrap();
    engine
        .add(Box::new(VoltageDelay::new("T1", 1e-6)), &[n1, gnd, n2, gnd])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R1", 1000.0)), &[n2, gnd])
        .unwrap();
    engine.setup().unwrap();

    let mut solver = engine.ac_solver(&NewtonConfig::default()).unwrap();
    // w*T = pi/2 at 250 kHz: H = -j.
    let v = solver.solve_at(250e3).unwrap()[n2.index()];
    assert!((v - Complex::new(0.0, -1.0)).norm() < 1e-9, "H = {v}");
    let v = solver.solve_at(500e3).unwrap()[n2.index()];
    assert!((v - Complex::new(-1.0, 0.0)).norm() < 1e-9, "H = {v}");
}

/// Thermal noise of a resistive divider:
///
/// ```text
///   V1 (dc, quiet) -- node1 -- R1 = 1k -- node2 -- R2 = 1k -- GND
/// ```
///
/// Seen from node2, both resistors drive R1 || R2 = 500 ohms, so the output
/// density is flat at 4*k*T*500 and integrates to density * bandwidth.
#[test]
fn test_divider_thermal_noise() {
    let n1 = NodeId::new(1);
    let n2 = NodeId::new(2);
    let gnd = NodeId::GROUND;

    let mut engine = engine();
    engine
        .add(Box::new(VoltageSource::dc("V1", 1.0)), &[n1, gnd])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R1", 1000.0)), &[n1, n2])
        .unwrap();
    engine
        .add(Box::new(Resistor::new("R2", 1000.0)), &[n2, gnd])
        .unwrap();
    engine.setup().unwrap();

    let sweep = FrequencySweep::Decade {
        start: 10.0,
        stop: 1e5,
        points: 10,
    };
    let config = NoiseConfig::new(n2, gnd);
    let result = engine
        .solve_noise(&sweep, &config, &NewtonConfig::default())
        .unwrap();

    let expected_density = 4.0 * BOLTZMANN * config.temperature * 500.0;
    for (&f, &d) in result.frequencies.iter().zip(&result.output_density) {
        let rel = (d - expected_density).abs() / expected_density;
        assert!(rel < 1e-9, "Sv({f}) = {d}, expected {expected_density}");
    }

    // Flat density integrates to density * bandwidth, split evenly between
    // the two resistors.
    let bandwidth = 1e5 - 10.0;
    let total = result.total_output_noise;
    let rel = (total - expected_density * bandwidth).abs() / (expected_density * bandwidth);
    assert!(rel < 1e-9, "total = {total}");

    assert_eq!(result.contributions.len(), 2);
    let sum: f64 = result.contributions.iter().map(|(_, c)| c).sum();
    assert!((sum - total).abs() <= 1e-12 * total);
    for (name, c) in &result.contributions {
        let rel = (c - total / 2.0).abs() / (total / 2.0);
        assert!(rel < 1e-9, "{name} contributes {c}, expected {}", total / 2.0);
    }
}
