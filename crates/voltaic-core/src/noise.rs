//! Noise source descriptors and spectral density evaluation.

use crate::node::NodeId;

/// Boltzmann constant (J/K)
pub const BOLTZMANN: f64 = 1.380649e-23;

/// Elementary charge (C)
pub const ELECTRON_CHARGE: f64 = 1.602176634e-19;

/// Spectral density model of a noise source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseDensity {
    /// Thermal noise of a conductance: Si = 4kTG (A²/Hz).
    Thermal { conductance: f64 },
    /// Shot noise of a junction current: Si = 2qI (A²/Hz).
    Shot { current: f64 },
    /// Flicker (1/f) noise: Si = Kf * I^Af / f (A²/Hz).
    Flicker { kf: f64, af: f64, current: f64 },
}

impl NoiseDensity {
    /// Noise current spectral density in A²/Hz.
    pub fn current_spectral_density(&self, frequency: f64, temperature: f64) -> f64 {
        match *self {
            NoiseDensity::Thermal { conductance } => {
                if conductance > 0.0 {
                    4.0 * BOLTZMANN * temperature * conductance
                } else {
                    0.0
                }
            }
            NoiseDensity::Shot { current } => 2.0 * ELECTRON_CHARGE * current.abs(),
            NoiseDensity::Flicker { kf, af, current } => {
                if frequency > 0.0 {
                    kf * current.abs().powf(af) / frequency
                } else {
                    0.0
                }
            }
        }
    }
}

/// A noise current source reported by a device behavior.
///
/// The noise current is injected between `node_pos` and `node_neg`; the noise
/// analysis propagates it to the output through the small-signal transfer
/// function.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    /// Identifier, e.g. "R1" or "D1.shot".
    pub name: String,
    pub node_pos: NodeId,
    pub node_neg: NodeId,
    pub density: NoiseDensity,
}

impl NoiseSource {
    pub fn new(
        name: impl Into<String>,
        node_pos: NodeId,
        node_neg: NodeId,
        density: NoiseDensity,
    ) -> Self {
        Self {
            name: name.into(),
            node_pos,
            node_neg,
            density,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thermal_density_1k() {
        // 1k resistor at 300K: Si = 4kT/R = 1.656e-20 A²/Hz
        let d = NoiseDensity::Thermal {
            conductance: 1.0 / 1000.0,
        };
        let si = d.current_spectral_density(1e3, 300.0);
        assert!((si - 1.656e-20).abs() < 0.01e-20, "Si = {si}");
    }

    #[test]
    fn test_shot_density_1ma() {
        let d = NoiseDensity::Shot { current: 1e-3 };
        let si = d.current_spectral_density(1e3, 300.0);
        // Si = 2qI = 3.2e-22 A²/Hz
        assert!((si - 3.2e-22).abs() < 0.1e-22);
    }

    #[test]
    fn test_flicker_scales_inverse_frequency() {
        let d = NoiseDensity::Flicker {
            kf: 1e-24,
            af: 1.0,
            current: 1e-3,
        };
        let si_100 = d.current_spectral_density(100.0, 300.0);
        let si_1000 = d.current_spectral_density(1000.0, 300.0);
        assert!((si_100 / si_1000 - 10.0).abs() < 1e-9);
    }
}
