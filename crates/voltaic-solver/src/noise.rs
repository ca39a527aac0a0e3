//! Small-signal noise analysis.
//!
//! Every device reports its noise current sources at the operating point.
//! At each sweep frequency the factored complex system is solved once per
//! source with a unit current injected at the source's terminals; the
//! squared magnitude of the resulting output voltage is the transfer gain
//! that scales the source's spectral density. Densities are integrated over
//! the sweep assuming power-law behavior between adjacent points, which is
//! exact for flat, 1/f and f^n segments on a log grid.

use num_complex::Complex;
use voltaic_core::NodeId;

use crate::ac::FrequencySweep;
use crate::engine::Engine;
use crate::error::Result;
use crate::newton::NewtonConfig;

/// Noise analysis parameters.
#[derive(Debug, Clone)]
pub struct NoiseConfig {
    /// Device temperature (K).
    pub temperature: f64,
    /// Output terminals; the reported densities are of `V(pos) - V(neg)`.
    pub output_pos: NodeId,
    pub output_neg: NodeId,
}

impl NoiseConfig {
    pub fn new(output_pos: NodeId, output_neg: NodeId) -> Self {
        Self {
            temperature: 300.15,
            output_pos,
            output_neg,
        }
    }
}

/// Output noise of one sweep.
#[derive(Debug, Clone)]
pub struct NoiseResult {
    pub frequencies: Vec<f64>,
    /// Total output noise voltage density per frequency (V²/Hz).
    pub output_density: Vec<f64>,
    /// Integrated output noise per source over the sweep (V²).
    pub contributions: Vec<(String, f64)>,
    /// Total integrated output noise over the sweep (V²).
    pub total_output_noise: f64,
}

impl NoiseResult {
    /// RMS output noise voltage over the sweep band (V).
    pub fn output_rms(&self) -> f64 {
        self.total_output_noise.sqrt()
    }
}

/// Integrate a spectral density from `last_freq` to `freq` assuming the
/// density follows a power law `d(f) = k * f^e` between the two points.
fn integrate_density(density: f64, freq: f64, last_density: f64, last_freq: f64) -> f64 {
    if density <= 0.0 || last_density <= 0.0 {
        // Power-law fit is undefined at zero; fall back to the trapezoid.
        return 0.5 * (density + last_density) * (freq - last_freq);
    }
    let exponent = (density.ln() - last_density.ln()) / (freq.ln() - last_freq.ln());
    if exponent.abs() < 1e-10 {
        density * (freq - last_freq)
    } else if (exponent + 1.0).abs() < 1e-10 {
        density * freq * (freq / last_freq).ln()
    } else {
        density * freq / (exponent + 1.0) * (1.0 - (last_freq / freq).powf(exponent + 1.0))
    }
}

impl Engine {
    /// Run a noise sweep: operating point, linearization, then one complex
    /// factorization per frequency and one solve per noise source.
    pub fn solve_noise(
        &mut self,
        sweep: &FrequencySweep,
        config: &NoiseConfig,
        newton: &NewtonConfig,
    ) -> Result<NoiseResult> {
        let frequencies = sweep.frequencies();
        let out_pos = config.output_pos.index();
        let out_neg = config.output_neg.index();

        let mut solver = self.ac_solver(newton)?;
        let sources = solver.engine().container.noise_sources_all();

        let mut output_density = Vec::with_capacity(frequencies.len());
        let mut totals = vec![0.0; sources.len()];
        let mut last: Vec<f64> = vec![0.0; sources.len()];
        let mut last_freq = 0.0;

        for (fi, &freq) in frequencies.iter().enumerate() {
            solver.set_frequency(freq);
            solver.load_and_factor()?;

            let mut total_density = 0.0;
            for (si, source) in sources.iter().enumerate() {
                let pos = source.node_pos.index();
                let neg = source.node_neg.index();
                {
                    let state = solver.state_mut();
                    state.clear_rhs();
                    state.rhs[pos] += Complex::new(1.0, 0.0);
                    state.rhs[neg] -= Complex::new(1.0, 0.0);
                }
                let solution = solver.solve_rhs()?;
                let gain = solution[out_pos] - solution[out_neg];
                let density = source.density.current_spectral_density(freq, config.temperature)
                    * gain.norm_sqr();
                total_density += density;

                if fi > 0 {
                    totals[si] += integrate_density(density, freq, last[si], last_freq);
                }
                last[si] = density;
            }
            output_density.push(total_density);
            last_freq = freq;
        }

        let total_output_noise = totals.iter().sum();
        let contributions = sources
            .iter()
            .zip(totals)
            .map(|(s, t)| (s.name.clone(), t))
            .collect();

        Ok(NoiseResult {
            frequencies,
            output_density,
            contributions,
            total_output_noise,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_density_integrates_to_area() {
        // d(f) = 2 over [10, 1000]: integral = 2 * 990
        let total = integrate_density(2.0, 1000.0, 2.0, 10.0);
        assert!((total - 1980.0).abs() < 1e-9);
    }

    #[test]
    fn test_one_over_f_integrates_logarithmically() {
        // d(f) = 1/f over [1, 100]: integral = ln(100)
        let total = integrate_density(0.01, 100.0, 1.0, 1.0);
        assert!((total - 100.0_f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_power_law_segment() {
        // d(f) = f over [1, 2]: integral = 1.5
        let total = integrate_density(2.0, 2.0, 1.0, 1.0);
        assert!((total - 1.5).abs() < 1e-9);
    }
}
