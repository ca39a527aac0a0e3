//! Time-varying source waveforms for transient analysis.

use std::f64::consts::PI;

/// A time-varying waveform specification.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Waveform {
    /// Constant DC value (time-independent).
    Dc(f64),

    /// Pulse waveform: PULSE(V1 V2 TD TR TF PW PER)
    ///
    /// - V1: Initial value
    /// - V2: Pulsed value
    /// - TD: Delay time (before first pulse)
    /// - TR: Rise time
    /// - TF: Fall time
    /// - PW: Pulse width (at V2)
    /// - PER: Period (0 for single pulse)
    Pulse {
        v1: f64,
        v2: f64,
        td: f64,
        tr: f64,
        tf: f64,
        pw: f64,
        per: f64,
    },

    /// Sinusoidal waveform: SIN(VO VA FREQ TD THETA PHASE)
    ///
    /// - VO: DC offset
    /// - VA: Amplitude
    /// - FREQ: Frequency in Hz
    /// - TD: Delay time (before sinusoid starts)
    /// - THETA: Damping factor (1/s), 0 for undamped
    /// - PHASE: Phase in degrees
    Sin {
        vo: f64,
        va: f64,
        freq: f64,
        td: f64,
        theta: f64,
        phase: f64,
    },

    /// Piecewise linear waveform: PWL(T1 V1 T2 V2 ...)
    ///
    /// Linear interpolation between specified (time, value) points.
    Pwl {
        /// Time-value pairs, sorted by time.
        points: Vec<(f64, f64)>,
    },
}

impl Waveform {
    /// Create a DC waveform.
    pub fn dc(value: f64) -> Self {
        Waveform::Dc(value)
    }

    /// Create a pulse waveform.
    pub fn pulse(v1: f64, v2: f64, td: f64, tr: f64, tf: f64, pw: f64, per: f64) -> Self {
        Waveform::Pulse {
            v1,
            v2,
            td,
            tr,
            tf,
            pw,
            per,
        }
    }

    /// Create an undamped sinusoidal waveform.
    pub fn sin(vo: f64, va: f64, freq: f64) -> Self {
        Waveform::Sin {
            vo,
            va,
            freq,
            td: 0.0,
            theta: 0.0,
            phase: 0.0,
        }
    }

    /// Create a sinusoidal waveform with full parameters.
    pub fn sin_full(vo: f64, va: f64, freq: f64, td: f64, theta: f64, phase: f64) -> Self {
        Waveform::Sin {
            vo,
            va,
            freq,
            td,
            theta,
            phase,
        }
    }

    /// Create a piecewise linear waveform.
    pub fn pwl(points: Vec<(f64, f64)>) -> Self {
        Waveform::Pwl { points }
    }

    /// Evaluate the waveform at a given time.
    pub fn value_at(&self, time: f64) -> f64 {
        match self {
            Waveform::Dc(v) => *v,
            Waveform::Pulse {
                v1,
                v2,
                td,
                tr,
                tf,
                pw,
                per,
            } => eval_pulse(*v1, *v2, *td, *tr, *tf, *pw, *per, time),
            Waveform::Sin {
                vo,
                va,
                freq,
                td,
                theta,
                phase,
            } => eval_sin(*vo, *va, *freq, *td, *theta, *phase, time),
            Waveform::Pwl { points } => eval_pwl(points, time),
        }
    }

    /// The next slope discontinuity strictly after `time`, for breakpoint
    /// scheduling. A picosecond guard keeps a corner just accepted from
    /// being rescheduled forever.
    pub fn next_corner(&self, time: f64) -> Option<f64> {
        const GUARD: f64 = 1e-12;
        let after = time + GUARD;
        match self {
            Waveform::Dc(_) | Waveform::Sin { .. } => None,
            Waveform::Pulse {
                td, tr, tf, pw, per, ..
            } => {
                let offsets = [0.0, *tr, tr + pw, tr + pw + tf];
                if *per > 0.0 {
                    let k = ((after - td) / per).floor().max(0.0);
                    for cycle in [k, k + 1.0] {
                        let base = td + cycle * per;
                        for o in offsets {
                            if base + o > after {
                                return Some(base + o);
                            }
                        }
                    }
                    None
                } else {
                    offsets.iter().map(|o| td + o).find(|&c| c > after)
                }
            }
            Waveform::Pwl { points } => points.iter().map(|&(t, _)| t).find(|&t| t > after),
        }
    }
}

fn eval_pulse(v1: f64, v2: f64, td: f64, tr: f64, tf: f64, pw: f64, per: f64, time: f64) -> f64 {
    if time < td {
        return v1;
    }
    let mut t = time - td;
    if per > 0.0 {
        t %= per;
    }
    if t < tr {
        v1 + (v2 - v1) * t / tr
    } else if t < tr + pw {
        v2
    } else if t < tr + pw + tf {
        v2 + (v1 - v2) * (t - tr - pw) / tf
    } else {
        v1
    }
}

fn eval_sin(vo: f64, va: f64, freq: f64, td: f64, theta: f64, phase: f64, time: f64) -> f64 {
    let phase_rad = phase * PI / 180.0;
    if time < td {
        return vo + va * phase_rad.sin();
    }
    let t = time - td;
    let damping = if theta != 0.0 { (-theta * t).exp() } else { 1.0 };
    vo + va * damping * (2.0 * PI * freq * t + phase_rad).sin()
}

fn eval_pwl(points: &[(f64, f64)], time: f64) -> f64 {
    match points {
        [] => 0.0,
        [(first_t, first_v), ..] if time <= *first_t => *first_v,
        _ => {
            for pair in points.windows(2) {
                let (t0, v0) = pair[0];
                let (t1, v1) = pair[1];
                if time <= t1 {
                    return v0 + (v1 - v0) * (time - t0) / (t1 - t0);
                }
            }
            points[points.len() - 1].1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_phases() {
        let w = Waveform::pulse(0.0, 1.0, 1e-6, 1e-7, 1e-7, 1e-6, 0.0);
        assert_eq!(w.value_at(0.0), 0.0);
        assert!((w.value_at(1.05e-6) - 0.5).abs() < 1e-9);
        assert_eq!(w.value_at(1.5e-6), 1.0);
        assert_eq!(w.value_at(5e-6), 0.0);
    }

    #[test]
    fn test_pulse_periodic() {
        let w = Waveform::pulse(0.0, 1.0, 0.0, 1e-9, 1e-9, 0.5e-6, 1e-6);
        assert_eq!(w.value_at(0.25e-6), 1.0);
        assert_eq!(w.value_at(0.75e-6), 0.0);
        assert_eq!(w.value_at(1.25e-6), 1.0);
    }

    #[test]
    fn test_pulse_corners_in_order() {
        let w = Waveform::pulse(0.0, 1.0, 1e-6, 1e-7, 1e-7, 1e-6, 0.0);
        let mut t = 0.0;
        let mut corners = Vec::new();
        while let Some(c) = w.next_corner(t) {
            corners.push(c);
            t = c;
        }
        assert_eq!(corners.len(), 4);
        assert!((corners[0] - 1e-6).abs() < 1e-18);
        assert!((corners[3] - 2.2e-6).abs() < 1e-18);
    }

    #[test]
    fn test_periodic_corners_advance() {
        let w = Waveform::pulse(0.0, 1.0, 0.0, 1e-9, 1e-9, 0.5e-6, 1e-6);
        let c = w.next_corner(2.5e-6).unwrap();
        assert!(c > 2.5e-6);
        assert!(c <= 3.0e-6 + 1e-15);
    }

    #[test]
    fn test_sin_value() {
        let w = Waveform::sin(1.0, 2.0, 1e3);
        assert!((w.value_at(0.0) - 1.0).abs() < 1e-12);
        assert!((w.value_at(0.25e-3) - 3.0).abs() < 1e-9);
        assert!(w.next_corner(0.0).is_none());
    }

    #[test]
    fn test_pwl_interpolation() {
        let w = Waveform::pwl(vec![(0.0, 0.0), (1e-3, 1.0), (2e-3, 0.5)]);
        assert_eq!(w.value_at(-1.0), 0.0);
        assert!((w.value_at(0.5e-3) - 0.5).abs() < 1e-12);
        assert!((w.value_at(1.5e-3) - 0.75).abs() < 1e-12);
        assert_eq!(w.value_at(5e-3), 0.5);
    }
}
