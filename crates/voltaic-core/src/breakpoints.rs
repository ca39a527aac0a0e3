//! Mandatory timepoints for the transient integrator.
//!
//! Device behaviors schedule a breakpoint whenever their excitation has an
//! upcoming discontinuity (a waveform corner, a delayed edge). The integrator
//! clamps its step so it lands on each pending breakpoint exactly.

/// Sorted, deduplicated set of upcoming mandatory times.
#[derive(Debug, Clone)]
pub struct Breakpoints {
    points: Vec<f64>,
    min_break: f64,
}

impl Breakpoints {
    /// Create an empty set. `min_break` is the spacing below which two
    /// breakpoints are considered the same instant.
    pub fn new(min_break: f64) -> Self {
        Self {
            points: Vec::new(),
            min_break,
        }
    }

    /// The dedup/landing tolerance.
    pub fn min_break(&self) -> f64 {
        self.min_break
    }

    /// Schedule a breakpoint. Ignored if an existing point lies within
    /// `min_break` of `time`.
    pub fn set_breakpoint(&mut self, time: f64) {
        match self
            .points
            .binary_search_by(|p| p.partial_cmp(&time).unwrap_or(std::cmp::Ordering::Equal))
        {
            Ok(_) => {}
            Err(pos) => {
                let near_prev = pos > 0 && (time - self.points[pos - 1]) < self.min_break;
                let near_next =
                    pos < self.points.len() && (self.points[pos] - time) < self.min_break;
                if !near_prev && !near_next {
                    self.points.insert(pos, time);
                }
            }
        }
    }

    /// The next pending breakpoint, if any.
    pub fn first(&self) -> Option<f64> {
        self.points.first().copied()
    }

    /// Drop every breakpoint at or before `time` (consumed once passed).
    pub fn clear(&mut self, time: f64) {
        let keep_from = self
            .points
            .iter()
            .position(|&p| p > time + self.min_break)
            .unwrap_or(self.points.len());
        self.points.drain(..keep_from);
    }

    /// Number of pending breakpoints.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self::new(1e-12)
    }
}
