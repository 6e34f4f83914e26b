//! Triangle-wave generator used for every non-moisture metric.
//!
//! One cycle walks `min → optimal → max → optimal → min` in four equal
//! linear segments.  The position within the cycle is
//! `((elapsed / period) + phase_offset) mod 1`, so metrics with different
//! offsets move out of step with each other.

use std::time::Instant;

use crate::envelope::Envelope;

/// Process-wide simulation epoch.  Captured once; every waveform measures
/// elapsed time from here.
#[derive(Debug, Clone, Copy)]
pub struct SimulationClock {
    start: Instant,
}

impl SimulationClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Fractional position in `[0, 1)` within the current cycle.
pub fn cycle_position(elapsed_sec: f64, period_sec: f64, phase_offset: f64) -> f64 {
    ((elapsed_sec / period_sec) + phase_offset).rem_euclid(1.0)
}

/// Value of the triangle wave for `env` at `elapsed_sec`.
///
/// A non-positive or non-finite period pins the output at `optimal`.
pub fn triangle(env: &Envelope, period_sec: f64, phase_offset: f64, elapsed_sec: f64) -> f64 {
    if !(period_sec.is_finite() && period_sec > 0.0) {
        return env.optimal;
    }

    let pos = cycle_position(elapsed_sec, period_sec, phase_offset);

    // Segments are half-open [start, end): a seam is always evaluated as the
    // start of the next segment, where lerp returns its `from` exactly.
    if pos < 0.25 {
        lerp(env.min, env.optimal, pos / 0.25)
    } else if pos < 0.5 {
        lerp(env.optimal, env.max, (pos - 0.25) / 0.25)
    } else if pos < 0.75 {
        lerp(env.max, env.optimal, (pos - 0.5) / 0.25)
    } else {
        lerp(env.optimal, env.min, (pos - 0.75) / 0.25)
    }
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

// ===========================================================================
// Tests
// ===========================================================================
