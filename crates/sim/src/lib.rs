//! Sensor simulation for the irrigation controller.
//!
//! - [`envelope`]: canonical threshold envelopes and metric ids
//! - [`waveform`]: triangle-wave generator and the simulation clock
//! - [`synth`]: per-tick signal synthesis (moisture random walk + waveforms)

pub mod envelope;
pub mod synth;
pub mod waveform;

pub use envelope::{Bounds, Envelope, Metric, MoistureEnvelope, Thresholds};
pub use synth::{
    round_to, CycleConfig, Readings, SensorReading, SignalSynthesizer, LUX_FULL_SCALE,
};
pub use waveform::{cycle_position, triangle, SimulationClock};
