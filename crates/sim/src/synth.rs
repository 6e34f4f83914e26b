//! Stateful sensor synthesizer.
//!
//! Soil moisture is a random walk driven by the actuator:
//! - idle: slow drying (evaporation + plant uptake) with small jitter
//! - watering: fast rise
//!
//! The asymmetry matters: it is what gives the autonomous controller's
//! `min` / `optimal_min` hysteresis a visible saw-tooth.
//!
//! Temperature, air humidity, light and pH follow the triangle wave from
//! [`crate::waveform`] plus a little symmetric noise.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::envelope::{Envelope, Metric, Thresholds};
use crate::waveform::triangle;

/// Lux value that maps to 100 % on the light channel.
pub const LUX_FULL_SCALE: f64 = 60_000.0;

/// Per-tick moisture loss while idle (percentage points).
const DRY_STEP: Range<f64> = 0.3..1.8;
/// Per-tick moisture gain while watering (percentage points).
const WET_STEP: Range<f64> = 1.0..3.0;
/// Peak-to-peak jitter added to moisture while idle.
const DRY_JITTER: f64 = 0.5;

const TEMPERATURE_NOISE: f64 = 0.2;
const HUMIDITY_NOISE: f64 = 0.5;
const LIGHT_NOISE: f64 = 1.0;
const PH_NOISE: f64 = 0.02;

// ---------------------------------------------------------------------------
// Cycle configuration
// ---------------------------------------------------------------------------

/// Waveform period and the per-metric phase offsets that keep the metrics
/// from peaking together.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CycleConfig {
    pub duration_sec: f64,
    /// Temperature starts at min.
    pub temperature: f64,
    /// Humidity starts at optimal, heading up.
    pub humidity: f64,
    /// Light starts at max.
    pub light: f64,
    /// pH starts at optimal, heading down.
    pub ph: f64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            duration_sec: 120.0,
            temperature: 0.0,
            humidity: 0.25,
            light: 0.5,
            ph: 0.75,
        }
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Current value per simulated channel.  Overwritten every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readings {
    /// Percent volumetric water content, clamped to `[0, 100]`.
    pub soil_moisture: f64,
    /// Air temperature in °C.  Also stands in for soil temperature.
    pub temperature: f64,
    pub air_humidity: f64,
    /// Percent of [`LUX_FULL_SCALE`], clamped to `[0, 100]`.
    pub light: f64,
    #[serde(rename = "pH")]
    pub ph: f64,
}

/// One labelled channel value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub sensor: &'static str,
    pub value: f64,
    pub unit: &'static str,
}

impl Readings {
    /// Values rounded the way the dashboard shows them: one decimal, two
    /// for pH.
    pub fn rounded(&self) -> Self {
        Self {
            soil_moisture: round_to(self.soil_moisture, 1),
            temperature: round_to(self.temperature, 1),
            air_humidity: round_to(self.air_humidity, 1),
            light: round_to(self.light, 1),
            ph: round_to(self.ph, 2),
        }
    }

    /// Value compared against `metric`'s thresholds.  Soil temperature has
    /// no channel of its own and reuses air temperature; light is scaled back
    /// from percent to lux.
    pub fn value_for(&self, metric: Metric) -> f64 {
        match metric {
            Metric::SoilMoisture => self.soil_moisture,
            Metric::SoilTemperature | Metric::AirTemperature => self.temperature,
            Metric::AirHumidity => self.air_humidity,
            Metric::LightLux => self.light * LUX_FULL_SCALE / 100.0,
            Metric::SoilPh => self.ph,
        }
    }

    pub fn sensor_readings(&self) -> [SensorReading; 5] {
        [
            SensorReading {
                sensor: "soilMoisture",
                value: self.soil_moisture,
                unit: "%",
            },
            SensorReading {
                sensor: "temperature",
                value: self.temperature,
                unit: "°C",
            },
            SensorReading {
                sensor: "airHumidity",
                value: self.air_humidity,
                unit: "%",
            },
            SensorReading {
                sensor: "light",
                value: self.light,
                unit: "%",
            },
            SensorReading {
                sensor: "pH",
                value: self.ph,
                unit: "pH",
            },
        ]
    }
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

/// Produces one simulated reading per channel per tick.
pub struct SignalSynthesizer {
    rng: fastrand::Rng,
    cycle: CycleConfig,
    current: Readings,
}

impl SignalSynthesizer {
    pub fn new(cycle: CycleConfig, initial_moisture: f64) -> Self {
        Self::with_rng(fastrand::Rng::new(), cycle, initial_moisture)
    }

    /// Deterministic variant for tests and reproducible runs.
    pub fn with_seed(cycle: CycleConfig, initial_moisture: f64, seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed), cycle, initial_moisture)
    }

    fn with_rng(rng: fastrand::Rng, cycle: CycleConfig, initial_moisture: f64) -> Self {
        Self {
            rng,
            cycle,
            current: Readings {
                soil_moisture: initial_moisture.clamp(0.0, 100.0),
                temperature: 22.0,
                air_humidity: 55.0,
                light: 50.0,
                ph: 6.8,
            },
        }
    }

    pub fn readings(&self) -> &Readings {
        &self.current
    }

    pub fn moisture(&self) -> f64 {
        self.current.soil_moisture
    }

    pub fn cycle(&self) -> &CycleConfig {
        &self.cycle
    }

    /// Advance the moisture random walk by one tick and return the new value.
    pub fn step_moisture(&mut self, watering: bool) -> f64 {
        let m = self.current.soil_moisture;
        let next = if watering {
            m + self.uniform(WET_STEP)
        } else {
            let dried = (m - self.uniform(DRY_STEP)).max(0.0);
            dried + self.noise(DRY_JITTER)
        };
        self.current.soil_moisture = next.clamp(0.0, 100.0);
        self.current.soil_moisture
    }

    /// Recompute the waveform-driven channels for `elapsed_sec` since the
    /// simulation epoch.
    ///
    /// Only light is clamped; the rest may drift a hair past their envelope
    /// through noise.
    pub fn step_waveforms(&mut self, thresholds: &Thresholds, elapsed_sec: f64) {
        let period = self.cycle.duration_sec;

        let temperature = triangle(
            &thresholds.air_temperature,
            period,
            self.cycle.temperature,
            elapsed_sec,
        );
        self.current.temperature = temperature + self.noise(TEMPERATURE_NOISE);

        let humidity = triangle(
            &thresholds.air_humidity,
            period,
            self.cycle.humidity,
            elapsed_sec,
        );
        self.current.air_humidity = humidity + self.noise(HUMIDITY_NOISE);

        let lux = &thresholds.light_lux;
        let light_pct = Envelope::new(
            lux.min / LUX_FULL_SCALE * 100.0,
            lux.optimal / LUX_FULL_SCALE * 100.0,
            lux.max / LUX_FULL_SCALE * 100.0,
        );
        let light = triangle(&light_pct, period, self.cycle.light, elapsed_sec);
        self.current.light = (light + self.noise(LIGHT_NOISE)).clamp(0.0, 100.0);

        let ph = triangle(&thresholds.soil_ph, period, self.cycle.ph, elapsed_sec);
        self.current.ph = ph + self.noise(PH_NOISE);
    }

    /// Uniform sample from `range`.
    fn uniform(&mut self, range: Range<f64>) -> f64 {
        range.start + self.rng.f64() * (range.end - range.start)
    }

    /// Symmetric noise with the given peak-to-peak span.
    fn noise(&mut self, span: f64) -> f64 {
        (self.rng.f64() - 0.5) * span
    }
}

// ===========================================================================
// Tests
// ===========================================================================
