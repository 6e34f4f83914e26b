//! Canonical threshold envelopes.
//!
//! Every inbound threshold shape (legacy single-metric settings, profile
//! tables, dashboard edits) is normalized into [`Thresholds`] before the
//! synthesizer or the evaluator ever sees it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Metric identifiers
// ---------------------------------------------------------------------------

/// Metrics that carry a threshold envelope and may have automation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    SoilMoisture,
    SoilTemperature,
    AirTemperature,
    AirHumidity,
    LightLux,
    SoilPh,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::SoilMoisture,
        Metric::SoilTemperature,
        Metric::AirTemperature,
        Metric::AirHumidity,
        Metric::LightLux,
        Metric::SoilPh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoilMoisture => "soil_moisture",
            Self::SoilTemperature => "soil_temperature",
            Self::AirTemperature => "air_temperature",
            Self::AirHumidity => "air_humidity",
            Self::LightLux => "light_lux",
            Self::SoilPh => "soil_ph",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// `(min, optimal, max)` triple for a waveform-driven metric.
///
/// No ordering is enforced: `min > max` is stored as given and the waveform
/// simply runs the segments in the inverted direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min: f64,
    pub optimal: f64,
    pub max: f64,
}

impl Envelope {
    pub const fn new(min: f64, optimal: f64, max: f64) -> Self {
        Self { min, optimal, max }
    }
}

/// Soil moisture carries an optimal *band* rather than a single point; the
/// autonomous controller starts at `min` and stops at `optimal_min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoistureEnvelope {
    pub min: f64,
    pub optimal_min: f64,
    pub optimal_max: f64,
    pub max: f64,
}

/// The three comparison points the automation evaluator needs for a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    /// `optimal_min` for soil moisture, `optimal` for everything else.
    pub optimal: f64,
    pub max: f64,
}

/// Full threshold table, one envelope per metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub soil_moisture: MoistureEnvelope,
    pub soil_temperature: Envelope,
    pub air_temperature: Envelope,
    pub air_humidity: Envelope,
    pub light_lux: Envelope,
    #[serde(rename = "soilPH")]
    pub soil_ph: Envelope,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            soil_moisture: MoistureEnvelope {
                min: 60.0,
                optimal_min: 70.0,
                optimal_max: 80.0,
                max: 100.0,
            },
            soil_temperature: Envelope::new(14.0, 20.0, 28.0),
            air_temperature: Envelope::new(15.0, 22.0, 30.0),
            air_humidity: Envelope::new(40.0, 60.0, 75.0),
            light_lux: Envelope::new(30_000.0, 50_000.0, 70_000.0),
            soil_ph: Envelope::new(6.0, 6.5, 7.0),
        }
    }
}

impl Thresholds {
    pub fn bounds(&self, metric: Metric) -> Bounds {
        let from_env = |e: &Envelope| Bounds {
            min: e.min,
            optimal: e.optimal,
            max: e.max,
        };
        match metric {
            Metric::SoilMoisture => Bounds {
                min: self.soil_moisture.min,
                optimal: self.soil_moisture.optimal_min,
                max: self.soil_moisture.max,
            },
            Metric::SoilTemperature => from_env(&self.soil_temperature),
            Metric::AirTemperature => from_env(&self.air_temperature),
            Metric::AirHumidity => from_env(&self.air_humidity),
            Metric::LightLux => from_env(&self.light_lux),
            Metric::SoilPh => from_env(&self.soil_ph),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
