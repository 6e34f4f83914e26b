//! Inbound threshold shapes and their normalization into the canonical
//! [`Thresholds`] table.
//!
//! Two shapes reach the controller:
//! - legacy settings: `{minThreshold, optimalMin, optimalMax}` (moisture only)
//! - extended tables: `{thresholds: {soilMoisture: {min, optimal, max}, ...}}`
//!   as sent by the dashboard and stored in profiles
//!
//! Both become a [`ConfigUpdate`] at the boundary and nothing downstream sees
//! the raw shapes.  Values are not range-checked: the last write wins.

use irrigation_sim::{Envelope, MoistureEnvelope, Thresholds};
use serde::{Deserialize, Serialize};

/// Upper bound used when a moisture update does not name one.
const DEFAULT_MOISTURE_MAX: f64 = 100.0;

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Moisture optimum: a single point or an inclusive `[low, high]` band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Optimal {
    Point(f64),
    Band([f64; 2]),
}

impl Optimal {
    fn band(self) -> (f64, f64) {
        match self {
            Self::Point(v) => (v, v),
            Self::Band([lo, hi]) => (lo, hi),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoisturePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal: Option<Optimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Extended threshold table.  Metrics left out are not touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_moisture: Option<MoisturePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_temperature: Option<EnvelopePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_temperature: Option<EnvelopePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_humidity: Option<EnvelopePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_lux: Option<EnvelopePatch>,
    #[serde(default, rename = "soilPH", skip_serializing_if = "Option::is_none")]
    pub soil_ph: Option<EnvelopePatch>,
}

/// `settings` payload of a `configUpdate` command.  May carry the legacy
/// fields, an extended table, or both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub min_threshold: Option<f64>,
    #[serde(default)]
    pub optimal_min: Option<f64>,
    #[serde(default)]
    pub optimal_max: Option<f64>,
    #[serde(default)]
    pub thresholds: Option<ThresholdsPatch>,
}

// ---------------------------------------------------------------------------
// Normalized update
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpdate {
    /// Moisture-only update from older clients.
    Legacy {
        min: f64,
        optimal_min: Option<f64>,
        optimal_max: Option<f64>,
    },
    Extended(ThresholdsPatch),
}

impl Settings {
    /// Split into normalized updates, legacy first.  Settings without any
    /// recognised field yield nothing.
    pub fn into_updates(self) -> Vec<ConfigUpdate> {
        let mut updates = Vec::new();
        if let Some(min) = self.min_threshold {
            updates.push(ConfigUpdate::Legacy {
                min,
                optimal_min: self.optimal_min,
                optimal_max: self.optimal_max,
            });
        }
        if let Some(patch) = self.thresholds {
            updates.push(ConfigUpdate::Extended(patch));
        }
        updates
    }
}

impl ConfigUpdate {
    pub fn apply(&self, thresholds: &mut Thresholds) {
        match self {
            Self::Legacy {
                min,
                optimal_min,
                optimal_max,
            } => {
                let prev = thresholds.soil_moisture;
                thresholds.soil_moisture = MoistureEnvelope {
                    min: *min,
                    optimal_min: optimal_min.unwrap_or(prev.optimal_min),
                    optimal_max: optimal_max.unwrap_or(prev.optimal_max),
                    max: DEFAULT_MOISTURE_MAX,
                };
            }
            Self::Extended(patch) => patch.apply(thresholds),
        }
    }
}

impl ThresholdsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, thresholds: &mut Thresholds) {
        if let Some(sm) = &self.soil_moisture {
            let prev = thresholds.soil_moisture;
            let (optimal_min, optimal_max) = sm
                .optimal
                .map(Optimal::band)
                .unwrap_or((prev.optimal_min, prev.optimal_max));
            thresholds.soil_moisture = MoistureEnvelope {
                min: sm.min.unwrap_or(prev.min),
                optimal_min,
                optimal_max,
                max: sm.max.unwrap_or(DEFAULT_MOISTURE_MAX),
            };
        }
        merge(&mut thresholds.soil_temperature, &self.soil_temperature);
        merge(&mut thresholds.air_temperature, &self.air_temperature);
        merge(&mut thresholds.air_humidity, &self.air_humidity);
        merge(&mut thresholds.light_lux, &self.light_lux);
        merge(&mut thresholds.soil_ph, &self.soil_ph);
    }
}

fn merge(env: &mut Envelope, patch: &Option<EnvelopePatch>) {
    if let Some(p) = patch {
        *env = Envelope {
            min: p.min.unwrap_or(env.min),
            optimal: p.optimal.unwrap_or(env.optimal),
            max: p.max.unwrap_or(env.max),
        };
    }
}

// ===========================================================================
// Tests
// ===========================================================================
