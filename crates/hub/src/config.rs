//! TOML config file loading, validation, and database seeding for profiles,
//! automation rules and schedules.

use anyhow::{bail, Context, Result};
use irrigation_sim::{CycleConfig, Metric};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use crate::automation::{AutomationRules, RuleSet};
use crate::db::{Db, Profile};
use crate::scheduler::{parse_hhmm, Schedule};
use crate::thresholds::ThresholdsPatch;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub cycle: CycleConfig,
    /// Keyed by metric name (`soil_moisture`, `soil_ph`, ...).
    #[serde(default)]
    pub automation_rules: BTreeMap<String, RuleSet>,
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub tick_ms: u64,
    pub initial_moisture: f64,
    pub initial_profile: Option<String>,
    pub scheduler_enabled: bool,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            tick_ms: 2000,
            initial_moisture: 65.0,
            initial_profile: None,
            scheduler_enabled: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProfileEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thresholds: ThresholdsPatch,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    ///
    /// Threshold values are taken as-is; an inverted envelope is the
    /// operator's call.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_controller(&mut errors);
        self.validate_cycle(&mut errors);
        self.validate_rules(&mut errors);
        self.validate_profiles(&mut errors);
        self.validate_schedules(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_controller(&self, errors: &mut Vec<String>) {
        let c = &self.controller;
        if c.tick_ms == 0 {
            errors.push("controller: tick_ms must be positive".into());
        }
        if !(0.0..=100.0).contains(&c.initial_moisture) {
            errors.push(format!(
                "controller: initial_moisture {} out of range [0, 100]",
                c.initial_moisture
            ));
        }
    }

    fn validate_cycle(&self, errors: &mut Vec<String>) {
        let c = &self.cycle;
        if !(c.duration_sec.is_finite() && c.duration_sec > 0.0) {
            errors.push(format!(
                "cycle: duration_sec must be positive, got {}",
                c.duration_sec
            ));
        }
        for (name, offset) in [
            ("temperature", c.temperature),
            ("humidity", c.humidity),
            ("light", c.light),
            ("ph", c.ph),
        ] {
            if !(0.0..1.0).contains(&offset) {
                errors.push(format!("cycle: {name} offset {offset} out of range [0, 1)"));
            }
        }
    }

    fn validate_rules(&self, errors: &mut Vec<String>) {
        for key in self.automation_rules.keys() {
            if key.parse::<Metric>().is_err() {
                errors.push(format!("automation_rules: unknown metric '{key}'"));
            }
        }
    }

    fn validate_profiles(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, p) in self.profiles.iter().enumerate() {
            let ctx = || {
                if p.id.is_empty() {
                    format!("profiles[{i}]")
                } else {
                    format!("profile '{}'", p.id)
                }
            };

            if p.id.trim().is_empty() {
                errors.push(format!("{}: id is empty", ctx()));
            } else if !seen_ids.insert(&p.id) {
                errors.push(format!("{}: duplicate id", ctx()));
            }

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
        }
    }

    fn validate_schedules(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, s) in self.schedules.iter().enumerate() {
            let ctx = || {
                if s.id.is_empty() {
                    format!("schedules[{i}]")
                } else {
                    format!("schedule '{}'", s.id)
                }
            };

            if s.id.trim().is_empty() {
                errors.push(format!("{}: id is empty", ctx()));
            } else if !seen_ids.insert(&s.id) {
                errors.push(format!("{}: duplicate id", ctx()));
            }

            if parse_hhmm(&s.time).is_none() {
                errors.push(format!(
                    "{}: time '{}' is not a valid HH:MM",
                    ctx(),
                    s.time
                ));
            }
            if s.days.is_empty() {
                errors.push(format!("{}: days is empty", ctx()));
            }
            if s.duration == 0 {
                errors.push(format!("{}: duration must be positive", ctx()));
            }
        }
    }

    /// Rules with their metric keys resolved.  Call after [`validate`].
    ///
    /// [`validate`]: Config::validate
    pub fn rules(&self) -> AutomationRules {
        self.automation_rules
            .iter()
            .filter_map(|(k, r)| Some((k.parse::<Metric>().ok()?, r.clone())))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Upsert profiles (as builtin), automation rules and schedules from the
/// config into the database.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for p in &config.profiles {
        db.upsert_profile(&Profile {
            id: p.id.clone(),
            name: p.name.clone(),
            icon: p.icon.clone(),
            description: p.description.clone(),
            thresholds: p.thresholds.clone(),
            builtin: true,
        })
        .await
        .with_context(|| format!("failed to upsert profile '{}'", p.id))?;
    }

    let rules = config.rules();
    for (metric, rule) in &rules {
        db.upsert_rule(*metric, rule)
            .await
            .with_context(|| format!("failed to upsert rule '{metric}'"))?;
    }

    for s in &config.schedules {
        db.upsert_schedule(s)
            .await
            .with_context(|| format!("failed to upsert schedule '{}'", s.id))?;
    }

    tracing::info!(
        profiles = config.profiles.len(),
        rules = rules.len(),
        schedules = config.schedules.len(),
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Day;
    use crate::thresholds::Optimal;

    const SAMPLE: &str = r#"
[controller]
tick_ms = 1000
initial_moisture = 58.5
initial_profile = "tomato"
scheduler_enabled = true

[cycle]
duration_sec = 60

[automation_rules.soil_moisture]
if_below_min = "irrigate"
if_above_max = "drain"

[automation_rules.soil_ph]
if_below_optimal = "add lime"

[[profiles]]
id = "tomato"
name = "Tomato"
icon = "🍅"

[profiles.thresholds.soilMoisture]
min = 55
optimal = [65, 75]
max = 90

[profiles.thresholds.soilPH]
min = 5.8
optimal = 6.3
max = 6.8

[[schedules]]
id = "morning"
time = "07:00"
days = ["monday", "wednesday", "friday"]
duration = 300
"#;

    fn valid_schedule() -> Schedule {
        Schedule {
            id: "s".into(),
            time: "06:30".into(),
            days: vec![Day::Sunday],
            duration: 60,
            enabled: true,
        }
    }

    fn valid_profile() -> ProfileEntry {
        ProfileEntry {
            id: "p".into(),
            name: "P".into(),
            icon: String::new(),
            description: String::new(),
            thresholds: ThresholdsPatch::default(),
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_sample_config() {
        let cfg = parse(SAMPLE).unwrap();
        assert_eq!(cfg.controller.tick_ms, 1000);
        assert_eq!(cfg.controller.initial_profile.as_deref(), Some("tomato"));
        assert!(cfg.controller.scheduler_enabled);
        assert_eq!(cfg.cycle.duration_sec, 60.0);
        // Offsets not named keep their defaults.
        assert_eq!(cfg.cycle.light, 0.5);

        let rules = cfg.rules();
        assert_eq!(rules[&Metric::SoilMoisture].if_above_max.as_deref(), Some("drain"));
        assert_eq!(rules[&Metric::SoilPh].if_below_optimal.as_deref(), Some("add lime"));

        let sm = cfg.profiles[0].thresholds.soil_moisture.as_ref().unwrap();
        assert_eq!(sm.optimal, Some(Optimal::Band([65.0, 75.0])));
        assert!(cfg.profiles[0].thresholds.soil_ph.is_some());

        assert_eq!(cfg.schedules[0].days.len(), 3);
        assert!(cfg.schedules[0].enabled);
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.controller.tick_ms, 2000);
        assert_eq!(cfg.controller.initial_moisture, 65.0);
        assert!(!cfg.controller.scheduler_enabled);
        assert_eq!(cfg.cycle, CycleConfig::default());
        assert!(cfg.profiles.is_empty());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn zero_tick_rejected() {
        let mut cfg = Config::default();
        cfg.controller.tick_ms = 0;
        assert_validation_err(&cfg, "tick_ms must be positive");
    }

    #[test]
    fn initial_moisture_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.controller.initial_moisture = 120.0;
        assert_validation_err(&cfg, "initial_moisture 120");
    }

    #[test]
    fn cycle_bounds_rejected() {
        let mut cfg = Config::default();
        cfg.cycle.duration_sec = 0.0;
        cfg.cycle.ph = 1.0;
        assert_validation_err(&cfg, "duration_sec must be positive");
        assert_validation_err(&cfg, "ph offset 1 out of range");
    }

    #[test]
    fn unknown_rule_metric_rejected() {
        let mut cfg = Config::default();
        cfg.automation_rules
            .insert("leaf_wetness".into(), RuleSet::default());
        assert_validation_err(&cfg, "unknown metric 'leaf_wetness'");
    }

    #[test]
    fn duplicate_profile_ids_rejected() {
        let cfg = Config {
            profiles: vec![valid_profile(), valid_profile()],
            ..Default::default()
        };
        assert_validation_err(&cfg, "profile 'p': duplicate id");
    }

    #[test]
    fn empty_profile_name_rejected() {
        let cfg = Config {
            profiles: vec![ProfileEntry {
                name: " ".into(),
                ..valid_profile()
            }],
            ..Default::default()
        };
        assert_validation_err(&cfg, "name is empty");
    }

    #[test]
    fn bad_schedule_fields_rejected() {
        let cfg = Config {
            schedules: vec![Schedule {
                time: "7am".into(),
                days: vec![],
                duration: 0,
                ..valid_schedule()
            }],
            ..Default::default()
        };
        assert_validation_err(&cfg, "time '7am' is not a valid HH:MM");
        assert_validation_err(&cfg, "days is empty");
        assert_validation_err(&cfg, "duration must be positive");
        assert_validation_err(&cfg, "3 errors");
    }

    #[test]
    fn inverted_thresholds_are_accepted() {
        let cfg = parse(
            r#"
[[profiles]]
id = "odd"
name = "Odd"
[profiles.thresholds.airHumidity]
min = 90
optimal = 50
max = 10
"#,
        )
        .unwrap();
        assert_eq!(cfg.profiles.len(), 1);
    }

    // -- Apply ------------------------------------------------------------

    #[tokio::test]
    async fn apply_seeds_storage() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        let cfg = parse(SAMPLE).unwrap();
        apply(&cfg, &db).await.unwrap();

        let profiles = db.load_profiles().await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert!(profiles[0].builtin);
        assert_eq!(db.load_automation_rules().await.unwrap().len(), 2);
        assert_eq!(db.load_schedules().await.unwrap(), cfg.schedules);

        // Re-applying is an upsert, not a duplicate.
        apply(&cfg, &db).await.unwrap();
        assert_eq!(db.load_profiles().await.unwrap().len(), 1);
    }
}
