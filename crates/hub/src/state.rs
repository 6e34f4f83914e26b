use chrono::{DateTime, Local};
use irrigation_sim::{CycleConfig, Readings, SignalSynthesizer, SimulationClock, Thresholds};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::automation::{self, AutomationRules, TriggeredAction};
use crate::history::WateringEvent;
use crate::thresholds::{ConfigUpdate, ThresholdsPatch};
use crate::watering::{ActuatorState, Transition, Trigger, WateringStateMachine};

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

/// Single lock around everything the tick, the scheduler and inbound commands
/// touch.  Holding the write guard makes a read-then-write of the actuator
/// atomic with respect to the other two writers.
pub type SharedState = Arc<RwLock<ControllerState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct ControllerState {
    clock: SimulationClock,
    synth: SignalSynthesizer,
    thresholds: Thresholds,
    rules: AutomationRules,
    watering: WateringStateMachine,
    triggered: Vec<TriggeredAction>,
    active_profile: Option<String>,
}

// ---------------------------------------------------------------------------
// JSON snapshot (what every client receives)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: DateTime<Local>,
    pub sensors: Readings,
    pub is_watering: bool,
    pub manual_mode: bool,
    pub watering_events: Vec<WateringEvent>,
    pub config: Thresholds,
    pub triggered_actions: Vec<TriggeredAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<String>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl ControllerState {
    pub fn new(cycle: CycleConfig, initial_moisture: f64) -> Self {
        Self::with_synthesizer(SignalSynthesizer::new(cycle, initial_moisture))
    }

    pub fn with_synthesizer(synth: SignalSynthesizer) -> Self {
        Self {
            clock: SimulationClock::start(),
            synth,
            thresholds: Thresholds::default(),
            rules: AutomationRules::new(),
            watering: WateringStateMachine::new(),
            triggered: Vec::new(),
            active_profile: None,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Advance the simulation one step against the wall clock.
    pub fn tick(&mut self) -> Snapshot {
        let elapsed = self.clock.elapsed_secs();
        self.tick_at(Local::now(), elapsed)
    }

    /// One control step: moisture walk, autonomous hysteresis, waveform
    /// channels, rule evaluation.
    pub fn tick_at(&mut self, now: DateTime<Local>, elapsed_sec: f64) -> Snapshot {
        let moisture = self.synth.step_moisture(self.watering.is_on());
        match self
            .watering
            .autonomous_step(now, moisture, &self.thresholds.soil_moisture)
        {
            Some(Transition::Started { episode }) => {
                debug!(episode, "autonomous start");
            }
            Some(Transition::Stopped(ev)) => {
                debug!(duration_sec = ev.duration_seconds, "autonomous stop");
            }
            None => {}
        }

        self.synth.step_waveforms(&self.thresholds, elapsed_sec);
        self.triggered = automation::evaluate(&self.rules, &self.thresholds, self.synth.readings());

        self.snapshot_at(now)
    }

    /// Apply normalized threshold updates in order.  Values are not range
    /// checked; the last write wins.
    pub fn apply_config(&mut self, updates: &[ConfigUpdate]) {
        if updates.is_empty() {
            debug!("config update carried no thresholds");
            return;
        }
        for update in updates {
            update.apply(&mut self.thresholds);
        }
        info!(thresholds = ?self.thresholds, "configuration updated");
    }

    /// Overlay a stored profile's thresholds and remember it as active.
    pub fn apply_profile(&mut self, id: &str, thresholds: &ThresholdsPatch) {
        thresholds.apply(&mut self.thresholds);
        self.active_profile = Some(id.to_string());
        info!(profile = id, "profile applied");
    }

    pub fn set_automation_rules(&mut self, rules: AutomationRules) {
        info!(metrics = rules.len(), "automation rules loaded");
        self.rules = rules;
    }

    pub fn start_manual(&mut self) -> bool {
        let moisture = self.synth.moisture();
        self.watering.start_manual(Local::now(), moisture).is_some()
    }

    pub fn stop_manual(&mut self) -> bool {
        let moisture = self.synth.moisture();
        self.watering.stop_manual(Local::now(), moisture).is_some()
    }

    /// Open an episode on behalf of `trigger`.  Returns the episode id, or
    /// `None` if already watering.
    pub fn start(&mut self, trigger: Trigger) -> Option<u64> {
        let moisture = self.synth.moisture();
        self.watering.start(trigger, Local::now(), moisture)
    }

    pub fn stop(&mut self, trigger: Trigger) -> Option<WateringEvent> {
        let moisture = self.synth.moisture();
        self.watering.stop(trigger, Local::now(), moisture)
    }

    pub fn current_episode(&self) -> Option<u64> {
        self.watering.current_episode()
    }

    pub fn actuator(&self) -> ActuatorState {
        self.watering.actuator()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_at(Local::now())
    }

    fn snapshot_at(&self, now: DateTime<Local>) -> Snapshot {
        Snapshot {
            timestamp: now,
            sensors: self.synth.readings().rounded(),
            is_watering: self.watering.is_on(),
            manual_mode: self.watering.manual_mode(),
            watering_events: self.watering.events().to_vec(),
            config: self.thresholds.clone(),
            triggered_actions: self.triggered.clone(),
            active_profile: self.active_profile.clone(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::RuleSet;
    use crate::thresholds::{EnvelopePatch, MoisturePatch, Optimal};
    use chrono::{Duration, TimeZone};
    use irrigation_sim::Metric;
    use std::collections::BTreeMap;

    fn state(moisture: f64) -> ControllerState {
        ControllerState::with_synthesizer(SignalSynthesizer::with_seed(
            CycleConfig::default(),
            moisture,
            7,
        ))
    }

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn dry_soil_starts_and_wet_soil_stops() {
        let mut st = state(55.0);

        let snap = st.tick_at(t0(), 0.0);
        assert!(snap.is_watering);

        let mut stopped_at = None;
        for i in 1..200 {
            let snap = st.tick_at(t0() + Duration::seconds(2 * i), 2.0 * i as f64);
            if !snap.is_watering {
                stopped_at = Some(snap);
                break;
            }
        }

        let snap = stopped_at.expect("watering never stopped");
        assert_eq!(snap.watering_events.len(), 1);
        let ev = &snap.watering_events[0];
        assert!((52.0..=55.5).contains(&ev.moisture_start), "{}", ev.moisture_start);
        assert!(ev.moisture_end >= 70.0);
        assert_eq!(ev.trigger, Trigger::Autonomous);
    }

    #[test]
    fn manual_mode_blocks_autonomous_start() {
        let mut st = state(40.0);
        st.start_manual();
        st.stop(Trigger::Schedule);
        assert!(st.actuator().manual_mode);

        for i in 0..5 {
            let snap = st.tick_at(t0() + Duration::seconds(2 * i), 2.0 * i as f64);
            assert!(!snap.is_watering);
            assert!(snap.manual_mode);
        }

        assert!(st.start_manual());
        assert!(st.snapshot().is_watering);
    }

    #[test]
    fn stop_manual_hands_control_back() {
        let mut st = state(40.0);
        st.start_manual();
        assert!(st.stop_manual());
        assert!(!st.actuator().manual_mode);

        // Still dry, so the next tick restarts autonomously.
        let snap = st.tick_at(t0(), 0.0);
        assert!(snap.is_watering);
    }

    #[test]
    fn scheduler_start_and_stop_are_idempotent() {
        let mut st = state(75.0);
        assert!(st.start(Trigger::Schedule).is_some());
        assert!(st.start(Trigger::Schedule).is_none());
        assert!(st.stop(Trigger::Schedule).is_some());
        assert!(st.stop(Trigger::Schedule).is_none());
        assert_eq!(st.snapshot().watering_events.len(), 1);
    }

    #[test]
    fn config_update_moves_the_hysteresis() {
        let mut st = state(75.0);
        st.apply_config(&[ConfigUpdate::Extended(ThresholdsPatch {
            soil_moisture: Some(MoisturePatch {
                min: Some(80.0),
                optimal: Some(Optimal::Band([85.0, 90.0])),
                max: None,
            }),
            ..Default::default()
        })]);

        let snap = st.tick_at(t0(), 0.0);
        assert!(snap.is_watering);
        assert_eq!(snap.config.soil_moisture.optimal_min, 85.0);
        assert_eq!(snap.config.soil_moisture.max, 100.0);
    }

    #[test]
    fn triggered_actions_are_replaced_each_tick() {
        let mut st = state(75.0);
        st.set_automation_rules(BTreeMap::from([(
            Metric::SoilPh,
            RuleSet {
                if_above_max: Some("acidify".into()),
                ..Default::default()
            },
        )]));
        // Max below optimal: pH sits above it for most of the cycle.
        st.apply_profile(
            "acid",
            &ThresholdsPatch {
                soil_ph: Some(EnvelopePatch {
                    max: Some(5.0),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let first = st.tick_at(t0(), 0.0);
        assert_eq!(first.triggered_actions.len(), 1);
        assert_eq!(first.active_profile.as_deref(), Some("acid"));

        st.set_automation_rules(AutomationRules::new());
        let second = st.tick_at(t0(), 2.0);
        assert!(second.triggered_actions.is_empty());
    }

    #[test]
    fn snapshot_wire_shape() {
        let st = state(65.0);
        let json = serde_json::to_value(st.snapshot()).unwrap();
        for key in [
            "timestamp",
            "sensors",
            "isWatering",
            "manualMode",
            "wateringEvents",
            "config",
            "triggeredActions",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["sensors"]["soilMoisture"], 65.0);
        assert_eq!(json["sensors"]["pH"], 6.8);
        assert_eq!(json["config"]["soilMoisture"]["optimalMin"], 70.0);
        assert!(json.get("activeProfile").is_none());
    }
}
