//! Watering actuator state machine.
//!
//! ```text
//! Idle ──[moisture <= min | manual start | schedule fire]──────────▶ Watering
//!  ▲                                                                    │
//!  └──[moisture >= optimal_min | manual stop | schedule stop timer]─────┘
//! ```
//!
//! The moisture arcs are the autonomous path and only run while manual mode
//! is off.  Manual and schedule transitions go through [`start`] / [`stop`],
//! which are idempotent: starting while watering or stopping while idle does
//! nothing and logs no event.
//!
//! [`start`]: WateringStateMachine::start
//! [`stop`]: WateringStateMachine::stop

use chrono::{DateTime, Local};
use irrigation_sim::{round_to, MoistureEnvelope};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::history::{EventLog, WateringEvent};

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Autonomous,
    Manual,
    Schedule,
}

#[derive(Debug, Clone, PartialEq)]
enum Valve {
    Idle,
    Watering {
        since: DateTime<Local>,
        moisture_at_start: f64,
        trigger: Trigger,
        episode: u64,
    },
}

/// Flat view of the actuator.  `episode_start` is `Some` exactly when
/// `is_on` is true; the enum behind it makes any other combination
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorState {
    pub is_on: bool,
    pub manual_mode: bool,
    pub episode_start: Option<DateTime<Local>>,
    pub moisture_at_start: Option<f64>,
}

/// Outcome of an autonomous step that changed state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Started { episode: u64 },
    Stopped(WateringEvent),
}

pub struct WateringStateMachine {
    valve: Valve,
    manual_mode: bool,
    next_episode: u64,
    log: EventLog,
}

impl Default for WateringStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl WateringStateMachine {
    pub fn new() -> Self {
        Self {
            valve: Valve::Idle,
            manual_mode: false,
            next_episode: 1,
            log: EventLog::new(),
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self.valve, Valve::Watering { .. })
    }

    pub fn manual_mode(&self) -> bool {
        self.manual_mode
    }

    /// Id of the open episode, if watering.
    pub fn current_episode(&self) -> Option<u64> {
        match self.valve {
            Valve::Watering { episode, .. } => Some(episode),
            Valve::Idle => None,
        }
    }

    pub fn actuator(&self) -> ActuatorState {
        match &self.valve {
            Valve::Idle => ActuatorState {
                is_on: false,
                manual_mode: self.manual_mode,
                episode_start: None,
                moisture_at_start: None,
            },
            Valve::Watering {
                since,
                moisture_at_start,
                ..
            } => ActuatorState {
                is_on: true,
                manual_mode: self.manual_mode,
                episode_start: Some(*since),
                moisture_at_start: Some(*moisture_at_start),
            },
        }
    }

    pub fn events(&self) -> &[WateringEvent] {
        self.log.events()
    }

    /// Open an episode.  Returns the new episode id, or `None` if already
    /// watering.
    pub fn start(&mut self, trigger: Trigger, now: DateTime<Local>, moisture: f64) -> Option<u64> {
        if self.is_on() {
            debug!(?trigger, "start ignored: already watering");
            return None;
        }

        let episode = self.next_episode;
        self.next_episode += 1;
        self.valve = Valve::Watering {
            since: now,
            moisture_at_start: round_to(moisture, 1),
            trigger,
            episode,
        };

        info!(?trigger, episode, moisture = round_to(moisture, 1), "watering started");
        Some(episode)
    }

    /// Close the open episode and log it.  Returns the logged event, or
    /// `None` if already idle.
    pub fn stop(
        &mut self,
        trigger: Trigger,
        now: DateTime<Local>,
        moisture: f64,
    ) -> Option<WateringEvent> {
        let Valve::Watering {
            since,
            moisture_at_start,
            trigger: opened_by,
            episode,
        } = std::mem::replace(&mut self.valve, Valve::Idle)
        else {
            debug!(?trigger, "stop ignored: already idle");
            return None;
        };

        let elapsed_ms = (now - since).num_milliseconds();
        let event = WateringEvent {
            start: since,
            end: now,
            duration_seconds: (elapsed_ms as f64 / 1000.0).round() as i64,
            moisture_start: moisture_at_start,
            moisture_end: round_to(moisture, 1),
            trigger: opened_by,
        };

        info!(
            ?trigger,
            episode,
            moisture = round_to(moisture, 1),
            duration_sec = event.duration_seconds,
            "watering stopped"
        );

        self.log.append(event.clone(), now);
        Some(event)
    }

    /// Moisture hysteresis: start at or below `min`, stop at or above
    /// `optimal_min`.  Does nothing in manual mode.
    pub fn autonomous_step(
        &mut self,
        now: DateTime<Local>,
        moisture: f64,
        envelope: &MoistureEnvelope,
    ) -> Option<Transition> {
        if self.manual_mode {
            return None;
        }

        if self.is_on() {
            if moisture >= envelope.optimal_min {
                return self
                    .stop(Trigger::Autonomous, now, moisture)
                    .map(Transition::Stopped);
            }
        } else if moisture <= envelope.min {
            return self
                .start(Trigger::Autonomous, now, moisture)
                .map(|episode| Transition::Started { episode });
        }
        None
    }

    /// Operator takes over and opens the valve.
    pub fn start_manual(&mut self, now: DateTime<Local>, moisture: f64) -> Option<u64> {
        if !self.manual_mode {
            info!("manual mode on");
        }
        self.manual_mode = true;
        self.start(Trigger::Manual, now, moisture)
    }

    /// Operator hands control back and closes the valve.
    pub fn stop_manual(&mut self, now: DateTime<Local>, moisture: f64) -> Option<WateringEvent> {
        if self.manual_mode {
            info!("manual mode off");
        }
        self.manual_mode = false;
        self.stop(Trigger::Manual, now, moisture)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
