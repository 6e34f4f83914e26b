//! JSON messages exchanged with dashboard clients (WebSocket and MQTT).
//!
//! Every inbound message is an object tagged by `type`.  Anything that does
//! not parse into a [`Command`] is logged and dropped by the caller.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::automation::AutomationRules;
use crate::db::Profile;
use crate::scheduler::{Schedule, SchedulerStatus};
use crate::thresholds::{ConfigUpdate, Settings, ThresholdsPatch};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    ConfigUpdate {
        #[serde(default)]
        settings: Option<Settings>,
        #[serde(default)]
        thresholds: Option<ThresholdsPatch>,
    },
    ManualWatering {
        action: ManualAction,
    },
    SwitchProfile {
        profile_id: String,
    },
    GetProfiles,
    SaveProfile {
        profile: Profile,
    },
    DeleteProfile {
        profile_id: String,
    },
    GetSchedules,
    SaveSchedule {
        schedule: Schedule,
    },
    DeleteSchedule {
        schedule_id: String,
    },
    SetSchedulerEnabled {
        enabled: bool,
    },
}

impl Command {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigUpdate { .. } => "configUpdate",
            Self::ManualWatering { .. } => "manualWatering",
            Self::SwitchProfile { .. } => "switchProfile",
            Self::GetProfiles => "getProfiles",
            Self::SaveProfile { .. } => "saveProfile",
            Self::DeleteProfile { .. } => "deleteProfile",
            Self::GetSchedules => "getSchedules",
            Self::SaveSchedule { .. } => "saveSchedule",
            Self::DeleteSchedule { .. } => "deleteSchedule",
            Self::SetSchedulerEnabled { .. } => "setSchedulerEnabled",
        }
    }
}

/// Normalize a `configUpdate` payload.  `settings` wins over a top-level
/// `thresholds` when it carries any update of its own; an empty `settings`
/// falls through to `thresholds`.
pub fn config_updates(
    settings: Option<Settings>,
    thresholds: Option<ThresholdsPatch>,
) -> Vec<ConfigUpdate> {
    let from_settings = settings.map(Settings::into_updates).unwrap_or_default();
    match thresholds {
        Some(t) if from_settings.is_empty() => vec![ConfigUpdate::Extended(t)],
        Some(_) => {
            debug!("configUpdate carries settings and thresholds; ignoring top-level thresholds");
            from_settings
        }
        None => from_settings,
    }
}

pub fn parse_command(payload: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(payload)
}

// ---------------------------------------------------------------------------
// Outbound (non-snapshot)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    Profiles {
        data: Vec<Profile>,
        automation_rules: AutomationRules,
    },
    ProfileSaved {
        success: bool,
        profile: Profile,
    },
    ProfileDeleted {
        success: bool,
        profile_id: String,
    },
    Schedules {
        data: SchedulerStatus,
    },
    ScheduleSaved {
        success: bool,
        schedule: Schedule,
    },
    ScheduleDeleted {
        success: bool,
        schedule_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Command {
        parse_command(s.as_bytes()).unwrap()
    }

    #[test]
    fn parses_manual_watering() {
        assert!(matches!(
            parse(r#"{"type":"manualWatering","action":"start"}"#),
            Command::ManualWatering {
                action: ManualAction::Start
            }
        ));
    }

    #[test]
    fn unknown_action_or_type_is_an_error() {
        assert!(parse_command(br#"{"type":"manualWatering","action":"pause"}"#).is_err());
        assert!(parse_command(br#"{"type":"reboot"}"#).is_err());
        assert!(parse_command(b"not json").is_err());
    }

    #[test]
    fn parses_camel_case_ids() {
        match parse(r#"{"type":"switchProfile","profileId":"tomato"}"#) {
            Command::SwitchProfile { profile_id } => assert_eq!(profile_id, "tomato"),
            other => panic!("unexpected {other:?}"),
        }
        match parse(r#"{"type":"deleteSchedule","scheduleId":"m"}"#) {
            Command::DeleteSchedule { schedule_id } => assert_eq!(schedule_id, "m"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn legacy_settings_normalize() {
        let Command::ConfigUpdate {
            settings,
            thresholds,
        } = parse(
            r#"{"type":"configUpdate","settings":{"minThreshold":50,"optimalMin":60,"optimalMax":70}}"#,
        )
        else {
            panic!("not a configUpdate");
        };
        let updates = config_updates(settings, thresholds);
        assert_eq!(
            updates,
            vec![ConfigUpdate::Legacy {
                min: 50.0,
                optimal_min: Some(60.0),
                optimal_max: Some(70.0),
            }]
        );
    }

    #[test]
    fn top_level_thresholds_normalize() {
        let Command::ConfigUpdate {
            settings,
            thresholds,
        } = parse(r#"{"type":"configUpdate","thresholds":{"soilPH":{"min":5.5}}}"#)
        else {
            panic!("not a configUpdate");
        };
        let updates = config_updates(settings, thresholds);
        assert_eq!(updates.len(), 1);
        assert!(matches!(&updates[0], ConfigUpdate::Extended(p) if p.soil_ph.is_some()));
    }

    #[test]
    fn empty_config_update_yields_nothing() {
        let Command::ConfigUpdate {
            settings,
            thresholds,
        } = parse(r#"{"type":"configUpdate"}"#)
        else {
            panic!("not a configUpdate");
        };
        assert!(config_updates(settings, thresholds).is_empty());
    }

    #[test]
    fn reply_tags_and_field_names() {
        let json = serde_json::to_value(Reply::ProfileDeleted {
            success: true,
            profile_id: "x".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "profileDeleted");
        assert_eq!(json["profileId"], "x");

        let json = serde_json::to_value(Reply::Profiles {
            data: vec![],
            automation_rules: AutomationRules::new(),
        })
        .unwrap();
        assert_eq!(json["type"], "profiles");
        assert!(json["automationRules"].is_object());
    }

    #[test]
    fn empty_settings_fall_through_to_thresholds() {
        let Command::ConfigUpdate {
            settings,
            thresholds,
        } = parse(r#"{"type":"configUpdate","settings":{},"thresholds":{"soilPH":{"max":7.5}}}"#)
        else {
            panic!("not a configUpdate");
        };
        let updates = config_updates(settings, thresholds);
        assert_eq!(updates.len(), 1);
        assert!(matches!(&updates[0], ConfigUpdate::Extended(p) if p.soil_ph.is_some()));
    }

    #[test]
    fn non_empty_settings_win_over_thresholds() {
        let Command::ConfigUpdate {
            settings,
            thresholds,
        } = parse(
            r#"{"type":"configUpdate","settings":{"minThreshold":40},"thresholds":{"soilPH":{"max":7.5}}}"#,
        )
        else {
            panic!("not a configUpdate");
        };
        let updates = config_updates(settings, thresholds);
        assert_eq!(updates.len(), 1);
        assert!(matches!(updates[0], ConfigUpdate::Legacy { min, .. } if min == 40.0));
    }
}
