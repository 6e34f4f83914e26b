//! Applies client commands to the controller and fans results out.
//!
//! A command produces at most one direct reply (returned to the caller,
//! which sends it to the requesting client only) and any number of
//! broadcasts (pushed onto the snapshot channel every client listens on).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::db::Db;
use crate::protocol::{config_updates, parse_command, Command, ManualAction, Reply};
use crate::scheduler::{parse_hhmm, Scheduler};
use crate::state::SharedState;

/// Broadcast channel depth.  Slow clients skip what they miss.
pub const BROADCAST_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct Hub {
    pub state: SharedState,
    pub scheduler: Scheduler,
    pub db: Db,
    broadcasts: broadcast::Sender<String>,
}

impl Hub {
    pub fn new(state: SharedState, scheduler: Scheduler, db: Db) -> Self {
        let (broadcasts, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state,
            scheduler,
            db,
            broadcasts,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcasts.subscribe()
    }

    /// Fire-and-forget fan-out.  No receivers is not an error.
    pub fn publish(&self, msg: String) {
        let _ = self.broadcasts.send(msg);
    }

    pub async fn snapshot_json(&self) -> Option<String> {
        let snap = self.state.read().await.snapshot();
        to_json(&snap)
    }

    pub async fn publish_snapshot(&self) {
        if let Some(msg) = self.snapshot_json().await {
            self.publish(msg);
        }
    }

    /// Parse and apply one raw client message.  Returns the direct reply, if
    /// any.  Malformed input is logged and dropped.
    pub async fn dispatch(&self, payload: &[u8]) -> Option<String> {
        match parse_command(payload) {
            Ok(cmd) => self.handle(cmd).await,
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "ignoring malformed command"
                );
                None
            }
        }
    }

    pub async fn handle(&self, cmd: Command) -> Option<String> {
        debug!(kind = cmd.kind(), "command");
        match cmd {
            Command::ConfigUpdate {
                settings,
                thresholds,
            } => {
                let updates = config_updates(settings, thresholds);
                self.state.write().await.apply_config(&updates);
                self.publish_snapshot().await;
                None
            }

            Command::ManualWatering { action } => {
                {
                    let mut st = self.state.write().await;
                    let changed = match action {
                        ManualAction::Start => st.start_manual(),
                        ManualAction::Stop => st.stop_manual(),
                    };
                    debug!(?action, changed, actuator = ?st.actuator(), "manual command applied");
                }
                self.publish_snapshot().await;
                None
            }

            Command::SwitchProfile { profile_id } => {
                match self.db.get_profile(&profile_id).await {
                    Ok(Some(p)) => {
                        self.state
                            .write()
                            .await
                            .apply_profile(&p.id, &p.thresholds);
                        info!(profile = %p.id, name = %p.name, icon = %p.icon, "switched profile");
                    }
                    Ok(None) => warn!(profile = %profile_id, "switchProfile: unknown profile"),
                    Err(e) => error!(profile = %profile_id, "switchProfile: {e:#}"),
                }
                self.publish_snapshot().await;
                None
            }

            Command::GetProfiles => match self.profiles_reply().await {
                Ok(reply) => to_json(&reply),
                Err(e) => {
                    error!("getProfiles: {e:#}");
                    None
                }
            },

            Command::SaveProfile { mut profile } => {
                profile.builtin = false;
                if profile.thresholds.is_empty() {
                    warn!(profile = %profile.id, "saving profile without thresholds");
                }
                let success = match self.db.get_profile(&profile.id).await {
                    Ok(Some(existing)) if existing.builtin => {
                        warn!(profile = %profile.id, "refusing to overwrite builtin profile");
                        false
                    }
                    Ok(_) => match self.db.upsert_profile(&profile).await {
                        Ok(()) => {
                            info!(profile = %profile.id, "profile saved");
                            true
                        }
                        Err(e) => {
                            error!("saveProfile: {e:#}");
                            false
                        }
                    },
                    Err(e) => {
                        error!("saveProfile: {e:#}");
                        false
                    }
                };

                if success {
                    match self.profiles_reply().await {
                        Ok(list) => {
                            if let Some(msg) = to_json(&list) {
                                self.publish(msg);
                            }
                        }
                        Err(e) => error!("saveProfile: reload failed: {e:#}"),
                    }
                }
                to_json(&Reply::ProfileSaved { success, profile })
            }

            Command::DeleteProfile { profile_id } => {
                let success = match self.db.delete_profile(&profile_id).await {
                    Ok(removed) => {
                        if removed {
                            info!(profile = %profile_id, "profile deleted");
                        } else {
                            warn!(profile = %profile_id, "deleteProfile: unknown or builtin");
                        }
                        removed
                    }
                    Err(e) => {
                        error!("deleteProfile: {e:#}");
                        false
                    }
                };
                to_json(&Reply::ProfileDeleted {
                    success,
                    profile_id,
                })
            }

            Command::GetSchedules => to_json(&Reply::Schedules {
                data: self.scheduler.status().await,
            }),

            Command::SaveSchedule { schedule } => {
                let success = if parse_hhmm(&schedule.time).is_none() {
                    warn!(id = %schedule.id, time = %schedule.time, "saveSchedule: bad time");
                    false
                } else {
                    match self.db.upsert_schedule(&schedule).await {
                        Ok(()) => {
                            self.scheduler.upsert(schedule.clone()).await;
                            true
                        }
                        Err(e) => {
                            error!("saveSchedule: {e:#}");
                            false
                        }
                    }
                };
                to_json(&Reply::ScheduleSaved { success, schedule })
            }

            Command::DeleteSchedule { schedule_id } => {
                let stored = match self.db.delete_schedule(&schedule_id).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        error!("deleteSchedule: {e:#}");
                        false
                    }
                };
                let live = self.scheduler.delete(&schedule_id).await;
                to_json(&Reply::ScheduleDeleted {
                    success: stored || live,
                    schedule_id,
                })
            }

            Command::SetSchedulerEnabled { enabled } => {
                self.scheduler.set_enabled(enabled).await;
                if let Some(msg) = to_json(&Reply::Schedules {
                    data: self.scheduler.status().await,
                }) {
                    self.publish(msg);
                }
                None
            }
        }
    }

    async fn profiles_reply(&self) -> anyhow::Result<Reply> {
        Ok(Reply::Profiles {
            data: self.db.load_profiles().await?,
            automation_rules: self.db.load_automation_rules().await?,
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("serialize outbound message: {e}");
            None
        }
    }
}
