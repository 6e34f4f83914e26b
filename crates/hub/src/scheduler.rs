//! Time-of-day watering scheduler.
//!
//! While enabled, a background task checks the schedule list once a minute.
//! A schedule fires when it is enabled, today is one of its days and the
//! current `HH:MM` equals its time.  Firing opens an episode (or adopts the
//! one already running) and arms a one-shot stop `duration` seconds later.
//!
//! Missed minutes are not caught up: a pause that spans a schedule's minute
//! skips that day's run.  A schedule fires at most once per matching minute,
//! even if the scheduler is toggled off and on within it.
//!
//! ## Deferred stops
//!
//! Each stop is an abortable task keyed by schedule id.  Firing the same
//! schedule again replaces its pending stop.  The stop remembers the episode
//! it armed for; if manual commands closed that episode and opened another in
//! the meantime, the stop still closes whatever is running and logs the
//! mismatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::SharedState;
use crate::watering::Trigger;

/// How often the enabled scheduler compares the clock against the schedules.
const CHECK_INTERVAL_SEC: u64 = 60;

// ---------------------------------------------------------------------------
// Schedule model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<Weekday> for Day {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
            Weekday::Sun => Day::Sunday,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    /// 24h `HH:MM`.
    pub time: String,
    pub days: Vec<Day>,
    /// Seconds the valve stays open once fired.
    #[serde(alias = "durationSeconds")]
    pub duration: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Schedule {
    /// Parsed time of day, or `None` if `time` is not a valid `HH:MM`.
    pub fn at(&self) -> Option<NaiveTime> {
        parse_hhmm(&self.time)
    }

    fn matches(&self, now: &DateTime<Local>) -> bool {
        self.enabled
            && self.days.contains(&Day::from(now.weekday()))
            && self
                .at()
                .is_some_and(|t| t.hour() == now.hour() && t.minute() == now.minute())
    }
}

/// Strict `HH:MM` (two digits each, 24h clock).
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

/// Schedules that fire at `now`.
pub fn due<'a>(schedules: &'a [Schedule], now: &DateTime<Local>) -> Vec<&'a Schedule> {
    schedules.iter().filter(|s| s.matches(now)).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub schedules: Vec<Schedule>,
}

// ---------------------------------------------------------------------------
// Scheduler handle
// ---------------------------------------------------------------------------

struct PendingStop {
    ticket: u64,
    handle: JoinHandle<()>,
}

/// Calendar minute a schedule last fired in.
type FiredAt = (NaiveDate, u32, u32);

fn minute_of(now: &DateTime<Local>) -> FiredAt {
    (now.date_naive(), now.hour(), now.minute())
}

struct Inner {
    enabled: bool,
    schedules: Vec<Schedule>,
    check_task: Option<JoinHandle<()>>,
    pending: HashMap<String, PendingStop>,
    next_ticket: u64,
    last_fired: HashMap<String, FiredAt>,
}

/// Cheap to clone; all clones share one schedule list and one set of
/// pending stops.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
    state: SharedState,
    changed: Arc<Notify>,
}

impl Scheduler {
    pub fn new(state: SharedState, schedules: Vec<Schedule>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                enabled: false,
                schedules,
                check_task: None,
                pending: HashMap::new(),
                next_ticket: 1,
                last_fired: HashMap::new(),
            })),
            state,
            changed: Arc::new(Notify::new()),
        }
    }

    /// Signalled whenever the scheduler changes the actuator on its own
    /// (fire or deferred stop).
    pub fn changed(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let inner = self.inner.lock().await;
        SchedulerStatus {
            enabled: inner.enabled,
            schedules: inner.schedules.clone(),
        }
    }

    #[cfg(test)]
    pub async fn is_enabled(&self) -> bool {
        self.inner.lock().await.enabled
    }

    /// Add or replace by id.
    pub async fn upsert(&self, schedule: Schedule) {
        let mut inner = self.inner.lock().await;
        match inner.schedules.iter_mut().find(|s| s.id == schedule.id) {
            Some(existing) => {
                info!(id = %schedule.id, "schedule updated");
                *existing = schedule;
            }
            None => {
                info!(id = %schedule.id, "schedule added");
                inner.schedules.push(schedule);
            }
        }
    }

    /// Remove by id.  A stop already armed by this schedule still runs.
    pub async fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.schedules.len();
        inner.schedules.retain(|s| s.id != id);
        let removed = inner.schedules.len() != before;
        inner.last_fired.remove(id);
        if removed {
            info!(id, "schedule deleted");
        }
        removed
    }

    /// Start or stop the once-a-minute check.  Enabling checks immediately.
    /// Setting the current value again is a no-op.
    pub async fn set_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock().await;
        if inner.enabled == enabled {
            debug!(enabled, "scheduler already in requested state");
            return;
        }
        inner.enabled = enabled;

        if enabled {
            let this = self.clone();
            inner.check_task = Some(tokio::spawn(async move { this.check_loop().await }));
            info!(interval_sec = CHECK_INTERVAL_SEC, "scheduler enabled");
        } else {
            if let Some(task) = inner.check_task.take() {
                task.abort();
            }
            info!("scheduler disabled");
        }
    }

    async fn check_loop(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(CHECK_INTERVAL_SEC));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.check_at(Local::now()).await;
        }
    }

    /// Fire everything due at `now` that has not already fired this minute,
    /// if enabled.  Returns how many fired.
    pub async fn check_at(&self, now: DateTime<Local>) -> usize {
        let minute = minute_of(&now);
        let firing: Vec<Schedule> = {
            let mut inner = self.inner.lock().await;
            if !inner.enabled {
                return 0;
            }
            let fresh: Vec<Schedule> = due(&inner.schedules, &now)
                .into_iter()
                .filter(|s| inner.last_fired.get(&s.id) != Some(&minute))
                .cloned()
                .collect();
            for s in &fresh {
                inner.last_fired.insert(s.id.clone(), minute);
            }
            fresh
        };

        for schedule in &firing {
            info!(id = %schedule.id, time = %schedule.time, "schedule triggered");
            self.fire(schedule).await;
        }
        firing.len()
    }

    /// Open (or adopt) an episode and arm the stop for `schedule`.
    pub async fn fire(&self, schedule: &Schedule) {
        let episode = {
            let mut st = self.state.write().await;
            match st.start(Trigger::Schedule) {
                Some(ep) => Some(ep),
                None => {
                    debug!(
                        id = %schedule.id,
                        "already watering; stop timer adopts running episode"
                    );
                    st.current_episode()
                }
            }
        };
        self.changed.notify_one();

        let mut inner = self.inner.lock().await;
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;

        let handle = tokio::spawn(deferred_stop(
            self.clone(),
            schedule.id.clone(),
            ticket,
            episode,
            Duration::from_secs(schedule.duration),
        ));

        if let Some(old) = inner
            .pending
            .insert(schedule.id.clone(), PendingStop { ticket, handle })
        {
            old.handle.abort();
            debug!(id = %schedule.id, "replaced pending stop");
        }
    }

    /// Number of armed, not yet elapsed stops.
    #[cfg(test)]
    pub async fn pending_stops(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Stop the periodic check and abandon every pending stop.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.check_task.take() {
            task.abort();
        }
        let abandoned = inner.pending.len();
        for (_, stop) in inner.pending.drain() {
            stop.handle.abort();
        }
        info!(abandoned, "scheduler shut down");
    }
}

async fn deferred_stop(
    sched: Scheduler,
    id: String,
    ticket: u64,
    armed_for: Option<u64>,
    after: Duration,
) {
    tokio::time::sleep(after).await;

    {
        let mut st = sched.state.write().await;
        let running = st.current_episode();
        match st.stop(Trigger::Schedule) {
            Some(ev) if running == armed_for => {
                info!(id, duration_sec = ev.duration_seconds, "scheduled watering completed");
            }
            Some(_) => {
                warn!(
                    id,
                    armed_for = ?armed_for,
                    closed = ?running,
                    "scheduled stop closed an episode it did not open"
                );
            }
            None => {
                info!(id, "scheduled stop found valve already closed");
            }
        }
    }
    sched.changed.notify_one();

    let mut inner = sched.inner.lock().await;
    if inner.pending.get(&id).map(|p| p.ticket) == Some(ticket) {
        inner.pending.remove(&id);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
