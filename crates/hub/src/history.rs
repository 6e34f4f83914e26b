//! Day-bounded log of completed watering episodes.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::watering::Trigger;

/// One closed watering episode.  Immutable once logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WateringEvent {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub duration_seconds: i64,
    pub moisture_start: f64,
    pub moisture_end: f64,
    /// Authority that opened the episode.
    pub trigger: Trigger,
}

/// Append-only within a day; anything that did not start on the current
/// local calendar day is dropped after each append.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<WateringEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: WateringEvent, now: DateTime<Local>) {
        self.events.push(event);
        let today = now.date_naive();
        self.events.retain(|e| e.start.date_naive() == today);
    }

    pub fn events(&self) -> &[WateringEvent] {
        &self.events
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn event(start: DateTime<Local>) -> WateringEvent {
        WateringEvent {
            start,
            end: start + Duration::minutes(5),
            duration_seconds: 300,
            moisture_start: 58.0,
            moisture_end: 71.0,
            trigger: Trigger::Autonomous,
        }
    }

    #[test]
    fn keeps_events_from_today() {
        let mut log = EventLog::new();
        log.append(event(at(10, 7)), at(10, 7));
        log.append(event(at(10, 12)), at(10, 12));
        assert_eq!(log.events().len(), 2);
    }

    #[test]
    fn purges_yesterday_on_next_append() {
        let mut log = EventLog::new();
        log.append(event(at(9, 22)), at(9, 22));
        log.append(event(at(10, 6)), at(10, 6));
        assert_eq!(log.events().len(), 1);
        assert_eq!(log.events()[0].start, at(10, 6));
    }

    #[test]
    fn episode_spanning_midnight_is_dropped_once_the_day_rolls() {
        let mut log = EventLog::new();
        // Started yesterday, closed just after midnight.
        log.append(event(at(9, 23)), at(10, 0));
        assert!(log.events().is_empty());
    }

    #[test]
    fn every_event_left_starts_today() {
        let mut log = EventLog::new();
        for (day, hour) in [(8, 9), (9, 1), (9, 23), (10, 3), (10, 4)] {
            log.append(event(at(day, hour)), at(day, hour));
            let today = at(day, hour).date_naive();
            assert!(log.events().iter().all(|e| e.start.date_naive() == today));
        }
        assert_eq!(log.events().len(), 2);
    }

    #[test]
    fn serializes_with_dashboard_keys() {
        let json = serde_json::to_value(event(at(10, 7))).unwrap();
        assert_eq!(json["durationSeconds"], 300);
        assert_eq!(json["moistureStart"], 58.0);
        assert_eq!(json["trigger"], "autonomous");
        assert!(json["start"].is_string());
    }
}
