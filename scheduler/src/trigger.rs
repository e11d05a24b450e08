//! Named daily triggers, e.g. the minutes before each funding settlement.

use std::future::Future;

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::delay::sleep_until_wall;
use crate::error::ScheduleError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyTrigger {
    pub name: String,
    pub at: NaiveTime,
    pub tz: Tz,
}

#[derive(Debug, Deserialize)]
struct RawTrigger {
    name: String,
    at: String,
    #[serde(default)]
    timezone: Option<String>,
}

impl DailyTrigger {
    /// First firing strictly after `after`. Days where `at` falls into a DST
    /// gap are skipped.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_date = after.with_timezone(&self.tz).date_naive();

        (0..=2u64).find_map(|days| {
            let date = local_date.checked_add_days(Days::new(days))?;
            let fire = self
                .tz
                .from_local_datetime(&date.and_time(self.at))
                .earliest()?
                .with_timezone(&Utc);
            (fire > after).then_some(fire)
        })
    }
}

/// Parses `[{"name": "..", "at": "HH:MM:SS", "timezone": ".."}]`.
pub fn parse_triggers(json: &str, default_tz: Tz) -> Result<Vec<DailyTrigger>, ScheduleError> {
    let raw: Vec<RawTrigger> =
        serde_json::from_str(json).map_err(|e| ScheduleError::InvalidTriggers(e.to_string()))?;

    raw.into_iter()
        .map(|r| {
            let at = NaiveTime::parse_from_str(&r.at, "%H:%M:%S").map_err(|_| {
                ScheduleError::InvalidTime {
                    name: r.name.clone(),
                    value: r.at.clone(),
                }
            })?;
            let tz = match r.timezone {
                Some(name) => name
                    .parse::<Tz>()
                    .map_err(|_| ScheduleError::UnknownTimezone(name))?,
                None => default_tz,
            };
            Ok(DailyTrigger {
                name: r.name,
                at,
                tz,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct TriggerSchedule {
    triggers: Vec<DailyTrigger>,
}

impl TriggerSchedule {
    pub fn new(triggers: Vec<DailyTrigger>) -> Self {
        Self { triggers }
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn triggers(&self) -> &[DailyTrigger] {
        &self.triggers
    }

    /// Earliest trigger firing strictly after `after`.
    pub fn next(&self, after: DateTime<Utc>) -> Option<(&DailyTrigger, DateTime<Utc>)> {
        self.triggers
            .iter()
            .filter_map(|t| t.next_fire(after).map(|at| (t, at)))
            .min_by_key(|(_, at)| *at)
    }

    /// Fires `on_fire` at each trigger until `shutdown` flips to `true`.
    ///
    /// `on_fire` is awaited before the next trigger is computed, so runs never
    /// overlap and a trigger that passes while one is running is skipped.
    pub async fn run<C, F, Fut>(&self, clock: &C, mut shutdown: watch::Receiver<bool>, mut on_fire: F)
    where
        C: Clock,
        F: FnMut(DailyTrigger) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let Some((trigger, at)) = self.next(clock.now()) else {
                warn!("no upcoming triggers; schedule idle");
                return;
            };
            let trigger = trigger.clone();
            info!(trigger = %trigger.name, fire_at = %at.with_timezone(&trigger.tz), "next trigger scheduled");

            tokio::select! {
                _ = sleep_until_wall(clock, at) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("schedule stopped");
                        return;
                    }
                    continue;
                }
            }

            info!(trigger = %trigger.name, "trigger fired");
            on_fire(trigger).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::AnchoredClock;
    use chrono::Timelike;
    use chrono_tz::Asia::Kolkata;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_trigger_list_with_default_timezone() {
        let json = r#"[
            {"name": "funding-0530", "at": "05:29:00"},
            {"name": "funding-utc", "at": "07:59:00", "timezone": "UTC"}
        ]"#;
        let triggers = parse_triggers(json, Kolkata).unwrap();

        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].tz, Kolkata);
        assert_eq!(triggers[0].at.hour(), 5);
        assert_eq!(triggers[1].tz, chrono_tz::UTC);
    }

    #[test]
    fn invalid_trigger_entries_are_rejected() {
        assert!(matches!(
            parse_triggers(r#"[{"name":"x","at":"25:00:00"}]"#, Kolkata),
            Err(ScheduleError::InvalidTime { .. })
        ));
        assert!(matches!(
            parse_triggers(r#"[{"name":"x","at":"01:00:00","timezone":"Mars/Base"}]"#, Kolkata),
            Err(ScheduleError::UnknownTimezone(_))
        ));
        assert!(matches!(parse_triggers("{}", Kolkata), Err(ScheduleError::InvalidTriggers(_))));
    }

    #[test]
    fn next_fire_rolls_over_to_tomorrow() {
        let trigger = DailyTrigger {
            name: "t".into(),
            at: NaiveTime::from_hms_opt(5, 29, 0).unwrap(),
            tz: Kolkata,
        };

        // 05:29 IST == 23:59 UTC previous day
        assert_eq!(
            trigger.next_fire(utc("2025-03-10T12:00:00Z")).unwrap(),
            utc("2025-03-10T23:59:00Z")
        );
        assert_eq!(
            trigger.next_fire(utc("2025-03-10T23:59:00Z")).unwrap(),
            utc("2025-03-11T23:59:00Z")
        );
    }

    #[test]
    fn schedule_picks_earliest_trigger() {
        let schedule = TriggerSchedule::new(
            parse_triggers(
                r#"[{"name":"late","at":"18:00:00","timezone":"UTC"},{"name":"early","at":"13:00:00","timezone":"UTC"}]"#,
                Kolkata,
            )
            .unwrap(),
        );

        let (t, at) = schedule.next(utc("2025-03-10T12:00:00Z")).unwrap();
        assert_eq!(t.name, "early");
        assert_eq!(at, utc("2025-03-10T13:00:00Z"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_fires_in_order_then_stops() {
        let clock = AnchoredClock::new(utc("2025-03-10T12:59:59Z"));
        let schedule = TriggerSchedule::new(
            parse_triggers(
                r#"[{"name":"a","at":"13:00:00","timezone":"UTC"},{"name":"b","at":"13:00:02","timezone":"UTC"}]"#,
                Kolkata,
            )
            .unwrap(),
        );
        let fired = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let sink = fired.clone();
        schedule
            .run(&clock, stop_rx, |t| {
                let sink = sink.clone();
                let stop_tx = stop_tx.clone();
                async move {
                    let mut names = sink.lock().unwrap();
                    names.push(t.name.clone());
                    if names.len() == 2 {
                        stop_tx.send(true).unwrap();
                    }
                }
            })
            .await;

        assert_eq!(*fired.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_passing_during_a_run_is_skipped() {
        let clock = AnchoredClock::new(utc("2025-03-10T12:59:59Z"));
        let schedule = TriggerSchedule::new(
            parse_triggers(
                r#"[{"name":"a","at":"13:00:00","timezone":"UTC"},{"name":"b","at":"13:00:02","timezone":"UTC"}]"#,
                Kolkata,
            )
            .unwrap(),
        );
        let fired = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let sink = fired.clone();
        schedule
            .run(&clock, stop_rx, |t| {
                let sink = sink.clone();
                let stop_tx = stop_tx.clone();
                async move {
                    let first = {
                        let mut names = sink.lock().unwrap();
                        names.push(t.name.clone());
                        names.len() == 1
                    };
                    if first {
                        // long run spans trigger "b"
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    } else {
                        stop_tx.send(true).unwrap();
                    }
                }
            })
            .await;

        // "b" was skipped; the next firing is tomorrow's "a"
        assert_eq!(*fired.lock().unwrap(), vec!["a".to_string(), "a".to_string()]);
    }
}
