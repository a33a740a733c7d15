//! Pure trigger planning: feed schedule + current instant + site timezone
//! in, first fire instants out. No I/O happens here.
use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use super::types::{
    weekday_from_index, Recurrence, Schedule, ScheduleError, TimeOfDay, TriggerArgs,
};
use crate::storage::FeedConfig;

/// A trigger the registry should register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTrigger {
    pub first_fire: DateTime<Utc>,
    pub recurrence: Recurrence,
    pub args: TriggerArgs,
}

/// Compute the triggers for one feed.
///
/// - `none`: nothing.
/// - `interval`: one trigger firing at `now`, repeating at the named interval.
/// - `time`: one daily trigger at the next occurrence of the time strictly after `now`.
/// - `weekly`: one weekly trigger per enabled weekday and time, each at the next
///   instance of that weekday and time strictly after `now` (today counts when
///   the time is still ahead).
///
/// # Errors
///
/// Unknown interval names and unparseable times fail the whole feed so that
/// a half-applied schedule is never registered.
pub fn plan_triggers(
    feed: &FeedConfig,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<PlannedTrigger>, ScheduleError> {
    match &feed.schedule {
        Schedule::None => Ok(Vec::new()),
        Schedule::Unreadable(reason) => Err(ScheduleError::Unreadable(reason.clone())),
        Schedule::Interval { interval } => {
            let recurrence = Recurrence::from_interval_name(interval)?;
            Ok(vec![PlannedTrigger {
                first_fire: now,
                recurrence,
                args: TriggerArgs::Interval { feed_id: feed.id },
            }])
        }
        Schedule::Time { time } => {
            let time: TimeOfDay = time.parse()?;
            Ok(vec![PlannedTrigger {
                first_fire: next_daily(now, tz, time)?,
                recurrence: Recurrence::Daily,
                args: TriggerArgs::Daily { feed_id: feed.id },
            }])
        }
        Schedule::Weekly { days } => {
            let mut planned = Vec::new();
            for (&day, slot) in days {
                if !slot.enabled {
                    continue;
                }
                let Some(weekday) = weekday_from_index(day) else {
                    tracing::warn!(feed_id = feed.id, day = day, "Ignoring out-of-range weekday index");
                    continue;
                };
                for time in &slot.times {
                    let time: TimeOfDay = time.parse()?;
                    planned.push(PlannedTrigger {
                        first_fire: next_weekly(now, tz, weekday, time)?,
                        recurrence: Recurrence::Weekly,
                        args: TriggerArgs::Weekly {
                            feed_id: feed.id,
                            day,
                            time: time.to_string(),
                        },
                    });
                }
            }
            Ok(planned)
        }
    }
}

/// Next instant after `now` whose site-local wall clock reads `time`.
pub fn next_daily(now: DateTime<Utc>, tz: Tz, time: TimeOfDay) -> Result<DateTime<Utc>, ScheduleError> {
    let today = now.with_timezone(&tz).date_naive();
    let candidate = resolve_local(tz, today.and_time(time.as_naive()))?;
    if candidate > now {
        return Ok(candidate);
    }
    resolve_local(tz, add_days(today, 1)?.and_time(time.as_naive()))
}

/// Next instant after `now` falling on `weekday` at `time`, site-local.
pub fn next_weekly(
    now: DateTime<Utc>,
    tz: Tz,
    weekday: Weekday,
    time: TimeOfDay,
) -> Result<DateTime<Utc>, ScheduleError> {
    let today = now.with_timezone(&tz).date_naive();
    let target = weekday.num_days_from_sunday();
    let current = today.weekday().num_days_from_sunday();
    let ahead = (7 + target - current) % 7;

    let date = add_days(today, u64::from(ahead))?;
    let candidate = resolve_local(tz, date.and_time(time.as_naive()))?;
    if candidate > now {
        return Ok(candidate);
    }
    resolve_local(tz, add_days(date, 7)?.and_time(time.as_naive()))
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate, ScheduleError> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| ScheduleError::NonexistentLocalTime(date.to_string()))
}

/// Map a site-local wall-clock time to UTC.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// spring-forward gap move forward by one hour.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Result<DateTime<Utc>, ScheduleError> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(local + TimeDelta::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| ScheduleError::NonexistentLocalTime(local.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::WeekdaySlot;
    use chrono::Timelike;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn feed(schedule: Schedule) -> FeedConfig {
        FeedConfig {
            id: 3,
            url: "https://x/feed.xml".to_string(),
            category_id: None,
            tags: Vec::new(),
            schedule,
        }
    }

    fn local(tz: Tz, s: &str) -> DateTime<Utc> {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        tz.from_local_datetime(&naive).unwrap().with_timezone(&Utc)
    }

    fn weekly(days: &[(u8, bool, &[&str])]) -> Schedule {
        let days: BTreeMap<u8, WeekdaySlot> = days
            .iter()
            .map(|(day, enabled, times)| {
                (
                    *day,
                    WeekdaySlot {
                        enabled: *enabled,
                        times: times.iter().map(|t| t.to_string()).collect(),
                    },
                )
            })
            .collect();
        Schedule::Weekly { days }
    }

    #[test]
    fn test_none_schedules_nothing() {
        let now = local(Tz::UTC, "2024-01-01 08:00:00");
        assert!(plan_triggers(&feed(Schedule::None), now, Tz::UTC)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_interval_fires_now() {
        let now = local(Tz::UTC, "2024-01-01 08:00:00");
        let planned = plan_triggers(
            &feed(Schedule::Interval {
                interval: "every6hours".into(),
            }),
            now,
            Tz::UTC,
        )
        .unwrap();
        assert_eq!(
            planned,
            vec![PlannedTrigger {
                first_fire: now,
                recurrence: Recurrence::Every6Hours,
                args: TriggerArgs::Interval { feed_id: 3 },
            }]
        );
    }

    #[test]
    fn test_unknown_interval_is_config_error() {
        let now = Utc::now();
        let result = plan_triggers(
            &feed(Schedule::Interval {
                interval: "monthly".into(),
            }),
            now,
            Tz::UTC,
        );
        assert_eq!(result, Err(ScheduleError::UnknownInterval("monthly".into())));
    }

    #[test]
    fn test_time_already_passed_rolls_to_tomorrow() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let now = local(tz, "2024-01-01 08:00:00");
        let planned = plan_triggers(&feed(Schedule::Time { time: "07:00".into() }), now, tz).unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].first_fire, local(tz, "2024-01-02 07:00:00"));
        assert_eq!(planned[0].recurrence, Recurrence::Daily);
        assert_eq!(planned[0].args, TriggerArgs::Daily { feed_id: 3 });
    }

    #[test]
    fn test_time_later_today_stays_today() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let now = local(tz, "2024-01-01 06:59:00");
        let planned = plan_triggers(&feed(Schedule::Time { time: "07:00".into() }), now, tz).unwrap();
        assert_eq!(planned[0].first_fire, local(tz, "2024-01-01 07:00:00"));
    }

    #[test]
    fn test_time_equal_to_now_rolls_to_tomorrow() {
        let now = local(Tz::UTC, "2024-01-01 07:00:00");
        let first = next_daily(now, Tz::UTC, "07:00".parse().unwrap()).unwrap();
        assert_eq!(first, local(Tz::UTC, "2024-01-02 07:00:00"));
    }

    #[test]
    fn test_time_uses_site_timezone_not_utc() {
        // 23:30 UTC on Jan 1 is already 08:30 on Jan 2 in Tokyo
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let now = local(Tz::UTC, "2024-01-01 23:30:00");
        let first = next_daily(now, tz, "09:00".parse().unwrap()).unwrap();
        assert_eq!(first, local(tz, "2024-01-02 09:00:00"));
    }

    #[test]
    fn test_invalid_time_is_config_error() {
        let result = plan_triggers(
            &feed(Schedule::Time {
                time: "25:99".into(),
            }),
            Utc::now(),
            Tz::UTC,
        );
        assert!(matches!(result, Err(ScheduleError::InvalidTime(_))));
    }

    #[test]
    fn test_daily_inside_dst_gap_moves_forward() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 2024-03-10 02:30 does not exist in New York
        let now = local(tz, "2024-03-10 00:00:00");
        let first = next_daily(now, tz, "02:30".parse().unwrap()).unwrap();
        let local_first = first.with_timezone(&tz);
        assert_eq!(local_first.hour(), 3);
        assert_eq!(local_first.minute(), 30);
    }

    #[test]
    fn test_weekly_counts_enabled_times_only() {
        // 2024-01-01 is a Monday
        let now = local(Tz::UTC, "2024-01-01 12:00:00");
        let schedule = weekly(&[
            (0, true, &["07:00", "19:00"][..]),
            (1, false, &["07:00"][..]),
            (3, true, &["08:15"][..]),
            (5, true, &[] as &[&str]),
        ]);
        let planned = plan_triggers(&feed(schedule), now, Tz::UTC).unwrap();
        assert_eq!(planned.len(), 3);
        assert!(planned.iter().all(|p| p.recurrence == Recurrence::Weekly));
        assert_eq!(
            planned[2].args,
            TriggerArgs::Weekly {
                feed_id: 3,
                day: 3,
                time: "08:15".into()
            }
        );
        assert_eq!(planned[0].first_fire, local(Tz::UTC, "2024-01-07 07:00:00"));
        assert_eq!(planned[2].first_fire, local(Tz::UTC, "2024-01-03 08:15:00"));
    }

    #[test]
    fn test_weekly_same_day_future_time_is_today() {
        let now = local(Tz::UTC, "2024-01-01 06:00:00");
        let first = next_weekly(now, Tz::UTC, Weekday::Mon, "07:00".parse().unwrap()).unwrap();
        assert_eq!(first, local(Tz::UTC, "2024-01-01 07:00:00"));
    }

    #[test]
    fn test_weekly_same_day_past_time_is_next_week() {
        let now = local(Tz::UTC, "2024-01-01 08:00:00");
        let first = next_weekly(now, Tz::UTC, Weekday::Mon, "07:00".parse().unwrap()).unwrap();
        assert_eq!(first, local(Tz::UTC, "2024-01-08 07:00:00"));
    }

    #[test]
    fn test_weekly_bad_time_fails_feed() {
        let now = Utc::now();
        let result = plan_triggers(&feed(weekly(&[(2, true, &["07:00", "nope"][..])])), now, Tz::UTC);
        assert!(matches!(result, Err(ScheduleError::InvalidTime(_))));
    }

    fn arb_now() -> impl Strategy<Value = DateTime<Utc>> {
        // 2020-01-01 .. 2030-01-01
        (1_577_836_800i64..1_893_456_000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap())
    }

    proptest! {
        #[test]
        fn prop_interval_first_fire_is_now(now in arb_now(), idx in 0usize..5) {
            let names = ["every15min", "hourly", "every6hours", "twicedaily", "daily"];
            let planned = plan_triggers(
                &feed(Schedule::Interval { interval: names[idx].to_string() }),
                now,
                Tz::UTC,
            ).unwrap();
            prop_assert_eq!(planned.len(), 1);
            prop_assert_eq!(planned[0].first_fire, now);
            prop_assert_eq!(planned[0].recurrence.name(), names[idx]);
        }

        #[test]
        fn prop_daily_is_next_occurrence(now in arb_now(), h in 0u32..24, m in 0u32..60) {
            let time: TimeOfDay = format!("{h:02}:{m:02}").parse().unwrap();
            let first = next_daily(now, Tz::UTC, time).unwrap();
            prop_assert!(first > now);
            prop_assert!(first - now <= TimeDelta::days(1));
            prop_assert_eq!(first.hour(), h);
            prop_assert_eq!(first.minute(), m);
        }

        #[test]
        fn prop_weekly_lands_on_weekday(now in arb_now(), day in 0u8..7, h in 0u32..24) {
            let time: TimeOfDay = format!("{h:02}:00").parse().unwrap();
            let weekday = weekday_from_index(day).unwrap();
            let first = next_weekly(now, Tz::UTC, weekday, time).unwrap();
            prop_assert!(first > now);
            prop_assert!(first - now <= TimeDelta::days(7));
            prop_assert_eq!(first.weekday(), weekday);
            prop_assert_eq!(first.hour(), h);
        }

        #[test]
        fn prop_weekly_entry_count(flags in proptest::collection::vec((any::<bool>(), 0usize..4), 7)) {
            let mut days = BTreeMap::new();
            let mut expected = 0;
            for (i, (enabled, n)) in flags.iter().enumerate() {
                let times: Vec<String> = (0..*n).map(|k| format!("{:02}:00", k + 6)).collect();
                if *enabled {
                    expected += times.len();
                }
                days.insert(i as u8, WeekdaySlot { enabled: *enabled, times });
            }
            let planned = plan_triggers(&feed(Schedule::Weekly { days }), Utc::now(), Tz::UTC).unwrap();
            prop_assert_eq!(planned.len(), expected);
        }
    }
}
