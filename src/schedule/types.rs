use chrono::{NaiveTime, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Hook every feed trigger is registered under.
pub const IMPORT_HOOK: &str = "podcast_import";

/// Time used when a daily or weekly slot is left empty.
pub const DEFAULT_TIME: &str = "07:00";

/// Interval used when an interval schedule is saved without one.
pub const DEFAULT_INTERVAL: &str = "hourly";

// ============================================================================
// Error Types
// ============================================================================

/// Invalid schedule configuration for a single feed.
///
/// Raised by the schedule calculator; the registry skips the offending feed
/// and keeps scheduling the others.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Unknown interval name: {0:?}")]
    UnknownInterval(String),

    #[error("Invalid time of day: {0:?} (expected HH:MM)")]
    InvalidTime(String),

    #[error("Invalid weekday schedule: {0}")]
    InvalidWeekdaySpec(String),

    #[error("Local time {0} does not exist in the site timezone")]
    NonexistentLocalTime(String),

    #[error("Stored schedule could not be read: {0}")]
    Unreadable(String),
}

// ============================================================================
// Schedule Configuration
// ============================================================================

/// How often a feed is fetched.
///
/// Only the active variant carries a payload. Interval names and times are
/// kept as entered and validated when triggers are planned, so a bad value
/// only disables that one feed's schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    None,
    Interval {
        interval: String,
    },
    Time {
        time: String,
    },
    Weekly {
        /// Keyed by weekday index, Sunday = 0. Stored as a list of
        /// `{day, enabled, times}` entries.
        #[serde(with = "weekday_entries")]
        days: BTreeMap<u8, WeekdaySlot>,
    },
    /// A stored schedule that no longer deserializes. Never written back.
    #[serde(skip)]
    Unreadable(String),
}

impl Schedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::None => "none",
            Schedule::Interval { .. } => "interval",
            Schedule::Time { .. } => "time",
            Schedule::Weekly { .. } => "weekly",
            Schedule::Unreadable(_) => "unreadable",
        }
    }

    /// Apply save-time defaults: blank interval/time fall back to the
    /// defaults and every weekday slot keeps at least one time.
    pub fn normalized(self) -> Self {
        match self {
            Schedule::None => Schedule::None,
            Schedule::Interval { interval } => {
                let interval = interval.trim();
                Schedule::Interval {
                    interval: if interval.is_empty() {
                        DEFAULT_INTERVAL.to_string()
                    } else {
                        interval.to_string()
                    },
                }
            }
            Schedule::Time { time } => {
                let time = time.trim();
                Schedule::Time {
                    time: if time.is_empty() {
                        DEFAULT_TIME.to_string()
                    } else {
                        time.to_string()
                    },
                }
            }
            Schedule::Weekly { days } => Schedule::Weekly {
                days: days
                    .into_iter()
                    .map(|(day, slot)| (day, slot.normalized()))
                    .collect(),
            },
            Schedule::Unreadable(reason) => Schedule::Unreadable(reason),
        }
    }

    /// Parse the compact weekly form used on the command line:
    /// `sun=07:00,19:00;wed=08:00`. Day names or indexes (0 = Sunday) are accepted.
    pub fn parse_weekly(text: &str) -> Result<Self, ScheduleError> {
        let mut days = BTreeMap::new();
        for part in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (day, times) = part
                .split_once('=')
                .ok_or_else(|| ScheduleError::InvalidWeekdaySpec(part.to_string()))?;
            let index = parse_day(day.trim())
                .ok_or_else(|| ScheduleError::InvalidWeekdaySpec(part.to_string()))?;
            let times = times
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| t.parse::<TimeOfDay>().map(|tod| tod.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            days.insert(
                index,
                WeekdaySlot {
                    enabled: true,
                    times,
                }
                .normalized(),
            );
        }
        if days.is_empty() {
            return Err(ScheduleError::InvalidWeekdaySpec(text.to_string()));
        }
        Ok(Schedule::Weekly { days })
    }
}

/// Weekly slots serialized as a sequence. Internally tagged enums buffer
/// their content, and buffered map keys only come back as strings.
mod weekday_entries {
    use super::WeekdaySlot;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct EntryRef<'a> {
        day: u8,
        enabled: bool,
        times: &'a [String],
    }

    #[derive(Deserialize)]
    struct Entry {
        day: u8,
        enabled: bool,
        #[serde(default)]
        times: Vec<String>,
    }

    pub fn serialize<S: Serializer>(
        days: &BTreeMap<u8, WeekdaySlot>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(days.iter().map(|(day, slot)| EntryRef {
            day: *day,
            enabled: slot.enabled,
            times: &slot.times,
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<u8, WeekdaySlot>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| {
                (
                    e.day,
                    WeekdaySlot {
                        enabled: e.enabled,
                        times: e.times,
                    },
                )
            })
            .collect())
    }
}

fn parse_day(s: &str) -> Option<u8> {
    if let Ok(index) = s.parse::<u8>() {
        return (index < 7).then_some(index);
    }
    s.parse::<Weekday>()
        .ok()
        .map(|w| w.num_days_from_sunday() as u8)
}

/// One weekday's entry in a weekly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdaySlot {
    pub enabled: bool,
    pub times: Vec<String>,
}

impl WeekdaySlot {
    pub fn normalized(self) -> Self {
        let mut times: Vec<String> = self
            .times
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if times.is_empty() {
            times.push(DEFAULT_TIME.to_string());
        }
        Self {
            enabled: self.enabled,
            times,
        }
    }
}

/// Map a weekday index (Sunday = 0) to a chrono weekday.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

// ============================================================================
// Time of Day
// ============================================================================

/// Validated 24h `HH:MM` wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    /// Accepts `H`, `H:MM` and `HH:MM`; a missing minute means `:00`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTime(s.to_string());
        let trimmed = s.trim();
        let (hour, minute) = match trimmed.split_once(':') {
            Some((h, m)) => (h, m),
            None => (trimmed, "0"),
        };
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(TimeOfDay)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

// ============================================================================
// Recurrence
// ============================================================================

/// Repeat period of a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Every15Min,
    Hourly,
    Every6Hours,
    TwiceDaily,
    Daily,
    Weekly,
}

impl Recurrence {
    pub fn name(&self) -> &'static str {
        match self {
            Recurrence::Every15Min => "every15min",
            Recurrence::Hourly => "hourly",
            Recurrence::Every6Hours => "every6hours",
            Recurrence::TwiceDaily => "twicedaily",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
        }
    }

    pub fn period(&self) -> TimeDelta {
        let secs = match self {
            Recurrence::Every15Min => 900,
            Recurrence::Hourly => 3_600,
            Recurrence::Every6Hours => 21_600,
            Recurrence::TwiceDaily => 43_200,
            Recurrence::Daily => 86_400,
            Recurrence::Weekly => 604_800,
        };
        TimeDelta::seconds(secs)
    }

    /// Resolve a name selectable for interval schedules.
    ///
    /// `weekly` is reserved for weekday schedules and is rejected here.
    pub fn from_interval_name(name: &str) -> Result<Self, ScheduleError> {
        match name.parse::<Recurrence>()? {
            Recurrence::Weekly => Err(ScheduleError::UnknownInterval(name.to_string())),
            r => Ok(r),
        }
    }
}

impl FromStr for Recurrence {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "every15min" => Ok(Recurrence::Every15Min),
            "hourly" => Ok(Recurrence::Hourly),
            "every6hours" => Ok(Recurrence::Every6Hours),
            "twicedaily" => Ok(Recurrence::TwiceDaily),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            other => Err(ScheduleError::UnknownInterval(other.to_string())),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Trigger Arguments
// ============================================================================

/// Argument tuple distinguishing one scheduled import from another.
///
/// Carries the feed's immutable id plus the mode-specific sub-key. The
/// canonical key is what the scheduler deduplicates on and what the import
/// lock hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerArgs {
    Interval { feed_id: i64 },
    Daily { feed_id: i64 },
    Weekly { feed_id: i64, day: u8, time: String },
    Manual { feed_id: i64 },
}

impl TriggerArgs {
    pub fn feed_id(&self) -> i64 {
        match self {
            TriggerArgs::Interval { feed_id }
            | TriggerArgs::Daily { feed_id }
            | TriggerArgs::Weekly { feed_id, .. }
            | TriggerArgs::Manual { feed_id } => *feed_id,
        }
    }

    pub fn canonical_key(&self) -> String {
        match self {
            TriggerArgs::Interval { feed_id } => format!("interval:{feed_id}"),
            TriggerArgs::Daily { feed_id } => format!("daily:{feed_id}"),
            TriggerArgs::Weekly { feed_id, day, time } => format!("weekly:{feed_id}:{day}:{time}"),
            TriggerArgs::Manual { feed_id } => format!("manual:{feed_id}"),
        }
    }
}

impl fmt::Display for TriggerArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}
