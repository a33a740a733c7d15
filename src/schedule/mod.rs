//! Feed fetch scheduling.
//!
//! - [`calculator`] turns one feed's schedule into first-fire instants in the
//!   site timezone (pure, no I/O)
//! - [`registry`] reconciles the host scheduler with the feed list by tearing
//!   down and rebuilding every trigger under the import hook
//! - [`types`] holds the schedule configuration, recurrence and argument tuple types

mod calculator;
mod registry;
mod types;

pub use calculator::{next_daily, next_weekly, plan_triggers, PlannedTrigger};
pub use registry::{RebuildReport, TriggerRegistry};
pub use types::{
    weekday_from_index, Recurrence, Schedule, ScheduleError, TimeOfDay, TriggerArgs, WeekdaySlot,
    DEFAULT_INTERVAL, DEFAULT_TIME, IMPORT_HOOK,
};
