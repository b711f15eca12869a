//! Schedule handling
//!
//! Users specify a weekly recurrence (minute, hour, day-of-week) in
//! their own IANA timezone. The host crontab runs in UTC, so
//! [`translate`] converts the local triple to its UTC equivalent and
//! [`registry::RecurringJobRegistry`] rewrites the system cron table
//! from the full set of enabled user schedules.

mod registry;
mod translate;

pub use registry::{CronTable, RecurringJobRegistry};
pub use translate::{translate, UtcRecurrence};
