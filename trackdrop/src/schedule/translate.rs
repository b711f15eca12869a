//! Local-to-UTC recurrence translation
//!
//! A naive hour-offset subtraction gets day-of-week wraparound and DST
//! wrong, so translation instead materializes the next concrete
//! occurrence of the local schedule and reads the UTC triple off that
//! instant. The result is correct for the current DST regime; the
//! registry re-translates on every resync, so a DST transition is
//! picked up the next time any schedule changes.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// A weekly recurrence expressed in UTC. `day_of_week` is 0 = Monday,
/// matching the user-facing convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcRecurrence {
    pub minute: u32,
    pub hour: u32,
    pub day_of_week: u32,
}

/// Translate a weekly recurrence from `tz_name` local time to UTC,
/// anchored at `reference` (the next occurrence strictly after it).
///
/// An unknown timezone name is logged and the triple passed through
/// unchanged, so a corrupted setting degrades to "treat as UTC" rather
/// than failing the whole resync.
pub fn translate(
    minute: u32,
    hour: u32,
    day_of_week: u32,
    tz_name: &str,
    reference: DateTime<Utc>,
) -> UtcRecurrence {
    let Ok(tz) = Tz::from_str(tz_name) else {
        warn!(timezone = tz_name, "Unknown timezone, scheduling in UTC");
        return UtcRecurrence {
            minute,
            hour,
            day_of_week: day_of_week % 7,
        };
    };

    let occurrence = next_occurrence(minute, hour, day_of_week % 7, tz, reference);
    UtcRecurrence {
        minute: occurrence.minute(),
        hour: occurrence.hour(),
        day_of_week: occurrence.weekday().num_days_from_monday(),
    }
}

fn next_occurrence(
    minute: u32,
    hour: u32,
    day_of_week: u32,
    tz: Tz,
    reference: DateTime<Utc>,
) -> DateTime<Utc> {
    let local_now = reference.with_timezone(&tz);
    let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0)
        .unwrap_or(NaiveTime::MIN);

    // Scan the next eight days; eight rather than seven so that a
    // schedule landing earlier today still resolves to next week.
    for offset in 0..8 {
        let date = local_now.date_naive() + Duration::days(offset);
        if date.weekday().num_days_from_monday() != day_of_week {
            continue;
        }
        let candidate = match tz.from_local_datetime(&date.and_time(time)) {
            LocalResult::Single(dt) => dt,
            // Fall-back transition: the wall time exists twice, run at
            // the first.
            LocalResult::Ambiguous(earlier, _) => earlier,
            // Spring-forward gap: the wall time does not exist, slide
            // forward until one does.
            LocalResult::None => match first_valid_after(date.and_time(time), tz) {
                Some(dt) => dt,
                None => continue,
            },
        };
        let candidate = candidate.with_timezone(&Utc);
        if candidate > reference {
            return candidate;
        }
    }

    // Unreachable for any real timezone; keep the schedule stable
    // regardless.
    reference
}

fn first_valid_after(naive: chrono::NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    // DST gaps are at most an hour on every zone chrono-tz ships, but
    // scan a few hours to stay safe.
    for minutes in (15..=180).step_by(15) {
        match tz.from_local_datetime(&(naive + Duration::minutes(minutes))) {
            LocalResult::Single(dt) => return Some(dt),
            LocalResult::Ambiguous(earlier, _) => return Some(earlier),
            LocalResult::None => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn eastern_winter_is_utc_plus_five() {
        // Monday 22:00 EST = Tuesday 03:00 UTC.
        let r = translate(0, 22, 0, "US/Eastern", at(2024, 1, 10, 12));
        assert_eq!(
            r,
            UtcRecurrence {
                minute: 0,
                hour: 3,
                day_of_week: 1
            }
        );
    }

    #[test]
    fn eastern_summer_is_utc_plus_four() {
        // Monday 22:00 EDT = Tuesday 02:00 UTC.
        let r = translate(0, 22, 0, "US/Eastern", at(2024, 7, 10, 12));
        assert_eq!(
            r,
            UtcRecurrence {
                minute: 0,
                hour: 2,
                day_of_week: 1
            }
        );
    }

    #[test]
    fn eastward_zone_wraps_day_backward() {
        // Monday 02:00 in Tokyo is Sunday 17:00 UTC.
        let r = translate(30, 2, 0, "Asia/Tokyo", at(2024, 7, 10, 12));
        assert_eq!(
            r,
            UtcRecurrence {
                minute: 30,
                hour: 17,
                day_of_week: 6
            }
        );
    }

    #[test]
    fn utc_schedule_passes_through() {
        let r = translate(15, 8, 3, "UTC", at(2024, 7, 10, 12));
        assert_eq!(
            r,
            UtcRecurrence {
                minute: 15,
                hour: 8,
                day_of_week: 3
            }
        );
    }

    #[test]
    fn unknown_timezone_passes_through() {
        let r = translate(5, 6, 2, "Mars/Olympus", at(2024, 7, 10, 12));
        assert_eq!(
            r,
            UtcRecurrence {
                minute: 5,
                hour: 6,
                day_of_week: 2
            }
        );
    }

    #[test]
    fn spring_forward_gap_slides_to_next_valid_time() {
        // 2024-03-10 02:30 does not exist in US/Eastern (clocks jump
        // 02:00 -> 03:00). Sunday is day 6. The occurrence resolves to
        // 03:00 EDT = 07:00 UTC on Sunday.
        let r = translate(30, 2, 6, "US/Eastern", at(2024, 3, 9, 12));
        assert_eq!(r.day_of_week, 6);
        assert_eq!(r.hour, 7);
        assert_eq!(r.minute, 0);
    }

    #[test]
    fn minute_is_preserved_across_whole_hour_offsets() {
        let r = translate(45, 9, 4, "Europe/Berlin", at(2024, 1, 10, 12));
        assert_eq!(r.minute, 45);
    }
}
