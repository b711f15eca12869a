//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds elapsed since `earlier`, saturating at zero for future timestamps.
pub fn secs_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - earlier).num_seconds().max(0) as u64
}

/// A whole number of days as a chrono duration.
pub fn days(n: i64) -> Duration {
    Duration::days(n)
}
