//! System cron table maintenance
//!
//! Recurring downloads run through the host cron daemon rather than an
//! in-process timer, so they survive restarts of the service. The
//! registry owns one file under `/etc/cron.d/` and rewrites it
//! wholesale on every resync from the full set of enabled user
//! schedules. Removal is implicit: a disabled schedule simply does not
//! appear in the next rendering.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use trackdrop_common::{Error, Result};

use crate::store::StateStore;

use super::translate;

/// One rendered cron line. `user` is `None` for the catch-all default
/// that runs every user's playlist in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronEntry {
    minute: u32,
    hour: u32,
    /// 0 = Monday, converted to cron's 0 = Sunday at render time.
    day_of_week: u32,
    user: Option<String>,
}

impl CronEntry {
    fn render(&self, binary: &str, out: &mut String) {
        let cron_dow = (self.day_of_week + 1) % 7;
        match &self.user {
            Some(user) => {
                let _ = writeln!(
                    out,
                    "{} {} * * {} root {} run --user {}",
                    self.minute, self.hour, cron_dow, binary, user
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "{} {} * * {} root {} run",
                    self.minute, self.hour, cron_dow, binary
                );
            }
        }
    }
}

/// The full contents of the managed cron file.
#[derive(Debug, Clone)]
pub struct CronTable {
    entries: Vec<CronEntry>,
    binary: String,
}

impl CronTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Managed by trackdrop; edits are overwritten on resync.\n");
        out.push_str("SHELL=/bin/sh\n");
        out.push_str("PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n\n");
        for entry in &self.entries {
            entry.render(&self.binary, &mut out);
        }
        out
    }
}

/// Rewrites the managed cron file from persisted user schedules.
pub struct RecurringJobRegistry {
    store: Arc<StateStore>,
    crontab_path: PathBuf,
    binary: PathBuf,
}

impl RecurringJobRegistry {
    pub fn new(store: Arc<StateStore>, crontab_path: PathBuf, binary: PathBuf) -> Self {
        Self {
            store,
            crontab_path,
            binary,
        }
    }

    /// Rebuild and install the cron table from current user settings.
    pub fn resync(&self) -> Result<CronTable> {
        self.resync_at(trackdrop_common::time::now())
    }

    /// As [`resync`](Self::resync), with an explicit translation anchor.
    pub fn resync_at(&self, reference: DateTime<Utc>) -> Result<CronTable> {
        let table = self.build_table(reference)?;
        self.install(&table)?;
        info!(
            path = %self.crontab_path.display(),
            entries = table.len(),
            "Cron table resynced"
        );
        Ok(table)
    }

    fn build_table(&self, reference: DateTime<Utc>) -> Result<CronTable> {
        let mut entries = Vec::new();
        for username in self.store.list_users()? {
            let state = self.store.read_user(&username)?;
            let s = &state.settings;
            if !s.cron_enabled {
                debug!(username, "Schedule disabled, skipping");
                continue;
            }
            let utc = translate(s.cron_minute, s.cron_hour, s.cron_day, &s.cron_timezone, reference);
            entries.push(CronEntry {
                minute: utc.minute,
                hour: utc.hour,
                day_of_week: utc.day_of_week,
                user: Some(username),
            });
        }

        // With no per-user schedules, keep one weekly catch-all so a
        // fresh install still refreshes playlists (Monday 00:00 UTC).
        if entries.is_empty() {
            entries.push(CronEntry {
                minute: 0,
                hour: 0,
                day_of_week: 0,
                user: None,
            });
        }

        Ok(CronTable {
            entries,
            binary: self.binary.display().to_string(),
        })
    }

    /// Atomic replacement: write a sibling temp file, then rename over
    /// the managed path. cron.d files must not be observed half-written.
    fn install(&self, table: &CronTable) -> Result<()> {
        let tmp = self.crontab_path.with_extension("tmp");
        fs::write(&tmp, table.render()).map_err(|e| {
            Error::Store(format!(
                "writing cron table {}: {e}",
                self.crontab_path.display()
            ))
        })?;
        fs::rename(&tmp, &self.crontab_path).map_err(|e| {
            Error::Store(format!(
                "installing cron table {}: {e}",
                self.crontab_path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> RecurringJobRegistry {
        let store = Arc::new(StateStore::open(dir.path().join("data")).unwrap());
        RecurringJobRegistry::new(
            store,
            dir.path().join("trackdrop.cron"),
            PathBuf::from("/usr/local/bin/trackdrop"),
        )
    }

    fn winter_reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_store_installs_the_default_entry() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        let table = reg.resync_at(winter_reference()).unwrap();
        assert_eq!(table.len(), 1);

        let rendered = fs::read_to_string(dir.path().join("trackdrop.cron")).unwrap();
        // Monday 00:00 UTC, cron day 1, no --user scope.
        assert!(rendered.contains("0 0 * * 1 root /usr/local/bin/trackdrop run\n"));
        assert!(!rendered.contains("--user"));
    }

    #[test]
    fn enabled_users_get_scoped_entries() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        reg.store
            .mutate("alice", |s| {
                s.settings.cron_enabled = true;
                s.settings.cron_minute = 30;
                s.settings.cron_hour = 22;
                s.settings.cron_day = 0; // Monday
                s.settings.cron_timezone = "US/Eastern".to_string();
            })
            .unwrap();
        reg.store
            .mutate("bob", |s| {
                s.settings.cron_enabled = true;
                s.settings.cron_hour = 8;
                s.settings.cron_day = 4; // Friday
                s.settings.cron_timezone = "UTC".to_string();
            })
            .unwrap();

        let table = reg.resync_at(winter_reference()).unwrap();
        assert_eq!(table.len(), 2);

        let rendered = fs::read_to_string(dir.path().join("trackdrop.cron")).unwrap();
        // Monday 22:30 EST = Tuesday 03:30 UTC = cron day 2.
        assert!(rendered.contains("30 3 * * 2 root /usr/local/bin/trackdrop run --user alice\n"));
        // Friday 08:00 UTC = cron day 5.
        assert!(rendered.contains("0 8 * * 5 root /usr/local/bin/trackdrop run --user bob\n"));
        // No default entry once real schedules exist.
        assert!(!rendered.contains("* * 1 root /usr/local/bin/trackdrop run\n"));
    }

    #[test]
    fn disabled_users_are_omitted() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        reg.store
            .mutate("carol", |s| {
                s.settings.cron_enabled = false;
            })
            .unwrap();

        let table = reg.resync_at(winter_reference()).unwrap();
        assert_eq!(table.len(), 1, "falls back to the default entry");
        let rendered = fs::read_to_string(dir.path().join("trackdrop.cron")).unwrap();
        assert!(!rendered.contains("carol"));
    }

    #[test]
    fn sunday_renders_as_cron_day_zero() {
        let entry = CronEntry {
            minute: 5,
            hour: 6,
            day_of_week: 6, // Sunday in the 0 = Monday convention
            user: None,
        };
        let mut out = String::new();
        entry.render("/bin/trackdrop", &mut out);
        assert_eq!(out, "5 6 * * 0 root /bin/trackdrop run\n");
    }
}
