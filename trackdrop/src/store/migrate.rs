//! One-shot migration from the legacy scattered per-category files
//!
//! Earlier deployments persisted four separate files:
//! - `user_settings.json` (map of username to settings)
//! - `download_history_<user>.json` (map of source to track entries)
//! - `pending_cleanup.json` (map of source to track entries)
//! - `monitored_playlists.json` (flat list tagged with usernames)
//!
//! On first access to a username without a unified document, anything
//! found for that user in the legacy files is merged into one
//! `UserState`. The caller writes the result before releasing the
//! per-user lock, so migration runs at most once per username even
//! under concurrent first access. Legacy files are left in place,
//! superseded.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use trackdrop_common::model::{
    DownloadOutcome, DownloadRecord, MonitoredPlaylist, PendingCleanupRecord, Settings, TrackKey,
    UserState,
};
use trackdrop_common::Result;

#[derive(Debug, Deserialize)]
struct LegacyTrack {
    #[serde(default)]
    artist: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    added_at: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyPlaylist {
    /// Legacy ids were free-form strings; anything that is not a UUID
    /// gets a fresh one.
    #[serde(default)]
    id: Option<String>,
    url: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default = "default_poll_hours")]
    poll_interval_hours: u64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    added_at: Option<String>,
    #[serde(default)]
    last_synced: Option<String>,
    #[serde(default)]
    last_track_count: u32,
}

fn default_poll_hours() -> u64 {
    24
}

fn default_enabled() -> bool {
    true
}

/// Merge legacy data for one user. Returns `None` when no legacy file
/// holds anything for this username, so no document is created for
/// users that never existed.
pub(super) fn migrate_user(data_dir: &Path, username: &str) -> Result<Option<UserState>> {
    let mut state = UserState::default();
    let mut found = false;

    if let Some(settings) = legacy_settings(data_dir, username) {
        state.settings = settings;
        found = true;
    }
    if let Some(history) = legacy_history(data_dir, username) {
        state.history = history;
        found = true;
    }
    if let Some(pending) = legacy_pending_cleanup(data_dir, username) {
        state.pending_cleanup = pending;
        found = true;
    }
    if let Some(playlists) = legacy_playlists(data_dir, username) {
        state.monitored_playlists = playlists;
        found = true;
    }

    Ok(if found { Some(state) } else { None })
}

fn legacy_settings(data_dir: &Path, username: &str) -> Option<Settings> {
    let value = read_legacy_json(&data_dir.join("user_settings.json"))?;
    let entry = value.get(username)?.clone();
    match serde_json::from_value::<Settings>(entry) {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!(username, error = %e, "Skipping unreadable legacy settings entry");
            None
        }
    }
}

fn legacy_history(data_dir: &Path, username: &str) -> Option<Vec<DownloadRecord>> {
    let safe = username.replace(['/', '\\'], "_");
    let path = data_dir.join(format!("download_history_{safe}.json"));
    let value = read_legacy_json(&path)?;
    let by_source: BTreeMap<String, Vec<LegacyTrack>> = match serde_json::from_value(value) {
        Ok(map) => map,
        Err(e) => {
            warn!(username, error = %e, "Skipping unreadable legacy history file");
            return None;
        }
    };

    let job_id = Uuid::new_v4();
    let mut records = Vec::new();
    for (source, tracks) in by_source {
        for t in tracks {
            records.push(DownloadRecord {
                key: TrackKey::new(&t.artist, &t.title, t.album.as_deref().unwrap_or("")),
                artist: t.artist,
                title: t.title,
                album: t.album,
                timestamp: parse_timestamp(t.added_at.as_deref()),
                outcome: DownloadOutcome::Downloaded,
                source_job_id: job_id,
                source: source.clone(),
                file_path: t.file_path.map(Into::into),
            });
        }
    }
    records.sort_by_key(|r| r.timestamp);
    Some(records)
}

fn legacy_pending_cleanup(
    data_dir: &Path,
    username: &str,
) -> Option<BTreeMap<String, PendingCleanupRecord>> {
    let value = read_legacy_json(&data_dir.join("pending_cleanup.json"))?;
    // Two historical shapes: {"pending": {source: [...]}} and the older
    // bare {source: [...]}.
    let pending = value.get("pending").cloned().unwrap_or(value);
    let by_source: BTreeMap<String, Vec<LegacyTrack>> = match serde_json::from_value(pending) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "Skipping unreadable legacy pending-cleanup file");
            return None;
        }
    };

    let mut records = BTreeMap::new();
    for tracks in by_source.into_values() {
        for t in tracks {
            // The legacy file was shared; only entries tagged with this
            // username can be attributed safely.
            if t.username.as_deref() != Some(username) {
                continue;
            }
            let file_path = match &t.file_path {
                Some(p) => p.into(),
                None => {
                    warn!(artist = %t.artist, title = %t.title,
                        "Legacy pending-cleanup entry has no file path, dropping");
                    continue;
                }
            };
            let added_at = parse_timestamp(t.added_at.as_deref());
            let key = TrackKey::new(&t.artist, &t.title, t.album.as_deref().unwrap_or(""));
            records.insert(
                key.map_key(),
                PendingCleanupRecord {
                    key,
                    artist: t.artist,
                    title: t.title,
                    file_path,
                    added_at,
                    rating_deadline: added_at + trackdrop_common::time::days(14),
                },
            );
        }
    }
    if records.is_empty() {
        None
    } else {
        Some(records)
    }
}

fn legacy_playlists(data_dir: &Path, username: &str) -> Option<Vec<MonitoredPlaylist>> {
    let value = read_legacy_json(&data_dir.join("monitored_playlists.json"))?;
    let entries: Vec<LegacyPlaylist> = match serde_json::from_value(value) {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "Skipping unreadable legacy monitored-playlists file");
            return None;
        }
    };

    let playlists: Vec<MonitoredPlaylist> = entries
        .into_iter()
        .filter(|p| p.username.as_deref() == Some(username))
        .map(|p| MonitoredPlaylist {
            id: p
                .id
                .as_deref()
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_else(Uuid::new_v4),
            url: p.url,
            name: p.name,
            platform: p.platform,
            sync_interval_secs: p.poll_interval_hours * 3600,
            enabled: p.enabled,
            added_at: parse_timestamp(p.added_at.as_deref()),
            last_synced: p.last_synced.as_deref().map(|s| parse_timestamp(Some(s))),
            last_track_count: p.last_track_count,
        })
        .collect();

    if playlists.is_empty() {
        None
    } else {
        Some(playlists)
    }
}

fn read_legacy_json(path: &Path) -> Option<serde_json::Value> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed legacy file");
                None
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read legacy file");
            None
        }
    }
}

/// Legacy timestamps were written as naive local ISO strings; newer
/// ones carry an offset. Anything unparseable falls back to now.
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return trackdrop_common::time::now();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    trackdrop_common::time::now()
}
