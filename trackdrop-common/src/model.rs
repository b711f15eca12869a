//! Domain models shared across TrackDrop components
//!
//! The on-disk representation is one JSON document per user containing
//! settings, download history, pending-cleanup records, and monitored
//! playlists. These types define that document and the identities used
//! for duplicate suppression.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::text::normalize;

/// Current on-disk document version.
pub const STATE_VERSION: u32 = 1;

/// Normalized (artist, title, album) identity of a track.
///
/// Duplicate suppression keys on all three fields: source catalogs
/// disagree on numeric ids, and the same title on a different album is
/// a different track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackKey {
    pub artist: String,
    pub title: String,
    pub album: String,
}

impl TrackKey {
    pub fn new(artist: &str, title: &str, album: &str) -> Self {
        Self {
            artist: normalize(artist),
            title: normalize(title),
            album: normalize(album),
        }
    }

    /// Stable string form used as a JSON map key for pending-cleanup
    /// records.
    pub fn map_key(&self) -> String {
        format!("{}::{}::{}", self.artist, self.title, self.album)
    }
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// A candidate track produced by a recommendation source or playlist
/// extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub artist: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Name of the source that produced this candidate (for history).
    #[serde(default)]
    pub source: String,
}

impl TrackDescriptor {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            album: None,
            source: String::new(),
        }
    }

    pub fn key(&self) -> TrackKey {
        TrackKey::new(&self.artist, &self.title, self.album.as_deref().unwrap_or(""))
    }

    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Outcome of one track within a download batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOutcome {
    Downloaded,
    SkippedDuplicate,
    Failed,
}

/// One entry in a user's download history. Append-only; cleanup purges
/// entries whose underlying file it deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub key: TrackKey,
    /// Display names as reported by the source (un-normalized).
    pub artist: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub outcome: DownloadOutcome,
    pub source_job_id: Uuid,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

/// A downloaded track awaiting a rating signal before a keep/delete
/// decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCleanupRecord {
    pub key: TrackKey,
    pub artist: String,
    pub title: String,
    pub file_path: PathBuf,
    pub added_at: DateTime<Utc>,
    /// Once elapsed, an unrated track is eligible for deletion.
    pub rating_deadline: DateTime<Utc>,
}

/// A user-registered external playlist polled on its own cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredPlaylist {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    /// Source platform ("deezer", "spotify", ...).
    pub platform: String,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_track_count: u32,
}

fn default_sync_interval() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

impl MonitoredPlaylist {
    pub fn new(url: impl Into<String>, name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            name: name.into(),
            platform: platform.into(),
            sync_interval_secs: default_sync_interval(),
            enabled: true,
            added_at: crate::time::now(),
            last_synced: None,
            last_track_count: 0,
        }
    }

    /// Whether this playlist is due for a sync at `now`. A playlist
    /// that has never synced is always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_synced {
            None => true,
            Some(last) => crate::time::secs_since(last, now) >= self.sync_interval_secs,
        }
    }
}

/// Per-user settings. Mutated only by the user-facing configuration
/// path; read by schedule translation and the cron registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listenbrainz_enabled: bool,
    pub listenbrainz_username: String,
    pub listenbrainz_token: String,
    pub lastfm_enabled: bool,
    pub lastfm_username: String,
    /// Recurrence minute (0-59).
    pub cron_minute: u32,
    /// Recurrence hour (0-23).
    pub cron_hour: u32,
    /// Recurrence day of week, 0 = Monday.
    pub cron_day: u32,
    /// IANA timezone name the recurrence is expressed in.
    pub cron_timezone: String,
    pub cron_enabled: bool,
    /// Which sources feed the user's playlist.
    pub playlist_sources: Vec<String>,
    pub first_time_setup_done: bool,
    pub display_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listenbrainz_enabled: false,
            listenbrainz_username: String::new(),
            listenbrainz_token: String::new(),
            lastfm_enabled: false,
            lastfm_username: String::new(),
            cron_minute: 0,
            cron_hour: 0,
            cron_day: 0,
            cron_timezone: "US/Eastern".to_string(),
            cron_enabled: false,
            playlist_sources: vec!["listenbrainz".to_string(), "lastfm".to_string()],
            first_time_setup_done: false,
            display_name: String::new(),
        }
    }
}

impl Settings {
    /// True if the user has kept `source` in their source list.
    pub fn source_allowed(&self, source: &str) -> bool {
        self.playlist_sources.iter().any(|s| s == source)
    }
}

/// The complete persisted state for one user. Exactly one of these per
/// username; components hold only transient copies obtained through the
/// state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserState {
    pub settings: Settings,
    pub history: Vec<DownloadRecord>,
    pub pending_cleanup: BTreeMap<String, PendingCleanupRecord>,
    pub monitored_playlists: Vec<MonitoredPlaylist>,
    #[serde(rename = "_version")]
    pub version: u32,
    #[serde(rename = "_created")]
    pub created: DateTime<Utc>,
    #[serde(rename = "_last_modified")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Default for UserState {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            history: Vec::new(),
            pending_cleanup: BTreeMap::new(),
            monitored_playlists: Vec::new(),
            version: STATE_VERSION,
            created: crate::time::now(),
            last_modified: None,
        }
    }
}

impl UserState {
    /// Album-aware duplicate check: true if the history holds a
    /// `Downloaded` record for exactly this (artist, title, album) key.
    pub fn has_downloaded(&self, key: &TrackKey) -> bool {
        self.history
            .iter()
            .any(|r| r.outcome == DownloadOutcome::Downloaded && &r.key == key)
    }

    pub fn playlist_mut(&mut self, id: Uuid) -> Option<&mut MonitoredPlaylist> {
        self.monitored_playlists.iter_mut().find(|p| p.id == id)
    }
}
