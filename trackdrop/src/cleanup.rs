//! Rating-driven library cleanup
//!
//! Every download enters a pending-cleanup set with a rating deadline.
//! The processor consults the media library for each pending track and
//! decides per record: a starred track or one rated above the
//! protection threshold is kept (released from the set), a one-star
//! track is deleted immediately, and anything unrated or low-rated is
//! deleted once its deadline passes. Deleting a file also purges its
//! history entries, so the track can be downloaded again if it comes
//! back around.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use trackdrop_common::config::{CleanupConfig, CleanupPolicy};
use trackdrop_common::model::PendingCleanupRecord;
use trackdrop_common::Result;

use crate::store::StateStore;

/// Rating signals the media library holds for one track.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackAnnotation {
    /// 1-5 star rating, if the user has rated the track.
    pub rating: Option<u8>,
    pub starred: bool,
}

/// The subset of the media library the cleanup processor needs.
#[async_trait]
pub trait LibraryClient: Send + Sync {
    /// `None` when the library has no matching track.
    async fn track_annotation(
        &self,
        artist: &str,
        title: &str,
    ) -> anyhow::Result<Option<TrackAnnotation>>;

    /// Ask the library to rescan its media folders.
    async fn start_scan(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Files removed (history purged too).
    pub deleted: u32,
    /// Records released because the user kept the track.
    pub released: u32,
    /// Records still waiting on a rating or deadline.
    pub remaining: u32,
    /// Records whose library lookup failed; retried next run.
    pub failed: u32,
}

enum Decision {
    Keep,
    Release,
    Delete,
    Failed,
}

pub struct CleanupProcessor {
    store: Arc<StateStore>,
    library: Arc<dyn LibraryClient>,
    config: CleanupConfig,
}

impl CleanupProcessor {
    pub fn new(
        store: Arc<StateStore>,
        library: Arc<dyn LibraryClient>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            store,
            library,
            config,
        }
    }

    /// Process every pending-cleanup record for `username`. Library
    /// lookups happen before the store mutation, so the per-user lock
    /// is never held across network calls.
    pub async fn run(&self, username: &str) -> Result<CleanupResult> {
        if self.config.policy == CleanupPolicy::Disabled {
            debug!(username, "Cleanup disabled by policy");
            return Ok(CleanupResult::default());
        }

        let state = self.store.read_user(username)?;
        if state.pending_cleanup.is_empty() {
            return Ok(CleanupResult::default());
        }

        let now = trackdrop_common::time::now();
        let mut result = CleanupResult::default();
        let mut to_release = Vec::new();
        let mut to_delete = Vec::new();

        for (map_key, record) in &state.pending_cleanup {
            match self.decide(record, now).await {
                Decision::Release => {
                    info!(username, track = %record.key, "Track kept by user, releasing");
                    result.released += 1;
                    to_release.push(map_key.clone());
                }
                Decision::Delete => {
                    if delete_file(record) {
                        result.deleted += 1;
                        to_delete.push(map_key.clone());
                    } else {
                        result.failed += 1;
                    }
                }
                Decision::Keep => result.remaining += 1,
                Decision::Failed => result.failed += 1,
            }
        }

        if !to_release.is_empty() || !to_delete.is_empty() {
            let deleted_keys: Vec<_> = state
                .pending_cleanup
                .iter()
                .filter(|(k, _)| to_delete.contains(k))
                .map(|(_, r)| r.key.clone())
                .collect();
            self.store.mutate(username, move |state| {
                for k in &to_release {
                    state.pending_cleanup.remove(k);
                }
                for k in &to_delete {
                    state.pending_cleanup.remove(k);
                }
                // Purge history for deleted files so the track is
                // eligible for download again.
                state.history.retain(|r| !deleted_keys.contains(&r.key));
            })?;
        }

        if result.deleted > 0 {
            if let Err(e) = self.library.start_scan().await {
                warn!(error = %e, "Library rescan request failed");
            }
        }

        info!(
            username,
            deleted = result.deleted,
            released = result.released,
            remaining = result.remaining,
            failed = result.failed,
            "Cleanup pass complete"
        );
        Ok(result)
    }

    async fn decide(
        &self,
        record: &PendingCleanupRecord,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Decision {
        let annotation = match self
            .library
            .track_annotation(&record.artist, &record.title)
            .await
        {
            Ok(a) => a.unwrap_or_default(),
            Err(e) => {
                warn!(track = %record.key, error = %e, "Library lookup failed");
                return Decision::Failed;
            }
        };

        if annotation.starred {
            return Decision::Release;
        }
        match annotation.rating {
            Some(r) if r > self.config.protect_rating => Decision::Release,
            // An explicit one-star is a rejection; no need to wait.
            Some(1) => Decision::Delete,
            _ if now >= record.rating_deadline => Decision::Delete,
            _ => Decision::Keep,
        }
    }
}

/// Remove the file from disk. A file that is already gone counts as
/// deleted; any other I/O error leaves the record for the next run.
fn delete_file(record: &PendingCleanupRecord) -> bool {
    match std::fs::remove_file(&record.file_path) {
        Ok(()) => {
            info!(track = %record.key, path = %record.file_path.display(), "Deleted");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(track = %record.key, path = %record.file_path.display(),
                "File already gone, dropping record");
            true
        }
        Err(e) => {
            warn!(track = %record.key, error = %e, "Delete failed");
            false
        }
    }
}
