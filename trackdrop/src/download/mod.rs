//! Download orchestration
//!
//! Takes a batch of candidate tracks for one user, suppresses
//! duplicates against that user's history, fetches the remainder with
//! bounded concurrency, and records every outcome in the user's state.
//! Each track's outcome is committed in its own store mutation, so a
//! crash mid-batch loses at most the in-flight tracks.

pub mod engine;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use trackdrop_common::config::{CleanupConfig, CleanupPolicy};
use trackdrop_common::model::{
    DownloadOutcome, DownloadRecord, PendingCleanupRecord, TrackDescriptor, TrackKey,
};
use trackdrop_common::text::sanitize_filename;
use trackdrop_common::{Error, Result};

use crate::store::StateStore;
use crate::tagger::Tagger;

use engine::DownloadEngine;

/// Per-track outcome within a [`BatchResult`].
#[derive(Debug, Clone)]
pub struct TrackStatus {
    pub track: TrackDescriptor,
    pub outcome: DownloadOutcome,
    pub error: Option<String>,
}

/// Summary of one orchestrated batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub job_id: Uuid,
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub tracks: Vec<TrackStatus>,
}

pub struct DownloadOrchestrator {
    store: Arc<StateStore>,
    engine: Arc<dyn DownloadEngine>,
    tagger: Arc<dyn Tagger>,
    temp_dir: PathBuf,
    music_dir: PathBuf,
    max_concurrent: usize,
    cleanup: CleanupConfig,
    // Tracks currently being fetched, across all batches sharing this
    // orchestrator. Keeps two overlapping batches from fetching the
    // same track for the same user.
    in_flight: std::sync::Mutex<HashSet<(String, TrackKey)>>,
}

impl DownloadOrchestrator {
    pub fn new(
        store: Arc<StateStore>,
        engine: Arc<dyn DownloadEngine>,
        tagger: Arc<dyn Tagger>,
        temp_dir: PathBuf,
        music_dir: PathBuf,
        max_concurrent: usize,
        cleanup: CleanupConfig,
    ) -> Self {
        Self {
            store,
            engine,
            tagger,
            temp_dir,
            music_dir,
            max_concurrent: max_concurrent.max(1),
            cleanup,
            in_flight: std::sync::Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, username: &str, key: &TrackKey) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert((username.to_string(), key.clone())),
            Err(_) => false,
        }
    }

    fn release(&self, username: &str, keys: &[TrackKey]) {
        if let Ok(mut set) = self.in_flight.lock() {
            for key in keys {
                set.remove(&(username.to_string(), key.clone()));
            }
        }
    }

    /// Fetch `candidates` for `username`. Duplicate suppression is
    /// album-aware: a track already downloaded from a different album
    /// is fetched again. The first store failure while recording
    /// outcomes is reported after the whole batch has run, so one bad
    /// write never abandons the remaining tracks.
    pub async fn run_batch(
        &self,
        username: &str,
        candidates: Vec<TrackDescriptor>,
    ) -> Result<BatchResult> {
        let job_id = Uuid::new_v4();
        let state = self.store.read_user(username)?;
        std::fs::create_dir_all(&self.temp_dir)?;
        std::fs::create_dir_all(&self.music_dir)?;

        let mut statuses = Vec::new();
        let mut to_fetch = Vec::new();
        let mut seen = HashSet::new();
        let mut claimed = Vec::new();
        for track in candidates {
            let key = track.key();
            if !seen.insert(key.clone()) || state.has_downloaded(&key) {
                debug!(track = %track.label(), "Already in library, skipping");
                statuses.push(TrackStatus {
                    track,
                    outcome: DownloadOutcome::SkippedDuplicate,
                    error: None,
                });
                continue;
            }
            if !self.claim(username, &key) {
                debug!(track = %track.label(), "Already being fetched, skipping");
                statuses.push(TrackStatus {
                    track,
                    outcome: DownloadOutcome::SkippedDuplicate,
                    error: None,
                });
                continue;
            }
            claimed.push(key);
            to_fetch.push(track);
        }

        info!(
            username,
            %job_id,
            requested = statuses.len() + to_fetch.len(),
            fetching = to_fetch.len(),
            "Starting download batch"
        );

        let mut store_err: Option<Error> = None;
        for status in &statuses {
            if let Err(e) = self.record(username, job_id, status, None) {
                store_err.get_or_insert(e);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<(TrackDescriptor, std::result::Result<PathBuf, String>)> =
            JoinSet::new();
        for track in to_fetch {
            let semaphore = Arc::clone(&semaphore);
            let engine = Arc::clone(&self.engine);
            let tagger = Arc::clone(&self.tagger);
            let temp_dir = self.temp_dir.clone();
            let music_dir = self.music_dir.clone();
            tasks.spawn(async move {
                // Closed only on shutdown; treat as failure then.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (track, Err("orchestrator shut down".to_string())),
                };
                let result = fetch_one(&*engine, &*tagger, &track, &temp_dir, &music_dir).await;
                (track, result.map_err(|e| e.to_string()))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (track, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Download task panicked");
                    continue;
                }
            };
            let (outcome, error, path) = match result {
                Ok(path) => {
                    info!(track = %track.label(), path = %path.display(), "Downloaded");
                    (DownloadOutcome::Downloaded, None, Some(path))
                }
                Err(msg) => {
                    warn!(track = %track.label(), error = %msg, "Download failed");
                    (DownloadOutcome::Failed, Some(msg), None)
                }
            };
            let status = TrackStatus {
                track,
                outcome,
                error,
            };
            let recorded = match self.record(username, job_id, &status, path) {
                Ok(outcome) => outcome,
                Err(e) => {
                    store_err.get_or_insert(e);
                    status.outcome
                }
            };
            statuses.push(TrackStatus {
                outcome: recorded,
                ..status
            });
        }

        self.release(username, &claimed);

        if let Some(e) = store_err {
            return Err(e);
        }

        let count = |o: DownloadOutcome| statuses.iter().filter(|s| s.outcome == o).count() as u32;
        let result = BatchResult {
            job_id,
            downloaded: count(DownloadOutcome::Downloaded),
            skipped: count(DownloadOutcome::SkippedDuplicate),
            failed: count(DownloadOutcome::Failed),
            tracks: statuses,
        };
        info!(
            username,
            %job_id,
            downloaded = result.downloaded,
            skipped = result.skipped,
            failed = result.failed,
            "Batch complete"
        );
        Ok(result)
    }

    /// One mutation per track outcome. A successful download under the
    /// rating policy also enters the pending-cleanup set, starting its
    /// rating deadline. The history is re-checked under the store lock:
    /// a download already recorded there (by a cron run racing the
    /// daemon, say) demotes this one to a duplicate skip. Returns the
    /// outcome actually written.
    fn record(
        &self,
        username: &str,
        job_id: Uuid,
        status: &TrackStatus,
        path: Option<PathBuf>,
    ) -> Result<DownloadOutcome> {
        let track = status.track.clone();
        let requested = status.outcome;
        let now = trackdrop_common::time::now();
        let pending = match (requested, &path, self.cleanup.policy) {
            (DownloadOutcome::Downloaded, Some(p), CleanupPolicy::Rating) => {
                Some(PendingCleanupRecord {
                    key: track.key(),
                    artist: track.artist.clone(),
                    title: track.title.clone(),
                    file_path: p.clone(),
                    added_at: now,
                    rating_deadline: now
                        + trackdrop_common::time::days(self.cleanup.rating_deadline_days),
                })
            }
            _ => None,
        };

        let key = track.key();
        let state = self.store.mutate(username, move |state| {
            let outcome = if requested == DownloadOutcome::Downloaded
                && state.has_downloaded(&key)
            {
                DownloadOutcome::SkippedDuplicate
            } else {
                requested
            };
            state.history.push(DownloadRecord {
                key: track.key(),
                artist: track.artist,
                title: track.title,
                album: track.album,
                timestamp: now,
                outcome,
                source_job_id: job_id,
                source: track.source,
                file_path: path,
            });
            if outcome == DownloadOutcome::Downloaded {
                if let Some(p) = pending {
                    state.pending_cleanup.insert(p.key.map_key(), p);
                }
            }
        })?;

        // Our record is the last one pushed under the lock.
        Ok(state
            .history
            .last()
            .map(|r| r.outcome)
            .unwrap_or(requested))
    }
}

/// Fetch, tag, and move one track into the library. Tag failures are
/// non-fatal: an untagged file in the library beats no file.
async fn fetch_one(
    engine: &dyn DownloadEngine,
    tagger: &dyn Tagger,
    track: &TrackDescriptor,
    temp_dir: &Path,
    music_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let fetched = engine.fetch(track, temp_dir).await?;
    if let Err(e) = tagger.apply(&fetched, track) {
        warn!(track = %track.label(), error = %e, "Tagging failed, keeping file as-is");
    }

    let ext = fetched
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3");
    let artist_dir = music_dir.join(sanitize_filename(&track.artist));
    std::fs::create_dir_all(&artist_dir)?;
    let dest = artist_dir.join(format!(
        "{}.{ext}",
        sanitize_filename(&format!("{} - {}", track.artist, track.title))
    ));

    // Temp and music dirs may sit on different filesystems.
    if std::fs::rename(&fetched, &dest).is_err() {
        std::fs::copy(&fetched, &dest)?;
        std::fs::remove_file(&fetched)?;
    }

    // Drop the fetch's scratch directory and whatever else the
    // downloader left in it.
    if let Ok(rel) = fetched.strip_prefix(temp_dir) {
        if let Some(first) = rel.components().next() {
            let top = temp_dir.join(first);
            if top != fetched {
                let _ = std::fs::remove_dir_all(&top);
            }
        }
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use super::engine::FetchError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct NoopTagger;
    impl Tagger for NoopTagger {
        fn apply(&self, _path: &Path, _track: &TrackDescriptor) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Writes a placeholder file per fetch; fails for artists named
    /// "fail".
    struct FakeEngine {
        concurrent: AtomicU32,
        peak: AtomicU32,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                concurrent: AtomicU32::new(0),
                peak: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DownloadEngine for FakeEngine {
        async fn fetch(
            &self,
            track: &TrackDescriptor,
            temp_dir: &Path,
        ) -> std::result::Result<PathBuf, FetchError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);

            if track.artist == "fail" {
                return Err(FetchError::NoOutput);
            }
            let path = temp_dir.join(format!("{}-{}.mp3", track.artist, track.title));
            std::fs::write(&path, b"audio").map_err(FetchError::Spawn)?;
            Ok(path)
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<StateStore>,
        orchestrator: DownloadOrchestrator,
        engine: Arc<FakeEngine>,
        music_dir: PathBuf,
    }

    fn fixture(max_concurrent: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::open(dir.path().join("data")).unwrap());
        let engine = Arc::new(FakeEngine::new());
        let music_dir = dir.path().join("music");
        let orchestrator = DownloadOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&engine) as Arc<dyn DownloadEngine>,
            Arc::new(NoopTagger),
            dir.path().join("tmp"),
            music_dir.clone(),
            max_concurrent,
            CleanupConfig::default(),
        );
        Fixture {
            _dir: dir,
            store,
            orchestrator,
            engine,
            music_dir,
        }
    }

    fn track(artist: &str, title: &str, album: &str) -> TrackDescriptor {
        let mut t = TrackDescriptor::new(artist, title);
        t.album = Some(album.to_string());
        t.source = "test".to_string();
        t
    }

    #[tokio::test]
    async fn batch_downloads_and_records_history() {
        let f = fixture(3);
        let result = f
            .orchestrator
            .run_batch("alice", vec![track("A", "One", "X"), track("B", "Two", "Y")])
            .await
            .unwrap();

        assert_eq!(result.downloaded, 2);
        assert_eq!(result.failed, 0);

        let state = f.store.read_user("alice").unwrap();
        assert_eq!(state.history.len(), 2);
        assert!(state.history.iter().all(|r| r.source_job_id == result.job_id));
        assert_eq!(state.pending_cleanup.len(), 2, "rating policy tracks new files");
        assert!(f.music_dir.join("A").join("A - One.mp3").exists());
    }

    #[tokio::test]
    async fn history_duplicates_are_skipped_album_aware() {
        let f = fixture(3);
        f.orchestrator
            .run_batch("alice", vec![track("A", "One", "X")])
            .await
            .unwrap();

        let result = f
            .orchestrator
            .run_batch(
                "alice",
                vec![track("A", "One", "X"), track("A", "One", "Other Album")],
            )
            .await
            .unwrap();

        assert_eq!(result.skipped, 1, "same album is a duplicate");
        assert_eq!(result.downloaded, 1, "different album is not");
    }

    #[tokio::test]
    async fn within_batch_duplicates_collapse() {
        let f = fixture(3);
        let result = f
            .orchestrator
            .run_batch("alice", vec![track("A", "One", "X"), track("a", "ONE", "x")])
            .await
            .unwrap();
        assert_eq!(result.downloaded, 1);
        assert_eq!(result.skipped, 1);
    }

    #[tokio::test]
    async fn failures_are_recorded_and_do_not_suppress_retry() {
        let f = fixture(3);
        let result = f
            .orchestrator
            .run_batch("alice", vec![track("fail", "One", "X")])
            .await
            .unwrap();
        assert_eq!(result.failed, 1);

        let state = f.store.read_user("alice").unwrap();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].outcome, DownloadOutcome::Failed);
        assert!(state.pending_cleanup.is_empty());

        // A later batch tries again rather than treating the failure as
        // a download.
        let retry = f
            .orchestrator
            .run_batch("alice", vec![track("fail", "One", "X")])
            .await
            .unwrap();
        assert_eq!(retry.skipped, 0);
        assert_eq!(retry.failed, 1);
    }

    #[tokio::test]
    async fn concurrent_batches_download_a_shared_track_once() {
        let f = fixture(3);
        let store = Arc::clone(&f.store);
        let orch = Arc::new(f.orchestrator);

        let (a, b) = tokio::join!(
            {
                let orch = Arc::clone(&orch);
                async move { orch.run_batch("alice", vec![track("A", "One", "X")]).await }
            },
            {
                let orch = Arc::clone(&orch);
                async move { orch.run_batch("alice", vec![track("A", "One", "X")]).await }
            },
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.downloaded + b.downloaded, 1, "one batch fetches");
        assert_eq!(a.skipped + b.skipped, 1, "the other skips");

        let state = store.read_user("alice").unwrap();
        let downloaded = state
            .history
            .iter()
            .filter(|r| r.outcome == DownloadOutcome::Downloaded)
            .count();
        assert_eq!(downloaded, 1);
    }

    #[test]
    fn recording_rechecks_history_under_the_lock() {
        let f = fixture(3);
        let status = TrackStatus {
            track: track("A", "One", "X"),
            outcome: DownloadOutcome::Downloaded,
            error: None,
        };
        let path = Some(f.music_dir.join("A").join("A - One.mp3"));

        let first = f
            .orchestrator
            .record("alice", Uuid::new_v4(), &status, path.clone())
            .unwrap();
        assert_eq!(first, DownloadOutcome::Downloaded);

        // A second writer (another process) recording the same track is
        // demoted rather than doubling the history entry.
        let second = f
            .orchestrator
            .record("alice", Uuid::new_v4(), &status, path)
            .unwrap();
        assert_eq!(second, DownloadOutcome::SkippedDuplicate);

        let state = f.store.read_user("alice").unwrap();
        let downloaded = state
            .history
            .iter()
            .filter(|r| r.outcome == DownloadOutcome::Downloaded)
            .count();
        assert_eq!(downloaded, 1);
        assert_eq!(state.pending_cleanup.len(), 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let f = fixture(2);
        let tracks = (0..8).map(|i| track("A", &format!("T{i}"), "X")).collect();
        f.orchestrator.run_batch("alice", tracks).await.unwrap();
        assert!(f.engine.peak.load(Ordering::SeqCst) <= 2);
    }
}
