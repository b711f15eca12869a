//! Application wiring
//!
//! Builds the component graph from configuration and exposes the
//! operations the CLI maps onto: one-shot recommendation runs, cleanup
//! passes, cron resync, and the long-running monitor daemon.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trackdrop_common::config::TomlConfig;
use trackdrop_common::model::{MonitoredPlaylist, TrackDescriptor};
use trackdrop_common::{Error, Result};

use crate::cleanup::{CleanupProcessor, CleanupResult, LibraryClient};
use crate::download::engine::CommandEngine;
use crate::download::{BatchResult, DownloadOrchestrator};
use crate::library::NavidromeClient;
use crate::monitor::MonitorLoop;
use crate::schedule::RecurringJobRegistry;
use crate::sources::{
    LastFm, ListenBrainz, PlaylistExtractor, PlaylistSource, RecommendationSource, SourceFilter,
};
use crate::store::StateStore;
use crate::tagger::LoftyTagger;

pub struct App {
    config: TomlConfig,
    store: Arc<StateStore>,
    orchestrator: Arc<DownloadOrchestrator>,
    library: Arc<NavidromeClient>,
    sources: Vec<Arc<dyn RecommendationSource>>,
    extractor: Arc<dyn PlaylistSource>,
}

impl App {
    pub fn new(config: TomlConfig, data_dir_arg: Option<&Path>) -> Result<Self> {
        let data_dir = config.resolve_data_dir(data_dir_arg);
        let temp_dir = config.resolve_temp_dir(&data_dir);
        let music_dir = config.resolve_music_dir(&data_dir);
        info!(
            data_dir = %data_dir.display(),
            music_dir = %music_dir.display(),
            "Starting"
        );

        let store = Arc::new(StateStore::open(&data_dir)?);
        let http = reqwest::Client::new();

        let engine = Arc::new(CommandEngine::new(
            config.download.command.clone(),
            config.download.args.clone(),
            Duration::from_secs(config.download.timeout_secs),
        ));
        let orchestrator = Arc::new(DownloadOrchestrator::new(
            Arc::clone(&store),
            engine,
            Arc::new(LoftyTagger),
            temp_dir,
            music_dir,
            config.download.max_concurrent,
            config.cleanup.clone(),
        ));
        let library = Arc::new(NavidromeClient::new(http.clone(), config.navidrome.clone()));
        let sources: Vec<Arc<dyn RecommendationSource>> = vec![
            Arc::new(ListenBrainz::new(http.clone())),
            Arc::new(LastFm::new(http.clone())),
        ];
        let extractor: Arc<dyn PlaylistSource> = Arc::new(PlaylistExtractor::new(http));

        Ok(Self {
            config,
            store,
            orchestrator,
            library,
            sources,
            extractor,
        })
    }

    /// One recommendation run for a single user: gather candidates from
    /// the selected sources, download, then kick a library rescan if
    /// anything landed.
    pub async fn run_for_user(&self, username: &str, filter: SourceFilter) -> Result<BatchResult> {
        let settings = self.store.read_user(username)?.settings;

        let mut candidates: Vec<TrackDescriptor> = Vec::new();
        for source in &self.sources {
            if !filter.selects(source.name()) {
                continue;
            }
            if !settings.source_allowed(source.name()) {
                info!(username, source = source.name(), "Source removed from user's source list, skipping");
                continue;
            }
            if !source.enabled(&settings) {
                info!(username, source = source.name(), "Source not enabled, skipping");
                continue;
            }
            match source.recommendations(&settings).await {
                Ok(tracks) => {
                    info!(username, source = source.name(), count = tracks.len(), "Fetched candidates");
                    candidates.extend(tracks);
                }
                // One unreachable source never cancels the rest of the
                // run.
                Err(e) => warn!(username, source = source.name(), error = %e, "Source failed"),
            }
        }

        let result = self.orchestrator.run_batch(username, candidates).await?;
        self.rescan_if_needed(&result);
        Ok(result)
    }

    /// Run every cron-enabled user in sequence, as the default cron
    /// entry does. Per-user failures are logged and the remaining users
    /// still run.
    pub async fn run_all(&self, filter: SourceFilter) -> Result<()> {
        let users = self.store.list_users()?;
        if users.is_empty() {
            info!("No users registered, nothing to run");
            return Ok(());
        }
        for username in users {
            let enabled = self.store.read_user(&username)?.settings.cron_enabled;
            if !enabled {
                info!(username, "Scheduled runs disabled, skipping");
                continue;
            }
            if let Err(e) = self.run_for_user(&username, filter).await {
                warn!(username, error = %e, "Run failed");
            }
        }
        Ok(())
    }

    pub async fn cleanup_user(&self, username: &str) -> Result<CleanupResult> {
        self.cleanup_processor().run(username).await
    }

    pub async fn cleanup_all(&self) -> Result<()> {
        let processor = self.cleanup_processor();
        for username in self.store.list_users()? {
            if let Err(e) = processor.run(&username).await {
                warn!(username, error = %e, "Cleanup failed");
            }
        }
        Ok(())
    }

    /// Register a playlist for background monitoring. The platform is
    /// inferred from the URL; unrecognized hosts are rejected before
    /// anything is persisted.
    pub fn add_playlist(
        &self,
        username: &str,
        url: &str,
        name: Option<&str>,
    ) -> Result<MonitoredPlaylist> {
        let platform = crate::sources::playlist::detect_platform(url)
            .ok_or_else(|| Error::InvalidInput(format!("unsupported playlist url: {url}")))?;
        let playlist = MonitoredPlaylist::new(url, name.unwrap_or(url), platform);
        let stored = playlist.clone();
        self.store
            .mutate(username, move |state| state.monitored_playlists.push(stored))?;
        Ok(playlist)
    }

    /// Regenerate the system cron table from current user settings.
    pub fn resync_cron(&self) -> Result<()> {
        self.registry().resync().map(|_| ())
    }

    /// Run the playlist monitor until `cancel` fires. Each due playlist
    /// sync extracts the current track list and pushes it through the
    /// orchestrator under the owning user.
    pub async fn daemon(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        // The cron table should reflect reality as soon as the daemon
        // is up.
        if let Err(e) = self.resync_cron() {
            warn!(error = %e, "Initial cron resync failed");
        }

        let wake = Duration::from_secs(self.config.monitor.wake_interval_secs);
        let app = Arc::clone(self);
        let monitor = MonitorLoop::new(Arc::clone(&self.store), wake, move |username, playlist| {
            let app = Arc::clone(&app);
            async move { app.sync_playlist(&username, playlist).await }
        });
        monitor.run(cancel).await
    }

    /// Returns the number of tracks currently on the playlist; the
    /// monitor records it as `last_track_count`.
    async fn sync_playlist(&self, username: &str, playlist: MonitoredPlaylist) -> anyhow::Result<u32> {
        let tracks = self.extractor.tracks(&playlist).await?;
        let total = tracks.len() as u32;
        let result = self.orchestrator.run_batch(username, tracks).await?;
        self.rescan_if_needed(&result);
        Ok(total)
    }

    /// Fire-and-forget: a rescan is a convenience, not part of the
    /// batch outcome.
    fn rescan_if_needed(&self, result: &BatchResult) {
        if result.downloaded == 0 || !self.library.is_configured() {
            return;
        }
        let library = Arc::clone(&self.library);
        tokio::spawn(async move {
            if let Err(e) = library.start_scan().await {
                warn!(error = %e, "Library rescan request failed");
            }
        });
    }

    fn cleanup_processor(&self) -> CleanupProcessor {
        CleanupProcessor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.library) as Arc<dyn LibraryClient>,
            self.config.cleanup.clone(),
        )
    }

    fn registry(&self) -> RecurringJobRegistry {
        RecurringJobRegistry::new(
            Arc::clone(&self.store),
            self.config.crontab_path.clone(),
            self.config.trackdrop_bin.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn app(dir: &TempDir) -> App {
        App::new(TomlConfig::default(), Some(dir.path())).unwrap()
    }

    #[test]
    fn add_playlist_infers_platform_and_persists() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let playlist = app
            .add_playlist("alice", "https://www.deezer.com/en/playlist/1234", Some("Mix"))
            .unwrap();
        assert_eq!(playlist.platform, "deezer");
        assert_eq!(playlist.name, "Mix");

        let state = app.store.read_user("alice").unwrap();
        assert_eq!(state.monitored_playlists.len(), 1);
        assert_eq!(state.monitored_playlists[0].id, playlist.id);
    }

    #[test]
    fn add_playlist_rejects_unknown_hosts() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let err = app
            .add_playlist("alice", "https://example.com/playlist/1", None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let state = app.store.read_user("alice").unwrap();
        assert!(state.monitored_playlists.is_empty());
    }

    #[test]
    fn add_playlist_defaults_name_to_url() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let url = "https://deezer.page.link/abc";
        let playlist = app.add_playlist("alice", url, None).unwrap();
        assert_eq!(playlist.name, url);
    }
}
