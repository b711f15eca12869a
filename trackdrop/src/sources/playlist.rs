//! Monitored playlist track extraction
//!
//! Turns a monitored playlist URL into its current track list. Deezer
//! exposes public playlists without authentication, so that is the
//! supported platform; anything else errors cleanly and the monitor
//! logs the failed sync.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use trackdrop_common::model::{MonitoredPlaylist, TrackDescriptor};

const DEEZER_API: &str = "https://api.deezer.com";

/// Extracts the track list of an external playlist.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn tracks(&self, playlist: &MonitoredPlaylist) -> anyhow::Result<Vec<TrackDescriptor>>;
}

pub struct PlaylistExtractor {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct DeezerPlaylist {
    #[serde(default)]
    tracks: DeezerPage,
}

#[derive(Debug, Default, Deserialize)]
struct DeezerPage {
    #[serde(default)]
    data: Vec<DeezerTrack>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeezerTrack {
    #[serde(default)]
    title: String,
    artist: DeezerName,
    #[serde(default)]
    album: Option<DeezerAlbumName>,
}

#[derive(Debug, Deserialize)]
struct DeezerName {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct DeezerAlbumName {
    #[serde(default)]
    title: String,
}

impl PlaylistExtractor {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base(client, DEEZER_API)
    }

    pub fn with_base(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
        }
    }

    async fn deezer_tracks(&self, playlist_id: &str) -> anyhow::Result<Vec<TrackDescriptor>> {
        let url = format!("{}/playlist/{playlist_id}", self.base);
        let first: DeezerPlaylist = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut tracks = Vec::new();
        let mut page = first.tracks;
        loop {
            tracks.extend(page.data.drain(..).filter_map(to_descriptor));
            let Some(next) = page.next.take() else { break };
            debug!(url = %next, "Following playlist page");
            page = self
                .client
                .get(&next)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
        }
        Ok(tracks)
    }
}

#[async_trait]
impl PlaylistSource for PlaylistExtractor {
    async fn tracks(&self, playlist: &MonitoredPlaylist) -> anyhow::Result<Vec<TrackDescriptor>> {
        match playlist.platform.as_str() {
            "deezer" => {
                let id = deezer_playlist_id(&playlist.url)
                    .ok_or_else(|| anyhow::anyhow!("no playlist id in url {}", playlist.url))?;
                self.deezer_tracks(&id).await
            }
            other => anyhow::bail!("unsupported playlist platform: {other}"),
        }
    }
}

/// Platform implied by a playlist URL, for registration.
pub fn detect_platform(url: &str) -> Option<&'static str> {
    if url.contains("deezer.com") || url.contains("deezer.page.link") {
        Some("deezer")
    } else if url.contains("spotify.com") {
        Some("spotify")
    } else {
        None
    }
}

/// Numeric id after the `/playlist/` path segment, query and locale
/// prefixes ignored.
fn deezer_playlist_id(url: &str) -> Option<String> {
    let after = url.split("/playlist/").nth(1)?;
    let id: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

fn to_descriptor(track: DeezerTrack) -> Option<TrackDescriptor> {
    if track.artist.name.is_empty() || track.title.is_empty() {
        return None;
    }
    Some(TrackDescriptor {
        artist: track.artist.name,
        title: track.title,
        album: track.album.map(|a| a.title).filter(|t| !t.is_empty()),
        source: "playlist".to_string(),
    })
}
