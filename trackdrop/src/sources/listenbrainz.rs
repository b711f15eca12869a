//! ListenBrainz created-for playlists
//!
//! ListenBrainz generates weekly playlists for each user ("Weekly
//! Exploration", "Weekly Jams"). The source lists the user's
//! created-for playlists, prefers the exploration one, and reads its
//! tracks from the JSPF payload.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use trackdrop_common::model::{Settings, TrackDescriptor};

use super::RecommendationSource;

const DEFAULT_BASE: &str = "https://api.listenbrainz.org";

pub struct ListenBrainz {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct CreatedForResponse {
    #[serde(default)]
    playlists: Vec<PlaylistWrapper>,
}

#[derive(Debug, Deserialize)]
struct PlaylistWrapper {
    playlist: PlaylistHead,
}

#[derive(Debug, Deserialize)]
struct PlaylistHead {
    /// Full playlist URL; the MBID is its last path segment.
    identifier: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct JspfResponse {
    playlist: JspfPlaylist,
}

#[derive(Debug, Deserialize)]
struct JspfPlaylist {
    #[serde(default)]
    track: Vec<JspfTrack>,
}

#[derive(Debug, Deserialize)]
struct JspfTrack {
    #[serde(default)]
    creator: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    album: Option<String>,
}

impl ListenBrainz {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base(client, DEFAULT_BASE)
    }

    pub fn with_base(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
        }
    }

    async fn created_for(&self, settings: &Settings) -> anyhow::Result<Vec<PlaylistHead>> {
        let url = format!(
            "{}/1/user/{}/playlists/createdfor",
            self.base, settings.listenbrainz_username
        );
        let mut request = self.client.get(&url);
        if !settings.listenbrainz_token.is_empty() {
            request = request.header(
                "Authorization",
                format!("Token {}", settings.listenbrainz_token),
            );
        }
        let response: CreatedForResponse =
            request.send().await?.error_for_status()?.json().await?;
        Ok(response.playlists.into_iter().map(|w| w.playlist).collect())
    }

    async fn playlist_tracks(&self, mbid: &str) -> anyhow::Result<Vec<JspfTrack>> {
        let url = format!("{}/1/playlists/{mbid}", self.base);
        let response: JspfResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.playlist.track)
    }
}

#[async_trait]
impl RecommendationSource for ListenBrainz {
    fn name(&self) -> &'static str {
        "listenbrainz"
    }

    fn enabled(&self, settings: &Settings) -> bool {
        settings.listenbrainz_enabled && !settings.listenbrainz_username.is_empty()
    }

    async fn recommendations(&self, settings: &Settings) -> anyhow::Result<Vec<TrackDescriptor>> {
        let playlists = self.created_for(settings).await?;
        let Some(chosen) = pick_playlist(&playlists) else {
            debug!(
                username = %settings.listenbrainz_username,
                "No created-for playlists available"
            );
            return Ok(Vec::new());
        };
        let Some(mbid) = playlist_mbid(&chosen.identifier) else {
            anyhow::bail!("unparseable playlist identifier: {}", chosen.identifier);
        };

        let tracks = self.playlist_tracks(mbid).await?;
        Ok(tracks
            .into_iter()
            .filter(|t| !t.creator.is_empty() && !t.title.is_empty())
            .map(|t| TrackDescriptor {
                artist: t.creator,
                title: t.title,
                album: t.album,
                source: self.name().to_string(),
            })
            .collect())
    }
}

/// Prefer the weekly exploration playlist, fall back to the first one.
fn pick_playlist(playlists: &[PlaylistHead]) -> Option<&PlaylistHead> {
    playlists
        .iter()
        .find(|p| p.title.to_lowercase().contains("exploration"))
        .or_else(|| playlists.first())
}

fn playlist_mbid(identifier: &str) -> Option<&str> {
    identifier
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}
