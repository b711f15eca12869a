//! Last.fm recommendation station
//!
//! Uses the public player station endpoint, which needs no API key,
//! only a valid username. The endpoint serves browsers, so the request
//! carries a browser user agent and a last.fm referer.

use async_trait::async_trait;
use serde::Deserialize;

use trackdrop_common::model::{Settings, TrackDescriptor};

use super::RecommendationSource;

const STATION_BASE: &str = "https://www.last.fm/player/station/user";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";
const MAX_TRACKS: usize = 100;

pub struct LastFm {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct StationResponse {
    #[serde(default)]
    playlist: Vec<StationTrack>,
}

#[derive(Debug, Deserialize)]
struct StationTrack {
    #[serde(default)]
    name: String,
    #[serde(default)]
    artists: Vec<StationArtist>,
}

#[derive(Debug, Deserialize)]
struct StationArtist {
    #[serde(default)]
    name: String,
}

impl LastFm {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base(client, STATION_BASE)
    }

    pub fn with_base(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
        }
    }
}

#[async_trait]
impl RecommendationSource for LastFm {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    fn enabled(&self, settings: &Settings) -> bool {
        settings.lastfm_enabled && !settings.lastfm_username.is_empty()
    }

    async fn recommendations(&self, settings: &Settings) -> anyhow::Result<Vec<TrackDescriptor>> {
        let url = format!("{}/{}/recommended", self.base, settings.lastfm_username);
        let response: StationResponse = self
            .client
            .get(&url)
            .header("Referer", "https://www.last.fm/")
            .header("User-Agent", USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .playlist
            .into_iter()
            .take(MAX_TRACKS)
            .filter_map(|t| {
                let artist = t.artists.into_iter().next()?.name;
                if artist.is_empty() || t.name.is_empty() {
                    return None;
                }
                Some(TrackDescriptor {
                    artist,
                    title: t.name,
                    album: None,
                    source: self.name().to_string(),
                })
            })
            .collect())
    }
}
