//! Navidrome (Subsonic API) client
//!
//! Covers the small slice of the Subsonic protocol the service needs:
//! credential check, rating/star lookup for cleanup decisions, and
//! triggering a media rescan. Authentication uses the salted-token
//! scheme: a fresh random salt per request and `md5(password + salt)`.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use trackdrop_common::config::NavidromeConfig;
use trackdrop_common::text::normalize;

use crate::cleanup::{LibraryClient, TrackAnnotation};

const API_VERSION: &str = "1.16.1";
const CLIENT_NAME: &str = "trackdrop";
const SALT_LEN: usize = 12;

pub struct NavidromeClient {
    client: reqwest::Client,
    config: NavidromeConfig,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "subsonic-response")]
    response: SubsonicResponse,
}

#[derive(Debug, Deserialize)]
struct SubsonicResponse {
    status: String,
    #[serde(default)]
    error: Option<SubsonicError>,
    #[serde(rename = "searchResult3", default)]
    search_result: Option<SearchResult3>,
}

#[derive(Debug, Deserialize)]
struct SubsonicError {
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult3 {
    #[serde(default)]
    song: Vec<Song>,
}

#[derive(Debug, Deserialize)]
struct Song {
    #[serde(default)]
    artist: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "userRating", default)]
    user_rating: Option<u8>,
    /// Timestamp when starred; absent otherwise.
    #[serde(default)]
    starred: Option<String>,
}

impl NavidromeClient {
    pub fn new(client: reqwest::Client, config: NavidromeConfig) -> Self {
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.url.is_empty() && !self.config.username.is_empty()
    }

    /// Common query parameters, with a fresh salt per call.
    fn auth_params(&self) -> Vec<(&'static str, String)> {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        let token = format!(
            "{:x}",
            md5::compute(format!("{}{}", self.config.password, salt))
        );
        vec![
            ("u", self.config.username.clone()),
            ("t", token),
            ("s", salt),
            ("v", API_VERSION.to_string()),
            ("c", CLIENT_NAME.to_string()),
            ("f", "json".to_string()),
        ]
    }

    async fn call(
        &self,
        endpoint: &str,
        extra: &[(&str, &str)],
    ) -> anyhow::Result<SubsonicResponse> {
        let url = format!("{}/rest/{endpoint}", self.config.url.trim_end_matches('/'));
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&self.auth_params())
            .query(extra)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let response = envelope.response;
        if response.status != "ok" {
            let (code, message) = response
                .error
                .map(|e| (e.code, e.message))
                .unwrap_or((0, "unknown error".to_string()));
            anyhow::bail!("subsonic error {code}: {message}");
        }
        Ok(response)
    }

    /// Credential check against the server.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.call("ping", &[]).await.map(|_| ())
    }
}

#[async_trait]
impl LibraryClient for NavidromeClient {
    async fn track_annotation(
        &self,
        artist: &str,
        title: &str,
    ) -> anyhow::Result<Option<TrackAnnotation>> {
        let query = format!("{artist} {title}");
        let response = self
            .call(
                "search3",
                &[("query", query.as_str()), ("songCount", "20"), ("artistCount", "0"), ("albumCount", "0")],
            )
            .await?;

        let songs = response
            .search_result
            .map(|r| r.song)
            .unwrap_or_default();
        let wanted = (normalize(artist), normalize(title));
        let annotation = songs
            .iter()
            .find(|s| (normalize(&s.artist), normalize(&s.title)) == wanted)
            .map(|s| TrackAnnotation {
                rating: s.user_rating,
                starred: s.starred.is_some(),
            });
        debug!(artist, title, found = annotation.is_some(), "Annotation lookup");
        Ok(annotation)
    }

    async fn start_scan(&self) -> anyhow::Result<()> {
        self.call("startScan", &[]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> NavidromeClient {
        NavidromeClient::new(
            reqwest::Client::new(),
            NavidromeConfig {
                url: "https://music.example.com/".to_string(),
                username: "admin".to_string(),
                password: "sesame".to_string(),
            },
        )
    }

    #[test]
    fn auth_token_is_md5_of_password_and_salt() {
        let params = client().auth_params();
        let get = |k: &str| {
            params
                .iter()
                .find(|(name, _)| *name == k)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        let salt = get("s");
        assert_eq!(salt.len(), SALT_LEN);
        let expected = format!("{:x}", md5::compute(format!("sesame{salt}")));
        assert_eq!(get("t"), expected);
        assert_eq!(get("v"), API_VERSION);
        assert_eq!(get("f"), "json");
    }

    #[test]
    fn salt_differs_per_request() {
        let c = client();
        let s1 = c.auth_params().into_iter().find(|(k, _)| *k == "s").unwrap().1;
        let s2 = c.auth_params().into_iter().find(|(k, _)| *k == "s").unwrap().1;
        assert_ne!(s1, s2);
    }

    #[test]
    fn search_response_parses_rating_and_star() {
        let json = r#"{
            "subsonic-response": {
                "status": "ok",
                "searchResult3": {
                    "song": [
                        {"artist": "Nina Simone", "title": "Sinnerman",
                         "userRating": 4, "starred": "2024-05-01T10:00:00Z"},
                        {"artist": "Nina Simone", "title": "Feeling Good"}
                    ]
                }
            }
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        let songs = envelope.response.search_result.unwrap().song;
        assert_eq!(songs[0].user_rating, Some(4));
        assert!(songs[0].starred.is_some());
        assert_eq!(songs[1].user_rating, None);
        assert!(songs[1].starred.is_none());
    }

    #[test]
    fn error_envelope_parses() {
        let json = r#"{
            "subsonic-response": {
                "status": "failed",
                "error": {"code": 40, "message": "Wrong username or password"}
            }
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.response.status, "failed");
        assert_eq!(envelope.response.error.unwrap().code, 40);
    }
}
