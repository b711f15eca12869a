//! Recommendation sources
//!
//! Sources are pure producers: they turn per-user credentials into a
//! list of candidate tracks and never touch core state. The
//! orchestrator owns dedup and recording, so a source is free to return
//! overlapping or repeated tracks.

pub mod lastfm;
pub mod listenbrainz;
pub mod playlist;

use async_trait::async_trait;
use clap::ValueEnum;

use trackdrop_common::model::{Settings, TrackDescriptor};

pub use lastfm::LastFm;
pub use listenbrainz::ListenBrainz;
pub use playlist::{PlaylistExtractor, PlaylistSource};

#[async_trait]
pub trait RecommendationSource: Send + Sync {
    /// Stable lowercase identifier, recorded on each history entry.
    fn name(&self) -> &'static str;

    /// Whether this user has the source switched on and configured.
    fn enabled(&self, settings: &Settings) -> bool;

    async fn recommendations(&self, settings: &Settings) -> anyhow::Result<Vec<TrackDescriptor>>;
}

/// `--source` CLI filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceFilter {
    All,
    Listenbrainz,
    Lastfm,
}

impl SourceFilter {
    pub fn selects(&self, name: &str) -> bool {
        match self {
            SourceFilter::All => true,
            SourceFilter::Listenbrainz => name == "listenbrainz",
            SourceFilter::Lastfm => name == "lastfm",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_selection() {
        assert!(SourceFilter::All.selects("listenbrainz"));
        assert!(SourceFilter::All.selects("lastfm"));
        assert!(SourceFilter::Listenbrainz.selects("listenbrainz"));
        assert!(!SourceFilter::Listenbrainz.selects("lastfm"));
        assert!(!SourceFilter::Lastfm.selects("listenbrainz"));
    }
}
