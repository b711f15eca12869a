//! Metadata tagging of downloaded files
//!
//! Downloaders do not reliably tag their output, and the library
//! matches cleanup lookups on artist/title tags. The tagger rewrites
//! the primary tag with the descriptor the track was requested as.

use std::path::Path;

use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;

use trackdrop_common::model::TrackDescriptor;

pub trait Tagger: Send + Sync {
    fn apply(&self, path: &Path, track: &TrackDescriptor) -> anyhow::Result<()>;
}

pub struct LoftyTagger;

impl Tagger for LoftyTagger {
    fn apply(&self, path: &Path, track: &TrackDescriptor) -> anyhow::Result<()> {
        let mut tagged = Probe::open(path)?.read()?;

        // Resolve the format's preferred tag type before borrowing the
        // tag mutably.
        let tag_type = tagged.primary_tag_type();
        if tagged.primary_tag_mut().is_none() {
            tagged.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged
            .primary_tag_mut()
            .ok_or_else(|| anyhow::anyhow!("no writable tag for {}", path.display()))?;

        tag.set_artist(track.artist.clone());
        tag.set_title(track.title.clone());
        match &track.album {
            Some(album) => tag.set_album(album.clone()),
            None => tag.remove_album(),
        }

        tagged.save_to_path(path, WriteOptions::default())?;
        Ok(())
    }
}
