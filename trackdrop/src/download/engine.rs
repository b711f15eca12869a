//! External downloader invocation
//!
//! Track acquisition shells out to a configurable command (streamrip's
//! `rip` by default) rather than speaking any catalog protocol
//! directly. Each fetch runs in its own working directory under the
//! scratch dir, so concurrent fetches can never be credited with each
//! other's output; the produced file is the newest audio file in that
//! private directory.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use trackdrop_common::model::TrackDescriptor;
use trackdrop_common::text::clean_title;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "ogg", "opus", "wav"];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to launch downloader: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("downloader timed out after {0}s")]
    Timeout(u64),
    #[error("downloader exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("downloader succeeded but produced no audio file")]
    NoOutput,
}

/// Fetches one track into a private directory under `temp_dir` and
/// returns the produced file.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    async fn fetch(
        &self,
        track: &TrackDescriptor,
        temp_dir: &Path,
    ) -> std::result::Result<PathBuf, FetchError>;
}

/// [`DownloadEngine`] backed by an external command template. `{artist}`,
/// `{title}`, and `{album}` placeholders in the argument list are
/// substituted per track.
pub struct CommandEngine {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandEngine {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    fn substituted_args(&self, track: &TrackDescriptor) -> Vec<String> {
        // Edition suffixes ("- Remastered", "(Live)") hurt catalog
        // search hits; the history keeps the original title.
        let title = clean_title(&track.title);
        self.args
            .iter()
            .map(|a| {
                a.replace("{artist}", &track.artist)
                    .replace("{title}", &title)
                    .replace("{album}", track.album.as_deref().unwrap_or(""))
            })
            .collect()
    }
}

#[async_trait]
impl DownloadEngine for CommandEngine {
    async fn fetch(
        &self,
        track: &TrackDescriptor,
        temp_dir: &Path,
    ) -> std::result::Result<PathBuf, FetchError> {
        let args = self.substituted_args(track);

        // A private working directory per fetch: with several commands
        // running at once, a shared directory would let a slow fetch
        // pick up a faster sibling's file.
        let work_dir = temp_dir.join(format!("fetch-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&work_dir).await?;
        debug!(command = %self.command, ?args, dir = %work_dir.display(), "Launching downloader");

        let child = Command::new(&self.command)
            .args(&args)
            .current_dir(&work_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            // kill_on_drop reaps the child when the future is dropped.
            Err(_) => {
                let _ = std::fs::remove_dir_all(&work_dir);
                return Err(FetchError::Timeout(self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let _ = std::fs::remove_dir_all(&work_dir);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(FetchError::Failed {
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        match newest_audio_file(&work_dir) {
            Some(path) => Ok(path),
            None => {
                let _ = std::fs::remove_dir_all(&work_dir);
                Err(FetchError::NoOutput)
            }
        }
    }
}

/// Newest audio file under `dir`. Downloaders choose their own
/// directory layout and file names, so modification time is the only
/// reliable signal when a command produces more than one file.
fn newest_audio_file(dir: &Path) -> Option<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !is_audio(entry.path()) {
            continue;
        }
        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(t) => t,
            None => {
                warn!(path = %entry.path().display(), "Unreadable mtime, skipping");
                continue;
            }
        };
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, entry.path().to_path_buf()));
        }
    }
    newest.map(|(_, p)| p)
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
