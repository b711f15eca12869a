//! Configuration loading and data directory resolution
//!
//! A missing config file is not fatal: defaults are applied and a
//! warning is logged, so the service always starts. Data directory
//! resolution follows the priority order: command-line argument,
//! environment variable, TOML config file, OS-dependent default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TRACKDROP_DATA_DIR";
/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "TRACKDROP_CONFIG";

/// Top-level TOML configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Directory holding per-user state documents.
    pub data_dir: Option<PathBuf>,
    /// Final destination for organized music files.
    pub music_dir: Option<PathBuf>,
    /// Scratch directory the download engine writes into.
    pub temp_dir: Option<PathBuf>,
    /// Crontab fragment owned (and wholesale-replaced) by the cron
    /// registry.
    pub crontab_path: PathBuf,
    /// Binary path used in generated crontab lines.
    pub trackdrop_bin: PathBuf,
    pub navidrome: NavidromeConfig,
    pub download: DownloadConfig,
    pub monitor: MonitorConfig,
    pub cleanup: CleanupConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            music_dir: None,
            temp_dir: None,
            crontab_path: PathBuf::from("/etc/cron.d/trackdrop"),
            trackdrop_bin: PathBuf::from("/usr/local/bin/trackdrop"),
            navidrome: NavidromeConfig::default(),
            download: DownloadConfig::default(),
            monitor: MonitorConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

/// Remote library (Navidrome) connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NavidromeConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// External download engine invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Command to invoke for each track fetch.
    pub command: String,
    /// Argument template; `{artist}`, `{title}`, and `{album}` are
    /// substituted per invocation.
    pub args: Vec<String>,
    /// Maximum simultaneous download invocations per batch.
    pub max_concurrent: usize,
    /// Hard timeout for one download invocation.
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            command: "rip".to_string(),
            args: vec![
                "search".to_string(),
                "deezer".to_string(),
                "track".to_string(),
                "{artist} {title}".to_string(),
            ],
            max_concurrent: 3,
            timeout_secs: 300,
        }
    }
}

/// Monitor loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Fixed wake interval of the playlist monitor.
    pub wake_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { wake_interval_secs: 30 }
    }
}

/// Cleanup policy for auto-downloaded tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Track ratings decide deletion; downloads create pending-cleanup
    /// records.
    Rating,
    /// Never delete automatically.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub policy: CleanupPolicy,
    /// A rating strictly above this protects a track from deletion.
    pub protect_rating: u8,
    /// An unrated track is deleted once this many days have elapsed.
    pub rating_deadline_days: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            policy: CleanupPolicy::Rating,
            protect_rating: 2,
            rating_deadline_days: 14,
        }
    }
}

impl TomlConfig {
    /// Load configuration from an explicit path, the `TRACKDROP_CONFIG`
    /// environment variable, or the platform config directory. Missing
    /// file yields defaults with a warning; a malformed file is a
    /// config error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let candidate = explicit
            .map(PathBuf::from)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .or_else(default_config_path);

        match candidate {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("failed to parse {}: {}", path.display(), e))
                })
            }
            Some(path) => {
                warn!("Config file not found at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Resolve the data directory: CLI argument, then environment,
    /// then config file, then OS-dependent default.
    pub fn resolve_data_dir(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(path);
        }
        if let Some(path) = &self.data_dir {
            return path.clone();
        }
        default_data_dir()
    }

    /// Scratch directory for in-flight downloads.
    pub fn resolve_temp_dir(&self, data_dir: &Path) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("tmp"))
    }

    /// Destination directory for organized music.
    pub fn resolve_music_dir(&self, data_dir: &Path) -> PathBuf {
        self.music_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("music"))
    }
}

/// Default configuration file path for the platform.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("trackdrop").join("config.toml"))
}

/// OS-dependent default data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("trackdrop"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/trackdrop"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = TomlConfig::default();
        assert_eq!(config.download.max_concurrent, 3);
        assert_eq!(config.monitor.wake_interval_secs, 30);
        assert_eq!(config.cleanup.policy, CleanupPolicy::Rating);
        assert_eq!(config.cleanup.protect_rating, 2);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            crontab_path = "/tmp/trackdrop-cron"

            [download]
            max_concurrent = 2

            [navidrome]
            url = "http://localhost:4533"
            username = "admin"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.crontab_path, PathBuf::from("/tmp/trackdrop-cron"));
        assert_eq!(config.download.max_concurrent, 2);
        // Untouched sections keep defaults
        assert_eq!(config.download.timeout_secs, 300);
        assert_eq!(config.monitor.wake_interval_secs, 30);
        assert_eq!(config.navidrome.username, "admin");
    }

    #[test]
    fn cli_arg_wins_data_dir_resolution() {
        let config = TomlConfig {
            data_dir: Some(PathBuf::from("/from/config")),
            ..Default::default()
        };
        let resolved = config.resolve_data_dir(Some(Path::new("/from/cli")));
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    fn config_file_data_dir_used_when_no_override() {
        let config = TomlConfig {
            data_dir: Some(PathBuf::from("/from/config")),
            ..Default::default()
        };
        // Only valid when the env var is not set in the test environment
        if std::env::var(DATA_DIR_ENV).is_err() {
            assert_eq!(config.resolve_data_dir(None), PathBuf::from("/from/config"));
        }
    }

    #[test]
    fn temp_and_music_dirs_default_under_data_dir() {
        let config = TomlConfig::default();
        let data = Path::new("/data");
        assert_eq!(config.resolve_temp_dir(data), PathBuf::from("/data/tmp"));
        assert_eq!(config.resolve_music_dir(data), PathBuf::from("/data/music"));
    }
}
