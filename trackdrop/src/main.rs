//! TrackDrop service binary
//!
//! Scheduled, multi-user music download orchestration: recommendation
//! runs triggered by cron, a playlist monitor daemon, rating-driven
//! cleanup, and cron table maintenance.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use trackdrop::sources::SourceFilter;
use trackdrop::App;
use trackdrop_common::config::TomlConfig;

#[derive(Parser)]
#[command(name = "trackdrop", about = "Scheduled music download orchestrator", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "TRACKDROP_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding per-user state documents.
    #[arg(long, env = "TRACKDROP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch recommendations and download new tracks.
    Run {
        /// Run for a single user; all cron-enabled users otherwise.
        #[arg(long)]
        user: Option<String>,
        /// Restrict to one recommendation source.
        #[arg(long, value_enum, default_value = "all")]
        source: SourceFilter,
    },
    /// Process pending-cleanup records against library ratings.
    Cleanup {
        /// Clean up a single user; every user otherwise.
        #[arg(long)]
        user: Option<String>,
    },
    /// Register a playlist URL for background monitoring.
    AddPlaylist {
        /// User whose monitored playlists gain the entry.
        #[arg(long)]
        user: String,
        /// Playlist URL; the platform is inferred from the host.
        url: String,
        /// Display name; defaults to the URL.
        #[arg(long)]
        name: Option<String>,
    },
    /// Regenerate the system cron table from user schedules.
    ResyncCron,
    /// Run the playlist monitor until interrupted.
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = TomlConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let app =
        std::sync::Arc::new(App::new(config, cli.data_dir.as_deref()).context("initializing")?);

    match cli.command {
        Command::Run { user, source } => match user {
            Some(username) => {
                let result = app.run_for_user(&username, source).await?;
                info!(
                    username,
                    downloaded = result.downloaded,
                    skipped = result.skipped,
                    failed = result.failed,
                    "Run finished"
                );
            }
            None => app.run_all(source).await?,
        },
        Command::Cleanup { user } => match user {
            Some(username) => {
                let result = app.cleanup_user(&username).await?;
                info!(
                    username,
                    deleted = result.deleted,
                    released = result.released,
                    remaining = result.remaining,
                    "Cleanup finished"
                );
            }
            None => app.cleanup_all().await?,
        },
        Command::AddPlaylist { user, url, name } => {
            let playlist = app.add_playlist(&user, &url, name.as_deref())?;
            info!(
                username = user,
                playlist = %playlist.name,
                platform = %playlist.platform,
                "Playlist registered"
            );
        }
        Command::ResyncCron => app.resync_cron()?,
        Command::Daemon => {
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Shutdown signal received");
                signal_cancel.cancel();
            });
            if let Err(e) = app.daemon(cancel).await {
                error!(error = %e, "Daemon exited with error");
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
