//! Background playlist monitor
//!
//! A single fixed-interval loop wakes, scans every user's monitored
//! playlists, and dispatches a sync task for each one that is due.
//! Dispatch never blocks the loop: syncs run as spawned tasks, and an
//! in-flight set guarantees at most one sync per playlist at a time.
//! `last_synced` advances only when a sync succeeds, so a failed
//! playlist is retried at the next wake that finds it still due.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use trackdrop_common::model::MonitoredPlaylist;
use trackdrop_common::{Error, Result};

use crate::store::StateStore;

/// How long shutdown waits for in-flight syncs before aborting them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct MonitorLoop<D> {
    store: Arc<StateStore>,
    dispatch: Arc<D>,
    wake_interval: Duration,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl<D, F> MonitorLoop<D>
where
    D: Fn(String, MonitoredPlaylist) -> F + Send + Sync + 'static,
    F: Future<Output = anyhow::Result<u32>> + Send + 'static,
{
    /// `dispatch` performs one playlist sync and returns the number of
    /// tracks seen on the playlist.
    pub fn new(store: Arc<StateStore>, wake_interval: Duration, dispatch: D) -> Self {
        Self {
            store,
            dispatch: Arc::new(dispatch),
            wake_interval,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run until `cancel` fires, then drain in-flight syncs.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(interval_secs = self.wake_interval.as_secs(), "Playlist monitor started");

        let mut interval = tokio::time::interval(self.wake_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tasks: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.due_playlists().await {
                        Ok(due) => self.dispatch_due(due, &mut tasks),
                        // A store error on one wake is not fatal to the
                        // loop; state is re-read next wake.
                        Err(e) => error!(error = %e, "Monitor wake failed"),
                    }
                }
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        error!(error = %e, "Playlist sync task panicked");
                    }
                }
            }
        }

        info!("Playlist monitor stopping, draining in-flight syncs");
        let drain = async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    error!(error = %e, "Playlist sync task panicked");
                }
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("Sync drain timed out, aborting remaining tasks");
        }
        Ok(())
    }

    /// One wake: scan every user's playlists for due ones. The store
    /// does file I/O, so the scan runs on the blocking pool rather
    /// than a runtime worker.
    async fn due_playlists(&self) -> Result<Vec<(String, MonitoredPlaylist)>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let now = trackdrop_common::time::now();
            let mut due = Vec::new();
            for username in store.list_users()? {
                let state = store.read_user(&username)?;
                for playlist in state.monitored_playlists {
                    if playlist.enabled && playlist.is_due(now) {
                        due.push((username.clone(), playlist));
                    }
                }
            }
            Ok(due)
        })
        .await
        .map_err(|e| Error::Internal(format!("monitor scan task: {e}")))?
    }

    /// Spawn a sync for each due playlist that is not already running.
    fn dispatch_due(&self, due: Vec<(String, MonitoredPlaylist)>, tasks: &mut JoinSet<()>) {
        for (username, playlist) in due {
            if !self.claim(playlist.id) {
                debug!(playlist = %playlist.name, "Sync already in flight, skipping");
                continue;
            }
            tasks.spawn(self.sync_task(username, playlist));
        }
    }

    fn sync_task(&self, username: String, playlist: MonitoredPlaylist) -> impl Future<Output = ()> {
        let store = Arc::clone(&self.store);
        let dispatch = Arc::clone(&self.dispatch);
        let in_flight = Arc::clone(&self.in_flight);
        async move {
            let id = playlist.id;
            let name = playlist.name.clone();
            debug!(username, playlist = %name, "Syncing playlist");

            match dispatch(username.clone(), playlist).await {
                Ok(track_count) => {
                    let synced_at = trackdrop_common::time::now();
                    let stamp_store = Arc::clone(&store);
                    let stamp_user = username.clone();
                    // The stamp write hits the filesystem; keep it off
                    // the runtime workers.
                    let updated = tokio::task::spawn_blocking(move || {
                        stamp_store.mutate(&stamp_user, |state| {
                            if let Some(p) = state.playlist_mut(id) {
                                p.last_synced = Some(synced_at);
                                p.last_track_count = track_count;
                            }
                        })
                    })
                    .await;
                    match updated {
                        Ok(Ok(_)) => info!(username, playlist = %name, track_count, "Playlist synced"),
                        Ok(Err(e)) => error!(username, playlist = %name, error = %e,
                            "Sync succeeded but recording it failed"),
                        Err(e) => error!(username, playlist = %name, error = %e,
                            "Sync stamp task failed"),
                    }
                }
                Err(e) => {
                    // last_synced untouched: the playlist stays due and
                    // is retried on the next wake.
                    warn!(username, playlist = %name, error = %e, "Playlist sync failed");
                }
            }

            if let Ok(mut set) = in_flight.lock() {
                set.remove(&id);
            }
        }
    }

    fn claim(&self, id: Uuid) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(id),
            Err(_) => false,
        }
    }
}
