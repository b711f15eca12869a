//! Durable, concurrency-safe per-user state store
//!
//! One JSON document per username, atomically replaced on every write
//! (write-to-temporary-then-rename), so readers always observe either
//! the prior complete state or the new complete state. Mutual exclusion
//! is per-username: concurrent mutations of the same user serialize,
//! different users proceed independently.

mod migrate;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use trackdrop_common::model::UserState;
use trackdrop_common::{Error, Result};

/// Thread-safe unified state store.
///
/// All components read and mutate user state exclusively through this
/// type; none may cache a copy across a mutation.
pub struct StateStore {
    data_dir: PathBuf,
    // Per-username locks, created lazily and never removed.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StateStore {
    /// Open (creating if needed) a store rooted at `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Read a user's state, creating an empty default (after one-shot
    /// legacy migration) if no document exists yet.
    pub fn read_user(&self, username: &str) -> Result<UserState> {
        let lock = self.user_lock(username);
        let _guard = lock.lock().map_err(poisoned)?;
        self.load_locked(username)
    }

    /// Atomic read-modify-write under the per-username lock. The second
    /// of two concurrent calls for the same user blocks until the
    /// first's write is durable. Returns the state as written.
    pub fn mutate<F>(&self, username: &str, f: F) -> Result<UserState>
    where
        F: FnOnce(&mut UserState),
    {
        let lock = self.user_lock(username);
        let _guard = lock.lock().map_err(poisoned)?;

        let mut state = self.load_locked(username)?;
        f(&mut state);
        state.last_modified = Some(trackdrop_common::time::now());
        self.write_locked(username, &state)?;
        Ok(state)
    }

    /// All usernames with a stored document.
    pub fn list_users(&self) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(user) = name
                .strip_prefix("user_")
                .and_then(|n| n.strip_suffix(".json"))
            {
                users.push(user.to_string());
            }
        }
        users.sort();
        Ok(users)
    }

    fn user_lock(&self, username: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn user_file(&self, username: &str) -> PathBuf {
        let safe = username.replace(['/', '\\'], "_");
        self.data_dir.join(format!("user_{safe}.json"))
    }

    /// Load a user's document. Caller must hold the per-user lock.
    ///
    /// Absent document: run legacy migration once; if legacy data was
    /// found the merged document is written immediately (so migration
    /// never re-runs), otherwise a default state is returned without
    /// creating a file. A malformed document is preserved aside and an
    /// empty state substituted, with the failure logged.
    fn load_locked(&self, username: &str) -> Result<UserState> {
        let path = self.user_file(username);
        if !path.exists() {
            if let Some(migrated) = migrate::migrate_user(&self.data_dir, username)? {
                info!(username, "Migrated legacy data into unified state document");
                self.write_locked(username, &migrated)?;
                return Ok(migrated);
            }
            return Ok(UserState::default());
        }

        let content = fs::read_to_string(&path)?;
        match serde_json::from_str::<UserState>(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                let aside = path.with_extension(format!(
                    "json.corrupt-{}",
                    trackdrop_common::time::now().timestamp()
                ));
                error!(
                    username,
                    error = %e,
                    preserved = %aside.display(),
                    "Unreadable state document; preserving aside and starting empty"
                );
                fs::rename(&path, &aside)?;
                Ok(UserState::default())
            }
        }
    }

    /// Durably write a user's document. Caller must hold the per-user
    /// lock. Write-to-temporary-then-atomic-rename: a crash mid-write
    /// leaves the prior document fully intact.
    fn write_locked(&self, username: &str, state: &UserState) -> Result<()> {
        let path = self.user_file(username);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(state)?;
        fs::write(&tmp, &json).map_err(|e| {
            warn!(username, error = %e, "Failed writing temporary state file");
            Error::Store(format!("write {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Store(format!("replace {}: {e}", path.display())))?;
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Internal("user lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use trackdrop_common::model::{DownloadOutcome, DownloadRecord, TrackKey};
    use uuid::Uuid;

    fn record(n: usize) -> DownloadRecord {
        DownloadRecord {
            key: TrackKey::new("artist", &format!("title {n}"), "album"),
            artist: "artist".into(),
            title: format!("title {n}"),
            album: Some("album".into()),
            timestamp: trackdrop_common::time::now(),
            outcome: DownloadOutcome::Downloaded,
            source_job_id: Uuid::new_v4(),
            source: "test".into(),
            file_path: None,
        }
    }

    #[test]
    fn read_absent_user_returns_default_without_creating_file() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let state = store.read_user("alice").unwrap();
        assert!(state.history.is_empty());
        assert!(!dir.path().join("user_alice.json").exists());
        assert!(store.list_users().unwrap().is_empty());
    }

    #[test]
    fn mutate_persists_and_lists_user() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store
            .mutate("alice", |s| s.history.push(record(0)))
            .unwrap();

        let state = store.read_user("alice").unwrap();
        assert_eq!(state.history.len(), 1);
        assert!(state.last_modified.is_some());
        assert_eq!(store.list_users().unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn usernames_with_path_separators_are_sanitized() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store.mutate("a/b\\c", |_| {}).unwrap();
        assert!(dir.path().join("user_a_b_c.json").exists());
    }

    #[test]
    fn corrupt_document_is_preserved_aside() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        fs::write(dir.path().join("user_bob.json"), b"{not json").unwrap();
        let state = store.read_user("bob").unwrap();
        assert!(state.history.is_empty());

        let preserved = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains("corrupt"));
        assert!(preserved, "corrupt file should be renamed aside, not deleted");
    }

    #[test]
    fn stale_temp_file_is_ignored_by_readers() {
        // Simulates a crash between "write temporary" and "atomic
        // replace": the prior document must stay fully readable.
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store
            .mutate("carol", |s| s.history.push(record(0)))
            .unwrap();
        fs::write(
            dir.path().join("user_carol.json.tmp"),
            b"torn half-written garbage",
        )
        .unwrap();

        let state = store.read_user("carol").unwrap();
        assert_eq!(state.history.len(), 1);
        // The temp file is also not mistaken for a user document.
        assert_eq!(store.list_users().unwrap(), vec!["carol".to_string()]);
    }
}
