//! Local file-based state storage backend.
//!
//! The state is a pretty-printed JSON file written through a temporary file
//! and an atomic rename. The lock is a sibling JSON file that is only ever
//! created by hard-linking a fully written temporary file into place, which
//! fails if a lock already exists.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError, SyncError};

use super::lock::{generate_holder_id, LockInfo};
use super::store::StateStore;
use super::types::{SyncState, STATE_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".protectsync";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Directory holding the state and lock files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store under `.protectsync/` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| SyncError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(STATE_FILE),
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
        }
    }

    /// Creates a store from a custom state file path.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Self {
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
            state_path,
        }
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Writes `content` to `path` and syncs it to disk.
    async fn write_synced(path: &Path, content: &str) -> Result<()> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create {}: {e}", path.display())))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write {}: {e}", path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync {}: {e}", path.display())))?;
        Ok(())
    }

    /// Writes `content` to `path` through a temporary file and a rename.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        self.ensure_dir().await?;

        let temp_path = path.with_extension("tmp");
        Self::write_synced(&temp_path, content).await?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename {}: {e}", temp_path.display())))?;

        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Corrupted {
                    message: format!("Failed to read lock file: {e}"),
                }
                .into());
            }
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        })?;

        Ok(Some(lock_info))
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }

    /// Publishes `lock` unless a lock file already exists.
    ///
    /// Returns `false` if another lock is in place.
    async fn try_create_lock(&self, lock: &LockInfo, content: &str) -> Result<bool> {
        self.ensure_dir().await?;

        let temp_path = self.base_dir.join(format!("{LOCK_FILE}.{}.tmp", lock.lock_id));
        Self::write_synced(&temp_path, content).await?;

        let linked = fs::hard_link(&temp_path, &self.lock_path).await;

        if let Err(e) = fs::remove_file(&temp_path).await {
            debug!("Failed to remove {}: {e}", temp_path.display());
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            }
            .into()),
        }
    }

    /// Builds the error for a lock held by someone else.
    async fn held_by_other(&self) -> SyncError {
        match self.read_lock_file().await {
            Ok(Some(existing)) => StateError::LockedByOther {
                holder: existing.holder,
                since: existing.acquired_at.to_rfc3339(),
            }
            .into(),
            Ok(None) => StateError::LockFailed {
                message: String::from("Lock changed hands during acquisition; try again"),
            }
            .into(),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<SyncState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })?;

        let state: SyncState = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state file: {e}"),
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        Ok(Some(state))
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.write_atomic(&self.state_path, &content).await?;

        debug!("State saved to: {}", self.state_path.display());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::write(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str, ttl_secs: i64) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::with_ttl(&holder_id, ttl_secs);
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        if !self.try_create_lock(&lock_info, &content).await? {
            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }
                    .into());
                }
                Some(existing) => {
                    warn!("Taking over expired lock held by {}", existing.holder);
                    self.release_lock(&existing.lock_id).await?;
                }
                None => {}
            }

            if !self.try_create_lock(&lock_info, &content).await? {
                return Err(self.held_by_other().await);
            }
        }

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id,
            lock_info.remaining_secs()
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .read_lock_file()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{member_set, Grouping, GroupingKind};
    use crate::state::{HistoryEntry, LOCK_EXPIRY_SECS};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join("nested"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut state = SyncState::new();
        state.record_success(
            &Grouping::new("gold", GroupingKind::SlaDomain, "sla-1"),
            member_set(["vm-1", "vm-2"]),
            String::from("abc"),
            HistoryEntry::success(2, 0),
        );
        store.save(&state).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        let record = loaded.get("gold").expect("record should exist");
        assert_eq!(record.members, member_set(["vm-1", "vm-2"]));
        assert_eq!(record.kind, GroupingKind::SlaDomain);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        assert!(store.load().await.expect("Load should not fail").is_none());
        let state = store.load_or_default().await.expect("Load should not fail");
        assert!(state.groupings.is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, _temp) = create_test_store();

        let mut state = SyncState::new();
        state.version = String::from("0.1");
        store.save(&state).await.expect("Failed to save state");

        let result = store.load().await;
        assert!(matches!(
            result,
            Err(SyncError::State(StateError::VersionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let (store, _temp) = create_test_store();

        assert!(!store.exists().await.expect("exists check failed"));
        store.save(&SyncState::new()).await.expect("Failed to save state");
        assert!(store.exists().await.expect("exists check failed"));

        store.delete().await.expect("Failed to delete state");
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder", LOCK_EXPIRY_SECS)
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1", LOCK_EXPIRY_SECS)
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2", LOCK_EXPIRY_SECS).await;
        assert!(matches!(
            result,
            Err(SyncError::State(StateError::LockedByOther { ref holder, .. })) if holder == "holder-1"
        ));
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();

        store.acquire_lock("holder-1", LOCK_EXPIRY_SECS).await.expect("Failed to acquire lock");
        store.release_lock("not-the-lock").await.expect("release should not fail");

        assert!(store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();

        store.acquire_lock("crashed", -1).await.expect("Failed to acquire lock");
        let lock = store
            .acquire_lock("holder-2", LOCK_EXPIRY_SECS)
            .await
            .expect("expired lock should be taken over");

        let current = store
            .get_lock_info()
            .await
            .expect("get_lock_info failed")
            .expect("lock should exist");
        assert_eq!(current.lock_id, lock.lock_id);
        assert_eq!(current.holder, "holder-2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_single_winner() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        for round in 0..25 {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let store = LocalStateStore::with_base_dir(temp_dir.path().join("shared"));
                    let holder = format!("holder-{i}");
                    tokio::spawn(async move { store.acquire_lock(&holder, LOCK_EXPIRY_SECS).await })
                })
                .collect();

            let mut winners = Vec::new();
            for handle in handles {
                match handle.await.expect("task panicked") {
                    Ok(lock) => winners.push(lock),
                    Err(e) => assert!(
                        matches!(e, SyncError::State(StateError::LockedByOther { .. })),
                        "unexpected error: {e}"
                    ),
                }
            }

            assert_eq!(winners.len(), 1, "round {round}");

            let store = LocalStateStore::with_base_dir(temp_dir.path().join("shared"));
            store
                .release_lock(&winners[0].lock_id)
                .await
                .expect("Failed to release lock");
        }
    }
}
