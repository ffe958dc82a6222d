//! State store trait definition.
//!
//! This module defines the common interface for backends that record the
//! membership each grouping was last reconciled to.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::SyncState;

/// Trait for state storage backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the recorded state.
    ///
    /// Returns `None` if nothing has been recorded yet.
    async fn load(&self) -> Result<Option<SyncState>>;

    /// Loads the recorded state, or an empty one if none exists.
    async fn load_or_default(&self) -> Result<SyncState> {
        Ok(self.load().await?.unwrap_or_default())
    }

    /// Saves the recorded state.
    async fn save(&self, state: &SyncState) -> Result<()>;

    /// Deletes the recorded state.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires a lock on the state that expires after `ttl_secs`.
    ///
    /// At most one caller holds an unexpired lock at a time.
    async fn acquire_lock(&self, holder: &str, ttl_secs: i64) -> Result<LockInfo>;

    /// Releases a lock on the state. Unknown lock IDs are ignored.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by an unexpired lock.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<SyncState>> {
        (**self).load().await
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str, ttl_secs: i64) -> Result<LockInfo> {
        (**self).acquire_lock(holder, ttl_secs).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
