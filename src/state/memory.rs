//! In-memory state store.
//!
//! Nothing survives the process. Used by `--no-state` runs and in tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::{Result, StateError, SyncError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::SyncState;

#[derive(Debug, Default)]
struct Inner {
    state: Option<SyncState>,
    lock: Option<LockInfo>,
}

/// State store holding everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> Result<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| SyncError::internal("memory state store mutex poisoned"))?;
        Ok(f(&mut inner))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<SyncState>> {
        self.with_inner(|inner| inner.state.clone())
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        self.with_inner(|inner| inner.state = Some(state.clone()))
    }

    async fn delete(&self) -> Result<()> {
        self.with_inner(|inner| {
            inner.state = None;
            inner.lock = None;
        })
    }

    async fn exists(&self) -> Result<bool> {
        self.with_inner(|inner| inner.state.is_some())
    }

    async fn acquire_lock(&self, holder: &str, ttl_secs: i64) -> Result<LockInfo> {
        self.with_inner(|inner| match &inner.lock {
            Some(existing) if !existing.is_expired() => Err(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }
            .into()),
            _ => {
                let lock = LockInfo::with_ttl(holder, ttl_secs);
                inner.lock = Some(lock.clone());
                Ok(lock)
            }
        })?
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        self.with_inner(|inner| {
            if inner.lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
                inner.lock = None;
            }
        })
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.with_inner(|inner| inner.lock.clone())
    }

    async fn is_locked(&self) -> Result<bool> {
        self.with_inner(|inner| inner.lock.as_ref().is_some_and(|l| !l.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
