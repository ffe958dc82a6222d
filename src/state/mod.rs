//! Local state record for protectsync.
//!
//! This module records what each grouping was last reconciled to, together
//! with a bounded history of passes and a lock guarding concurrent runs.

mod store;
mod local;
mod memory;
mod lock;
mod types;

pub use store::StateStore;
#[cfg(test)]
pub use store::MockStateStore;
pub use local::{LocalStateStore, STATE_DIR};
pub use memory::MemoryStateStore;
pub use lock::{generate_holder_id, run_lock_ttl, LockInfo, LOCK_EXPIRY_SECS, MAX_LOCK_TTL_SECS};
pub use types::{GroupingRecord, HistoryEntry, SyncState, MAX_HISTORY, STATE_VERSION};
