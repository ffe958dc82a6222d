//! State locking for concurrent access protection.
//!
//! The engine itself never serializes reconciliations of one grouping. The
//! CLI takes this lock around a run so that two processes sharing a state
//! file do not reconcile the same groupings at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Upper bound for any lock lifetime (30 days).
pub const MAX_LOCK_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Information about a state lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock with the default expiry.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::with_ttl(holder, LOCK_EXPIRY_SECS)
    }

    /// Creates a new lock expiring after `ttl_secs`.
    #[must_use]
    pub fn with_ttl(holder: &str, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} held by {} since {} ({}s left)",
            self.lock_id,
            self.holder,
            self.acquired_at.to_rfc3339(),
            self.remaining_secs()
        )
    }
}

/// Lock lifetime for a run bounded by `timeout`.
///
/// Cancellation is only observed between remote calls, so the lock outlives
/// the timeout by [`LOCK_EXPIRY_SECS`] to cover calls still in flight.
#[must_use]
pub fn run_lock_ttl(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_secs())
        .unwrap_or(MAX_LOCK_TTL_SECS)
        .saturating_add(LOCK_EXPIRY_SECS)
        .min(MAX_LOCK_TTL_SECS)
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(
        |_| String::from("unknown"),
        |h| h.to_string_lossy().to_string(),
    );

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
