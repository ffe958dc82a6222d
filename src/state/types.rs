//! State types for recording applied membership.
//!
//! The record holds what each grouping was last successfully reconciled to.
//! It is informational: every pass still diffs against the observed
//! membership, never against this record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Grouping, GroupingKind, MemberSet};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum history entries kept per grouping.
pub const MAX_HISTORY: usize = 50;

/// The complete local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    /// State format version.
    pub version: String,
    /// Records keyed by grouping name.
    pub groupings: BTreeMap<String, GroupingRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
}

/// Recorded state of a single grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingRecord {
    /// Grouping kind.
    pub kind: GroupingKind,
    /// Remote identifier.
    pub id: String,
    /// Members the grouping was last reconciled to.
    pub members: MemberSet,
    /// Fingerprint of `members`.
    pub membership_hash: String,
    /// When the grouping last converged.
    pub last_reconciled: Option<DateTime<Utc>>,
    /// Reconciliation history (most recent last).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A single reconciliation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the pass finished.
    pub timestamp: DateTime<Utc>,
    /// Number of members added.
    pub added: usize,
    /// Number of members removed.
    pub removed: usize,
    /// Whether the pass converged.
    pub success: bool,
    /// Error message if it did not.
    #[serde(default)]
    pub error: Option<String>,
}

impl SyncState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            groupings: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Gets a grouping record by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&GroupingRecord> {
        self.groupings.get(name)
    }

    /// Records a converged pass: the applied membership becomes `members`.
    pub fn record_success(
        &mut self,
        grouping: &Grouping,
        members: MemberSet,
        membership_hash: String,
        entry: HistoryEntry,
    ) {
        let record = self.record_mut(grouping);
        record.members = members;
        record.membership_hash = membership_hash;
        record.last_reconciled = Some(entry.timestamp);
        record.push_history(entry);
        self.last_updated = Utc::now();
    }

    /// Records a failed pass. The applied membership is left untouched.
    pub fn record_failure(&mut self, grouping: &Grouping, entry: HistoryEntry) {
        self.record_mut(grouping).push_history(entry);
        self.last_updated = Utc::now();
    }

    /// Removes a grouping record by name.
    pub fn remove(&mut self, name: &str) -> Option<GroupingRecord> {
        let result = self.groupings.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    fn record_mut(&mut self, grouping: &Grouping) -> &mut GroupingRecord {
        let record = self
            .groupings
            .entry(grouping.name.clone())
            .or_insert_with(|| GroupingRecord::new(grouping));
        // The configuration may have re-pointed the name at another grouping.
        record.kind = grouping.kind;
        record.id.clone_from(&grouping.id);
        record
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupingRecord {
    /// Creates an empty record for a grouping.
    #[must_use]
    pub fn new(grouping: &Grouping) -> Self {
        Self {
            kind: grouping.kind,
            id: grouping.id.clone(),
            members: MemberSet::new(),
            membership_hash: String::new(),
            last_reconciled: None,
            history: Vec::new(),
        }
    }

    /// Returns the most recent history entry.
    #[must_use]
    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn success(added: usize, removed: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            added,
            removed,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(added: usize, removed: usize, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            added,
            removed,
            success: false,
            error: Some(error.to_string()),
        }
    }
}
