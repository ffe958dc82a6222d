//! Configuration specification types for protectsync.
//!
//! This module defines the structs that map to the `protectsync.yaml` file.
//! The file is declarative: each grouping lists the full membership it
//! should end up with, never the changes to get there.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::model::{member_set, Grouping, GroupingKind, MemberSet};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Management service connection.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Local state record.
    #[serde(default)]
    pub state: StateConfig,
    /// Reconciliation behavior.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Groupings and their desired membership.
    #[serde(default)]
    pub groupings: Vec<GroupingConfig>,
}

/// Management service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// GraphQL endpoint URL.
    #[serde(default)]
    pub endpoint: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Local state record settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// State file path. Defaults to `.protectsync/state.json`.
    #[serde(default)]
    pub path: Option<String>,
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Seconds between convergence polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds the CLI waits for convergence before cancelling.
    #[serde(default = "default_convergence_timeout")]
    pub convergence_timeout_secs: u64,
    /// Keep reconciling other groupings after one fails.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// A single grouping and the membership it should have.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupingConfig {
    /// Unique local name.
    pub name: String,
    /// Grouping kind.
    pub kind: GroupingKind,
    /// Remote identifier.
    pub id: String,
    /// Desired members. An empty list removes every member.
    #[serde(default)]
    pub members: Vec<String>,
    /// Extra member relations (member -> prerequisites).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_poll_interval() -> u64 {
    5
}

const fn default_convergence_timeout() -> u64 {
    600
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            convergence_timeout_secs: default_convergence_timeout(),
            continue_on_error: false,
        }
    }
}

impl ReconcileConfig {
    /// Returns the poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns the convergence timeout.
    #[must_use]
    pub const fn convergence_timeout(&self) -> Duration {
        Duration::from_secs(self.convergence_timeout_secs)
    }
}

impl SyncConfig {
    /// Looks up a grouping by name.
    #[must_use]
    pub fn grouping(&self, name: &str) -> Option<&GroupingConfig> {
        self.groupings.iter().find(|g| g.name == name)
    }

    /// Returns grouping names in file order.
    #[must_use]
    pub fn grouping_names(&self) -> Vec<&str> {
        self.groupings.iter().map(|g| g.name.as_str()).collect()
    }

    /// Keeps only the named grouping, if a name is given.
    ///
    /// Returns `None` if the name is unknown.
    #[must_use]
    pub fn select(mut self, name: Option<&str>) -> Option<Self> {
        if let Some(name) = name {
            self.groupings.retain(|g| g.name == name);
            if self.groupings.is_empty() {
                return None;
            }
        }
        Some(self)
    }
}

impl GroupingConfig {
    /// Returns the grouping identity.
    #[must_use]
    pub fn to_grouping(&self) -> Grouping {
        Grouping::new(&self.name, self.kind, &self.id)
    }

    /// Returns the desired membership as a set.
    #[must_use]
    pub fn desired_members(&self) -> MemberSet {
        member_set(self.members.iter().map(String::as_str))
    }
}
