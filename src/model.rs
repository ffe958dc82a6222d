//! Core domain types: groupings, grouping kinds and member identifiers.
//!
//! A grouping owns a set of opaque member identifiers. Membership sets are
//! ordered (`BTreeSet`) so that plans, logs and hashes are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::PlanError;

/// Opaque identifier of a grouping member (cloud object, account or feature).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

/// A set of member identifiers.
pub type MemberSet = BTreeSet<MemberId>;

/// Kind of grouping being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupingKind {
    /// Objects assigned to an SLA domain.
    SlaDomain,
    /// Cloud accounts in the scope of a tag rule.
    TagRuleScope,
    /// Features enabled on a cloud account.
    AccountFeatureSet,
}

/// A grouping: remote identifier plus kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grouping {
    /// Local name, as declared in configuration.
    pub name: String,
    /// Kind of grouping.
    pub kind: GroupingKind,
    /// Remote identifier (UUID or composite key).
    pub id: String,
}

impl MemberId {
    /// Creates a member identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl GroupingKind {
    /// All supported grouping kinds.
    pub const ALL: [Self; 3] = [Self::SlaDomain, Self::TagRuleScope, Self::AccountFeatureSet];

    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SlaDomain => "SLA_DOMAIN",
            Self::TagRuleScope => "TAG_RULE_SCOPE",
            Self::AccountFeatureSet => "ACCOUNT_FEATURE_SET",
        }
    }

    /// Returns true if the remote "add" call replaces the whole membership,
    /// so it must be sent the full intended set.
    #[must_use]
    pub const fn is_replace_style(self) -> bool {
        matches!(self, Self::TagRuleScope)
    }

    /// Returns true if members of this kind can depend on each other.
    #[must_use]
    pub const fn is_dependency_aware(self) -> bool {
        matches!(self, Self::AccountFeatureSet)
    }
}

impl FromStr for GroupingKind {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| PlanError::UnknownGroupingKind {
                kind: s.to_string(),
            })
    }
}

impl std::fmt::Display for GroupingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Grouping {
    /// Creates a grouping.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: GroupingKind, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for Grouping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}' ({})", self.kind, self.name, self.id)
    }
}

/// Builds a member set from anything yielding string-like identifiers.
pub fn member_set<I, S>(members: I) -> MemberSet
where
    I: IntoIterator<Item = S>,
    S: Into<MemberId>,
{
    members.into_iter().map(Into::into).collect()
}

/// Formats a member set as a comma-separated list.
#[must_use]
pub fn format_members(members: &MemberSet) -> String {
    members
        .iter()
        .map(MemberId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
