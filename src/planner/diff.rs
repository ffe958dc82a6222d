//! Set differ for comparing desired vs observed membership.
//!
//! This module computes which members must be added to and removed from a
//! grouping so that its observed membership becomes the desired one.

use serde::Serialize;

use crate::model::{format_members, MemberSet};

/// Difference between an observed and a desired membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipDiff {
    /// Members in the desired set but not the observed one.
    pub to_add: MemberSet,
    /// Members in the observed set but not the desired one.
    pub to_remove: MemberSet,
    /// Full membership after the operation (the desired set).
    pub total: MemberSet,
}

impl MembershipDiff {
    /// Computes the diff between the old and the new membership.
    ///
    /// `to_add` and `to_remove` are always disjoint, and applying them to
    /// `old` yields `new`.
    #[must_use]
    pub fn compute(old: &MemberSet, new: &MemberSet) -> Self {
        Self {
            to_add: new.difference(old).cloned().collect(),
            to_remove: old.difference(new).cloned().collect(),
            total: new.clone(),
        }
    }

    /// Returns true if there are any changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.to_add.is_empty() || !self.to_remove.is_empty()
    }

    /// Returns the total number of changed members.
    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    /// Applies the diff to a membership, returning the resulting set.
    #[must_use]
    pub fn apply_to(&self, old: &MemberSet) -> MemberSet {
        old.union(&self.to_add)
            .filter(|member| !self.to_remove.contains(*member))
            .cloned()
            .collect()
    }
}

impl std::fmt::Display for MembershipDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "no change");
        }
        write!(
            f,
            "+[{}] -[{}]",
            format_members(&self.to_add),
            format_members(&self.to_remove)
        )
    }
}
