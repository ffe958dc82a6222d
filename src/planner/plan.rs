//! Assignment plan types.
//!
//! A plan is an ordered list of add/remove steps for a single grouping,
//! produced by the ordering policy and consumed by the executor.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{format_members, Grouping, MemberSet};

use super::diff::MembershipDiff;

/// Phase of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Add members to the grouping.
    Add,
    /// Remove members from the grouping.
    Remove,
}

/// A single step: one remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    /// Step phase.
    pub phase: Phase,
    /// Members carried by the call.
    pub members: MemberSet,
}

/// An ordered assignment plan for one grouping.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Grouping the plan applies to.
    pub grouping: Grouping,
    /// The diff the plan was built from.
    pub diff: MembershipDiff,
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
}

impl PlanStep {
    /// Creates an add step.
    #[must_use]
    pub const fn add(members: MemberSet) -> Self {
        Self {
            phase: Phase::Add,
            members,
        }
    }

    /// Creates a remove step.
    #[must_use]
    pub const fn remove(members: MemberSet) -> Self {
        Self {
            phase: Phase::Remove,
            members,
        }
    }

    /// Returns true if the step carries no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl AssignmentPlan {
    /// Creates a plan from ordered steps.
    #[must_use]
    pub fn new(grouping: Grouping, diff: MembershipDiff, steps: Vec<PlanStep>) -> Self {
        Self {
            created_at: Utc::now(),
            grouping,
            diff,
            steps,
        }
    }

    /// Returns true if the plan issues no remote call.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.iter().all(PlanStep::is_empty)
    }

    /// Returns the steps that will issue a remote call.
    pub fn effective_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|step| !step.is_empty())
    }

    /// Returns the number of remote calls the plan will issue.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.effective_steps().count()
    }

    /// Returns the position of the step carrying `member` in `phase`.
    #[must_use]
    pub fn step_index(&self, phase: Phase, member: &str) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.phase == phase && s.members.iter().any(|m| m.as_str() == member))
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Remove => "remove",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.phase, format_members(&self.members))
    }
}

impl std::fmt::Display for AssignmentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "{}: no changes required", self.grouping);
        }

        writeln!(f, "Plan for {} ({} calls):", self.grouping, self.call_count())?;
        for (i, step) in self.effective_steps().enumerate() {
            writeln!(f, "  {}. {step}", i + 1)?;
        }
        Ok(())
    }
}
