//! Planning module for membership changes.
//!
//! This module computes the difference between desired and observed
//! membership, orders it into an assignment plan and executes the plan.

mod diff;
mod order;
mod plan;
mod executor;

pub use diff::MembershipDiff;
pub use order::{DependencyGraph, OrderingPolicy, CLOUD_NATIVE_ARCHIVAL, CLOUD_NATIVE_PROTECTION};
pub use plan::{AssignmentPlan, Phase, PlanStep};
pub use executor::{AssignmentExecutor, ExecutionReport};
