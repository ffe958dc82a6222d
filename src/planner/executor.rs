//! Assignment executor for applying plans.
//!
//! This module issues the remote add/remove calls of an assignment plan,
//! one call per non-empty step, in plan order. A successful call means the
//! mutation was accepted, not that it is visible yet.

use tracing::{debug, error, info};

use crate::error::{ReconcileError, Result, SyncError};
use crate::model::{format_members, MemberSet};
use crate::remote::MembershipApi;

use super::plan::{AssignmentPlan, Phase, PlanStep};

/// Executor for assignment plans.
#[derive(Debug)]
pub struct AssignmentExecutor<'a, A: MembershipApi + ?Sized> {
    /// Remote API.
    api: &'a A,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Members whose addition was accepted.
    pub accepted_added: MemberSet,
    /// Members whose removal was accepted.
    pub accepted_removed: MemberSet,
    /// Number of remote calls issued.
    pub calls: usize,
    /// Number of empty steps skipped.
    pub skipped: usize,
}

impl<'a, A: MembershipApi + ?Sized> AssignmentExecutor<'a, A> {
    /// Creates a new executor.
    #[must_use]
    pub const fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Executes a plan.
    ///
    /// Execution stops at the first rejected call; steps already accepted
    /// are not rolled back.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Execution` if the first issued call fails,
    /// or `ReconcileError::PartialReconciliation` if a later call fails.
    pub async fn execute(&self, plan: &AssignmentPlan) -> Result<ExecutionReport> {
        let grouping = &plan.grouping;
        info!(
            "Executing plan for {} with {} call(s)",
            grouping,
            plan.call_count()
        );

        let full_set = grouping.kind.is_replace_style().then_some(&plan.diff.total);
        let mut report = ExecutionReport::default();

        for step in &plan.steps {
            if step.is_empty() {
                debug!("Skipping empty {} step for {}", step.phase, grouping);
                report.skipped += 1;
                continue;
            }

            info!("{} {}: {}", grouping, step.phase, format_members(&step.members));

            let outcome = match step.phase {
                Phase::Add => self.api.add_members(grouping, &step.members, full_set).await,
                Phase::Remove => self.api.remove_members(grouping, &step.members, full_set).await,
            };

            if let Err(e) = outcome {
                error!("{} of {} failed: {}", step.phase, grouping, e);
                return Err(Self::failure(plan, &report, step, e));
            }

            report.calls += 1;
            match step.phase {
                Phase::Add => report.accepted_added.extend(step.members.iter().cloned()),
                Phase::Remove => report.accepted_removed.extend(step.members.iter().cloned()),
            }
        }

        Ok(report)
    }

    /// Builds the error for a failed step.
    fn failure(plan: &AssignmentPlan, report: &ExecutionReport, step: &PlanStep, source: SyncError) -> SyncError {
        let grouping = plan.grouping.name.clone();

        if report.calls == 0 {
            return SyncError::Reconcile(ReconcileError::Execution {
                grouping,
                phase: step.phase,
                members: step.members.clone(),
                source: Box::new(source),
            });
        }

        SyncError::Reconcile(ReconcileError::PartialReconciliation {
            grouping,
            accepted_added: report.accepted_added.clone(),
            accepted_removed: report.accepted_removed.clone(),
            remaining_add: plan.diff.to_add.difference(&report.accepted_added).cloned().collect(),
            remaining_remove: plan
                .diff
                .to_remove
                .difference(&report.accepted_removed)
                .cloned()
                .collect(),
            phase: step.phase,
            failed_members: step.members.clone(),
            source: Box::new(source),
        })
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Issued {} call(s): {} added, {} removed, {} empty step(s) skipped",
            self.calls,
            self.accepted_added.len(),
            self.accepted_removed.len(),
            self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{member_set, Grouping, GroupingKind};
    use crate::planner::{MembershipDiff, OrderingPolicy};
    use crate::remote::testing::{Call, ScriptedRemote};

    fn plan_for(kind: GroupingKind, observed: &MemberSet, desired: &MemberSet) -> AssignmentPlan {
        let grouping = Grouping::new("g", kind, "id-1");
        let diff = MembershipDiff::compute(observed, desired);
        OrderingPolicy::Default.order(&grouping, diff).unwrap()
    }

    #[tokio::test]
    async fn test_add_then_remove_calls() {
        let observed = member_set(["B", "C"]);
        let remote = ScriptedRemote::new(observed.clone(), 0);
        let plan = plan_for(GroupingKind::SlaDomain, &observed, &member_set(["A", "B"]));

        let report = AssignmentExecutor::new(&remote).execute(&plan).await.unwrap();

        assert_eq!(
            remote.mutations(),
            vec![
                Call::Add(member_set(["A"]), None),
                Call::Remove(member_set(["C"]), None),
            ]
        );
        assert_eq!(report.calls, 2);
        assert_eq!(report.accepted_added, member_set(["A"]));
        assert_eq!(report.accepted_removed, member_set(["C"]));
    }

    #[tokio::test]
    async fn test_full_removal_issues_only_remove() {
        let observed = member_set(["X", "Y"]);
        let remote = ScriptedRemote::new(observed.clone(), 0);
        let plan = plan_for(GroupingKind::SlaDomain, &observed, &MemberSet::new());

        let report = AssignmentExecutor::new(&remote).execute(&plan).await.unwrap();

        assert_eq!(remote.mutations(), vec![Call::Remove(member_set(["X", "Y"]), None)]);
        assert_eq!(report.skipped, 1);
        assert!(remote.members().is_empty());
    }

    #[tokio::test]
    async fn test_replace_style_remove_sends_full_set() {
        let observed = member_set(["B", "C"]);
        let remote = ScriptedRemote::new(observed.clone(), 0);
        let desired = member_set(["A", "B"]);
        let plan = plan_for(GroupingKind::TagRuleScope, &observed, &desired);

        AssignmentExecutor::new(&remote).execute(&plan).await.unwrap();

        assert_eq!(
            remote.mutations(),
            vec![
                Call::Add(member_set(["A"]), Some(desired.clone())),
                Call::Remove(member_set(["C"]), Some(desired)),
            ]
        );
    }

    #[tokio::test]
    async fn test_replace_style_sends_full_set() {
        let observed = member_set(["acct-1"]);
        let remote = ScriptedRemote::new(observed.clone(), 0);
        let desired = member_set(["acct-1", "acct-2"]);
        let plan = plan_for(GroupingKind::TagRuleScope, &observed, &desired);

        AssignmentExecutor::new(&remote).execute(&plan).await.unwrap();

        assert_eq!(
            remote.mutations(),
            vec![Call::Add(member_set(["acct-2"]), Some(desired))]
        );
    }

    #[tokio::test]
    async fn test_empty_plan_issues_nothing() {
        let observed = member_set(["a"]);
        let remote = ScriptedRemote::new(observed.clone(), 0);
        let plan = plan_for(GroupingKind::SlaDomain, &observed, &observed);

        let report = AssignmentExecutor::new(&remote).execute(&plan).await.unwrap();

        assert!(remote.calls().is_empty());
        assert_eq!(report.calls, 0);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_first_step_failure_is_execution_error() {
        let observed = member_set(["B", "C"]);
        let remote = ScriptedRemote::new(observed.clone(), 0).fail_on(Phase::Add, 0);
        let plan = plan_for(GroupingKind::SlaDomain, &observed, &member_set(["A", "B"]));

        let err = AssignmentExecutor::new(&remote).execute(&plan).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Reconcile(ReconcileError::Execution { phase: Phase::Add, ref members, .. })
                if *members == member_set(["A"])
        ));
        // Execution stops: the remove step is never issued.
        assert_eq!(remote.mutations().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_failure_after_add_is_partial() {
        let observed = member_set(["B", "C"]);
        let remote = ScriptedRemote::new(observed.clone(), 0).fail_on(Phase::Remove, 1);
        let plan = plan_for(GroupingKind::SlaDomain, &observed, &member_set(["A", "B"]));

        let err = AssignmentExecutor::new(&remote).execute(&plan).await.unwrap_err();

        match err {
            SyncError::Reconcile(ReconcileError::PartialReconciliation {
                accepted_added,
                accepted_removed,
                remaining_add,
                remaining_remove,
                phase,
                ..
            }) => {
                assert_eq!(accepted_added, member_set(["A"]));
                assert!(accepted_removed.is_empty());
                assert!(remaining_add.is_empty());
                assert_eq!(remaining_remove, member_set(["C"]));
                assert_eq!(phase, Phase::Remove);
            }
            other => panic!("expected partial reconciliation, got {other:?}"),
        }
        // The accepted add is not rolled back.
        assert_eq!(remote.members(), member_set(["A", "B", "C"]));
    }
}
