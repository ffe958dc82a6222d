//! Reconciler for maintaining desired membership.
//!
//! This module runs one reconciliation pass per grouping: read the observed
//! membership, diff it against the desired set, order the changes, execute
//! them, wait for the remote service to show the result, then record the
//! applied membership locally.
//!
//! A pass never retries and never rolls back. Re-running a failed pass is
//! the recovery path: the diff is recomputed against whatever the remote
//! service shows at that point.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, GroupingConfig, SyncConfig};
use crate::error::{ReconcileError, Result, SyncError};
use crate::model::{Grouping, GroupingKind, MemberSet};
use crate::planner::{AssignmentExecutor, AssignmentPlan, MembershipDiff, OrderingPolicy};
use crate::remote::{ConvergencePoller, MembershipApi, DEFAULT_POLL_INTERVAL_SECS};
use crate::state::{HistoryEntry, StateStore};

/// Reconciler driving groupings towards their desired membership.
pub struct Reconciler<'a, A: MembershipApi + ?Sized, S: StateStore + ?Sized> {
    /// Remote management API.
    api: &'a A,
    /// Local state record.
    state_store: &'a S,
    /// Membership hasher.
    hasher: ConfigHasher,
    /// Interval between convergence polls.
    poll_interval: Duration,
    /// Keep going after a grouping fails in `reconcile_all`.
    continue_on_error: bool,
}

/// Result of a converged reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    /// Grouping name.
    pub grouping: String,
    /// Grouping kind.
    pub kind: GroupingKind,
    /// Members added by this pass.
    pub added: MemberSet,
    /// Members removed by this pass.
    pub removed: MemberSet,
    /// Remote add/remove calls issued.
    pub calls: usize,
    /// Membership reads while waiting for convergence.
    pub polls: u32,
    /// Wall time of the pass in seconds.
    pub elapsed_secs: f64,
}

/// A grouping that failed in `reconcile_all`.
#[derive(Debug, Serialize)]
pub struct GroupingFailure {
    /// Grouping name.
    pub grouping: String,
    /// Error message.
    pub error: String,
    /// Whether re-running the pass may succeed.
    pub retryable: bool,
    /// The error itself.
    #[serde(skip)]
    pub source: SyncError,
}

/// Outcome of reconciling every configured grouping.
#[derive(Debug, Default, Serialize)]
pub struct ReconcileSummary {
    /// Groupings that converged.
    pub results: Vec<ReconciliationResult>,
    /// Groupings that failed.
    pub failures: Vec<GroupingFailure>,
    /// Groupings not attempted after a failure or cancellation.
    pub skipped: Vec<String>,
}

/// Drift of a single grouping.
#[derive(Debug, Clone, Serialize)]
pub struct GroupingDrift {
    /// Grouping name.
    pub grouping: String,
    /// Grouping kind.
    pub kind: GroupingKind,
    /// Desired members the remote service does not show.
    pub missing: MemberSet,
    /// Members the remote service shows that are not desired.
    pub unexpected: MemberSet,
    /// The desired membership differs from the last applied record.
    pub desired_changed: bool,
    /// No pass has converged for this grouping yet.
    pub never_applied: bool,
}

/// Report of drift detection.
#[derive(Debug, Default, Serialize)]
pub struct DriftReport {
    /// Per-grouping drift, in configuration order.
    pub groupings: Vec<GroupingDrift>,
}

impl<'a, A: MembershipApi + ?Sized, S: StateStore + ?Sized> Reconciler<'a, A, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(api: &'a A, state_store: &'a S) -> Self {
        Self {
            api,
            state_store,
            hasher: ConfigHasher::new(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            continue_on_error: false,
        }
    }

    /// Sets the interval between convergence polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Keeps reconciling remaining groupings after one fails.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Reconciles a grouping with the default ordering for its kind.
    ///
    /// # Errors
    ///
    /// Returns the first error of the pass; see [`Self::reconcile_with_policy`].
    pub async fn reconcile(
        &self,
        grouping: &Grouping,
        desired: &MemberSet,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        let policy = OrderingPolicy::for_kind(grouping.kind, &BTreeMap::new());
        self.reconcile_with_policy(grouping, desired, &policy, cancel).await
    }

    /// Reconciles a configured grouping, including its member relations.
    ///
    /// # Errors
    ///
    /// Returns the first error of the pass.
    pub async fn reconcile_grouping(
        &self,
        config: &GroupingConfig,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        let policy = OrderingPolicy::for_kind(config.kind, &config.dependencies);
        self.reconcile_with_policy(&config.to_grouping(), &config.desired_members(), &policy, cancel)
            .await
    }

    /// Runs one pass: read, diff, order, execute, wait, record.
    ///
    /// The outcome is recorded locally either way; a failure never
    /// overwrites the applied membership.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::Aborted` if `cancel` fired before the pass started
    /// - `PlanError` if the changes cannot be ordered (nothing was issued)
    /// - `ReconcileError::Execution` or `PartialReconciliation` if a remote
    ///   call was rejected
    /// - `ReconcileError::ConvergenceTimeout` if `cancel` fired while waiting
    /// - `StateError` if the outcome cannot be recorded
    pub async fn reconcile_with_policy(
        &self,
        grouping: &Grouping,
        desired: &MemberSet,
        policy: &OrderingPolicy,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Aborted {
                reason: format!("cancelled before reconciling '{}'", grouping.name),
            }
            .into());
        }

        info!("Reconciling {}", grouping);
        let start = Instant::now();

        match self.run_pass(grouping, desired, policy, cancel, start).await {
            Ok(result) => {
                self.record_success(grouping, desired, &result).await?;
                info!(
                    "{} converged: +{} -{} in {:.1}s",
                    grouping,
                    result.added.len(),
                    result.removed.len(),
                    result.elapsed_secs
                );
                Ok(result)
            }
            Err(err) => {
                error!("Reconciliation of {} failed: {}", grouping, err);
                if let Err(record_err) = self.record_failure(grouping, &err).await {
                    warn!("Failed to record failure of {}: {}", grouping, record_err);
                }
                Err(err)
            }
        }
    }

    async fn run_pass(
        &self,
        grouping: &Grouping,
        desired: &MemberSet,
        policy: &OrderingPolicy,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<ReconciliationResult> {
        let plan = self.plan_with_policy(grouping, desired, policy).await?;

        let mut result = ReconciliationResult {
            grouping: grouping.name.clone(),
            kind: grouping.kind,
            added: MemberSet::new(),
            removed: MemberSet::new(),
            calls: 0,
            polls: 0,
            elapsed_secs: 0.0,
        };

        if plan.is_empty() {
            info!("{} is already converged", grouping);
            result.elapsed_secs = start.elapsed().as_secs_f64();
            return Ok(result);
        }

        let report = AssignmentExecutor::new(self.api).execute(&plan).await?;
        debug!("{}: {}", grouping, report);

        info!("Waiting for {} to converge", grouping);
        let convergence = ConvergencePoller::new(self.api)
            .with_interval(self.poll_interval)
            .wait_for_convergence(grouping, &plan.diff.to_add, &plan.diff.to_remove, cancel)
            .await?;

        result.added = report.accepted_added;
        result.removed = report.accepted_removed;
        result.calls = report.calls;
        result.polls = convergence.polls;
        result.elapsed_secs = start.elapsed().as_secs_f64();
        Ok(result)
    }

    /// Builds the plan for a configured grouping without executing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the observed membership cannot be read or the
    /// changes cannot be ordered.
    pub async fn plan(&self, config: &GroupingConfig) -> Result<AssignmentPlan> {
        let policy = OrderingPolicy::for_kind(config.kind, &config.dependencies);
        self.plan_with_policy(&config.to_grouping(), &config.desired_members(), &policy)
            .await
    }

    async fn plan_with_policy(
        &self,
        grouping: &Grouping,
        desired: &MemberSet,
        policy: &OrderingPolicy,
    ) -> Result<AssignmentPlan> {
        let observed = self.api.get_membership(grouping).await?;
        let diff = MembershipDiff::compute(&observed, desired);
        info!("{}: {}", grouping, diff);

        Ok(policy.order(grouping, diff)?)
    }

    /// Reconciles every configured grouping, one after the other.
    ///
    /// Groupings are independent: a failure stops the run unless
    /// `continue_on_error` is set, and converged groupings are kept.
    /// Cancellation skips every grouping not yet started.
    pub async fn reconcile_all(&self, config: &SyncConfig, cancel: &CancellationToken) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut stopped = false;

        for grouping in &config.groupings {
            if stopped || cancel.is_cancelled() {
                debug!("Skipping grouping '{}'", grouping.name);
                summary.skipped.push(grouping.name.clone());
                continue;
            }

            match self.reconcile_grouping(grouping, cancel).await {
                Ok(result) => summary.results.push(result),
                Err(err) => {
                    summary.failures.push(GroupingFailure {
                        grouping: grouping.name.clone(),
                        error: err.to_string(),
                        retryable: err.is_retryable(),
                        source: err,
                    });
                    if !self.continue_on_error {
                        warn!("Stopping after failure of '{}'", grouping.name);
                        stopped = true;
                    }
                }
            }
        }

        summary
    }

    /// Compares observed and desired membership for every grouping without
    /// changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the local record or a remote membership cannot
    /// be read.
    pub async fn check_drift(&self, groupings: &[GroupingConfig]) -> Result<DriftReport> {
        info!("Checking drift for {} grouping(s)", groupings.len());

        let state = self.state_store.load_or_default().await?;
        let mut report = DriftReport::default();

        for config in groupings {
            let grouping = config.to_grouping();
            let desired = config.desired_members();
            let observed = self.api.get_membership(&grouping).await?;
            let diff = MembershipDiff::compute(&observed, &desired);

            let record = state.get(&config.name).filter(|r| r.last_reconciled.is_some());
            let desired_hash = self.hasher.hash_members(&desired);

            report.groupings.push(GroupingDrift {
                grouping: config.name.clone(),
                kind: config.kind,
                missing: diff.to_add,
                unexpected: diff.to_remove,
                desired_changed: record
                    .is_some_and(|r| !ConfigHasher::hashes_match(&r.membership_hash, &desired_hash)),
                never_applied: record.is_none(),
            });
        }

        Ok(report)
    }

    async fn record_success(
        &self,
        grouping: &Grouping,
        desired: &MemberSet,
        result: &ReconciliationResult,
    ) -> Result<()> {
        let mut state = self.state_store.load_or_default().await?;
        state.record_success(
            grouping,
            desired.clone(),
            self.hasher.hash_members(desired),
            HistoryEntry::success(result.added.len(), result.removed.len()),
        );
        self.state_store.save(&state).await
    }

    async fn record_failure(&self, grouping: &Grouping, err: &SyncError) -> Result<()> {
        let (added, removed) = match err {
            SyncError::Reconcile(ReconcileError::PartialReconciliation {
                accepted_added,
                accepted_removed,
                ..
            }) => (accepted_added.len(), accepted_removed.len()),
            _ => (0, 0),
        };

        let mut state = self.state_store.load_or_default().await?;
        state.record_failure(grouping, HistoryEntry::failed(added, removed, &err.to_string()));
        self.state_store.save(&state).await
    }
}

impl ReconciliationResult {
    /// Returns true if the pass changed the remote membership.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

impl ReconcileSummary {
    /// Returns true if every attempted grouping converged and none was
    /// skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    /// Returns the first failure's error, consuming the summary.
    #[must_use]
    pub fn into_first_error(self) -> Option<SyncError> {
        self.failures.into_iter().next().map(|f| f.source)
    }
}

impl GroupingDrift {
    /// Returns true if observed and desired membership differ.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        !self.missing.is_empty() || !self.unexpected.is_empty()
    }
}

impl DriftReport {
    /// Returns true if any grouping has drifted.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.groupings.iter().any(GroupingDrift::has_drift)
    }

    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.has_drift()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_drift() {
            return write!(f, "No drift detected - state is converged");
        }

        writeln!(f, "Drift detected:")?;
        for drift in self.groupings.iter().filter(|d| d.has_drift()) {
            writeln!(
                f,
                "  - {}: {} missing, {} unexpected",
                drift.grouping,
                drift.missing.len(),
                drift.unexpected.len()
            )?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: +{} -{} ({} call(s), {} poll(s))",
            self.grouping,
            self.added.len(),
            self.removed.len(),
            self.calls,
            self.polls
        )
    }
}
