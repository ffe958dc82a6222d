//! Convergence poller for eventually-consistent membership.
//!
//! A mutation accepted by the remote service is applied asynchronously. The
//! poller re-reads the grouping's membership at a fixed interval until every
//! intended addition is visible and every intended removal is gone, or until
//! the caller's cancellation token fires.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ReconcileError, Result, SyncError};
use crate::model::{Grouping, MemberSet};

use super::api::MembershipApi;

/// Default interval between polls in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Polls a grouping until its observed membership matches intent.
#[derive(Debug)]
pub struct ConvergencePoller<'a, A: MembershipApi + ?Sized> {
    /// Remote API.
    api: &'a A,
    /// Delay between two polls.
    interval: Duration,
}

/// Outcome of a poll: what is still outstanding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outstanding {
    /// Intended additions not observed yet.
    pub still_missing: MemberSet,
    /// Intended removals still observed.
    pub still_present: MemberSet,
}

/// Report of a successful wait.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceReport {
    /// Number of membership reads performed.
    pub polls: u32,
    /// Time spent waiting.
    pub elapsed: Duration,
}

impl Outstanding {
    /// Compares an observed membership against the intended delta.
    ///
    /// Removals are checked per member, so an unrelated member leaving the
    /// grouping never counts towards convergence.
    #[must_use]
    pub fn compute(observed: &MemberSet, intended_add: &MemberSet, intended_remove: &MemberSet) -> Self {
        Self {
            still_missing: intended_add.difference(observed).cloned().collect(),
            still_present: intended_remove.intersection(observed).cloned().collect(),
        }
    }

    /// Returns true if nothing is outstanding.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.still_missing.is_empty() && self.still_present.is_empty()
    }

    /// Returns the number of outstanding members.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.still_missing.len() + self.still_present.len()
    }
}

impl<'a, A: MembershipApi + ?Sized> ConvergencePoller<'a, A> {
    /// Creates a poller with the default interval.
    #[must_use]
    pub const fn new(api: &'a A) -> Self {
        Self {
            api,
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// Sets the interval between polls.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Waits until the grouping's observed membership contains every member
    /// of `intended_add` and none of `intended_remove`.
    ///
    /// There is no attempt limit: the wait is bounded only by `cancel`.
    /// Cancellation is checked before each read and during each sleep.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::ConvergenceTimeout` if `cancel` fires first,
    /// or the remote error if a membership read fails.
    pub async fn wait_for_convergence(
        &self,
        grouping: &Grouping,
        intended_add: &MemberSet,
        intended_remove: &MemberSet,
        cancel: &CancellationToken,
    ) -> Result<ConvergenceReport> {
        let start = Instant::now();
        let mut polls = 0u32;
        let mut outstanding = Outstanding {
            still_missing: intended_add.clone(),
            still_present: intended_remove.clone(),
        };

        loop {
            if cancel.is_cancelled() {
                return Err(Self::timeout(grouping, outstanding, polls));
            }

            let observed = self.api.get_membership(grouping).await?;
            polls = polls.saturating_add(1);
            outstanding = Outstanding::compute(&observed, intended_add, intended_remove);

            if outstanding.is_converged() {
                info!(
                    "{} converged after {} poll(s) in {:?}",
                    grouping,
                    polls,
                    start.elapsed()
                );
                return Ok(ConvergenceReport {
                    polls,
                    elapsed: start.elapsed(),
                });
            }

            debug!(
                "Waiting for {}: {} remaining ({} to appear, {} to disappear), poll {}",
                grouping,
                outstanding.remaining(),
                outstanding.still_missing.len(),
                outstanding.still_present.len(),
                polls
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(Self::timeout(grouping, outstanding, polls));
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    fn timeout(grouping: &Grouping, outstanding: Outstanding, polls: u32) -> SyncError {
        SyncError::Reconcile(ReconcileError::ConvergenceTimeout {
            grouping: grouping.name.clone(),
            still_missing: outstanding.still_missing,
            still_present: outstanding.still_present,
            polls,
        })
    }
}
