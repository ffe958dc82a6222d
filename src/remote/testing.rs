//! Scripted in-memory remote used by engine tests.
//!
//! Mutations are accepted immediately but only become visible after a
//! configurable number of stale reads.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::{RemoteError, Result, SyncError};
use crate::model::{Grouping, MemberSet};
use crate::planner::Phase;

use super::api::MembershipApi;

/// A recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get,
    Add(MemberSet, Option<MemberSet>),
    Remove(MemberSet, Option<MemberSet>),
}

#[derive(Debug, Default)]
struct Inner {
    visible: MemberSet,
    target: MemberSet,
    lag: u32,
    stale_reads: u32,
    fail_on: Option<(Phase, usize)>,
    mutations: usize,
    calls: Vec<Call>,
}

#[derive(Debug, Default)]
pub struct ScriptedRemote {
    inner: Mutex<Inner>,
}

impl ScriptedRemote {
    /// Remote starting with `members`, where each mutation stays invisible
    /// for `lag` reads.
    pub fn new(members: MemberSet, lag: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                visible: members.clone(),
                target: members,
                lag,
                ..Inner::default()
            }),
        }
    }

    /// Rejects the `nth` mutation (0-based) if it has the given phase.
    pub fn fail_on(self, phase: Phase, nth: usize) -> Self {
        self.lock().fail_on = Some((phase, nth));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn get_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| **c == Call::Get).count()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c != Call::Get)
            .cloned()
            .collect()
    }

    pub fn members(&self) -> MemberSet {
        self.lock().target.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn mutate(&self, phase: Phase, call: Call, apply: impl FnOnce(&mut MemberSet)) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(call);
        let nth = inner.mutations;
        inner.mutations += 1;

        if inner.fail_on == Some((phase, nth)) {
            return Err(SyncError::Remote(RemoteError::Rejected {
                message: format!("{phase} rejected"),
            }));
        }

        apply(&mut inner.target);
        inner.stale_reads = inner.lag;
        Ok(())
    }
}

#[async_trait]
impl MembershipApi for ScriptedRemote {
    async fn get_membership(&self, _grouping: &Grouping) -> Result<MemberSet> {
        let mut inner = self.lock();
        inner.calls.push(Call::Get);
        if inner.stale_reads > 0 {
            inner.stale_reads -= 1;
        } else {
            inner.visible = inner.target.clone();
        }
        Ok(inner.visible.clone())
    }

    async fn add_members(
        &self,
        _grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()> {
        let call = Call::Add(members.clone(), full_set.cloned());
        self.mutate(Phase::Add, call, |target| target.extend(members.iter().cloned()))
    }

    async fn remove_members(
        &self,
        _grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()> {
        let call = Call::Remove(members.clone(), full_set.cloned());
        self.mutate(Phase::Remove, call, |target| {
            target.retain(|m| !members.contains(m));
        })
    }
}
