//! Membership API trait definition.
//!
//! This module defines the interface the reconciliation engine consumes
//! from the remote management service.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Grouping, MemberSet};

/// Remote operations on a grouping's membership.
///
/// Mutations return once the service has **accepted** them; the change
/// becomes visible through [`MembershipApi::get_membership`] later.
#[async_trait]
pub trait MembershipApi: Send + Sync {
    /// Reads the membership the service currently reports for a grouping.
    async fn get_membership(&self, grouping: &Grouping) -> Result<MemberSet>;

    /// Adds members to a grouping.
    ///
    /// `full_set` carries the complete intended membership for kinds whose
    /// add call replaces the whole set.
    async fn add_members(
        &self,
        grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()>;

    /// Removes members from a grouping.
    ///
    /// `full_set` carries the complete intended membership, as for
    /// [`MembershipApi::add_members`].
    async fn remove_members(
        &self,
        grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()>;
}

#[async_trait]
impl MembershipApi for Box<dyn MembershipApi> {
    async fn get_membership(&self, grouping: &Grouping) -> Result<MemberSet> {
        (**self).get_membership(grouping).await
    }

    async fn add_members(
        &self,
        grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()> {
        (**self).add_members(grouping, members, full_set).await
    }

    async fn remove_members(
        &self,
        grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()> {
        (**self).remove_members(grouping, members, full_set).await
    }
}

#[async_trait]
impl<T: MembershipApi + ?Sized> MembershipApi for Arc<T> {
    async fn get_membership(&self, grouping: &Grouping) -> Result<MemberSet> {
        (**self).get_membership(grouping).await
    }

    async fn add_members(
        &self,
        grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()> {
        (**self).add_members(grouping, members, full_set).await
    }

    async fn remove_members(
        &self,
        grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()> {
        (**self).remove_members(grouping, members, full_set).await
    }
}
