//! Remote management API integration module.
//!
//! This module provides the interface the engine consumes from the remote
//! management service, its HTTP implementation, and the convergence poller
//! that observes asynchronously applied mutations.

mod api;
mod client;
mod poller;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use api::MembershipApi;
pub use client::{RemoteClient, DEFAULT_TIMEOUT_SECS};
pub use poller::{ConvergencePoller, ConvergenceReport, Outstanding, DEFAULT_POLL_INTERVAL_SECS};
pub use types::FeatureStatus;
