// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # protectsync
//!
//! A declarative membership reconciliation engine for cloud-protection
//! groupings: SLA domains, tag-rule account scopes and cloud-account
//! feature sets.
//!
//! ## Overview
//!
//! Each grouping declares the full set of members it should have. A pass
//! reads what the management service currently reports, computes the
//! members to add and remove, issues the calls in a safe order, and waits
//! until the service shows the result. The service accepts mutations
//! immediately but applies them asynchronously, so "accepted" and
//! "converged" are distinct outcomes.
//!
//! ## Architecture
//!
//! 1. **Diff**: observed vs desired membership ([`planner::MembershipDiff`])
//! 2. **Order**: add/remove steps, dependency-aware for feature sets
//!    ([`planner::OrderingPolicy`])
//! 3. **Execute**: one remote call per step ([`planner::AssignmentExecutor`])
//! 4. **Poll**: wait until the observed membership matches
//!    ([`remote::ConvergencePoller`])
//! 5. **Record**: store the applied membership locally ([`state`])
//!
//! A failed pass is never rolled back or retried internally; running the
//! pass again recomputes the diff and finishes the remaining work.
//!
//! ## Modules
//!
//! - [`model`]: Groupings, kinds and member identifiers
//! - [`config`]: Configuration parsing and validation
//! - [`planner`]: Diff, ordering and plan execution
//! - [`remote`]: Management API client and convergence poller
//! - [`state`]: Local record of applied membership
//! - [`reconciler`]: Reconciliation orchestrator
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! service:
//!   endpoint: https://rsc.example.com/api/graphql
//!
//! groupings:
//!   - name: gold
//!     kind: SLA_DOMAIN
//!     id: 3f1e9a52-8d4c-4b7e-9a61-0c2d5e8f7b10
//!     members: [vm-web-1, vm-web-2]
//!   - name: aws-prod
//!     kind: ACCOUNT_FEATURE_SET
//!     id: 7c0b6a3e-1f2d-4e5a-8b9c-0d1e2f3a4b5c
//!     members: [CLOUD_NATIVE_PROTECTION, EXOCOMPUTE]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod planner;
pub mod reconciler;
pub mod remote;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, SyncConfig};
pub use error::{Result, SyncError};
pub use model::{Grouping, GroupingKind, MemberId, MemberSet};
pub use planner::{AssignmentExecutor, AssignmentPlan, MembershipDiff, OrderingPolicy};
pub use reconciler::{DriftReport, ReconcileSummary, ReconciliationResult, Reconciler};
pub use remote::{ConvergencePoller, MembershipApi, RemoteClient};
pub use state::{LocalStateStore, MemoryStateStore, StateStore, SyncState};
