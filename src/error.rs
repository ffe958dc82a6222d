//! Error types for the protectsync reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation pass: configuration, local state, the remote management
//! API, planning and reconciliation.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::{format_members, MemberSet};
use crate::planner::Phase;

/// The main error type for protectsync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local state errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Remote management API errors.
    #[error("Remote API error: {0}")]
    Remote(#[from] RemoteError),

    /// Planning (ordering) errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate grouping definition.
    #[error("Duplicate grouping {what}: {value}")]
    DuplicateGrouping {
        /// What was duplicated (name, remote id).
        what: String,
        /// The duplicated value.
        value: String,
    },

    /// Circular dependency between members.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency {
        /// Description of the cycle.
        cycle: String,
    },
}

/// Local state errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Writing the state failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Remote management API errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The grouping does not exist remotely.
    #[error("Grouping not found: {grouping_id}")]
    GroupingNotFound {
        /// Remote identifier of the grouping.
        grouping_id: String,
    },

    /// The remote service rejected a mutation.
    #[error("Mutation rejected: {message}")]
    Rejected {
        /// Rejection reason reported by the service.
        message: String,
    },

    /// Network error.
    #[error("Network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response from API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors. All of them abort before any remote call.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Members depend on each other in a cycle.
    #[error("Dependency cycle between members: {members}")]
    DependencyCycle {
        /// Members taking part in the cycle.
        members: String,
    },

    /// The grouping kind is not recognized.
    #[error("Unknown grouping kind: {kind}")]
    UnknownGroupingKind {
        /// The unrecognized kind.
        kind: String,
    },

    /// A member of the final membership lacks one of its prerequisites.
    #[error("Member '{member}' requires '{prerequisite}', which is not in the desired membership")]
    MissingPrerequisite {
        /// The dependent member.
        member: String,
        /// The absent prerequisite.
        prerequisite: String,
    },

    /// Conflicting operations in plan.
    #[error("Conflicting operations in plan: {message}")]
    ConflictingOperations {
        /// Description of the conflict.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A remote add/remove call was rejected before anything was accepted.
    #[error("{phase} of [{}] on '{grouping}' failed: {source}", format_members(.members))]
    Execution {
        /// Grouping name.
        grouping: String,
        /// Phase of the failed step.
        phase: Phase,
        /// Members carried by the failed step.
        members: MemberSet,
        /// Underlying remote error.
        #[source]
        source: Box<SyncError>,
    },

    /// Some steps were accepted before a later step failed.
    #[error(
        "Partial reconciliation of '{grouping}': {phase} of [{}] failed after {} add(s) and {} removal(s) were accepted: {source}",
        format_members(.failed_members),
        .accepted_added.len(),
        .accepted_removed.len()
    )]
    PartialReconciliation {
        /// Grouping name.
        grouping: String,
        /// Members whose addition was accepted.
        accepted_added: MemberSet,
        /// Members whose removal was accepted.
        accepted_removed: MemberSet,
        /// Members still to be added (failed or never issued).
        remaining_add: MemberSet,
        /// Members still to be removed (failed or never issued).
        remaining_remove: MemberSet,
        /// Phase of the failed step.
        phase: Phase,
        /// Members carried by the failed step.
        failed_members: MemberSet,
        /// Underlying remote error.
        #[source]
        source: Box<SyncError>,
    },

    /// Cancellation fired before the observed membership matched intent.
    #[error(
        "Gave up waiting for '{grouping}' to converge after {polls} poll(s): {} member(s) still missing, {} still present",
        .still_missing.len(),
        .still_present.len()
    )]
    ConvergenceTimeout {
        /// Grouping name.
        grouping: String,
        /// Intended additions not yet observed.
        still_missing: MemberSet,
        /// Intended removals still observed.
        still_present: MemberSet,
        /// Number of completed polls.
        polls: u32,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for protectsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is transient and a later retry may succeed.
    ///
    /// Partial reconciliation and convergence timeouts are retryable: a fresh
    /// pass recomputes the diff against the observed membership.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(RemoteError::RateLimited { .. } | RemoteError::NetworkError { .. })
            | Self::State(StateError::LockFailed { .. })
            | Self::Reconcile(
                ReconcileError::ConvergenceTimeout { .. }
                | ReconcileError::PartialReconciliation { .. },
            ) => true,
            Self::Reconcile(ReconcileError::Execution { source, .. }) => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Remote(RemoteError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            Self::Remote(RemoteError::NetworkError { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            Self::Reconcile(ReconcileError::Execution { source, .. }) => source.retry_delay_secs(),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl RemoteError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::member_set;

    #[test]
    fn test_retryable_classification() {
        let err = SyncError::Remote(RemoteError::network("reset"));
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(5));

        let err = SyncError::Remote(RemoteError::Rejected {
            message: String::from("permission denied"),
        });
        assert!(!err.is_retryable());

        let err = SyncError::Reconcile(ReconcileError::ConvergenceTimeout {
            grouping: String::from("gold"),
            still_missing: member_set(["a"]),
            still_present: MemberSet::new(),
            polls: 3,
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_execution_error_delegates_to_source() {
        let err = SyncError::Reconcile(ReconcileError::Execution {
            grouping: String::from("gold"),
            phase: Phase::Add,
            members: member_set(["vm-1"]),
            source: Box::new(SyncError::Remote(RemoteError::RateLimited {
                retry_after_secs: 30,
            })),
        });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(30));
        assert!(err.to_string().contains("add of [vm-1]"));
    }

    #[test]
    fn test_convergence_timeout_message() {
        let err = ReconcileError::ConvergenceTimeout {
            grouping: String::from("gold"),
            still_missing: member_set(["a", "b"]),
            still_present: member_set(["c"]),
            polls: 4,
        };
        let message = err.to_string();
        assert!(message.contains("4 poll(s)"));
        assert!(message.contains("2 member(s) still missing, 1 still present"));
    }
}
