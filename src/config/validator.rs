//! Configuration validation for membership declarations.
//!
//! This module checks a configuration before anything touches the remote
//! service: names, uniqueness, member identifiers, member relations and
//! reconcile bounds.

use std::collections::HashSet;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::model::{format_members, GroupingKind};
use crate::planner::DependencyGraph;

use super::spec::{GroupingConfig, ReconcileConfig, ServiceConfig, SyncConfig};

/// Validator for protectsync configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
    kind: ErrorKind,
}

#[derive(Debug)]
enum ErrorKind {
    Invalid,
    Duplicate { what: &'static str, value: String },
    Cycle(String),
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found, if any.
    pub fn validate(&self, config: &SyncConfig) -> Result<ValidationResult> {
        let mut result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = result.errors.remove(0);
            Err(first_error.into_config_error().into())
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &SyncConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_service(&config.service, &mut result);
        Self::validate_reconcile(&config.reconcile, &mut result);
        Self::validate_groupings(&config.groupings, &mut result);

        result
    }

    fn validate_service(service: &ServiceConfig, result: &mut ValidationResult) {
        if service.endpoint.is_empty() {
            result.push(ValidationError::invalid(
                "service.endpoint",
                "Service endpoint is required",
            ));
        } else if !service.endpoint.starts_with("http://") && !service.endpoint.starts_with("https://") {
            result.push(ValidationError::invalid(
                "service.endpoint",
                format!("Endpoint '{}' must be an http(s) URL", service.endpoint),
            ));
        } else if service.endpoint.starts_with("http://") {
            result
                .warnings
                .push(String::from("service.endpoint: the API token will be sent without TLS"));
        }

        if service.timeout_secs == 0 {
            result.push(ValidationError::invalid(
                "service.timeout_secs",
                "Request timeout must be at least 1 second",
            ));
        }
    }

    fn validate_reconcile(reconcile: &ReconcileConfig, result: &mut ValidationResult) {
        if reconcile.poll_interval_secs == 0 {
            result.push(ValidationError::invalid(
                "reconcile.poll_interval_secs",
                "Poll interval must be at least 1 second",
            ));
        }

        if reconcile.convergence_timeout_secs == 0 {
            result.push(ValidationError::invalid(
                "reconcile.convergence_timeout_secs",
                "Convergence timeout must be at least 1 second",
            ));
        } else if reconcile.convergence_timeout_secs < reconcile.poll_interval_secs {
            result.warnings.push(format!(
                "reconcile.convergence_timeout_secs: {}s is shorter than the poll interval ({}s); at most one poll will run",
                reconcile.convergence_timeout_secs, reconcile.poll_interval_secs
            ));
        }
    }

    fn validate_groupings(groupings: &[GroupingConfig], result: &mut ValidationResult) {
        if groupings.is_empty() {
            result.warnings.push(String::from("No groupings defined in configuration"));
            return;
        }

        let mut seen_names = HashSet::new();
        let mut seen_targets = HashSet::new();

        for (i, grouping) in groupings.iter().enumerate() {
            let prefix = format!("groupings[{i}]");

            if !seen_names.insert(grouping.name.as_str()) {
                result.push(ValidationError::duplicate(
                    format!("{prefix}.name"),
                    "name",
                    grouping.name.clone(),
                ));
            }

            if !is_valid_name(&grouping.name) {
                result.push(ValidationError::invalid(
                    format!("{prefix}.name"),
                    format!(
                        "Grouping name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        grouping.name
                    ),
                ));
            }

            if grouping.id.trim().is_empty() {
                result.push(ValidationError::invalid(
                    format!("{prefix}.id"),
                    format!("Grouping '{}' has no remote id", grouping.name),
                ));
            } else if !seen_targets.insert((grouping.kind, grouping.id.as_str())) {
                result.push(ValidationError::duplicate(
                    format!("{prefix}.id"),
                    "target",
                    format!("{} {}", grouping.kind, grouping.id),
                ));
            }

            Self::validate_members(grouping, &prefix, result);
            Self::validate_dependencies(grouping, &prefix, result);
        }
    }

    fn validate_members(grouping: &GroupingConfig, prefix: &str, result: &mut ValidationResult) {
        if grouping.members.is_empty() {
            result.warnings.push(format!(
                "{prefix}.members: '{}' declares no members; every current member will be removed",
                grouping.name
            ));
        }

        let mut seen = HashSet::new();
        for (i, member) in grouping.members.iter().enumerate() {
            if member.trim().is_empty() {
                result.push(ValidationError::invalid(
                    format!("{prefix}.members[{i}]"),
                    "Member id cannot be empty",
                ));
            } else if member.trim() != member {
                result.push(ValidationError::invalid(
                    format!("{prefix}.members[{i}]"),
                    format!("Member id '{member}' has surrounding whitespace"),
                ));
            } else if !seen.insert(member.as_str()) {
                result
                    .warnings
                    .push(format!("{prefix}.members[{i}]: '{member}' is listed more than once"));
            }
        }
    }

    fn validate_dependencies(grouping: &GroupingConfig, prefix: &str, result: &mut ValidationResult) {
        if grouping.kind != GroupingKind::AccountFeatureSet {
            if !grouping.dependencies.is_empty() {
                result.push(ValidationError::invalid(
                    format!("{prefix}.dependencies"),
                    format!(
                        "Dependencies are only supported for {} groupings, not {}",
                        GroupingKind::AccountFeatureSet,
                        grouping.kind
                    ),
                ));
            }
            return;
        }

        for (member, prerequisites) in &grouping.dependencies {
            if member.trim().is_empty() || prerequisites.iter().any(|p| p.trim().is_empty()) {
                result.push(ValidationError::invalid(
                    format!("{prefix}.dependencies"),
                    "Dependency entries cannot be empty",
                ));
            }
        }

        let graph = DependencyGraph::account_features().extended_with(&grouping.dependencies);
        if let Some(cyclic) = graph.cycle_members() {
            result.push(ValidationError::cycle(
                format!("{prefix}.dependencies"),
                format_members(&cyclic),
            ));
            return;
        }

        let desired = grouping.desired_members();
        for member in &desired {
            for prerequisite in graph.prerequisites(member) {
                if !desired.contains(prerequisite) {
                    result.push(ValidationError::invalid(
                        format!("{prefix}.members"),
                        format!("'{member}' requires '{prerequisite}', which is not listed"),
                    ));
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }
}

impl ValidationError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind: ErrorKind::Invalid,
        }
    }

    fn duplicate(field: impl Into<String>, what: &'static str, value: String) -> Self {
        Self {
            field: field.into(),
            message: format!("Duplicate grouping {what}: {value}"),
            kind: ErrorKind::Duplicate { what, value },
        }
    }

    fn cycle(field: impl Into<String>, cycle: String) -> Self {
        Self {
            field: field.into(),
            message: format!("Circular dependency between {cycle}"),
            kind: ErrorKind::Cycle(cycle),
        }
    }

    /// Converts into the matching configuration error.
    #[must_use]
    pub fn into_config_error(self) -> ConfigError {
        match self.kind {
            ErrorKind::Invalid => ConfigError::validation(self.message, self.field),
            ErrorKind::Duplicate { what, value } => ConfigError::DuplicateGrouping {
                what: what.to_string(),
                value,
            },
            ErrorKind::Cycle(cycle) => ConfigError::CircularDependency { cycle },
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    fn parse(yaml: &str) -> SyncConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const VALID: &str = r"
service:
  endpoint: https://rsc.example.com/api/graphql
groupings:
  - name: gold
    kind: SLA_DOMAIN
    id: sla-1
    members: [vm-1, vm-2]
  - name: aws-prod
    kind: ACCOUNT_FEATURE_SET
    id: account-1
    members: [CLOUD_NATIVE_PROTECTION, EXOCOMPUTE]
";

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("gold"));
        assert!(is_valid_name("aws-prod-1"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Gold")); // uppercase
        assert!(!is_valid_name("1-gold")); // starts with number
        assert!(!is_valid_name("gold_sla")); // underscore
        assert!(!is_valid_name("gold-")); // ends with hyphen
        assert!(!is_valid_name("gold--sla")); // consecutive hyphens
    }

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::new().validate(&parse(VALID)).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_duplicate_names() {
        let yaml = r"
service:
  endpoint: https://rsc.example.com/api/graphql
groupings:
  - name: gold
    kind: SLA_DOMAIN
    id: sla-1
  - name: gold
    kind: SLA_DOMAIN
    id: sla-2
";
        let result = ConfigValidator::new().validate(&parse(yaml));
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::DuplicateGrouping { ref what, .. })) if what == "name"
        ));
    }

    #[test]
    fn test_duplicate_targets() {
        let yaml = r"
service:
  endpoint: https://rsc.example.com/api/graphql
groupings:
  - name: gold
    kind: SLA_DOMAIN
    id: sla-1
  - name: gold-copy
    kind: SLA_DOMAIN
    id: sla-1
";
        let result = ConfigValidator::new().check(&parse(yaml));
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "groupings[1].id");
    }

    #[test]
    fn test_dependencies_only_for_feature_sets() {
        let yaml = r"
service:
  endpoint: https://rsc.example.com/api/graphql
groupings:
  - name: gold
    kind: SLA_DOMAIN
    id: sla-1
    members: [vm-1]
    dependencies:
      vm-1: [vm-2]
";
        let result = ConfigValidator::new().check(&parse(yaml));
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "groupings[0].dependencies");
    }

    #[test]
    fn test_dependency_cycle() {
        let yaml = r"
service:
  endpoint: https://rsc.example.com/api/graphql
groupings:
  - name: aws-prod
    kind: ACCOUNT_FEATURE_SET
    id: account-1
    members: [A, B]
    dependencies:
      A: [B]
      B: [A]
";
        let result = ConfigValidator::new().validate(&parse(yaml));
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::CircularDependency { ref cycle })) if cycle == "A, B"
        ));
    }

    #[test]
    fn test_missing_prerequisite() {
        let yaml = r"
service:
  endpoint: https://rsc.example.com/api/graphql
groupings:
  - name: aws-prod
    kind: ACCOUNT_FEATURE_SET
    id: account-1
    members: [EXOCOMPUTE]
";
        let result = ConfigValidator::new().check(&parse(yaml));
        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].message.contains("CLOUD_NATIVE_PROTECTION"));
    }

    #[test]
    fn test_warnings() {
        let yaml = r"
service:
  endpoint: https://rsc.example.com/api/graphql
reconcile:
  poll_interval_secs: 10
  convergence_timeout_secs: 5
groupings:
  - name: gold
    kind: SLA_DOMAIN
    id: sla-1
    members: [vm-1, vm-1]
  - name: silver
    kind: SLA_DOMAIN
    id: sla-2
";
        let result = ConfigValidator::new().validate(&parse(yaml)).unwrap();
        assert_eq!(result.warning_count(), 3);
    }

    #[test]
    fn test_missing_endpoint_and_zero_bounds() {
        let yaml = r"
service:
  timeout_secs: 0
reconcile:
  poll_interval_secs: 0
groupings: []
";
        let result = ConfigValidator::new().check(&parse(yaml));
        assert_eq!(result.error_count(), 3);
        assert_eq!(result.errors[0].to_string(), "service.endpoint: Service endpoint is required");
    }
}
