//! Ordering policy for assignment plans.
//!
//! Decides the sequence of add/remove calls for a grouping. Most kinds use
//! a single add step followed by a single remove step. Account feature sets
//! have host/dependent relations: hosts are added before their dependents
//! and dependents are removed before their hosts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::error::PlanError;
use crate::model::{format_members, Grouping, GroupingKind, MemberId, MemberSet};

use super::diff::MembershipDiff;
use super::plan::{AssignmentPlan, PlanStep};

/// Host feature of cloud-native protection.
pub const CLOUD_NATIVE_PROTECTION: &str = "CLOUD_NATIVE_PROTECTION";

/// Host feature of cloud-native archival.
pub const CLOUD_NATIVE_ARCHIVAL: &str = "CLOUD_NATIVE_ARCHIVAL";

/// Built-in feature relations, as (dependent, host) pairs.
const BUILTIN_FEATURE_DEPENDENCIES: &[(&str, &str)] = &[
    ("EXOCOMPUTE", CLOUD_NATIVE_PROTECTION),
    ("RDS_PROTECTION", CLOUD_NATIVE_PROTECTION),
    ("CLOUD_NATIVE_S3_PROTECTION", CLOUD_NATIVE_PROTECTION),
    ("CLOUD_NATIVE_DYNAMODB_PROTECTION", CLOUD_NATIVE_PROTECTION),
    ("AZURE_SQL_DB_PROTECTION", CLOUD_NATIVE_PROTECTION),
    ("AZURE_SQL_MI_PROTECTION", CLOUD_NATIVE_PROTECTION),
    (CLOUD_NATIVE_ARCHIVAL, CLOUD_NATIVE_PROTECTION),
    ("CLOUD_NATIVE_ARCHIVAL_ENCRYPTION", CLOUD_NATIVE_ARCHIVAL),
];

/// Prerequisite relation between members: member -> members it requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    prerequisites: HashMap<MemberId, BTreeSet<MemberId>>,
}

/// Policy deciding the order of plan steps.
#[derive(Debug, Clone)]
pub enum OrderingPolicy {
    /// One add step, then one remove step.
    Default,
    /// Hosts added first and removed last.
    DependencyAware(DependencyGraph),
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a graph holding the built-in account feature relations.
    #[must_use]
    pub fn account_features() -> Self {
        let mut graph = Self::new();
        for (dependent, host) in BUILTIN_FEATURE_DEPENDENCIES {
            graph.add_dependency(*dependent, *host);
        }
        graph
    }

    /// Records that `member` requires `prerequisite`.
    pub fn add_dependency(&mut self, member: impl Into<MemberId>, prerequisite: impl Into<MemberId>) {
        self.prerequisites
            .entry(member.into())
            .or_default()
            .insert(prerequisite.into());
    }

    /// Adds every relation from a configuration map (member -> prerequisites).
    #[must_use]
    pub fn extended_with(mut self, relations: &BTreeMap<String, Vec<String>>) -> Self {
        for (member, prerequisites) in relations {
            for prerequisite in prerequisites {
                self.add_dependency(member.as_str(), prerequisite.as_str());
            }
        }
        self
    }

    /// Returns the direct prerequisites of a member.
    pub fn prerequisites(&self, member: &MemberId) -> impl Iterator<Item = &MemberId> {
        self.prerequisites.get(member).into_iter().flatten()
    }

    /// Returns true if no relation is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prerequisites.is_empty()
    }

    /// Returns every member reachable through prerequisite edges.
    fn closure(&self, member: &MemberId) -> BTreeSet<&MemberId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&MemberId> = self.prerequisites(member).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.prerequisites(next));
            }
        }
        seen
    }

    /// Returns the members that take part in a cycle, if any.
    #[must_use]
    pub fn cycle_members(&self) -> Option<MemberSet> {
        let cyclic: MemberSet = self
            .prerequisites
            .keys()
            .filter(|member| self.closure(member).contains(member))
            .cloned()
            .collect();
        (!cyclic.is_empty()).then_some(cyclic)
    }

    /// Splits `members` into layers so that every member comes after its
    /// prerequisites (or before its dependents when `reverse` is set).
    ///
    /// Relations are followed transitively, even through members outside
    /// the set.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::DependencyCycle` if the members cannot be ordered.
    pub fn layers(&self, members: &MemberSet, reverse: bool) -> Result<Vec<MemberSet>, PlanError> {
        let closures: HashMap<&MemberId, BTreeSet<&MemberId>> =
            members.iter().map(|m| (m, self.closure(m))).collect();

        let mut remaining: BTreeSet<&MemberId> = members.iter().collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let ready: MemberSet = remaining
                .iter()
                .filter(|member| {
                    if reverse {
                        // Ready once no remaining member still requires it.
                        !remaining
                            .iter()
                            .any(|other| closures.get(other).is_some_and(|c| c.contains(*member)))
                    } else {
                        // Ready once none of its prerequisites remain.
                        closures
                            .get(*member)
                            .is_none_or(|c| c.iter().all(|p| !remaining.contains(p)))
                    }
                })
                .map(|member| (*member).clone())
                .collect();

            if ready.is_empty() {
                let stuck: MemberSet = remaining.iter().map(|m| (*m).clone()).collect();
                return Err(PlanError::DependencyCycle {
                    members: format_members(&stuck),
                });
            }

            remaining.retain(|member| !ready.contains(*member));
            layers.push(ready);
        }

        Ok(layers)
    }
}

impl OrderingPolicy {
    /// Selects the policy for a grouping kind.
    ///
    /// Dependency-aware kinds use the built-in relations plus `extra`.
    #[must_use]
    pub fn for_kind(kind: GroupingKind, extra: &BTreeMap<String, Vec<String>>) -> Self {
        if kind.is_dependency_aware() {
            Self::DependencyAware(DependencyGraph::account_features().extended_with(extra))
        } else {
            Self::Default
        }
    }

    /// Orders a diff into an assignment plan. Pure: nothing is executed.
    ///
    /// # Errors
    ///
    /// Returns a `PlanError` if the diff is not a partition, a member lacks
    /// a prerequisite in the final membership, or relations form a cycle.
    pub fn order(&self, grouping: &Grouping, diff: MembershipDiff) -> Result<AssignmentPlan, PlanError> {
        if !diff.to_add.is_disjoint(&diff.to_remove) {
            let overlap: MemberSet = diff.to_add.intersection(&diff.to_remove).cloned().collect();
            return Err(PlanError::ConflictingOperations {
                message: format!("members both added and removed: {}", format_members(&overlap)),
            });
        }

        let steps = match self {
            Self::Default => vec![
                PlanStep::add(diff.to_add.clone()),
                PlanStep::remove(diff.to_remove.clone()),
            ],
            Self::DependencyAware(graph) => {
                Self::check_prerequisites(graph, &diff.total)?;

                let add_layers = graph.layers(&diff.to_add, false)?;
                let remove_layers = graph.layers(&diff.to_remove, true)?;

                add_layers
                    .into_iter()
                    .map(PlanStep::add)
                    .chain(remove_layers.into_iter().map(PlanStep::remove))
                    .collect()
            }
        };

        debug!(
            "Ordered {} into {} step(s) for {}",
            diff,
            steps.len(),
            grouping
        );

        Ok(AssignmentPlan::new(grouping.clone(), diff, steps))
    }

    /// Rejects final memberships where a member lacks a prerequisite.
    fn check_prerequisites(graph: &DependencyGraph, total: &MemberSet) -> Result<(), PlanError> {
        for member in total {
            if let Some(missing) = graph.prerequisites(member).find(|p| !total.contains(*p)) {
                return Err(PlanError::MissingPrerequisite {
                    member: member.to_string(),
                    prerequisite: missing.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::member_set;
    use crate::planner::Phase;

    fn feature_grouping() -> Grouping {
        Grouping::new("prod-account", GroupingKind::AccountFeatureSet, "acct-1")
    }

    fn host_dependent_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("dependent", "host");
        graph
    }

    #[test]
    fn test_default_policy_adds_then_removes() {
        let grouping = Grouping::new("gold", GroupingKind::SlaDomain, "sla-1");
        let diff = MembershipDiff::compute(&member_set(["B", "C"]), &member_set(["A", "B"]));

        let plan = OrderingPolicy::Default.order(&grouping, diff).unwrap();

        assert_eq!(
            plan.steps,
            vec![
                PlanStep::add(member_set(["A"])),
                PlanStep::remove(member_set(["C"])),
            ]
        );
    }

    #[test]
    fn test_host_added_before_dependent() {
        let policy = OrderingPolicy::DependencyAware(host_dependent_graph());
        let diff = MembershipDiff::compute(&MemberSet::new(), &member_set(["host", "dependent"]));

        let plan = policy.order(&feature_grouping(), diff).unwrap();

        let host = plan.step_index(Phase::Add, "host").unwrap();
        let dependent = plan.step_index(Phase::Add, "dependent").unwrap();
        assert!(host < dependent);
        assert_eq!(plan.call_count(), 2);
    }

    #[test]
    fn test_dependent_removed_before_host() {
        let policy = OrderingPolicy::DependencyAware(host_dependent_graph());
        let diff = MembershipDiff::compute(&member_set(["host", "dependent"]), &MemberSet::new());

        let plan = policy.order(&feature_grouping(), diff).unwrap();

        let host = plan.step_index(Phase::Remove, "host").unwrap();
        let dependent = plan.step_index(Phase::Remove, "dependent").unwrap();
        assert!(dependent < host);
    }

    #[test]
    fn test_independent_members_share_first_layer() {
        let policy = OrderingPolicy::DependencyAware(host_dependent_graph());
        let diff = MembershipDiff::compute(
            &MemberSet::new(),
            &member_set(["host", "dependent", "loner"]),
        );

        let plan = policy.order(&feature_grouping(), diff).unwrap();

        assert_eq!(plan.steps[0], PlanStep::add(member_set(["host", "loner"])));
        assert_eq!(plan.steps[1], PlanStep::add(member_set(["dependent"])));
    }

    #[test]
    fn test_builtin_feature_relations() {
        let policy = OrderingPolicy::for_kind(GroupingKind::AccountFeatureSet, &BTreeMap::new());
        let diff = MembershipDiff::compute(
            &MemberSet::new(),
            &member_set([
                "CLOUD_NATIVE_ARCHIVAL_ENCRYPTION",
                "CLOUD_NATIVE_ARCHIVAL",
                "CLOUD_NATIVE_PROTECTION",
                "EXOCOMPUTE",
            ]),
        );

        let plan = policy.order(&feature_grouping(), diff).unwrap();

        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0], PlanStep::add(member_set(["CLOUD_NATIVE_PROTECTION"])));
        assert_eq!(
            plan.steps[1],
            PlanStep::add(member_set(["CLOUD_NATIVE_ARCHIVAL", "EXOCOMPUTE"]))
        );
        assert_eq!(
            plan.steps[2],
            PlanStep::add(member_set(["CLOUD_NATIVE_ARCHIVAL_ENCRYPTION"]))
        );
    }

    #[test]
    fn test_transitive_relation_through_absent_member() {
        // a -> b -> c, with b not part of the removal.
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "c");

        let layers = graph.layers(&member_set(["a", "c"]), true).unwrap();
        assert_eq!(layers, vec![member_set(["a"]), member_set(["c"])]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "a");

        assert_eq!(graph.cycle_members(), Some(member_set(["a", "b"])));

        let policy = OrderingPolicy::DependencyAware(graph);
        let diff = MembershipDiff::compute(&MemberSet::new(), &member_set(["a", "b"]));
        let result = policy.order(&feature_grouping(), diff);

        assert!(matches!(result, Err(PlanError::DependencyCycle { .. })));
    }

    #[test]
    fn test_missing_prerequisite_is_rejected() {
        let policy = OrderingPolicy::DependencyAware(host_dependent_graph());
        let diff = MembershipDiff::compute(&member_set(["host", "dependent"]), &member_set(["dependent"]));

        let result = policy.order(&feature_grouping(), diff);

        assert!(matches!(
            result,
            Err(PlanError::MissingPrerequisite { ref member, ref prerequisite })
                if member == "dependent" && prerequisite == "host"
        ));
    }

    #[test]
    fn test_overlapping_diff_is_rejected() {
        let grouping = Grouping::new("gold", GroupingKind::SlaDomain, "sla-1");
        let diff = MembershipDiff {
            to_add: member_set(["a"]),
            to_remove: member_set(["a"]),
            total: member_set(["a"]),
        };

        let result = OrderingPolicy::Default.order(&grouping, diff);
        assert!(matches!(result, Err(PlanError::ConflictingOperations { .. })));
    }

    #[test]
    fn test_non_dependency_kinds_use_default_policy() {
        for kind in [GroupingKind::SlaDomain, GroupingKind::TagRuleScope] {
            assert!(matches!(
                OrderingPolicy::for_kind(kind, &BTreeMap::new()),
                OrderingPolicy::Default
            ));
        }
    }
}
