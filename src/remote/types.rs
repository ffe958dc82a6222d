//! Wire types and GraphQL documents for the management API.

use serde::{Deserialize, Serialize};

use crate::model::{MemberId, MemberSet};

/// Reads the objects protected by an SLA domain.
pub const SLA_DOMAIN_MEMBERS: &str = r"
    query SlaDomainMembers($id: UUID!) {
        slaDomain(id: $id) {
            id
            protectedObjects {
                nodes { id }
            }
        }
    }
";

/// Assigns objects to an SLA domain.
pub const ASSIGN_SLA: &str = r"
    mutation AssignSla($id: UUID!, $objectIds: [UUID!]!) {
        assignSla(input: {
            slaDomainId: $id
            objectIds: $objectIds
            slaDomainAssignType: protectWithSlaId
        }) {
            success
            message
        }
    }
";

/// Removes the direct SLA assignment of objects.
pub const UNASSIGN_SLA: &str = r"
    mutation UnassignSla($objectIds: [UUID!]!) {
        assignSla(input: {
            objectIds: $objectIds
            slaDomainAssignType: doNotProtect
        }) {
            success
            message
        }
    }
";

/// Reads the cloud accounts in a tag rule's scope.
pub const TAG_RULE_SCOPE: &str = r"
    query TagRuleScope($id: UUID!) {
        tagRule(id: $id) {
            id
            cloudAccounts { id }
        }
    }
";

/// Replaces the cloud accounts in a tag rule's scope.
pub const UPDATE_TAG_RULE_SCOPE: &str = r"
    mutation UpdateTagRuleScope($id: UUID!, $accountIds: [UUID!]!) {
        updateTagRule(input: { tagRuleId: $id, cloudAccountIds: $accountIds }) {
            success
            message
        }
    }
";

/// Reads the features of a cloud account.
pub const ACCOUNT_FEATURES: &str = r"
    query AccountFeatures($id: UUID!) {
        cloudAccount(id: $id) {
            id
            features { feature status }
        }
    }
";

/// Enables features on a cloud account.
pub const ADD_ACCOUNT_FEATURES: &str = r"
    mutation AddAccountFeatures($id: UUID!, $features: [String!]!) {
        addCloudAccountFeatures(input: { cloudAccountId: $id, features: $features }) {
            success
            message
        }
    }
";

/// Disables features on a cloud account.
pub const REMOVE_ACCOUNT_FEATURES: &str = r"
    mutation RemoveAccountFeatures($id: UUID!, $features: [String!]!) {
        removeCloudAccountFeatures(input: { cloudAccountId: $id, features: $features }) {
            success
            message
        }
    }
";

/// GraphQL request structure.
#[derive(Debug, Serialize)]
pub struct GraphQLRequest {
    /// Query document.
    pub query: String,
    /// Query variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
}

/// GraphQL response structure.
#[derive(Debug, Deserialize)]
pub struct GraphQLResponse<T> {
    /// Response payload.
    pub data: Option<T>,
    /// Errors reported by the service.
    pub errors: Option<Vec<GraphQLError>>,
}

/// GraphQL error structure.
#[derive(Debug, Deserialize)]
pub struct GraphQLError {
    /// Error message.
    pub message: String,
}

/// Object carrying only an identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct IdNode {
    /// Identifier.
    pub id: String,
}

/// Result of a mutation.
#[derive(Debug, Clone, Deserialize)]
pub struct MutationResult {
    /// Whether the mutation was accepted.
    pub success: bool,
    /// Optional explanation from the service.
    #[serde(default)]
    pub message: Option<String>,
}

/// Connection of protected objects.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedObjects {
    /// Objects in the connection.
    pub nodes: Vec<IdNode>,
}

/// SLA domain with its protected objects.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaDomain {
    /// Protected objects.
    pub protected_objects: ProtectedObjects,
}

/// Tag rule with its account scope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRule {
    /// Cloud accounts in scope.
    pub cloud_accounts: Vec<IdNode>,
}

/// Status of a feature on a cloud account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureStatus {
    /// Enabling in progress.
    Connecting,
    /// Enabled.
    Connected,
    /// Disabling in progress.
    Disconnecting,
    /// Disabled.
    Disconnected,
    /// Enabled but needs attention.
    MissingPermissions,
    /// Any status this client does not know.
    #[serde(other)]
    Unknown,
}

/// A feature on a cloud account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountFeature {
    /// Feature name.
    pub feature: String,
    /// Feature status.
    pub status: FeatureStatus,
}

/// Cloud account with its features.
#[derive(Debug, Deserialize)]
pub struct CloudAccount {
    /// Features of the account.
    pub features: Vec<AccountFeature>,
}

impl FeatureStatus {
    /// Returns true if the feature counts as a member of the account.
    ///
    /// A feature being enabled is not a member until the service reports
    /// it connected; a feature being disabled stays a member until it is
    /// reported disconnected.
    #[must_use]
    pub const fn is_member(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Disconnecting | Self::MissingPermissions
        )
    }
}

/// Collects identifier nodes into a member set.
pub fn ids_to_members(nodes: &[IdNode]) -> MemberSet {
    nodes.iter().map(|n| MemberId::new(n.id.clone())).collect()
}

/// Collects the features that count as members.
pub fn features_to_members(features: &[AccountFeature]) -> MemberSet {
    features
        .iter()
        .filter(|f| f.status.is_member())
        .map(|f| MemberId::new(f.feature.clone()))
        .collect()
}

/// Converts a member set into JSON string values.
pub fn members_to_json(members: &MemberSet) -> Vec<&str> {
    members.iter().map(MemberId::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::member_set;

    #[test]
    fn test_feature_membership_by_status() {
        let features: Vec<AccountFeature> = serde_json::from_str(
            r#"[
                {"feature": "CLOUD_NATIVE_PROTECTION", "status": "CONNECTED"},
                {"feature": "EXOCOMPUTE", "status": "CONNECTING"},
                {"feature": "RDS_PROTECTION", "status": "DISCONNECTING"},
                {"feature": "CLOUD_NATIVE_ARCHIVAL", "status": "DISCONNECTED"},
                {"feature": "FUTURE_FEATURE", "status": "SOMETHING_NEW"}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            features_to_members(&features),
            member_set(["CLOUD_NATIVE_PROTECTION", "RDS_PROTECTION"])
        );
    }
}
