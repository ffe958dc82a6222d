//! Management API client implementation.
//!
//! This module provides the HTTP client for the management service's
//! GraphQL API and implements [`MembershipApi`] on top of it.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::error::{RemoteError, Result, SyncError};
use crate::model::{Grouping, GroupingKind, MemberSet};

use super::api::MembershipApi;
use super::types::{
    features_to_members, ids_to_members, members_to_json, CloudAccount, GraphQLRequest,
    GraphQLResponse, MutationResult, SlaDomain, TagRule, ACCOUNT_FEATURES, ADD_ACCOUNT_FEATURES,
    ASSIGN_SLA, REMOVE_ACCOUNT_FEATURES, SLA_DOMAIN_MEMBERS, TAG_RULE_SCOPE, UNASSIGN_SLA,
    UPDATE_TAG_RULE_SCOPE,
};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Management API client.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    /// HTTP client.
    client: Client,
    /// GraphQL endpoint URL.
    endpoint: String,
    /// API token.
    token: String,
    /// Attempts per request.
    max_retries: u32,
    /// Base delay between attempts.
    retry_delay: Duration,
}

impl RemoteClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: &str) -> Result<Self> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(endpoint: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RemoteError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token: token.to_string(),
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Overrides the retry policy for transient failures.
    #[must_use]
    pub const fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Executes a GraphQL document, retrying transient failures.
    async fn execute<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let request = GraphQLRequest {
            query: query.to_string(),
            variables: Some(variables),
        };

        let mut last_error = None;

        for attempt in 0..self.max_retries.max(1) {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {}", self.max_retries);
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.execute_once::<T>(&request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RemoteError::network("Max retries exceeded").into()))
    }

    /// Executes a single GraphQL request.
    async fn execute_once<T: for<'de> Deserialize<'de>>(&self, request: &GraphQLRequest) -> Result<T> {
        trace!("Executing GraphQL document: {}", request.query);

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .json(request)
            .send()
            .await
            .map_err(|e| RemoteError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(RemoteError::RateLimited {
                retry_after_secs: retry_after,
            }
            .into());
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(RemoteError::AuthenticationFailed {
                message: String::from("Invalid or expired API token"),
            }
            .into());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::api_error(status.as_u16(), body).into());
        }

        let gql_response: GraphQLResponse<T> = response.json().await.map_err(|e| {
            SyncError::Remote(RemoteError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })?;

        if let Some(errors) = gql_response.errors.filter(|e| !e.is_empty()) {
            let message = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RemoteError::api_error(400, message).into());
        }

        gql_response.data.ok_or_else(|| {
            RemoteError::InvalidResponse {
                message: String::from("No data in response"),
            }
            .into()
        })
    }

    /// Executes a mutation and checks that the service accepted it.
    async fn mutate(&self, field: &str, query: &str, variables: serde_json::Value) -> Result<()> {
        let mut data: serde_json::Map<String, serde_json::Value> = self.execute(query, variables).await?;

        let value = data.remove(field).ok_or_else(|| RemoteError::InvalidResponse {
            message: format!("Missing '{field}' in mutation response"),
        })?;
        let result: MutationResult = serde_json::from_value(value).map_err(|e| RemoteError::InvalidResponse {
            message: format!("Malformed '{field}' result: {e}"),
        })?;

        if result.success {
            Ok(())
        } else {
            Err(RemoteError::Rejected {
                message: result
                    .message
                    .unwrap_or_else(|| format!("{field} was not accepted")),
            }
            .into())
        }
    }

    /// Reads the objects protected by an SLA domain.
    async fn sla_domain_members(&self, grouping: &Grouping) -> Result<MemberSet> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            sla_domain: Option<SlaDomain>,
        }

        let response: Response = self
            .execute(SLA_DOMAIN_MEMBERS, json!({ "id": grouping.id }))
            .await?;
        let domain = response.sla_domain.ok_or_else(|| not_found(grouping))?;

        Ok(ids_to_members(&domain.protected_objects.nodes))
    }

    /// Reads the cloud accounts in a tag rule's scope.
    async fn tag_rule_scope(&self, grouping: &Grouping) -> Result<MemberSet> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            tag_rule: Option<TagRule>,
        }

        let response: Response = self
            .execute(TAG_RULE_SCOPE, json!({ "id": grouping.id }))
            .await?;
        let rule = response.tag_rule.ok_or_else(|| not_found(grouping))?;

        Ok(ids_to_members(&rule.cloud_accounts))
    }

    /// Reads the features of a cloud account.
    async fn account_features(&self, grouping: &Grouping) -> Result<MemberSet> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            cloud_account: Option<CloudAccount>,
        }

        let response: Response = self
            .execute(ACCOUNT_FEATURES, json!({ "id": grouping.id }))
            .await?;
        let account = response.cloud_account.ok_or_else(|| not_found(grouping))?;

        Ok(features_to_members(&account.features))
    }

    /// Replaces a tag rule's account scope.
    async fn replace_tag_rule_scope(&self, grouping: &Grouping, scope: &MemberSet) -> Result<()> {
        self.mutate(
            "updateTagRule",
            UPDATE_TAG_RULE_SCOPE,
            json!({ "id": grouping.id, "accountIds": members_to_json(scope) }),
        )
        .await
    }
}

#[async_trait]
impl MembershipApi for RemoteClient {
    async fn get_membership(&self, grouping: &Grouping) -> Result<MemberSet> {
        debug!("Reading membership of {grouping}");

        match grouping.kind {
            GroupingKind::SlaDomain => self.sla_domain_members(grouping).await,
            GroupingKind::TagRuleScope => self.tag_rule_scope(grouping).await,
            GroupingKind::AccountFeatureSet => self.account_features(grouping).await,
        }
    }

    async fn add_members(
        &self,
        grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()> {
        info!("Adding {} member(s) to {grouping}", members.len());

        match grouping.kind {
            GroupingKind::SlaDomain => {
                self.mutate(
                    "assignSla",
                    ASSIGN_SLA,
                    json!({ "id": grouping.id, "objectIds": members_to_json(members) }),
                )
                .await
            }
            GroupingKind::TagRuleScope => {
                self.replace_tag_rule_scope(grouping, full_scope(grouping, full_set)?)
                    .await
            }
            GroupingKind::AccountFeatureSet => {
                self.mutate(
                    "addCloudAccountFeatures",
                    ADD_ACCOUNT_FEATURES,
                    json!({ "id": grouping.id, "features": members_to_json(members) }),
                )
                .await
            }
        }
    }

    async fn remove_members(
        &self,
        grouping: &Grouping,
        members: &MemberSet,
        full_set: Option<&MemberSet>,
    ) -> Result<()> {
        info!("Removing {} member(s) from {grouping}", members.len());

        match grouping.kind {
            GroupingKind::SlaDomain => {
                self.mutate(
                    "assignSla",
                    UNASSIGN_SLA,
                    json!({ "objectIds": members_to_json(members) }),
                )
                .await
            }
            GroupingKind::TagRuleScope => {
                self.replace_tag_rule_scope(grouping, full_scope(grouping, full_set)?)
                    .await
            }
            GroupingKind::AccountFeatureSet => {
                self.mutate(
                    "removeCloudAccountFeatures",
                    REMOVE_ACCOUNT_FEATURES,
                    json!({ "id": grouping.id, "features": members_to_json(members) }),
                )
                .await
            }
        }
    }
}

/// The scope a replace-style write must carry.
///
/// A freshly read scope may not show mutations accepted earlier in the same
/// pass yet, so it is never used as the base of a write.
fn full_scope<'s>(grouping: &Grouping, full_set: Option<&'s MemberSet>) -> Result<&'s MemberSet> {
    full_set.ok_or_else(|| {
        SyncError::internal(format!(
            "{grouping} replaces its whole scope; the full intended set is required"
        ))
    })
}

fn not_found(grouping: &Grouping) -> SyncError {
    SyncError::Remote(RemoteError::GroupingNotFound {
        grouping_id: grouping.id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::member_set;
    use crate::planner::{AssignmentExecutor, MembershipDiff, OrderingPolicy};
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> RemoteClient {
        RemoteClient::new(&format!("{}/api/graphql", server.uri()), "test-token")
            .unwrap()
            .with_retry_policy(3, Duration::from_millis(1))
    }

    fn sla() -> Grouping {
        Grouping::new("gold", GroupingKind::SlaDomain, "sla-1")
    }

    fn tag_rule() -> Grouping {
        Grouping::new("prod-tags", GroupingKind::TagRuleScope, "rule-1")
    }

    #[test]
    fn test_endpoint_is_kept() {
        let client = RemoteClient::new("https://rsc.example.com/api/graphql", "test-token").unwrap();
        assert_eq!(client.endpoint(), "https://rsc.example.com/api/graphql");
    }

    #[tokio::test]
    async fn test_get_sla_domain_members() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({ "variables": { "id": "sla-1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "slaDomain": { "id": "sla-1", "protectedObjects": {
                    "nodes": [{ "id": "vm-1" }, { "id": "vm-2" }]
                } } }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let members = client.get_membership(&sla()).await.unwrap();

        assert_eq!(members, member_set(["vm-1", "vm-2"]));
    }

    #[tokio::test]
    async fn test_missing_grouping_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "slaDomain": null }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.get_membership(&sla()).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Remote(RemoteError::GroupingNotFound { ref grouping_id }) if grouping_id == "sla-1"
        ));
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.get_membership(&sla()).await.unwrap_err();

        assert!(matches!(err, SyncError::Remote(RemoteError::AuthenticationFailed { .. })));
    }

    #[tokio::test]
    async fn test_graphql_errors_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "objects not found" }, { "message": "try again" }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .add_members(&sla(), &member_set(["vm-9"]), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Remote(RemoteError::ApiRequestFailed { status: 400, ref message })
                if message == "objects not found; try again"
        ));
    }

    #[tokio::test]
    async fn test_rejected_mutation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("AssignSla"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "assignSla": { "success": false, "message": "permission denied" } }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .add_members(&sla(), &member_set(["vm-1"]), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Remote(RemoteError::Rejected { ref message }) if message == "permission denied"
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "cloudAccount": { "id": "acct-1", "features": [
                    { "feature": "CLOUD_NATIVE_PROTECTION", "status": "CONNECTED" }
                ] } }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let grouping = Grouping::new("prod", GroupingKind::AccountFeatureSet, "acct-1");
        let members = client.get_membership(&grouping).await.unwrap();

        assert_eq!(members, member_set(["CLOUD_NATIVE_PROTECTION"]));
    }

    #[tokio::test]
    async fn test_tag_rule_add_sends_full_scope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("UpdateTagRuleScope"))
            .and(body_partial_json(json!({
                "variables": { "id": "rule-1", "accountIds": ["acct-1", "acct-2"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "updateTagRule": { "success": true } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .add_members(
                &tag_rule(),
                &member_set(["acct-2"]),
                Some(&member_set(["acct-1", "acct-2"])),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tag_rule_pass_keeps_added_account_when_scope_read_is_stale() {
        let server = MockServer::start().await;
        // The scope never reflects accepted writes.
        Mock::given(method("POST"))
            .and(body_string_contains("query TagRuleScope"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "tagRule": { "id": "rule-1", "cloudAccounts": [
                    { "id": "B" }, { "id": "C" }
                ] } }
            })))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("UpdateTagRuleScope"))
            .and(body_partial_json(json!({
                "variables": { "id": "rule-1", "accountIds": ["A", "B"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "updateTagRule": { "success": true } }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let diff = MembershipDiff::compute(&member_set(["B", "C"]), &member_set(["A", "B"]));
        let plan = OrderingPolicy::Default.order(&tag_rule(), diff).unwrap();

        let report = AssignmentExecutor::new(&client).execute(&plan).await.unwrap();

        assert_eq!(report.calls, 2);
        assert_eq!(report.accepted_added, member_set(["A"]));
        assert_eq!(report.accepted_removed, member_set(["C"]));
    }

    #[tokio::test]
    async fn test_tag_rule_write_without_full_scope_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .remove_members(&tag_rule(), &member_set(["acct-2"]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Internal(_)));
    }
}
