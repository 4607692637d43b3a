//! GraphQL client with bounded retry and quota surfacing.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::documents;
use crate::error::GithubError;
use crate::models::{
    CreatedIssue, IssueState, ProjectIds, ProjectItem, ProjectItemPage, ProjectLocator,
    RateLimitInfo, RemoteIssue, StatusOption, UserIssuePage,
};
use crate::transport::{
    is_retryable_github_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

pub const DEFAULT_API_BASE: &str = "https://api.github.com/graphql";

#[derive(Debug, Clone)]
/// Construction parameters for [`GithubClient`].
pub struct GithubClientConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for GithubClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: String::new(),
            request_timeout_ms: 30_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
        }
    }
}

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GithubClient {
    pub fn new(config: GithubClientConfig) -> Result<Self, GithubError> {
        if config.token.trim().is_empty() {
            return Err(GithubError::MissingToken);
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("quill-reconciler"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let auth_header = format!("Bearer {}", config.token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .map_err(|_| GithubError::InvalidResponse("invalid token header".to_string()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    /// Executes one GraphQL document, retrying retryable statuses and
    /// transport errors with exponential backoff. A rate-limit signal is
    /// surfaced as [`GithubError::QuotaExceeded`] and never retried here.
    async fn execute(
        &self,
        operation: &str,
        document: &str,
        variables: Value,
    ) -> Result<Value, GithubError> {
        let payload = json!({ "query": document, "variables": variables });
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = self.http.post(&self.api_base).json(&payload).send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let envelope = response.json::<GraphqlEnvelope>().await.map_err(|error| {
                            GithubError::InvalidResponse(format!(
                                "failed to decode github {operation}: {error}"
                            ))
                        })?;
                        return envelope.into_data(operation);
                    }

                    let quota = quota_from_headers(response.headers());
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if let Some((remaining, reset_at)) = quota {
                        return Err(GithubError::QuotaExceeded {
                            remaining: Some(remaining),
                            reset_at,
                        });
                    }
                    if attempt < self.retry_max_attempts
                        && is_retryable_github_status(status.as_u16())
                    {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, retry_after);
                        debug!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying github request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(GithubError::HttpStatus {
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        warn!(operation, attempt, %error, "github transport error, retrying");
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(GithubError::Http(error));
                }
            }
        }
    }

    /// Resolves the repository id, project id, and Status field/options the
    /// commit pipeline needs before mutating anything.
    pub async fn resolve_ids(&self, locator: &ProjectLocator) -> Result<ProjectIds, GithubError> {
        let variables = json!({
            "org": locator.repo.owner,
            "repo": locator.repo.name,
            "projectNumber": locator.project_number,
        });
        let data = self
            .execute("resolve ids", documents::RESOLVE_IDS, variables)
            .await?;
        let parsed: ResolveIdsData = decode("resolve ids", data)?;
        let repository_id = parsed
            .repository
            .map(|node| node.id)
            .ok_or_else(|| GithubError::InvalidResponse("repository not found".to_string()))?;
        let project = parsed
            .organization
            .and_then(|org| org.project_v2)
            .ok_or_else(|| GithubError::InvalidResponse("project not found".to_string()))?;
        let status_field = project.fields.nodes.into_iter().find(|field| {
            field
                .name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case("Status"))
        });
        let (status_field_id, status_options) = match status_field {
            Some(field) => (field.id, field.options.unwrap_or_default()),
            None => (None, Vec::new()),
        };
        Ok(ProjectIds {
            repository_id,
            project_id: project.id,
            status_field_id,
            status_options,
        })
    }

    pub async fn create_issue(
        &self,
        repository_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, GithubError> {
        let variables = json!({
            "repositoryId": repository_id,
            "title": title,
            "body": body,
        });
        let data = self
            .execute("create issue", documents::CREATE_ISSUE, variables)
            .await?;
        let parsed: CreateIssueData = decode("create issue", data)?;
        Ok(parsed.create_issue.issue)
    }

    /// Returns the new project-item id.
    pub async fn add_item_to_project(
        &self,
        project_id: &str,
        content_id: &str,
    ) -> Result<String, GithubError> {
        let variables = json!({ "projectId": project_id, "contentId": content_id });
        let data = self
            .execute("add to project", documents::ADD_TO_PROJECT, variables)
            .await?;
        let parsed: AddToProjectData = decode("add to project", data)?;
        Ok(parsed.add_item.item.id)
    }

    pub async fn update_item_field(
        &self,
        project_id: &str,
        item_id: &str,
        field_id: &str,
        option_id: &str,
    ) -> Result<(), GithubError> {
        let variables = json!({
            "projectId": project_id,
            "itemId": item_id,
            "fieldId": field_id,
            "optionId": option_id,
        });
        self.execute(
            "update item field",
            documents::UPDATE_PROJECT_FIELD,
            variables,
        )
        .await?;
        Ok(())
    }

    pub async fn resolve_user_id(&self, login: &str) -> Result<String, GithubError> {
        let variables = json!({ "login": login });
        let data = self
            .execute("resolve user id", documents::RESOLVE_USER_ID, variables)
            .await?;
        let parsed: ResolveUserData = decode("resolve user id", data)?;
        parsed
            .user
            .map(|node| node.id)
            .ok_or_else(|| GithubError::InvalidResponse(format!("user '{login}' not found")))
    }

    pub async fn add_assignees(
        &self,
        issue_id: &str,
        assignee_ids: &[String],
    ) -> Result<(), GithubError> {
        let variables = json!({ "issueId": issue_id, "assigneeIds": assignee_ids });
        self.execute("add assignees", documents::ADD_ASSIGNEES, variables)
            .await?;
        Ok(())
    }

    pub async fn project_items_page(
        &self,
        locator: &ProjectLocator,
        after: Option<&str>,
    ) -> Result<ProjectItemPage, GithubError> {
        let variables = json!({
            "org": locator.repo.owner,
            "projectNumber": locator.project_number,
            "after": after,
        });
        let data = self
            .execute(
                "list project items",
                documents::PROJECT_ITEMS_PAGE,
                variables,
            )
            .await?;
        let parsed: ProjectItemsData = decode("list project items", data)?;
        let items = parsed
            .organization
            .and_then(|org| org.project_v2)
            .map(|project| project.items)
            .ok_or_else(|| GithubError::InvalidResponse("project not found".to_string()))?;
        Ok(ProjectItemPage {
            items: items.nodes.into_iter().map(ProjectItem::from).collect(),
            has_next_page: items.page_info.has_next_page,
            end_cursor: items.page_info.end_cursor,
        })
    }

    pub async fn user_issues_page(
        &self,
        login: &str,
        after: Option<&str>,
    ) -> Result<UserIssuePage, GithubError> {
        let variables = json!({ "login": login, "after": after });
        let data = self
            .execute("list user issues", documents::USER_ISSUES_PAGE, variables)
            .await?;
        let parsed: UserIssuesData = decode("list user issues", data)?;
        let issues = parsed
            .user
            .map(|user| user.issues)
            .ok_or_else(|| GithubError::InvalidResponse(format!("user '{login}' not found")))?;
        Ok(UserIssuePage {
            issues: issues
                .nodes
                .into_iter()
                .filter_map(|node| node.into_issue())
                .collect(),
            has_next_page: issues.page_info.has_next_page,
            end_cursor: issues.page_info.end_cursor,
        })
    }

    /// Finds issues whose body carries the given idempotency marker. Used to
    /// reconcile a crash between "attempt logged" and "remote confirmed".
    pub async fn search_issues_by_marker(
        &self,
        repo_slug: &str,
        marker: &str,
    ) -> Result<Vec<RemoteIssue>, GithubError> {
        let query = format!("repo:{repo_slug} in:body \"{marker}\" type:issue");
        let variables = json!({ "query": query });
        let data = self
            .execute(
                "search issues by marker",
                documents::SEARCH_ISSUES_BY_MARKER,
                variables,
            )
            .await?;
        let parsed: SearchData = decode("search issues by marker", data)?;
        Ok(parsed
            .search
            .nodes
            .into_iter()
            .filter_map(|node| node.into_issue())
            .collect())
    }

    pub async fn rate_limit(&self) -> Result<RateLimitInfo, GithubError> {
        let data = self
            .execute("rate limit", documents::RATE_LIMIT, json!({}))
            .await?;
        let parsed: RateLimitData = decode("rate limit", data)?;
        Ok(parsed.rate_limit)
    }
}

fn decode<T: serde::de::DeserializeOwned>(operation: &str, data: Value) -> Result<T, GithubError> {
    serde_json::from_value(data).map_err(|error| {
        GithubError::InvalidResponse(format!("unexpected github {operation} shape: {error}"))
    })
}

fn quota_from_headers(headers: &reqwest::header::HeaderMap) -> Option<(u64, Option<String>)> {
    let remaining = headers
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    if remaining > 0 {
        return None;
    }
    let reset_at = headers
        .get("x-ratelimit-reset")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string());
    Some((remaining, reset_at))
}

#[derive(Debug, Deserialize)]
struct GraphqlEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorEntry {
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl GraphqlEnvelope {
    fn into_data(self, operation: &str) -> Result<Value, GithubError> {
        if !self.errors.is_empty() {
            if self
                .errors
                .iter()
                .any(|entry| entry.kind.as_deref() == Some("RATE_LIMITED"))
            {
                return Err(GithubError::QuotaExceeded {
                    remaining: Some(0),
                    reset_at: None,
                });
            }
            return Err(GithubError::GraphQl {
                messages: self.errors.into_iter().map(|entry| entry.message).collect(),
            });
        }
        self.data.ok_or_else(|| {
            GithubError::InvalidResponse(format!("github {operation} returned no data"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResolveIdsData {
    repository: Option<IdNode>,
    organization: Option<ResolveIdsOrg>,
}

#[derive(Debug, Deserialize)]
struct ResolveIdsOrg {
    #[serde(rename = "projectV2")]
    project_v2: Option<ResolveIdsProject>,
}

#[derive(Debug, Deserialize)]
struct ResolveIdsProject {
    id: String,
    fields: FieldNodes,
}

#[derive(Debug, Deserialize)]
struct FieldNodes {
    nodes: Vec<FieldNode>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldNode {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    options: Option<Vec<StatusOption>>,
}

#[derive(Debug, Deserialize)]
struct CreateIssueData {
    #[serde(rename = "createIssue")]
    create_issue: CreateIssuePayload,
}

#[derive(Debug, Deserialize)]
struct CreateIssuePayload {
    issue: CreatedIssue,
}

#[derive(Debug, Deserialize)]
struct AddToProjectData {
    #[serde(rename = "addProjectV2ItemById")]
    add_item: AddToProjectPayload,
}

#[derive(Debug, Deserialize)]
struct AddToProjectPayload {
    item: IdNode,
}

#[derive(Debug, Deserialize)]
struct ResolveUserData {
    user: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    #[serde(default)]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectItemsData {
    organization: Option<ProjectItemsOrg>,
}

#[derive(Debug, Deserialize)]
struct ProjectItemsOrg {
    #[serde(rename = "projectV2")]
    project_v2: Option<ProjectItemsProject>,
}

#[derive(Debug, Deserialize)]
struct ProjectItemsProject {
    items: ProjectItemNodes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectItemNodes {
    page_info: PageInfo,
    nodes: Vec<ProjectItemNode>,
}

#[derive(Debug, Deserialize)]
struct ProjectItemNode {
    id: String,
    #[serde(default)]
    content: Option<IssueNode>,
    #[serde(rename = "fieldValues", default)]
    field_values: Option<FieldValueNodes>,
}

#[derive(Debug, Deserialize)]
struct FieldValueNodes {
    nodes: Vec<FieldValueNode>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldValueNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    field: Option<FieldNameNode>,
}

#[derive(Debug, Deserialize)]
struct FieldNameNode {
    #[serde(default)]
    name: Option<String>,
}

/// Issue content node; non-issue project items (drafts, PRs) deserialize as
/// empty objects, so everything is optional and conversion filters them out.
#[derive(Debug, Default, Deserialize)]
struct IssueNode {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    state: Option<IssueState>,
    #[serde(default)]
    assignees: Option<AssigneeNodes>,
    #[serde(default)]
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
struct AssigneeNodes {
    nodes: Vec<LoginNode>,
}

#[derive(Debug, Deserialize)]
struct LoginNode {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryNode {
    #[serde(rename = "nameWithOwner")]
    name_with_owner: String,
}

impl IssueNode {
    fn into_issue(self) -> Option<RemoteIssue> {
        Some(RemoteIssue {
            id: self.id?,
            number: self.number?,
            title: self.title?,
            body: self.body.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            state: self.state.unwrap_or(IssueState::Open),
            assignees: self
                .assignees
                .map(|nodes| nodes.nodes.into_iter().map(|node| node.login).collect())
                .unwrap_or_default(),
            repo_slug: self
                .repository
                .map(|repo| repo.name_with_owner)
                .unwrap_or_default(),
        })
    }
}

impl From<ProjectItemNode> for ProjectItem {
    fn from(node: ProjectItemNode) -> Self {
        let status_name = node.field_values.and_then(|values| {
            values.nodes.into_iter().find_map(|value| {
                let field_name = value.field.and_then(|field| field.name)?;
                if field_name.eq_ignore_ascii_case("Status") {
                    value.name
                } else {
                    None
                }
            })
        });
        Self {
            item_id: node.id,
            issue: node.content.and_then(IssueNode::into_issue),
            status_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserIssuesData {
    user: Option<UserIssuesUser>,
}

#[derive(Debug, Deserialize)]
struct UserIssuesUser {
    issues: UserIssueNodes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIssueNodes {
    page_info: PageInfo,
    nodes: Vec<IssueNode>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchNodes,
}

#[derive(Debug, Deserialize)]
struct SearchNodes {
    nodes: Vec<IssueNode>,
}

#[derive(Debug, Deserialize)]
struct RateLimitData {
    #[serde(rename = "rateLimit")]
    rate_limit: RateLimitInfo,
}
