use quill_github::models::{IssueState, ProjectItem, ProjectLocator, RemoteIssue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One natural-language ask submitted for reconciliation. Ephemeral: owned
/// by a single run and discarded when the run terminates.
pub struct TaskRequest {
    pub description: String,
    pub requester: String,
    /// GitHub login to assign created issues to, when the caller has a
    /// requester-to-GitHub mapping.
    #[serde(default)]
    pub assignee_login: Option<String>,
    pub target: ProjectLocator,
    /// Bounded repository summary (file tree, not contents) supplied by the
    /// caller; full-content analysis stays outside the core.
    #[serde(default)]
    pub repo_context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Open,
    Closed,
    Done,
}

impl WorkStatus {
    /// Project "Done" status wins over raw issue state, so finished work
    /// still counts as an existing implementation during matching.
    pub fn from_remote(state: IssueState, status_name: Option<&str>) -> Self {
        if status_name.is_some_and(|name| name.eq_ignore_ascii_case("done")) {
            return WorkStatus::Done;
        }
        match state {
            IssueState::Open => WorkStatus::Open,
            IssueState::Closed => WorkStatus::Closed,
        }
    }

    /// Closed items never count as duplicates; open and done items do.
    pub fn is_match_candidate(&self) -> bool {
        !matches!(self, WorkStatus::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Remote identity owned by GitHub; present only once an item is committed.
pub struct RemoteIdentity {
    pub issue_id: String,
    pub issue_number: u64,
    pub issue_url: String,
    #[serde(default)]
    pub project_item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Canonical unit of tracked work, mapped 1:1 to an issue plus project item
/// once committed. The reconciler only reads or appends remote state.
pub struct WorkItem {
    pub title: String,
    pub body: String,
    pub status: WorkStatus,
    #[serde(default)]
    pub assignee: Option<String>,
    pub repo_slug: String,
    #[serde(default)]
    pub remote: Option<RemoteIdentity>,
}

impl WorkItem {
    pub fn from_project_item(item: &ProjectItem) -> Option<Self> {
        let issue = item.issue.as_ref()?;
        Some(Self {
            title: issue.title.clone(),
            body: issue.body.clone(),
            status: WorkStatus::from_remote(issue.state, item.status_name.as_deref()),
            assignee: issue.assignees.first().cloned(),
            repo_slug: issue.repo_slug.clone(),
            remote: Some(RemoteIdentity {
                issue_id: issue.id.clone(),
                issue_number: issue.number,
                issue_url: issue.url.clone(),
                project_item_id: Some(item.item_id.clone()),
            }),
        })
    }

    pub fn from_remote_issue(issue: &RemoteIssue) -> Self {
        Self {
            title: issue.title.clone(),
            body: issue.body.clone(),
            status: WorkStatus::from_remote(issue.state, None),
            assignee: issue.assignees.first().cloned(),
            repo_slug: issue.repo_slug.clone(),
            remote: Some(RemoteIdentity {
                issue_id: issue.id.clone(),
                issue_number: issue.number,
                issue_url: issue.url.clone(),
                project_item_id: None,
            }),
        }
    }
}
