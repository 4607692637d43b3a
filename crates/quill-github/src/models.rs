use serde::{Deserialize, Serialize};

use crate::error::GithubError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Repository reference in `owner/name` form.
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(raw: &str) -> Result<Self, GithubError> {
        let trimmed = raw.trim();
        let (owner, name) = trimmed.split_once('/').ok_or_else(|| {
            GithubError::InvalidResponse(format!("invalid repo '{raw}', expected owner/repo"))
        })?;
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(GithubError::InvalidResponse(format!(
                "invalid repo '{raw}', expected owner/repo"
            )));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn as_slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Target of one reconciliation run: a repository plus its Projects v2 board.
pub struct ProjectLocator {
    pub repo: RepoRef,
    pub project_number: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Issue payload returned by list/search queries.
pub struct RemoteIssue {
    pub id: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub url: String,
    pub state: IssueState,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub repo_slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Identity minted by a successful `createIssue` mutation.
pub struct CreatedIssue {
    pub id: String,
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOption {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Node ids needed before any mutation can be issued against a project.
pub struct ProjectIds {
    pub repository_id: String,
    pub project_id: String,
    pub status_field_id: Option<String>,
    pub status_options: Vec<StatusOption>,
}

impl ProjectIds {
    /// Looks up a status option id by case-insensitive name.
    pub fn status_option_id(&self, name: &str) -> Option<&str> {
        self.status_options
            .iter()
            .find(|option| option.name.eq_ignore_ascii_case(name))
            .map(|option| option.id.as_str())
    }
}

#[derive(Debug, Clone)]
/// One project item: the project-side id plus the issue content, if any.
pub struct ProjectItem {
    pub item_id: String,
    pub issue: Option<RemoteIssue>,
    pub status_name: Option<String>,
}

#[derive(Debug, Clone)]
/// One page of project items with its continuation cursor.
pub struct ProjectItemPage {
    pub items: Vec<ProjectItem>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone)]
/// One page of a user's open issues.
pub struct UserIssuePage {
    pub issues: Vec<RemoteIssue>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: String,
}
