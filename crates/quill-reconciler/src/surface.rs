//! Capability boundary over the remote issue/project system of record.
//!
//! The remote surface is injected rather than global so tests substitute an
//! in-memory fake; the live implementation delegates to `quill-github`.

use async_trait::async_trait;
use quill_github::models::{
    CreatedIssue, ProjectIds, ProjectItemPage, ProjectLocator, RemoteIssue, UserIssuePage,
};
use quill_github::{GithubClient, GithubError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("transient fetch error: {0}")]
    Transient(String),
    #[error("rate limit exhausted (remaining {remaining:?}, resets at {reset_at:?})")]
    Quota {
        remaining: Option<u64>,
        reset_at: Option<String>,
    },
    #[error("{0}")]
    Fatal(String),
}

impl From<GithubError> for SurfaceError {
    fn from(error: GithubError) -> Self {
        match error {
            GithubError::QuotaExceeded {
                remaining,
                reset_at,
            } => SurfaceError::Quota {
                remaining,
                reset_at,
            },
            other if other.is_transient() => SurfaceError::Transient(other.to_string()),
            other => SurfaceError::Fatal(other.to_string()),
        }
    }
}

#[async_trait]
/// Request/response calls the reconciler needs against the remote surface.
/// Mutations are externally visible and never reversed by this system.
pub trait WorkSurface: Send + Sync {
    async fn resolve_ids(&self, target: &ProjectLocator) -> Result<ProjectIds, SurfaceError>;

    async fn project_items_page(
        &self,
        target: &ProjectLocator,
        after: Option<String>,
    ) -> Result<ProjectItemPage, SurfaceError>;

    async fn user_issues_page(
        &self,
        login: &str,
        after: Option<String>,
    ) -> Result<UserIssuePage, SurfaceError>;

    async fn create_issue(
        &self,
        repository_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, SurfaceError>;

    async fn add_item_to_project(
        &self,
        project_id: &str,
        content_id: &str,
    ) -> Result<String, SurfaceError>;

    async fn set_item_status(
        &self,
        project_id: &str,
        item_id: &str,
        field_id: &str,
        option_id: &str,
    ) -> Result<(), SurfaceError>;

    async fn resolve_user_id(&self, login: &str) -> Result<String, SurfaceError>;

    async fn add_assignees(
        &self,
        issue_id: &str,
        assignee_ids: &[String],
    ) -> Result<(), SurfaceError>;

    async fn find_issues_by_marker(
        &self,
        repo_slug: &str,
        marker: &str,
    ) -> Result<Vec<RemoteIssue>, SurfaceError>;
}

/// Live surface backed by the GitHub GraphQL client.
pub struct GithubWorkSurface {
    client: GithubClient,
}

impl GithubWorkSurface {
    pub fn new(client: GithubClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkSurface for GithubWorkSurface {
    async fn resolve_ids(&self, target: &ProjectLocator) -> Result<ProjectIds, SurfaceError> {
        Ok(self.client.resolve_ids(target).await?)
    }

    async fn project_items_page(
        &self,
        target: &ProjectLocator,
        after: Option<String>,
    ) -> Result<ProjectItemPage, SurfaceError> {
        Ok(self
            .client
            .project_items_page(target, after.as_deref())
            .await?)
    }

    async fn user_issues_page(
        &self,
        login: &str,
        after: Option<String>,
    ) -> Result<UserIssuePage, SurfaceError> {
        Ok(self.client.user_issues_page(login, after.as_deref()).await?)
    }

    async fn create_issue(
        &self,
        repository_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, SurfaceError> {
        Ok(self.client.create_issue(repository_id, title, body).await?)
    }

    async fn add_item_to_project(
        &self,
        project_id: &str,
        content_id: &str,
    ) -> Result<String, SurfaceError> {
        Ok(self
            .client
            .add_item_to_project(project_id, content_id)
            .await?)
    }

    async fn set_item_status(
        &self,
        project_id: &str,
        item_id: &str,
        field_id: &str,
        option_id: &str,
    ) -> Result<(), SurfaceError> {
        Ok(self
            .client
            .update_item_field(project_id, item_id, field_id, option_id)
            .await?)
    }

    async fn resolve_user_id(&self, login: &str) -> Result<String, SurfaceError> {
        Ok(self.client.resolve_user_id(login).await?)
    }

    async fn add_assignees(
        &self,
        issue_id: &str,
        assignee_ids: &[String],
    ) -> Result<(), SurfaceError> {
        Ok(self.client.add_assignees(issue_id, assignee_ids).await?)
    }

    async fn find_issues_by_marker(
        &self,
        repo_slug: &str,
        marker: &str,
    ) -> Result<Vec<RemoteIssue>, SurfaceError> {
        Ok(self.client.search_issues_by_marker(repo_slug, marker).await?)
    }
}
