//! Typed GitHub GraphQL client for the Quill reconciler.
//!
//! Covers only the mutations and queries the reconciler needs: issue
//! creation, project-item insertion, field updates, assignee wiring, and
//! paged listing of project items and user issues.

pub mod client;
pub mod documents;
pub mod error;
pub mod models;
pub mod transport;

pub use client::{GithubClient, GithubClientConfig};
pub use error::GithubError;
pub use models::{
    CreatedIssue, IssueState, ProjectIds, ProjectItemPage, ProjectLocator, RateLimitInfo,
    RemoteIssue, RepoRef, StatusOption,
};
