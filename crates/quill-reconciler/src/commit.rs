//! Per-item commit pipeline: create issue, add to project, set status.
//!
//! Commit is per-item atomic only. Steps within an item run strictly in
//! order (each depends on the previous id); items within a batch may run
//! with bounded concurrency. A failed step leaves the item in a recorded
//! partial state; siblings are never rolled back.

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use quill_github::models::{ProjectIds, ProjectLocator};
use quill_oracle::ProposedItem;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::marker::{item_marker, marker_comment};
use crate::outcome::{ItemOutcome, ItemReport};
use crate::surface::WorkSurface;
use crate::wal::{
    current_unix_timestamp_ms, CommitStep, MarkerProgress, MutationLog, WalRecord, WalSnapshot,
};
use crate::work_item::RemoteIdentity;

pub(crate) struct CommitContext<'a> {
    pub surface: &'a dyn WorkSurface,
    pub log: &'a MutationLog,
    pub ids: &'a ProjectIds,
    pub target: &'a ProjectLocator,
    pub signature_hash: &'a str,
    pub requester: &'a str,
    pub initial_status: &'a str,
    pub assignee_id: Option<&'a str>,
}

/// Commits every item, fanning out up to `concurrency` items at a time.
/// Items scheduled after cancellation are reported as abandoned.
pub(crate) async fn commit_batch(
    ctx: &CommitContext<'_>,
    items: &[ProposedItem],
    snapshot: &WalSnapshot,
    concurrency: usize,
    cancel: Option<&watch::Receiver<bool>>,
) -> Vec<ItemReport> {
    let mut reports = stream::iter(items.iter().enumerate().map(|(index, item)| async move {
        let marker = item_marker(ctx.signature_hash, index);
        if cancel.map(|rx| *rx.borrow()).unwrap_or(false) {
            return ItemReport {
                index,
                title: item.title.clone(),
                marker,
                outcome: ItemOutcome::Abandoned,
            };
        }
        commit_item(ctx, index, item, snapshot).await
    }))
    .buffer_unordered(concurrency.max(1))
    .collect::<Vec<_>>()
    .await;
    reports.sort_by_key(|report| report.index);
    reports
}

pub(crate) async fn commit_item(
    ctx: &CommitContext<'_>,
    index: usize,
    item: &ProposedItem,
    snapshot: &WalSnapshot,
) -> ItemReport {
    let marker = item_marker(ctx.signature_hash, index);
    let progress = snapshot.progress(&marker).cloned().unwrap_or_default();

    let identity = match ensure_issue(ctx, index, item, &marker, &progress).await {
        Ok(identity) => identity,
        Err(error) => {
            return ItemReport {
                index,
                title: item.title.clone(),
                marker,
                outcome: ItemOutcome::PartialFailure {
                    stage: CommitStep::CreateIssue,
                    error: format!("{error:#}"),
                    identity: None,
                },
            };
        }
    };

    let project_item_id = match ensure_project_item(ctx, index, &marker, &identity, &progress).await {
        Ok(project_item_id) => project_item_id,
        Err(error) => {
            return ItemReport {
                index,
                title: item.title.clone(),
                marker,
                outcome: ItemOutcome::PartialFailure {
                    stage: CommitStep::AddToProject,
                    error: format!("{error:#}"),
                    identity: Some(identity),
                },
            };
        }
    };
    let identity = RemoteIdentity {
        project_item_id: Some(project_item_id.clone()),
        ..identity
    };

    if let Err(error) = ensure_status(ctx, index, &marker, &project_item_id, &progress).await {
        return ItemReport {
            index,
            title: item.title.clone(),
            marker,
            outcome: ItemOutcome::PartialFailure {
                stage: CommitStep::SetStatus,
                error: format!("{error:#}"),
                identity: Some(identity),
            },
        };
    }

    // Assignee wiring is best effort and never fails the item.
    if let Err(error) = ensure_assignee(ctx, index, &marker, &identity, &progress).await {
        warn!(marker = %marker, %error, "assignee step failed, leaving issue unassigned");
    }

    info!(
        marker = %marker,
        issue_number = identity.issue_number,
        "work item committed"
    );
    ItemReport {
        index,
        title: item.title.clone(),
        marker,
        outcome: ItemOutcome::Committed { identity },
    }
}

/// Creates the issue, or recovers one created by an earlier attempt. The
/// recovery path is what makes a retried run idempotent: a logged-but-
/// unconfirmed create is resolved by searching the remote for the marker.
async fn ensure_issue(
    ctx: &CommitContext<'_>,
    index: usize,
    item: &ProposedItem,
    marker: &str,
    progress: &MarkerProgress,
) -> Result<RemoteIdentity> {
    if progress.confirmed.contains(&CommitStep::CreateIssue) {
        if let (Some(issue_id), Some(issue_number)) =
            (progress.issue_id.clone(), progress.issue_number)
        {
            return Ok(RemoteIdentity {
                issue_id,
                issue_number,
                issue_url: progress.issue_url.clone().unwrap_or_default(),
                project_item_id: progress.project_item_id.clone(),
            });
        }
    }

    if progress.attempted.contains(&CommitStep::CreateIssue) {
        let found = ctx
            .surface
            .find_issues_by_marker(&ctx.target.repo.as_slug(), marker)
            .await
            .context("failed to search for prior attempt")?;
        if let Some(existing) = found.first() {
            info!(marker = %marker, issue_number = existing.number, "recovered issue from prior attempt");
            let identity = RemoteIdentity {
                issue_id: existing.id.clone(),
                issue_number: existing.number,
                issue_url: existing.url.clone(),
                project_item_id: progress.project_item_id.clone(),
            };
            ctx.log.append(&WalRecord::Confirmed {
                marker: marker.to_string(),
                step: CommitStep::CreateIssue,
                issue_id: Some(identity.issue_id.clone()),
                issue_number: Some(identity.issue_number),
                issue_url: Some(identity.issue_url.clone()),
                project_item_id: None,
                at_unix_ms: current_unix_timestamp_ms(),
            })?;
            return Ok(identity);
        }
    }

    ctx.log.append(&WalRecord::Attempt {
        marker: marker.to_string(),
        signature_hash: ctx.signature_hash.to_string(),
        item_index: index,
        step: CommitStep::CreateIssue,
        at_unix_ms: current_unix_timestamp_ms(),
    })?;
    let body = render_issue_body(item, ctx.requester, marker);
    let created = ctx
        .surface
        .create_issue(&ctx.ids.repository_id, &item.title, &body)
        .await
        .context("create issue failed")?;
    ctx.log.append(&WalRecord::Confirmed {
        marker: marker.to_string(),
        step: CommitStep::CreateIssue,
        issue_id: Some(created.id.clone()),
        issue_number: Some(created.number),
        issue_url: Some(created.url.clone()),
        project_item_id: None,
        at_unix_ms: current_unix_timestamp_ms(),
    })?;
    Ok(RemoteIdentity {
        issue_id: created.id,
        issue_number: created.number,
        issue_url: created.url,
        project_item_id: None,
    })
}

/// Adding the same content id twice returns the existing item on the remote
/// side, so an unconfirmed prior attempt is safe to simply re-run.
async fn ensure_project_item(
    ctx: &CommitContext<'_>,
    index: usize,
    marker: &str,
    identity: &RemoteIdentity,
    progress: &MarkerProgress,
) -> Result<String> {
    if progress.confirmed.contains(&CommitStep::AddToProject) {
        if let Some(project_item_id) = progress.project_item_id.clone() {
            return Ok(project_item_id);
        }
    }

    ctx.log.append(&WalRecord::Attempt {
        marker: marker.to_string(),
        signature_hash: ctx.signature_hash.to_string(),
        item_index: index,
        step: CommitStep::AddToProject,
        at_unix_ms: current_unix_timestamp_ms(),
    })?;
    let project_item_id = ctx
        .surface
        .add_item_to_project(&ctx.ids.project_id, &identity.issue_id)
        .await
        .context("add to project failed")?;
    ctx.log.append(&WalRecord::Confirmed {
        marker: marker.to_string(),
        step: CommitStep::AddToProject,
        issue_id: None,
        issue_number: None,
        issue_url: None,
        project_item_id: Some(project_item_id.clone()),
        at_unix_ms: current_unix_timestamp_ms(),
    })?;
    Ok(project_item_id)
}

async fn ensure_status(
    ctx: &CommitContext<'_>,
    index: usize,
    marker: &str,
    project_item_id: &str,
    progress: &MarkerProgress,
) -> Result<()> {
    if progress.confirmed.contains(&CommitStep::SetStatus) {
        return Ok(());
    }

    let field = ctx
        .ids
        .status_field_id
        .as_deref()
        .zip(ctx.ids.status_option_id(ctx.initial_status));
    let Some((field_id, option_id)) = field else {
        // No usable Status field on this project; recorded as confirmed so
        // replay treats the item as complete.
        warn!(
            marker = %marker,
            status = ctx.initial_status,
            "project has no matching status field/option, skipping status step"
        );
        ctx.log.append(&WalRecord::Confirmed {
            marker: marker.to_string(),
            step: CommitStep::SetStatus,
            issue_id: None,
            issue_number: None,
            issue_url: None,
            project_item_id: None,
            at_unix_ms: current_unix_timestamp_ms(),
        })?;
        return Ok(());
    };

    ctx.log.append(&WalRecord::Attempt {
        marker: marker.to_string(),
        signature_hash: ctx.signature_hash.to_string(),
        item_index: index,
        step: CommitStep::SetStatus,
        at_unix_ms: current_unix_timestamp_ms(),
    })?;
    ctx.surface
        .set_item_status(&ctx.ids.project_id, project_item_id, field_id, option_id)
        .await
        .context("set status failed")?;
    ctx.log.append(&WalRecord::Confirmed {
        marker: marker.to_string(),
        step: CommitStep::SetStatus,
        issue_id: None,
        issue_number: None,
        issue_url: None,
        project_item_id: None,
        at_unix_ms: current_unix_timestamp_ms(),
    })?;
    Ok(())
}

async fn ensure_assignee(
    ctx: &CommitContext<'_>,
    index: usize,
    marker: &str,
    identity: &RemoteIdentity,
    progress: &MarkerProgress,
) -> Result<()> {
    let Some(assignee_id) = ctx.assignee_id else {
        return Ok(());
    };
    if progress.confirmed.contains(&CommitStep::AddAssignee) {
        return Ok(());
    }

    ctx.log.append(&WalRecord::Attempt {
        marker: marker.to_string(),
        signature_hash: ctx.signature_hash.to_string(),
        item_index: index,
        step: CommitStep::AddAssignee,
        at_unix_ms: current_unix_timestamp_ms(),
    })?;
    ctx.surface
        .add_assignees(&identity.issue_id, &[assignee_id.to_string()])
        .await
        .context("add assignees failed")?;
    ctx.log.append(&WalRecord::Confirmed {
        marker: marker.to_string(),
        step: CommitStep::AddAssignee,
        issue_id: None,
        issue_number: None,
        issue_url: None,
        project_item_id: None,
        at_unix_ms: current_unix_timestamp_ms(),
    })?;
    Ok(())
}

pub(crate) fn render_issue_body(item: &ProposedItem, requester: &str, marker: &str) -> String {
    let mut body = item.body.trim().to_string();
    if let Some(effort) = item.effort {
        body.push_str(&format!("\n\n**Estimated effort:** {}", effort.label()));
    }
    body.push_str(&format!("\n\nRequested by: {requester}"));
    body.push_str(&format!("\n\n{}", marker_comment(marker)));
    body
}
