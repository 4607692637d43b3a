//! Reconciliation run state machine.
//!
//! `Received → Indexed → Matched | Decomposing → Decomposed → Committing →
//! Committed | Failed`. A run is one logical sequence of suspending remote
//! calls; it never mutates remote state in parallel with its own matching,
//! and `Failed` is never auto-retried; retry is the caller's decision and
//! is safe thanks to the idempotency markers.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use quill_github::models::ProjectLocator;
use quill_oracle::{sanitize_items, DecompositionOracle, OracleError, ProposedItem};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::commit::{commit_batch, CommitContext};
use crate::config::ReconcilerConfig;
use crate::index::ExistingWorkIndex;
use crate::marker::item_marker;
use crate::outcome::{FailureReason, ItemOutcome, ReconcileOutcome};
use crate::signature::TaskSignature;
use crate::surface::{SurfaceError, WorkSurface};
use crate::wal::{current_unix_timestamp_ms, MutationLog, WalRecord, WalSnapshot};
use crate::work_item::{RemoteIdentity, TaskRequest, WorkItem, WorkStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Received,
    Indexed,
    Matched,
    Decomposing,
    Decomposed,
    Committing,
    Committed,
    Failed,
}

fn step(state: &mut RunState, next: RunState) {
    info!(from = ?*state, to = ?next, "run state");
    *state = next;
}

pub struct Reconciler {
    surface: Arc<dyn WorkSurface>,
    oracle: Arc<dyn DecompositionOracle>,
    log: MutationLog,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        surface: Arc<dyn WorkSurface>,
        oracle: Arc<dyn DecompositionOracle>,
        log: MutationLog,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|message| anyhow!("invalid reconciler config: {message}"))?;
        Ok(Self {
            surface,
            oracle,
            log,
            config,
        })
    }

    /// Reconciles one task request. The outcome always enumerates exactly
    /// which items were committed, matched, or abandoned.
    pub async fn reconcile(
        &self,
        request: &TaskRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ReconcileOutcome {
        let mut state = RunState::Received;
        let signature = TaskSignature::from_text(&request.description);
        let signature_hash = signature.hash();
        info!(
            requester = %request.requester,
            repo = %request.target.repo.as_slug(),
            signature = %signature_hash,
            "reconciliation run started"
        );

        if is_cancelled(cancel.as_ref()) {
            step(&mut state, RunState::Failed);
            return failed(FailureReason::Cancelled);
        }

        let index = match ExistingWorkIndex::build(
            self.surface.as_ref(),
            &request.target,
            self.config.max_index_pages,
        )
        .await
        {
            Ok(index) => index,
            Err(error) => {
                step(&mut state, RunState::Failed);
                return failed(index_failure(error));
            }
        };
        step(&mut state, RunState::Indexed);

        let snapshot = match self.log.load().context("failed to replay mutation log") {
            Ok(snapshot) => snapshot,
            Err(error) => {
                step(&mut state, RunState::Failed);
                return failed(FailureReason::Internal {
                    detail: format!("{error:#}"),
                });
            }
        };

        // A logged plan means a prior run already decomposed this request:
        // either everything committed (treat as matched) or we resume the
        // plan instead of re-invoking the non-deterministic oracle.
        if let Some(plan) = snapshot.plan(&signature_hash) {
            if snapshot.is_plan_fully_committed(&signature_hash) {
                step(&mut state, RunState::Matched);
                return ReconcileOutcome::Matched {
                    item: self.matched_from_plan(request, &signature_hash, plan, &snapshot),
                };
            }
            let plan = plan.to_vec();
            info!(
                signature = %signature_hash,
                items = plan.len(),
                "resuming partially committed plan"
            );
            step(&mut state, RunState::Committing);
            return self
                .commit_phase(request, &signature_hash, &plan, &snapshot, cancel, &mut state)
                .await;
        }

        // Marker scan covers the case where the log was lost but a prior
        // run's issues survive remotely; stopping here is the conservative
        // choice against duplicates.
        if let Some(indexed) = index.items_for_signature_hash(&signature_hash).first() {
            step(&mut state, RunState::Matched);
            return ReconcileOutcome::Matched {
                item: indexed.item.clone(),
            };
        }

        if let Some((indexed, score)) =
            index.best_match(&signature, self.config.similarity_threshold)
        {
            info!(
                score,
                title = %indexed.item.title,
                "task matches existing non-closed work"
            );
            step(&mut state, RunState::Matched);
            return ReconcileOutcome::Matched {
                item: indexed.item.clone(),
            };
        }

        if is_cancelled(cancel.as_ref()) {
            step(&mut state, RunState::Failed);
            return failed(FailureReason::Cancelled);
        }

        step(&mut state, RunState::Decomposing);
        let repo_context = bounded_context(
            request.repo_context.as_deref(),
            self.config.repo_context_max_chars,
        );
        let items = match self
            .oracle
            .decompose(&request.description, &repo_context, self.config.max_items)
            .await
        {
            Ok(result) => sanitize_items(result.items, self.config.max_items),
            Err(OracleError::MalformedOutput(detail)) => {
                warn!(%detail, "oracle output malformed, nothing to create");
                step(&mut state, RunState::Failed);
                return failed(FailureReason::EmptyDecomposition);
            }
            Err(error) => {
                step(&mut state, RunState::Failed);
                return failed(FailureReason::OracleUnavailable {
                    detail: error.to_string(),
                });
            }
        };
        if items.is_empty() {
            step(&mut state, RunState::Failed);
            return failed(FailureReason::EmptyDecomposition);
        }
        step(&mut state, RunState::Decomposed);

        if is_cancelled(cancel.as_ref()) {
            step(&mut state, RunState::Failed);
            return failed(FailureReason::Cancelled);
        }

        // The plan goes to the log before the first remote mutation so a
        // retry can resume without consulting the oracle again.
        if let Err(error) = self.log.append(&WalRecord::Plan {
            signature_hash: signature_hash.clone(),
            items: items.clone(),
            at_unix_ms: current_unix_timestamp_ms(),
        }) {
            step(&mut state, RunState::Failed);
            return failed(FailureReason::Internal {
                detail: format!("{error:#}"),
            });
        }

        step(&mut state, RunState::Committing);
        self.commit_phase(request, &signature_hash, &items, &snapshot, cancel, &mut state)
            .await
    }

    async fn commit_phase(
        &self,
        request: &TaskRequest,
        signature_hash: &str,
        items: &[ProposedItem],
        snapshot: &WalSnapshot,
        cancel: Option<watch::Receiver<bool>>,
        state: &mut RunState,
    ) -> ReconcileOutcome {
        let ids = match self.surface.resolve_ids(&request.target).await {
            Ok(ids) => ids,
            Err(error) => {
                step(state, RunState::Failed);
                return failed(index_failure(error));
            }
        };

        let assignee_id = match request.assignee_login.as_deref() {
            Some(login) => match self.surface.resolve_user_id(login).await {
                Ok(id) => Some(id),
                Err(error) => {
                    warn!(login, %error, "could not resolve assignee, committing unassigned");
                    None
                }
            },
            None => None,
        };

        let ctx = CommitContext {
            surface: self.surface.as_ref(),
            log: &self.log,
            ids: &ids,
            target: &request.target,
            signature_hash,
            requester: &request.requester,
            initial_status: &self.config.initial_status,
            assignee_id: assignee_id.as_deref(),
        };
        let reports = commit_batch(
            &ctx,
            items,
            snapshot,
            self.config.commit_concurrency,
            cancel.as_ref(),
        )
        .await;

        let abandoned = reports
            .iter()
            .any(|report| matches!(report.outcome, ItemOutcome::Abandoned));
        let partial = reports
            .iter()
            .any(|report| matches!(report.outcome, ItemOutcome::PartialFailure { .. }));
        if abandoned {
            step(state, RunState::Failed);
            ReconcileOutcome::Failed {
                reason: FailureReason::Cancelled,
                items: reports,
            }
        } else if partial {
            step(state, RunState::Failed);
            ReconcileOutcome::Failed {
                reason: FailureReason::PartialCommitFailure,
                items: reports,
            }
        } else {
            step(state, RunState::Committed);
            ReconcileOutcome::Committed { items: reports }
        }
    }

    fn matched_from_plan(
        &self,
        request: &TaskRequest,
        signature_hash: &str,
        plan: &[ProposedItem],
        snapshot: &WalSnapshot,
    ) -> WorkItem {
        let first = plan.first();
        let marker = item_marker(signature_hash, 0);
        let remote = snapshot.progress(&marker).and_then(|progress| {
            Some(RemoteIdentity {
                issue_id: progress.issue_id.clone()?,
                issue_number: progress.issue_number?,
                issue_url: progress.issue_url.clone().unwrap_or_default(),
                project_item_id: progress.project_item_id.clone(),
            })
        });
        WorkItem {
            title: first.map(|item| item.title.clone()).unwrap_or_default(),
            body: first.map(|item| item.body.clone()).unwrap_or_default(),
            status: WorkStatus::Open,
            assignee: request.assignee_login.clone(),
            repo_slug: request.target.repo.as_slug(),
            remote,
        }
    }

    /// Open (not closed, not done) work on the project board. Caller-scoped
    /// visibility filtering is the command surface's responsibility.
    pub async fn list_open_work(
        &self,
        target: &ProjectLocator,
    ) -> Result<Vec<WorkItem>, SurfaceError> {
        let index = ExistingWorkIndex::build(
            self.surface.as_ref(),
            target,
            self.config.max_index_pages,
        )
        .await?;
        Ok(index.open_items())
    }

    /// Open work assigned to the given GitHub login, across repositories.
    pub async fn list_work_for_user(&self, login: &str) -> Result<Vec<WorkItem>, SurfaceError> {
        let mut out = Vec::new();
        let mut after: Option<String> = None;
        let mut pages = 0_usize;
        loop {
            let page = self.surface.user_issues_page(login, after.take()).await?;
            pages = pages.saturating_add(1);
            out.extend(
                page.issues
                    .iter()
                    .filter(|issue| issue.assignees.iter().any(|assignee| assignee == login))
                    .map(WorkItem::from_remote_issue),
            );
            if !page.has_next_page {
                break;
            }
            if pages >= self.config.max_index_pages.max(1) {
                warn!(pages, "user issue paging stopped at page cap");
                break;
            }
            after = page.end_cursor;
        }
        Ok(out)
    }
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.map(|rx| *rx.borrow()).unwrap_or(false)
}

fn failed(reason: FailureReason) -> ReconcileOutcome {
    ReconcileOutcome::Failed {
        reason,
        items: Vec::new(),
    }
}

fn index_failure(error: SurfaceError) -> FailureReason {
    match error {
        SurfaceError::Quota {
            remaining,
            reset_at,
        } => FailureReason::QuotaExceeded {
            remaining,
            reset_at,
        },
        other => FailureReason::IndexUnavailable {
            detail: other.to_string(),
        },
    }
}

fn bounded_context(repo_context: Option<&str>, max_chars: usize) -> String {
    let raw = repo_context.unwrap_or_default();
    if raw.chars().count() <= max_chars {
        return raw.to_string();
    }
    warn!(max_chars, "truncating repository context for the oracle");
    raw.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::bounded_context;

    #[test]
    fn unit_bounded_context_truncates_long_summaries() {
        assert_eq!(bounded_context(Some("abc"), 10), "abc");
        assert_eq!(bounded_context(Some("abcdef"), 3), "abc");
        assert_eq!(bounded_context(None, 3), "");
    }
}
