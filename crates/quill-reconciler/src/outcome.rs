//! Run outcomes reported to the caller.
//!
//! Partial success is the common case, so a run never reports a bare
//! success/failure flag: the caller is always told exactly which items were
//! committed, matched, or abandoned.

use serde::{Deserialize, Serialize};

use crate::wal::CommitStep;
use crate::work_item::{RemoteIdentity, WorkItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    IndexUnavailable { detail: String },
    QuotaExceeded {
        remaining: Option<u64>,
        reset_at: Option<String>,
    },
    OracleUnavailable { detail: String },
    /// Nothing to create: the oracle produced no structurally valid items
    /// (malformed output maps here as well).
    EmptyDecomposition,
    PartialCommitFailure,
    Cancelled,
    Internal { detail: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::IndexUnavailable { detail } => {
                write!(f, "existing-work index unavailable: {detail}")
            }
            FailureReason::QuotaExceeded { remaining, .. } => {
                write!(f, "remote quota exceeded (remaining {remaining:?})")
            }
            FailureReason::OracleUnavailable { detail } => {
                write!(f, "decomposition oracle unavailable: {detail}")
            }
            FailureReason::EmptyDecomposition => write!(f, "decomposition produced nothing to create"),
            FailureReason::PartialCommitFailure => write!(f, "one or more items failed to commit"),
            FailureReason::Cancelled => write!(f, "run cancelled"),
            FailureReason::Internal { detail } => write!(f, "internal error: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemOutcome {
    Committed { identity: RemoteIdentity },
    /// The item stopped partway through its three-step sequence; the
    /// recorded stage is the step that failed. Anything already created
    /// stays in place, since rollback would risk deleting legitimate issues.
    PartialFailure {
        stage: CommitStep,
        error: String,
        identity: Option<RemoteIdentity>,
    },
    /// Never attempted, e.g. scheduled after a cancellation.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub index: usize,
    pub title: String,
    pub marker: String,
    pub outcome: ItemOutcome,
}

impl ItemReport {
    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Committed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Equivalent work already exists; nothing was created. Carries the
    /// matched item so the caller can inspect or confirm.
    Matched { item: WorkItem },
    Committed { items: Vec<ItemReport> },
    Failed {
        reason: FailureReason,
        items: Vec<ItemReport>,
    },
}
