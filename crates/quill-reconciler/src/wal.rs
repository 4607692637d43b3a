//! Write-ahead log of attempted remote mutations.
//!
//! Every mutation attempt is appended and flushed *before* the remote call
//! is issued, so a crash between "attempt logged" and "remote confirmed" is
//! distinguishable on restart from "never attempted". Records are JSONL and
//! keyed by idempotency marker.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use quill_oracle::ProposedItem;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Ordered steps of one item's commit sequence.
pub enum CommitStep {
    CreateIssue,
    AddToProject,
    SetStatus,
    AddAssignee,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalRecord {
    /// The decomposed plan for one task signature, logged before the first
    /// commit so a retry can resume without re-invoking the oracle.
    Plan {
        signature_hash: String,
        items: Vec<ProposedItem>,
        at_unix_ms: u64,
    },
    Attempt {
        marker: String,
        signature_hash: String,
        item_index: usize,
        step: CommitStep,
        at_unix_ms: u64,
    },
    Confirmed {
        marker: String,
        step: CommitStep,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issue_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issue_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issue_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_item_id: Option<String>,
        at_unix_ms: u64,
    },
}

#[derive(Debug, Clone, Default)]
/// Replayed progress for one marker.
pub struct MarkerProgress {
    pub attempted: BTreeSet<CommitStep>,
    pub confirmed: BTreeSet<CommitStep>,
    pub issue_id: Option<String>,
    pub issue_number: Option<u64>,
    pub issue_url: Option<String>,
    pub project_item_id: Option<String>,
}

#[derive(Debug, Default)]
/// In-memory replay of the log, rebuilt at the start of each run.
pub struct WalSnapshot {
    plans: BTreeMap<String, Vec<ProposedItem>>,
    progress: BTreeMap<String, MarkerProgress>,
}

impl WalSnapshot {
    pub fn plan(&self, signature_hash: &str) -> Option<&[ProposedItem]> {
        self.plans.get(signature_hash).map(Vec::as_slice)
    }

    pub fn progress(&self, marker: &str) -> Option<&MarkerProgress> {
        self.progress.get(marker)
    }

    /// True when every item of the plan has its final mandatory step
    /// confirmed. The assignee step is optional and does not gate this.
    pub fn is_plan_fully_committed(&self, signature_hash: &str) -> bool {
        let Some(items) = self.plans.get(signature_hash) else {
            return false;
        };
        (0..items.len()).all(|index| {
            let marker = crate::marker::item_marker(signature_hash, index);
            self.progress
                .get(&marker)
                .is_some_and(|progress| progress.confirmed.contains(&CommitStep::SetStatus))
        })
    }

    fn apply(&mut self, record: WalRecord) {
        match record {
            WalRecord::Plan {
                signature_hash,
                items,
                ..
            } => {
                self.plans.insert(signature_hash, items);
            }
            WalRecord::Attempt { marker, step, .. } => {
                self.progress.entry(marker).or_default().attempted.insert(step);
            }
            WalRecord::Confirmed {
                marker,
                step,
                issue_id,
                issue_number,
                issue_url,
                project_item_id,
                ..
            } => {
                let entry = self.progress.entry(marker).or_default();
                entry.confirmed.insert(step);
                if issue_id.is_some() {
                    entry.issue_id = issue_id;
                }
                if issue_number.is_some() {
                    entry.issue_number = issue_number;
                }
                if issue_url.is_some() {
                    entry.issue_url = issue_url;
                }
                if project_item_id.is_some() {
                    entry.project_item_id = project_item_id;
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct MutationLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl MutationLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends and flushes one record. Callers must append an `Attempt`
    /// before issuing the corresponding remote call.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to encode wal record")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("mutation log mutex is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }

    /// Re-reads the log from disk. Unparseable lines are skipped with a
    /// warning so one corrupt record cannot block recovery.
    pub fn load(&self) -> Result<WalSnapshot> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut snapshot = WalSnapshot::default();
        for (line_number, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(line) {
                Ok(record) => snapshot.apply(record),
                Err(error) => {
                    warn!(line = line_number + 1, %error, "skipping corrupt wal record");
                }
            }
        }
        Ok(snapshot)
    }
}

pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
