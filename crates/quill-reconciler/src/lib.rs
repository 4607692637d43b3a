//! Task-synchronization reconciler.
//!
//! Keeps natural-language task requests consistent with GitHub Issues and
//! Projects state: deduplicates against existing work, decomposes new
//! requests into one-PR-sized items through an oracle, and commits them as
//! issues plus project items with idempotent, partial-failure-safe retry
//! backed by a write-ahead mutation log.

mod commit;
pub mod config;
pub mod index;
pub mod marker;
pub mod outcome;
pub mod reconciler;
pub mod signature;
pub mod surface;
pub mod wal;
pub mod work_item;

pub use config::ReconcilerConfig;
pub use index::ExistingWorkIndex;
pub use outcome::{FailureReason, ItemOutcome, ItemReport, ReconcileOutcome};
pub use reconciler::Reconciler;
pub use signature::TaskSignature;
pub use surface::{GithubWorkSurface, SurfaceError, WorkSurface};
pub use wal::{CommitStep, MutationLog};
pub use work_item::{RemoteIdentity, TaskRequest, WorkItem, WorkStatus};
