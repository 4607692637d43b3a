//! Per-run snapshot of existing project work.
//!
//! Rebuilt from a fresh page-through on every reconciliation run; never
//! cached across runs, since staleness risks duplicate issue creation.

use quill_github::models::ProjectLocator;
use tracing::{debug, warn};

use crate::marker::{extract_markers, marker_signature_hash};
use crate::signature::TaskSignature;
use crate::surface::{SurfaceError, WorkSurface};
use crate::work_item::{WorkItem, WorkStatus};

#[derive(Debug, Clone)]
pub struct IndexedItem {
    pub item: WorkItem,
    pub signature: TaskSignature,
    pub markers: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ExistingWorkIndex {
    items: Vec<IndexedItem>,
}

impl ExistingWorkIndex {
    /// Pages the project to exhaustion, bounded by `max_pages`.
    pub async fn build(
        surface: &dyn WorkSurface,
        target: &ProjectLocator,
        max_pages: usize,
    ) -> Result<Self, SurfaceError> {
        let mut items = Vec::new();
        let mut after: Option<String> = None;
        let mut pages = 0_usize;
        loop {
            let page = surface.project_items_page(target, after.take()).await?;
            pages = pages.saturating_add(1);
            for node in &page.items {
                let Some(item) = WorkItem::from_project_item(node) else {
                    continue;
                };
                let signature = TaskSignature::from_title_and_body(&item.title, &item.body);
                let markers = extract_markers(&item.body);
                items.push(IndexedItem {
                    item,
                    signature,
                    markers,
                });
            }
            if !page.has_next_page {
                break;
            }
            if pages >= max_pages.max(1) {
                warn!(pages, "project paging stopped at page cap");
                break;
            }
            after = page.end_cursor;
        }
        debug!(items = items.len(), pages, "existing-work index built");
        Ok(Self { items })
    }

    pub fn from_items(items: Vec<IndexedItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Best non-closed match at or above the threshold. Conservative by
    /// construction: the threshold is tuned high because skipping needed
    /// work costs more than a missed duplicate.
    pub fn best_match(
        &self,
        signature: &TaskSignature,
        threshold: f64,
    ) -> Option<(&IndexedItem, f64)> {
        let mut best: Option<(&IndexedItem, f64)> = None;
        for indexed in &self.items {
            if !indexed.item.status.is_match_candidate() {
                continue;
            }
            let score = signature.jaccard(&indexed.signature);
            if score < threshold {
                continue;
            }
            if best.map(|(_, existing)| score > existing).unwrap_or(true) {
                best = Some((indexed, score));
            }
        }
        best
    }

    /// Items whose body carries a marker minted from the given signature.
    pub fn items_for_signature_hash(&self, signature_hash: &str) -> Vec<&IndexedItem> {
        self.items
            .iter()
            .filter(|indexed| {
                indexed
                    .markers
                    .iter()
                    .any(|marker| marker_signature_hash(marker) == Some(signature_hash))
            })
            .collect()
    }

    pub fn open_items(&self) -> Vec<WorkItem> {
        self.items
            .iter()
            .filter(|indexed| indexed.item.status == WorkStatus::Open)
            .map(|indexed| indexed.item.clone())
            .collect()
    }
}
