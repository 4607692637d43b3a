use tracing::warn;

use crate::types::ProposedItem;

/// Drops structurally invalid items and truncates to `max_items`.
///
/// Dropping is logged, never fatal; truncation bounds downstream commit
/// cost, so it warns instead of failing.
pub fn sanitize_items(items: Vec<ProposedItem>, max_items: usize) -> Vec<ProposedItem> {
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        if item.is_structurally_valid() {
            kept.push(item);
        } else {
            warn!(title = %item.title, "dropping proposed item missing title or body");
        }
    }
    let cap = max_items.max(1);
    if kept.len() > cap {
        warn!(
            proposed = kept.len(),
            cap, "truncating decomposition to item cap"
        );
        kept.truncate(cap);
    }
    kept
}
