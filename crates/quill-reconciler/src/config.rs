#[derive(Debug, Clone)]
/// Tunables for one reconciler instance.
pub struct ReconcilerConfig {
    /// Jaccard threshold for "already implemented". Tuned high: a false
    /// positive skips needed work, which costs more than a missed duplicate.
    pub similarity_threshold: f64,
    /// Page cap when building the existing-work index.
    pub max_index_pages: usize,
    /// Hard cap on decomposition size; bounds downstream commit cost.
    pub max_items: usize,
    /// Bounded fan-out across items within one commit batch. Steps within
    /// an item are always sequential.
    pub commit_concurrency: usize,
    /// Upper bound on the repository summary passed to the oracle.
    pub repo_context_max_chars: usize,
    /// Project status option assigned to freshly committed items.
    pub initial_status: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            max_index_pages: 20,
            max_items: 10,
            commit_concurrency: 2,
            repo_context_max_chars: 8_000,
            initial_status: "Todo".to_string(),
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err("similarity threshold must be in (0, 1]".to_string());
        }
        if self.max_index_pages == 0 {
            return Err("max index pages must be greater than 0".to_string());
        }
        if self.max_items == 0 {
            return Err("max items must be greater than 0".to_string());
        }
        if self.commit_concurrency == 0 {
            return Err("commit concurrency must be greater than 0".to_string());
        }
        Ok(())
    }
}
