//! Normalized task signatures and token-set similarity.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

const CONVENTIONAL_TYPES: &[&str] = &[
    "feat", "fix", "docs", "style", "refactor", "perf", "test", "chore", "ci", "build",
];

/// Strips a leading conventional-commit prefix (`type(scope)!:`), so
/// `feat(api): add limiter` and `add limiter` compare equal.
pub fn strip_conventional_prefix(title: &str) -> &str {
    let trimmed = title.trim();
    let Some((head, rest)) = trimmed.split_once(':') else {
        return trimmed;
    };
    let head = head.trim_end_matches('!');
    let type_part = match head.split_once('(') {
        Some((type_part, scope)) if scope.ends_with(')') => type_part,
        Some(_) => return trimmed,
        None => head,
    };
    if CONVENTIONAL_TYPES.contains(&type_part.to_ascii_lowercase().as_str()) {
        rest.trim_start()
    } else {
        trimmed
    }
}

/// Lower-cases, replaces punctuation with spaces, and collapses whitespace.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for ch in text.chars() {
        let mapped = if ch.is_alphanumeric() {
            Some(ch.to_ascii_lowercase())
        } else if ch.is_whitespace() || ch.is_ascii_punctuation() {
            None
        } else {
            Some(ch)
        };
        match mapped {
            Some(ch) => {
                out.push(ch);
                last_was_space = false;
            }
            None => {
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            }
        }
    }
    out.trim_end().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Token-set signature of a task description or an existing item's text.
pub struct TaskSignature {
    tokens: BTreeSet<String>,
}

impl TaskSignature {
    pub fn from_text(text: &str) -> Self {
        let stripped = strip_conventional_prefix(text);
        let tokens = normalize_text(stripped)
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();
        Self { tokens }
    }

    /// Signature for an existing item: title (prefix-stripped) plus body.
    pub fn from_title_and_body(title: &str, body: &str) -> Self {
        let mut combined = strip_conventional_prefix(title).to_string();
        combined.push(' ');
        combined.push_str(body);
        let tokens = normalize_text(&combined)
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Jaccard similarity of the two token sets; 0.0 when either is empty.
    pub fn jaccard(&self, other: &TaskSignature) -> f64 {
        if self.tokens.is_empty() || other.tokens.is_empty() {
            return 0.0;
        }
        let intersection = self.tokens.intersection(&other.tokens).count();
        let union = self.tokens.union(&other.tokens).count();
        intersection as f64 / union as f64
    }

    /// Stable short hash used to derive idempotency markers.
    pub fn hash(&self) -> String {
        let joined = self.tokens.iter().cloned().collect::<Vec<_>>().join(" ");
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        let digest = hasher.finalize();
        digest
            .iter()
            .take(8)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_text, strip_conventional_prefix, TaskSignature};

    #[test]
    fn unit_strip_conventional_prefix_handles_scope_and_bang() {
        assert_eq!(
            strip_conventional_prefix("feat(api): add limiter"),
            "add limiter"
        );
        assert_eq!(strip_conventional_prefix("fix!: crash"), "crash");
        assert_eq!(strip_conventional_prefix("chore: tidy"), "tidy");
        assert_eq!(
            strip_conventional_prefix("note: this is not a commit type"),
            "note: this is not a commit type"
        );
        assert_eq!(strip_conventional_prefix("add limiter"), "add limiter");
    }

    #[test]
    fn unit_normalize_lowercases_and_strips_punctuation() {
        assert_eq!(
            normalize_text("Add  Token-Bucket limiter!"),
            "add token bucket limiter"
        );
        assert_eq!(normalize_text("  "), "");
    }

    #[test]
    fn unit_jaccard_of_identical_signatures_is_one() {
        let a = TaskSignature::from_text("Add token-bucket limiter");
        let b = TaskSignature::from_text("feat(search): add token bucket limiter");
        assert!((a.jaccard(&b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unit_jaccard_of_disjoint_signatures_is_zero() {
        let a = TaskSignature::from_text("add limiter");
        let b = TaskSignature::from_text("refactor parser");
        assert_eq!(a.jaccard(&b), 0.0);
        let empty = TaskSignature::from_text("");
        assert_eq!(a.jaccard(&empty), 0.0);
    }

    #[test]
    fn unit_hash_is_stable_across_token_order() {
        let a = TaskSignature::from_text("limiter bucket token add");
        let b = TaskSignature::from_text("add token bucket limiter");
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 16);
    }
}
