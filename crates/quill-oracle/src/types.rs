use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Rough size of a proposed item, carried through to the issue body.
pub enum Effort {
    #[serde(rename = "S")]
    Small,
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "L")]
    Large,
}

impl Effort {
    pub fn label(&self) -> &'static str {
        match self {
            Effort::Small => "S",
            Effort::Medium => "M",
            Effort::Large => "L",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One proposed unit of work, not yet committed anywhere.
pub struct ProposedItem {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<Effort>,
}

impl ProposedItem {
    /// Structural validity only: the reconciler does not judge whether an
    /// item is genuinely one-PR-sized.
    pub fn is_structurally_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.body.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Ordered set of proposed items produced from one task description.
pub struct DecompositionResult {
    pub items: Vec<ProposedItem>,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("missing oracle API key")]
    MissingApiKey,
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    #[error("oracle output malformed: {0}")]
    MalformedOutput(String),
}

#[async_trait]
/// Black-box contract for the decomposition capability.
pub trait DecompositionOracle: Send + Sync {
    async fn decompose(
        &self,
        description: &str,
        repo_context: &str,
        max_items: usize,
    ) -> Result<DecompositionResult, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::{Effort, ProposedItem};

    #[test]
    fn unit_structural_validity_requires_title_and_body() {
        let valid = ProposedItem {
            title: "Add limiter".to_string(),
            body: "details".to_string(),
            effort: Some(Effort::Small),
        };
        assert!(valid.is_structurally_valid());

        let blank_title = ProposedItem {
            title: "  ".to_string(),
            body: "details".to_string(),
            effort: None,
        };
        assert!(!blank_title.is_structurally_valid());

        let blank_body = ProposedItem {
            title: "Add limiter".to_string(),
            body: String::new(),
            effort: None,
        };
        assert!(!blank_body.is_structurally_valid());
    }
}
