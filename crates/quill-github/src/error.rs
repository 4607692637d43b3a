use thiserror::Error;

#[derive(Debug, Error)]
/// Failure modes of the GitHub GraphQL surface.
pub enum GithubError {
    #[error("missing GitHub token")]
    MissingToken,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("github returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("graphql errors: {}", messages.join("; "))]
    GraphQl { messages: Vec<String> },
    #[error("rate limit exhausted (remaining {remaining:?}, resets at {reset_at:?})")]
    QuotaExceeded {
        remaining: Option<u64>,
        reset_at: Option<String>,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GithubError {
    /// True when the failure is a transient fetch error already retried by
    /// the transport; callers treat it as retryable across runs, not within.
    pub fn is_transient(&self) -> bool {
        match self {
            GithubError::Http(_) => true,
            GithubError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, GithubError::QuotaExceeded { .. })
    }
}
