//! Decomposition oracle adapter.
//!
//! Maps a free-text task description plus a bounded repository summary into
//! a list of one-PR-sized proposed work items. The language model is a
//! black box behind [`DecompositionOracle`]; tests substitute stubs.

pub mod gemini;
pub mod types;
pub mod validate;

pub use gemini::{GeminiConfig, GeminiOracle};
pub use types::{DecompositionOracle, DecompositionResult, Effort, OracleError, ProposedItem};
pub use validate::sanitize_items;
