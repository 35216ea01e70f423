//! Error types for filingscope.
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error
//! side is the [`RagError`] enum. A handful of variants form the retrieval
//! taxonomy that callers are expected to match on:
//!
//! - [`RagError::ModelUnavailable`]: an embedding backend required by the
//!   index profile is missing. Never silently replaced by another model.
//! - [`RagError::BelowTrainingThreshold`]: the index has not seen enough
//!   vectors to train its codebooks. Build-time only.
//! - [`RagError::CorruptIndex`]: the persisted artifact pair failed an
//!   integrity check and must be rebuilt.
//! - [`RagError::IndexUnavailable`]: no artifact is loaded; searches fail
//!   before doing any I/O.
//!
//! Returning fewer filtered hits than requested is *not* an error; see
//! [`crate::retrieval::FilterOutcome`].
//!
//! # Examples
//!
//! ```
//! use filingscope::error::{RagError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(RagError::invalid_argument("k must be positive"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

use crate::embedding::EmbeddingStrategy;

/// The main error type for filingscope operations.
#[derive(Error, Debug)]
pub enum RagError {
    /// I/O errors (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The embedding backend for a strategy is not configured or failed to load.
    #[error("Embedding model unavailable for {strategy} strategy: {reason}")]
    ModelUnavailable {
        strategy: EmbeddingStrategy,
        reason: String,
    },

    /// The index has buffered fewer vectors than its training threshold.
    #[error("Index is below its training threshold ({buffered}/{threshold} vectors buffered)")]
    BelowTrainingThreshold { buffered: usize, threshold: usize },

    /// The persisted artifact pair is inconsistent or damaged.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// No index artifact is loaded.
    #[error("Index unavailable: no artifact is loaded")]
    IndexUnavailable,

    /// Index-related errors that are not part of the taxonomy above.
    #[error("Index error: {0}")]
    Index(String),

    /// Embedding errors (backend failures, dimension mismatches).
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The language model failed or returned an unusable decision.
    #[error("Language model error: {0}")]
    LanguageModel(String),

    /// A bounded collaborator call exceeded its timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A lookup (ticker, internal id, ...) found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary serialization errors
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with RagError.
pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        RagError::Index(msg.into())
    }

    /// Create a new corrupt-index error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        RagError::CorruptIndex(msg.into())
    }

    /// Create a new embedding error.
    pub fn embedding<S: Into<String>>(msg: S) -> Self {
        RagError::Embedding(msg.into())
    }

    /// Create a new model-unavailable error.
    pub fn model_unavailable<S: Into<String>>(strategy: EmbeddingStrategy, reason: S) -> Self {
        RagError::ModelUnavailable {
            strategy,
            reason: reason.into(),
        }
    }

    /// Create a new language model error.
    pub fn language_model<S: Into<String>>(msg: S) -> Self {
        RagError::LanguageModel(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        RagError::Timeout(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        RagError::NotFound(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        RagError::InvalidOperation(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        RagError::Other(format!("Invalid configuration: {}", msg.into()))
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        RagError::Other(format!("Invalid argument: {}", msg.into()))
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        RagError::Other(msg.into())
    }

    /// Whether a missing file (rather than a damaged one) caused this error.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, RagError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = RagError::index("Test index error");
        assert_eq!(error.to_string(), "Index error: Test index error");

        let error = RagError::corrupt("id range mismatch");
        assert_eq!(error.to_string(), "Corrupt index: id range mismatch");

        let error = RagError::BelowTrainingThreshold {
            buffered: 39_999,
            threshold: 40_000,
        };
        assert!(error.to_string().contains("39999/40000"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let rag_error = RagError::from(io_error);

        match &rag_error {
            RagError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
        assert!(rag_error.is_missing_file());
    }

    #[test]
    fn test_model_unavailable_names_strategy() {
        let error = RagError::model_unavailable(EmbeddingStrategy::Biomedical, "not configured");
        assert_eq!(
            error.to_string(),
            "Embedding model unavailable for biomedical strategy: not configured"
        );
    }
}
