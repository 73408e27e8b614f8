//! Error types for sprig-core

use thiserror::Error;

/// Result type alias using sprig-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sprig-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Profile lookup by username yielded no row (or failed during initial load)
    #[error("Profile not found: {0}")]
    NotFound(String),

    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Store API rejected a request
    #[error("Store API error: {0}")]
    Api(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input, handled locally and never sent to the store
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A reorder's sequential position writes failed partway through.
    ///
    /// The store is left in a structurally valid but partially-reordered
    /// state; the caller owns deciding whether to re-derive and retry.
    #[error("Reorder applied {applied} of {total} position updates before failing")]
    PartialReorder {
        /// Position writes committed before the failure
        applied: usize,
        /// Position writes the reorder intended to issue
        total: usize,
        /// The underlying store error
        #[source]
        source: Box<Error>,
    },
}
