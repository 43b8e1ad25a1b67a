//! Store-level error types.

use thiserror::Error;

/// Failure inside one of the two stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted row that no longer parses back into domain types.
    #[error("malformed stored record: {0}")]
    Malformed(String),
}
