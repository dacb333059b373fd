use thiserror::Error;

/// Errors produced by the record store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to open or migrate the database file.
    #[error("failed to open record store at {path}: {source}")]
    Open {
        /// Configured database path.
        path: String,
        /// Underlying sqlx error.
        #[source]
        source: sqlx::Error,
    },

    /// An insert failed.
    #[error("failed to insert test record: {0}")]
    Insert(#[source] sqlx::Error),

    /// A query failed.
    #[error("failed to query test records: {0}")]
    Query(#[source] sqlx::Error),

    /// The raw series or feature payload could not be serialized to JSON.
    #[error("failed to serialize record payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Convenience alias for record store operations.
pub type StorageResult<T> = Result<T, StorageError>;
