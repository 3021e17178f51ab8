//! Error types for breaker operations

/// Errors from breaker state reads/writes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] kvstore::Error),

    #[error("corrupt provider state for {name}: {detail}")]
    CorruptState { name: String, detail: String },
}

/// Result alias for breaker operations.
pub type Result<T> = std::result::Result<T, Error>;
