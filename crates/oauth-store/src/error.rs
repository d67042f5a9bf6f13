//! Error types for credential store operations
//!
//! "Not found" is never an error here: lookups return `Ok(None)`. Everything
//! in this enum is a storage fault the caller should surface as a server-side
//! failure.

/// Errors from credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("store serialization error: {0}")]
    Serialization(String),

    #[error("could not allocate a unique {0} id")]
    IdCollision(&'static str),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
