use std::io;
use thiserror::Error;

/// Errors raised while building or decoding a filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The requested sizing would produce an empty bit array or no hash functions.
    #[error("invalid filter parameters: {0}")]
    InvalidParameters(String),

    /// Serialized filter is malformed or exceeds the allocation cap.
    #[error("corrupt filter: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FilterError>;
