//! Error types for the table write and read paths.

use bloom::FilterError;
use config::ConfigError;
use memtable::DecoratedKey;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SSTableError {
    /// Disk or directory failure. Fatal to the write in progress.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The caller broke the ascending-key contract of `append`.
    #[error("partition {current:?} appended after {previous:?}: keys must be strictly ascending")]
    OutOfOrder {
        previous: DecoratedKey,
        current: DecoratedKey,
    },

    #[error("partition key of {0} bytes exceeds the maximum of {max}", max = u16::MAX)]
    KeyTooLarge(usize),

    /// The writer already failed or was aborted; nothing more can be written.
    #[error("writer for {0} was aborted")]
    Aborted(String),

    #[error("refusing to write an empty table")]
    Empty,

    #[error("table {0} is not committed (no TOC)")]
    NotCommitted(String),

    #[error("unsupported format version {0:?}")]
    UnsupportedVersion(String),

    #[error("CRC mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("corrupt {component}: {reason}")]
    Corrupt {
        component: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, SSTableError>;

pub(crate) fn corrupt(component: &'static str, reason: impl Into<String>) -> SSTableError {
    SSTableError::Corrupt {
        component,
        reason: reason.into(),
    }
}
