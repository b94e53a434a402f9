//! Error type for the snapshot/event codec and cache (spec §7: `IoError`, `FormatError`).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("invalid timestamp in {path}: {source}")]
    Timestamp {
        path: PathBuf,
        #[source]
        source: scada_common::timestamp::TimestampError,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format { path: path.into(), reason: reason.into() }
    }
}
