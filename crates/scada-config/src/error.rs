//! Configuration-loading errors (spec §7: `ConfigError` — fatal at startup).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required directory missing: {0}")]
    MissingDirectory(PathBuf),

    #[error("required configuration file missing: {0}")]
    MissingFile(PathBuf),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("settings file {path} failed to parse: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: quick_xml::de::DeError,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format { path: path.into(), reason: reason.into() }
    }
}
