//! Wire-protocol and startup error types (spec §7, §7.1).

use std::path::PathBuf;

use thiserror::Error;

/// A malformed frame from a client: drain, log, keep the connection (spec §7).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame truncated before expected length")]
    Truncated,

    #[error("unknown command byte 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("payload length {0} exceeds the configured maximum")]
    PayloadTooLarge(u32),

    #[error("invalid UTF-8 in frame payload")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("I/O error on client socket: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup-time failures; `main` is the only place these become a process exit.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] scada_config::ConfigError),

    #[error(transparent)]
    Formula(#[from] scada_formula::FormulaError),

    #[error(transparent)]
    Store(#[from] scada_store::StoreError),

    #[error("required directory missing: {0}")]
    MissingDirectory(PathBuf),

    #[error("failed to bind TCP listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ServerError>;
