//! Error handling for the irclog connector

use thiserror::Error;

/// Connector-specific error types
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("core error: {0}")]
    Core(#[from] irclog_core::CoreError),

    #[error("event store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),
}

/// Result type for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;
