//! Error types shared across the irclog workspace

use thiserror::Error;

/// Protocol violations in the connector↔processor stream.
///
/// These are fatal to the responsible consumer attempt, never to the whole
/// process.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed event line: {0:?}")]
    MalformedEventLine(String),

    #[error("malformed connection-table line: {0:?}")]
    MalformedTableLine(String),

    #[error("unknown event type ordinal: {0}")]
    UnknownOrdinal(u8),

    #[error("unexpected sentinel: expected {expected:?}, got {actual:?}")]
    UnexpectedSentinel {
        expected: &'static str,
        actual: String,
    },
}

/// Errors produced by the core crate itself.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
