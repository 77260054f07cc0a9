//! Error handling for the irclog processor

use thiserror::Error;

/// Failures of one attachment attempt. All of them are fatal to the attempt;
/// recovery is a fresh attachment from scratch.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed: connector closed the stream")]
    AuthenticationFailed,

    #[error("connector stream ended during the handshake")]
    StreamEnded,

    #[error(transparent)]
    Wire(#[from] irclog_core::WireError),

    #[error("event store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("archived-event replay task failed: {0}")]
    ReplayPanicked(String),
}

/// Result type for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;
