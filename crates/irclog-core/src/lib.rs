//! irclog core types
//!
//! Shared vocabulary between the connector and processor halves of irclog:
//! - `CleanLine`: a byte string guaranteed free of NUL/CR/LF
//! - `Event` and `EventKind`: the immutable durably-logged record
//! - the line-oriented wire codec spoken between connector and processor
//! - the IRC PING auto-responder
//! - writer tasks and clean-line reading for newline-framed sockets
//! - TOML configuration for both binaries
//!
//! The connector and processor crates build their runtime machinery on top
//! of these definitions.

pub mod config;
pub mod errors;
pub mod event;
pub mod io;
pub mod line;
pub mod ping;
pub mod wire;

pub use config::{ConnectorConfig, ProcessorConfig};
pub use errors::{CoreError, Result, WireError};
pub use event::{now_millis, Event, EventKind};
pub use io::{read_clean_line, spawn_writer, WriterHandle};
pub use line::CleanLine;
pub use ping::pong_for_ping;
