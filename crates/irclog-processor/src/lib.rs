//! irclog processor
//!
//! The consumer half of the split-process IRC client. Attaches to the
//! connector, replays the archived event history from the shared SQLite
//! store up to the per-connection cutoffs captured at attach time, then
//! consumes the live stream, lossless and duplicate-free across the
//! boundary. Higher-level IRC state (windows, nicknames, channels) is built
//! on top of the [`EventSink`] seam by the embedding application.

pub mod catchup;
pub mod error;
pub mod store;

pub use catchup::{run_processor, ConnectorCommands, EventSink};
pub use error::{ProcessorError, Result};
pub use store::replay_archived;
