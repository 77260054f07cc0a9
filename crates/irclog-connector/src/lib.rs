//! irclog connector
//!
//! The always-on half of the split-process IRC client. Holds the live IRC
//! sockets, assigns per-connection sequence numbers, durably logs every
//! event to SQLite, and relays a live copy to the one attached processor.
//!
//! Layout:
//! - [`dispatcher`]: the single serialized owner of all connector state
//! - [`logger`]: the batching durable event logger
//! - [`socket`]: per-connection IRC socket workers
//! - [`listener`]: processor attachment and command handling
//! - [`pinger`]: periodic dead-socket probing

pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod logger;
pub mod pinger;
pub mod socket;

pub use dispatcher::{Dispatcher, DispatcherHandle, ProcessorToken};
pub use error::{ConnectorError, Result};
pub use logger::{DurableLogger, LoggerHandle};
