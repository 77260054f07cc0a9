//! Event records
//!
//! An `Event` is the unit of durability and relay: every line received from
//! or sent to an IRC server, plus every connection lifecycle transition,
//! becomes one immutable event. `(connection_id, sequence)` is the primary
//! key in the store and the central ordering invariant: replaying a
//! connection's events in ascending sequence order reconstructs its exact
//! lifecycle, exactly once each.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::WireError;
use crate::line::CleanLine;

/// Event category. Ordinal values are part of the wire format and the store
/// schema; they must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Connection lifecycle: `connect …`, `opened <addr>`, `disconnect`, `closed`.
    Connection = 0,
    /// A line received from the IRC server.
    Receive = 1,
    /// A line sent to the IRC server.
    Send = 2,
}

impl EventKind {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Result<Self, WireError> {
        match ordinal {
            0 => Ok(EventKind::Connection),
            1 => Ok(EventKind::Receive),
            2 => Ok(EventKind::Send),
            other => Err(WireError::UnknownOrdinal(other)),
        }
    }
}

/// One durably-ordered record of connector activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Monotonically assigned, never reused within a store's lifetime.
    pub connection_id: u64,
    /// Per-connection index, starts at 0, strictly increasing, never reused.
    pub sequence: u64,
    /// Unix timestamp in milliseconds, captured at sequence assignment.
    pub timestamp: i64,
    pub kind: EventKind,
    pub payload: CleanLine,
}

impl Event {
    /// Create an event stamped with the current wall-clock time.
    pub fn new(connection_id: u64, sequence: u64, kind: EventKind, payload: CleanLine) -> Self {
        Event {
            connection_id,
            sequence,
            timestamp: now_millis(),
            kind,
            payload,
        }
    }
}

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
