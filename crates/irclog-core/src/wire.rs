//! Connector→processor wire codec
//!
//! The stream a freshly attached processor reads is line-oriented:
//!
//! ```text
//! active-connections
//! <connId> <nextSeq>        (zero or more)
//! live-events
//! <connId> <seq> <timestamp> <ordinal> <payload>    (forever)
//! ```
//!
//! The connection table, captured under the dispatcher's serialization at
//! attach time, gives the processor its per-connection replay cutoffs; every
//! following line is one live event. Payloads may contain spaces, so event
//! lines split on at most four separators.

use crate::errors::WireError;
use crate::event::{Event, EventKind};
use crate::line::CleanLine;

/// Header sentinel that precedes the connection table.
pub const ACTIVE_CONNECTIONS: &str = "active-connections";
/// Sentinel that terminates the connection table and starts the live stream.
pub const LIVE_EVENTS: &str = "live-events";

/// Render an event as one wire line: `"<connId> <seq> <timestamp> <ordinal> <payload>"`.
pub fn format_event_line(event: &Event) -> CleanLine {
    let mut out = format!(
        "{} {} {} {} ",
        event.connection_id,
        event.sequence,
        event.timestamp,
        event.kind.ordinal()
    )
    .into_bytes();
    out.extend_from_slice(event.payload.as_bytes());
    // Header is ASCII digits and spaces, payload is already clean.
    CleanLine::from_clean(out)
}

/// Parse one live-event line. The payload keeps all of its own spaces.
pub fn parse_event_line(line: &str) -> Result<Event, WireError> {
    let malformed = || WireError::MalformedEventLine(line.to_string());
    let mut parts = line.splitn(5, ' ');
    let connection_id = parts.next().ok_or_else(malformed)?;
    let sequence = parts.next().ok_or_else(malformed)?;
    let timestamp = parts.next().ok_or_else(malformed)?;
    let ordinal = parts.next().ok_or_else(malformed)?;
    let payload = parts.next().ok_or_else(malformed)?;

    Ok(Event {
        connection_id: connection_id.parse().map_err(|_| malformed())?,
        sequence: sequence.parse().map_err(|_| malformed())?,
        timestamp: timestamp.parse().map_err(|_| malformed())?,
        kind: EventKind::from_ordinal(ordinal.parse().map_err(|_| malformed())?)?,
        payload: CleanLine::from(payload),
    })
}

/// Render one connection-table line: `"<connId> <nextSeq>"`.
pub fn format_table_line(connection_id: u64, next_sequence: u64) -> String {
    format!("{connection_id} {next_sequence}")
}

/// Parse one connection-table line into `(connection_id, next_sequence)`.
pub fn parse_table_line(line: &str) -> Result<(u64, u64), WireError> {
    let malformed = || WireError::MalformedTableLine(line.to_string());
    let mut parts = line.splitn(2, ' ');
    let connection_id = parts.next().ok_or_else(malformed)?;
    let next_sequence = parts.next().ok_or_else(malformed)?;
    Ok((
        connection_id.parse().map_err(|_| malformed())?,
        next_sequence.parse().map_err(|_| malformed())?,
    ))
}
