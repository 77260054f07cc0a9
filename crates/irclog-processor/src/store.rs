//! Archived event replay
//!
//! The processor reads history straight out of the connector's SQLite store,
//! opened read-only. The cutoff map captured during attachment bounds the
//! read: for each connection, every event with `sequence < cutoff`, in
//! ascending sequence order. Events at or past the cutoff arrive on the live
//! stream instead, so the two sources meet with no gap and no duplicate.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};

use irclog_core::{CleanLine, Event, EventKind};

use crate::error::Result;

const REPLAY_QUERY: &str = "SELECT sequence, timestamp, type, data FROM events \
     WHERE connectionId=?1 AND sequence<?2 ORDER BY sequence ASC";

/// Feed every archived event below each connection's cutoff to `consume`.
///
/// Connections are visited in ascending id order; within a connection,
/// events arrive in ascending sequence order. Blocking; run it off the async
/// runtime.
pub fn replay_archived<F>(
    database: &Path,
    cutoffs: &HashMap<u64, u64>,
    mut consume: F,
) -> Result<usize>
where
    F: FnMut(Event),
{
    let conn = Connection::open_with_flags(
        database,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut query = conn.prepare(REPLAY_QUERY)?;

    let mut ids: Vec<u64> = cutoffs.keys().copied().collect();
    ids.sort_unstable();

    let mut replayed = 0;
    for id in ids {
        let cutoff = cutoffs[&id];
        let rows = query.query_map(params![id as i64, cutoff as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;
        for row in rows {
            let (sequence, timestamp, ordinal, data) = row?;
            consume(Event {
                connection_id: id,
                sequence: sequence as u64,
                timestamp,
                kind: EventKind::from_ordinal(ordinal as u8)?,
                payload: CleanLine::new(data),
            });
            replayed += 1;
        }
    }
    Ok(replayed)
}
