//! Durable event logger
//!
//! A dedicated OS thread owns the SQLite connection and drains an in-memory
//! queue of events in batches. The contract: an event accepted by
//! [`LoggerHandle::post_event`] is never dropped (it survives flushes,
//! steady-state batching, and shutdown), but it is only durable once a
//! transaction containing it commits. Batching amortizes disk commits while
//! two tunable delays bound the latency:
//!
//! - *gather delay* (default 2s): after waking on a non-empty queue, wait
//!   briefly so a burst of rapid request/response events lands in one
//!   transaction;
//! - *commit delay* (default 10s): after a commit, pause before the next one
//!   so steady low-rate traffic does not cause a trickle of tiny
//!   transactions.
//!
//! [`LoggerHandle::flush`] is the strong path: it blocks its caller until
//! everything queued at call time is committed, and the worker performs that
//! transaction while holding the queue lock so no producer can slip an event
//! in under the flush. The dispatcher uses it exactly once per processor
//! attachment to pin a consistent catch-up cutoff.

use std::collections::VecDeque;
use std::path::Path;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tracing::{debug, error, warn};

use irclog_core::Event;

use crate::error::Result;

const CREATE_EVENTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS events(\
     connectionId INTEGER, \
     sequence INTEGER, \
     timestamp INTEGER NOT NULL, \
     type INTEGER NOT NULL, \
     data BLOB NOT NULL, \
     PRIMARY KEY(connectionId, sequence))";

// ----------------------------------------------------------------------------
// Shared state between producers and the worker thread
// ----------------------------------------------------------------------------

struct LoggerState {
    queue: VecDeque<Event>,
    flush_requested: bool,
    terminate_requested: bool,
    /// Set when the worker has exited, normally or on store failure.
    halted: bool,
}

struct LoggerShared {
    state: Mutex<LoggerState>,
    /// Woken on: queue becomes non-empty, flush edge, terminate edge.
    cond_all: Condvar,
    /// Woken on: flush edge, terminate edge. Cuts the timed batching waits short.
    cond_urgent: Condvar,
    /// Woken when the flush transaction has committed.
    cond_flushed: Condvar,
    gather_delay: Duration,
    commit_delay: Duration,
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Cloneable handle to the durable logger worker.
#[derive(Clone)]
pub struct LoggerHandle {
    shared: Arc<LoggerShared>,
    worker: Arc<Mutex<Option<thread::JoinHandle<()>>>>,
}

/// Opens the store and runs the single-writer worker thread.
pub struct DurableLogger;

impl DurableLogger {
    /// Open or create the event store at `path`.
    ///
    /// Performs the one-time startup scan for the smallest unused connection
    /// id (`max(connectionId) + 1`, or 0 for an empty store) on the calling
    /// thread, then hands the connection to the worker. Returns the handle
    /// and that next connection id.
    pub fn open(
        path: &Path,
        gather_delay: Duration,
        commit_delay: Duration,
    ) -> Result<(LoggerHandle, u64)> {
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_EVENTS_TABLE)?;

        let max_id: Option<i64> =
            conn.query_row("SELECT max(connectionId) FROM events", [], |row| row.get(0))?;
        let next_connection_id = max_id.map(|id| id as u64 + 1).unwrap_or(0);

        let shared = Arc::new(LoggerShared {
            state: Mutex::new(LoggerState {
                queue: VecDeque::new(),
                flush_requested: false,
                terminate_requested: false,
                halted: false,
            }),
            cond_all: Condvar::new(),
            cond_urgent: Condvar::new(),
            cond_flushed: Condvar::new(),
            gather_delay,
            commit_delay,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("durable-logger".to_string())
            .spawn(move || run_worker(conn, worker_shared))
            .map_err(irclog_core::CoreError::Io)?;

        Ok((
            LoggerHandle {
                shared,
                worker: Arc::new(Mutex::new(Some(worker))),
            },
            next_connection_id,
        ))
    }
}

impl LoggerHandle {
    /// Enqueue an event for durable commit. Non-blocking, never fails
    /// observably; once accepted the event leaves the queue only after a
    /// committed transaction.
    pub fn post_event(&self, event: Event) {
        let mut state = self.shared.state.lock();
        if state.halted {
            warn!(
                connection_id = event.connection_id,
                sequence = event.sequence,
                "event store worker is down, dropping event"
            );
            return;
        }
        state.queue.push_back(event);
        self.shared.cond_all.notify_one();
    }

    /// Block until every event queued at the time of this call is committed.
    ///
    /// Calling while another flush is outstanding is a contract violation
    /// and panics. Events enqueued after this call returns are not covered.
    pub fn flush_blocking(&self) {
        let mut state = self.shared.state.lock();
        assert!(
            !state.flush_requested,
            "flush requested while another flush is outstanding"
        );
        if state.halted {
            warn!("event store worker is down, flush is a no-op");
            return;
        }
        if state.queue.is_empty() {
            return;
        }
        state.flush_requested = true;
        self.shared.cond_all.notify_one();
        self.shared.cond_urgent.notify_one();
        while state.flush_requested && !state.halted {
            self.shared.cond_flushed.wait(&mut state);
        }
    }

    /// Async wrapper for [`flush_blocking`](Self::flush_blocking).
    pub async fn flush(&self) {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.flush_blocking())
            .await
            .expect("logger flush task panicked");
    }

    /// Ask the worker to drain all queued events and stop. Asynchronous;
    /// pair with [`join`](Self::join) to wait for the drain to finish.
    pub fn request_termination(&self) {
        let mut state = self.shared.state.lock();
        state.terminate_requested = true;
        self.shared.cond_all.notify_one();
        self.shared.cond_urgent.notify_one();
    }

    /// Wait for the worker thread to exit. Idempotent.
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("durable logger worker panicked");
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

fn run_worker(mut conn: Connection, shared: Arc<LoggerShared>) {
    let result = process_events(&mut conn, &shared);
    if let Err(err) = result {
        // A store outage is fatal to persistence; no retry.
        error!("event store failure, durable logging halted: {err}");
    }
    let mut state = shared.state.lock();
    state.halted = true;
    // A flush caller may be parked; let it observe the halt.
    shared.cond_flushed.notify_all();
}

fn process_events(conn: &mut Connection, shared: &LoggerShared) -> rusqlite::Result<()> {
    let mut guard = shared.state.lock();
    loop {
        // Wait for something to do.
        while guard.queue.is_empty() && !guard.flush_requested && !guard.terminate_requested {
            shared.cond_all.wait(&mut guard);
        }

        if guard.queue.is_empty() {
            if guard.flush_requested {
                // flush() returns immediately on an empty queue, so the flag
                // can never be observed here.
                unreachable!("flush requested with an empty queue");
            }
            if guard.terminate_requested {
                return Ok(());
            }
            continue;
        }

        if guard.flush_requested {
            // Strong path: commit while holding the lock so nothing can be
            // enqueued between the drain and the caller's wakeup.
            let batch: Vec<Event> = guard.queue.drain(..).collect();
            commit_batch(conn, &batch)?;
            guard.flush_requested = false;
            shared.cond_flushed.notify_all();
        } else {
            // Let a short burst of request/response events accumulate. The
            // urgent edge may have fired before this wait could start, so
            // re-check the flags first.
            if !guard.flush_requested && !guard.terminate_requested {
                shared.cond_urgent.wait_for(&mut guard, shared.gather_delay);
            }

            let batch: Vec<Event> = guard.queue.drain(..).collect();
            debug!(events = batch.len(), "committing event batch");

            // Producers may keep enqueueing during the transaction.
            MutexGuard::unlocked(&mut guard, || commit_batch(conn, &batch))?;

            // Queue and flags may have changed while unlocked. A flush that
            // arrived during the gather wait is already satisfied: every
            // event it covered was part of the batch just committed.
            if guard.flush_requested && guard.queue.is_empty() {
                guard.flush_requested = false;
                shared.cond_flushed.notify_all();
            }
            if !guard.flush_requested && !guard.terminate_requested {
                shared.cond_urgent.wait_for(&mut guard, shared.commit_delay);
            }
        }
        // Loop again even if termination is pending: the queue must be
        // observed empty before the worker may stop.
    }
}

fn commit_batch(conn: &mut Connection, events: &[Event]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare_cached("INSERT INTO events VALUES(?1,?2,?3,?4,?5)")?;
        for event in events {
            insert.execute(params![
                event.connection_id as i64,
                event.sequence as i64,
                event.timestamp,
                event.kind.ordinal() as i64,
                event.payload.as_bytes(),
            ])?;
        }
    }
    tx.commit()
}
