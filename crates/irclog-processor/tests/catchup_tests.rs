//! Catch-up protocol tests against a scripted connector
//!
//! A loopback listener plays the connector's side of the attach handshake
//! line by line, and a collecting sink records what the processor feeds it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection};
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;

use irclog_core::io::read_clean_line;
use irclog_core::{Event, EventKind, ProcessorConfig};
use irclog_processor::{run_processor, ConnectorCommands, EventSink, ProcessorError};

const TICK: Duration = Duration::from_secs(5);
const PASSWORD: &str = "swordfish";

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

#[derive(Default)]
struct SinkLog {
    events: Vec<(Event, bool)>,
    catchup_complete_at: Option<usize>,
}

#[derive(Clone, Default)]
struct CollectingSink {
    log: Arc<Mutex<SinkLog>>,
    commands_script: Option<fn(&ConnectorCommands)>,
}

impl EventSink for CollectingSink {
    fn attach_commands(&mut self, commands: ConnectorCommands) {
        if let Some(script) = self.commands_script {
            script(&commands);
        }
    }

    fn handle_event(&mut self, event: Event, realtime: bool) {
        self.log.lock().unwrap().events.push((event, realtime));
    }

    fn catchup_complete(&mut self) {
        let mut log = self.log.lock().unwrap();
        let at = log.events.len();
        log.catchup_complete_at = Some(at);
    }
}

fn seed_store(path: &Path, rows: &[(u64, u64, i64, i64, &[u8])]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events(\
         connectionId INTEGER, sequence INTEGER, timestamp INTEGER NOT NULL, \
         type INTEGER NOT NULL, data BLOB NOT NULL, \
         PRIMARY KEY(connectionId, sequence))",
    )
    .unwrap();
    for (id, seq, ts, kind, data) in rows {
        conn.execute(
            "INSERT INTO events VALUES(?1,?2,?3,?4,?5)",
            params![*id as i64, *seq as i64, ts, kind, data],
        )
        .unwrap();
    }
}

struct ScriptedConnector {
    _dir: TempDir,
    config: ProcessorConfig,
    listener: TcpListener,
}

async fn scripted_connector(rows: &[(u64, u64, i64, i64, &[u8])]) -> ScriptedConnector {
    let dir = TempDir::new().unwrap();
    let db: PathBuf = dir.path().join("events.sqlite");
    seed_store(&db, rows);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ProcessorConfig {
        connector_host: "127.0.0.1".to_string(),
        connector_port: listener.local_addr().unwrap().port(),
        password: PASSWORD.to_string(),
        database_file: db,
    };
    ScriptedConnector { _dir: dir, config, listener }
}

// ----------------------------------------------------------------------------
// The happy path: archived replay, boundary, live tail
// ----------------------------------------------------------------------------

#[tokio::test]
async fn archived_then_live_with_no_gap_and_no_duplicate() {
    let bed = scripted_connector(&[
        (0, 0, 100, 0, b"connect irc.example 6667 nossl net"),
        (0, 1, 101, 0, b"opened 10.0.0.1"),
        // Sequence 2 exists in the store as well; the cutoff below is 2, so
        // it must come from the live stream only, never twice.
        (0, 2, 102, 1, b":srv NOTICE :already archived but past cutoff"),
    ])
    .await;

    let sink = CollectingSink::default();
    let log = Arc::clone(&sink.log);
    let config = bed.config.clone();
    let processor = tokio::spawn(run_processor(config, sink));

    let (stream, _) = timeout(TICK, bed.listener.accept()).await.unwrap().unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let credential = timeout(TICK, read_clean_line(&mut reader))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(credential.as_bytes(), PASSWORD.as_bytes());

    write_half
        .write_all(b"active-connections\n0 2\nlive-events\n")
        .await
        .unwrap();
    write_half
        .write_all(b"0 2 102 1 :srv NOTICE :already archived but past cutoff\n")
        .await
        .unwrap();
    write_half
        .write_all(b"0 3 103 2 PRIVMSG #x :a live reply\n")
        .await
        .unwrap();
    drop(write_half);

    // Orderly stream end.
    timeout(TICK, processor).await.unwrap().unwrap().unwrap();

    let log = log.lock().unwrap();
    let sequences: Vec<(u64, bool)> = log
        .events
        .iter()
        .map(|(ev, realtime)| (ev.sequence, *realtime))
        .collect();
    assert_eq!(
        sequences,
        vec![(0, false), (1, false), (2, true), (3, true)],
        "replay below the cutoff, live from the cutoff on"
    );
    assert_eq!(log.catchup_complete_at, Some(2));

    // Spot-check decoded fields on both sides of the boundary.
    assert_eq!(log.events[1].0.kind, EventKind::Connection);
    assert_eq!(log.events[1].0.payload.to_string(), "opened 10.0.0.1");
    assert_eq!(log.events[3].0.kind, EventKind::Send);
    assert_eq!(log.events[3].0.payload.to_string(), "PRIVMSG #x :a live reply");
}

#[tokio::test]
async fn multiple_connections_replay_independently() {
    let bed = scripted_connector(&[
        (1, 0, 10, 0, b"connect a 1 nossl m"),
        (1, 1, 11, 1, b"hello on one"),
        (2, 0, 12, 0, b"connect b 2 ssl m"),
        (2, 1, 13, 1, b"hello on two"),
        (2, 2, 14, 2, b"reply on two"),
    ])
    .await;

    let sink = CollectingSink::default();
    let log = Arc::clone(&sink.log);
    let processor = tokio::spawn(run_processor(bed.config.clone(), sink));

    let (stream, _) = timeout(TICK, bed.listener.accept()).await.unwrap().unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    timeout(TICK, read_clean_line(&mut reader)).await.unwrap().unwrap();

    // Connection 1 cut off at 2, connection 2 at 2: one archived event of
    // connection 2 stays beyond its cutoff.
    write_half
        .write_all(b"active-connections\n1 2\n2 2\nlive-events\n")
        .await
        .unwrap();
    drop(write_half);
    timeout(TICK, processor).await.unwrap().unwrap().unwrap();

    let log = log.lock().unwrap();
    let replayed: Vec<(u64, u64)> = log
        .events
        .iter()
        .map(|(ev, _)| (ev.connection_id, ev.sequence))
        .collect();
    assert_eq!(replayed, vec![(1, 0), (1, 1), (2, 0), (2, 1)]);
}

// ----------------------------------------------------------------------------
// Failure modes of the attempt
// ----------------------------------------------------------------------------

#[tokio::test]
async fn closed_stream_before_any_line_is_an_authentication_failure() {
    let bed = scripted_connector(&[]).await;
    let processor = tokio::spawn(run_processor(bed.config.clone(), CollectingSink::default()));

    let (stream, _) = timeout(TICK, bed.listener.accept()).await.unwrap().unwrap();
    let (read_half, _write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    // Drain the credential so the close below is a clean end of stream.
    timeout(TICK, read_clean_line(&mut reader)).await.unwrap().unwrap();
    drop(reader);
    drop(_write_half);

    let result = timeout(TICK, processor).await.unwrap().unwrap();
    assert!(matches!(result, Err(ProcessorError::AuthenticationFailed)));
}

#[tokio::test]
async fn wrong_header_sentinel_is_a_protocol_violation() {
    let bed = scripted_connector(&[]).await;
    let processor = tokio::spawn(run_processor(bed.config.clone(), CollectingSink::default()));

    let (stream, _) = timeout(TICK, bed.listener.accept()).await.unwrap().unwrap();
    let (_read_half, mut write_half) = stream.into_split();
    write_half.write_all(b"howdy\n").await.unwrap();

    let result = timeout(TICK, processor).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ProcessorError::Wire(irclog_core::WireError::UnexpectedSentinel { .. }))
    ));
}

#[tokio::test]
async fn malformed_table_line_is_fatal_to_the_attempt() {
    let bed = scripted_connector(&[]).await;
    let processor = tokio::spawn(run_processor(bed.config.clone(), CollectingSink::default()));

    let (stream, _) = timeout(TICK, bed.listener.accept()).await.unwrap().unwrap();
    let (_read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(b"active-connections\nnot a table line\n")
        .await
        .unwrap();

    let result = timeout(TICK, processor).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ProcessorError::Wire(irclog_core::WireError::MalformedTableLine(_)))
    ));
}

#[tokio::test]
async fn malformed_live_event_line_ends_the_attempt() {
    let bed = scripted_connector(&[]).await;
    let processor = tokio::spawn(run_processor(bed.config.clone(), CollectingSink::default()));

    let (stream, _) = timeout(TICK, bed.listener.accept()).await.unwrap().unwrap();
    let (_read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(b"active-connections\nlive-events\ngarbage\n")
        .await
        .unwrap();

    let result = timeout(TICK, processor).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ProcessorError::Wire(irclog_core::WireError::MalformedEventLine(_)))
    ));
}

// ----------------------------------------------------------------------------
// Outbound commands
// ----------------------------------------------------------------------------

#[tokio::test]
async fn sink_commands_are_formatted_as_connector_protocol_lines() {
    let bed = scripted_connector(&[]).await;
    let sink = CollectingSink {
        commands_script: Some(|commands| {
            commands.connect_server("irc.example", 6697, true, "mynet");
            commands.send_line(0, &irclog_core::CleanLine::from("JOIN #x"));
            commands.disconnect_server(0);
            commands.terminate();
        }),
        ..CollectingSink::default()
    };
    let processor = tokio::spawn(run_processor(bed.config.clone(), sink));

    let (stream, _) = timeout(TICK, bed.listener.accept()).await.unwrap().unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let credential = timeout(TICK, read_clean_line(&mut reader)).await.unwrap().unwrap().unwrap();
    assert_eq!(credential.as_bytes(), PASSWORD.as_bytes());
    write_half.write_all(b"active-connections\nlive-events\n").await.unwrap();

    let mut lines = Vec::new();
    for _ in 0..4 {
        let line = timeout(TICK, read_clean_line(&mut reader)).await.unwrap().unwrap().unwrap();
        lines.push(line.to_string());
    }
    assert_eq!(
        lines,
        vec![
            "connect irc.example 6697 ssl mynet",
            "send 0 JOIN #x",
            "disconnect 0",
            "terminate",
        ]
    );

    drop(write_half);
    timeout(TICK, processor).await.unwrap().unwrap().unwrap();
}

// ----------------------------------------------------------------------------
// Direct store replay
// ----------------------------------------------------------------------------

#[tokio::test]
async fn replay_archived_honors_cutoffs_and_ordering() {
    let bed = scripted_connector(&[
        (5, 0, 1, 0, b"connect x 1 nossl m"),
        (5, 1, 2, 1, b"one"),
        (5, 2, 3, 1, b"two"),
        (3, 0, 4, 0, b"connect y 2 nossl m"),
        (3, 1, 5, 1, b"other"),
    ])
    .await;

    let cutoffs: HashMap<u64, u64> = [(5, 2), (3, 2)].into_iter().collect();
    let db = bed.config.database_file.clone();
    let (replayed, seen) = tokio::task::spawn_blocking(move || {
        let mut seen = Vec::new();
        let replayed = irclog_processor::replay_archived(&db, &cutoffs, |ev| {
            seen.push((ev.connection_id, ev.sequence));
        })
        .unwrap();
        (replayed, seen)
    })
    .await
    .unwrap();

    // Ascending connection id, then ascending sequence; 5's sequence 2 is
    // past its cutoff.
    assert_eq!(seen, vec![(3, 0), (3, 1), (5, 0), (5, 1)]);
    assert_eq!(replayed, 4);
}
