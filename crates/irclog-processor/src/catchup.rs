//! Attachment state machine: catch-up, then live handoff
//!
//! One attachment attempt walks through
//! `Connecting → Authenticating → ReadingConnectionTable → ReplayingHistory → Live`
//! and ends only on stream end or failure; there is no reconnect-and-resume.
//! The connection table captured by the connector at attach time gives each
//! connection a replay cutoff; everything below it comes from the archived
//! store, everything from it onward arrives on the live stream. Feeding both
//! in that order to the sink yields the full event history with no gap and
//! no duplicate at the boundary.

use std::collections::HashMap;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, info};

use irclog_core::io::{read_clean_line, spawn_writer, WriterHandle};
use irclog_core::{wire, CleanLine, Event, ProcessorConfig, WireError};

use crate::error::{ProcessorError, Result};
use crate::store::replay_archived;

// ----------------------------------------------------------------------------
// Consumer-facing seams
// ----------------------------------------------------------------------------

/// Receives every event of the stream, archived and live.
///
/// `realtime` is false for archived events replayed from the store and true
/// from the handoff point on. [`catchup_complete`](EventSink::catchup_complete)
/// fires exactly once, between the last archived event and the first live
/// one: the moment to flush reactions that were buffered during replay.
pub trait EventSink: Send {
    /// Called once after authentication with the command channel back to the
    /// connector. Default: the sink issues no commands.
    fn attach_commands(&mut self, commands: ConnectorCommands) {
        let _ = commands;
    }

    fn handle_event(&mut self, event: Event, realtime: bool);

    fn catchup_complete(&mut self);
}

/// Command channel from the processor back to the connector.
///
/// Formats the connector's processor command protocol; delivery is
/// fire-and-forget, like every write in the system.
#[derive(Clone)]
pub struct ConnectorCommands {
    writer: WriterHandle,
}

impl ConnectorCommands {
    /// Ask the connector to open a new IRC connection.
    pub fn connect_server(&self, host: &str, port: u16, use_tls: bool, metadata: &str) {
        self.writer.post_write(CleanLine::from(
            format!(
                "connect {host} {port} {} {metadata}",
                if use_tls { "ssl" } else { "nossl" }
            )
            .as_str(),
        ));
    }

    /// Ask the connector to close connection `id`.
    pub fn disconnect_server(&self, id: u64) {
        self.writer.post_write(CleanLine::from(format!("disconnect {id}").as_str()));
    }

    /// Send one line out through connection `id`.
    pub fn send_line(&self, id: u64, line: &CleanLine) {
        let mut out = format!("send {id} ").into_bytes();
        out.extend_from_slice(line.as_bytes());
        self.writer.post_write(CleanLine::from_clean(out));
    }

    /// Ask the connector to shut down.
    pub fn terminate(&self) {
        self.writer.post_write(CleanLine::from("terminate"));
    }
}

// ----------------------------------------------------------------------------
// The attachment attempt
// ----------------------------------------------------------------------------

/// Attach to the connector and run until the stream ends.
///
/// Returns `Ok(())` on orderly stream end and an error otherwise; either
/// way the owning process should terminate and re-attach from scratch on
/// its next start.
pub async fn run_processor<S>(config: ProcessorConfig, sink: S) -> Result<()>
where
    S: EventSink + 'static,
{
    // Connecting
    let stream =
        TcpStream::connect((config.connector_host.as_str(), config.connector_port)).await?;
    let (read_half, write_half) = stream.into_split();
    let writer = spawn_writer(write_half, b"\n");
    let mut reader = BufReader::new(read_half);

    let result = attach_and_consume(&mut reader, &writer, &config, sink).await;
    writer.terminate();
    result
}

async fn attach_and_consume<S>(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &WriterHandle,
    config: &ProcessorConfig,
    mut sink: S,
) -> Result<()>
where
    S: EventSink + 'static,
{
    // Authenticating: credential first, then the table header proves the
    // connector accepted it.
    writer.post_write(CleanLine::new(config.password.clone().into_bytes()));
    let header = read_clean_line(reader)
        .await?
        .ok_or(ProcessorError::AuthenticationFailed)?;
    if header.as_bytes() != wire::ACTIVE_CONNECTIONS.as_bytes() {
        return Err(WireError::UnexpectedSentinel {
            expected: wire::ACTIVE_CONNECTIONS,
            actual: header.to_string(),
        }
        .into());
    }
    sink.attach_commands(ConnectorCommands { writer: writer.clone() });

    // ReadingConnectionTable
    let mut cutoffs: HashMap<u64, u64> = HashMap::new();
    loop {
        let line = read_clean_line(reader)
            .await?
            .ok_or(ProcessorError::StreamEnded)?;
        let text = line.to_string();
        if text == wire::LIVE_EVENTS {
            break;
        }
        let (id, cutoff) = wire::parse_table_line(&text)?;
        cutoffs.insert(id, cutoff);
    }
    info!("attached, replaying {} connections", cutoffs.len());

    // ReplayingHistory: blocking store read off the runtime; the sink rides
    // along and comes back for the live phase.
    let database = config.database_file.clone();
    let (mut sink, replayed) = tokio::task::spawn_blocking(move || {
        let replayed = replay_archived(&database, &cutoffs, |event| {
            sink.handle_event(event, false);
        })?;
        Ok::<_, ProcessorError>((sink, replayed))
    })
    .await
    .map_err(|err| ProcessorError::ReplayPanicked(err.to_string()))??;
    debug!("replayed {replayed} archived events");
    sink.catchup_complete();

    // Live
    while let Some(line) = read_clean_line(reader).await? {
        let event = wire::parse_event_line(&line.to_string())?;
        sink.handle_event(event, true);
    }
    info!("connector stream ended");
    Ok(())
}
