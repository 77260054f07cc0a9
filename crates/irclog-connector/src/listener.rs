//! Processor attachment listener
//!
//! Accepts TCP connections from the processor half. The first line must be
//! the shared password, delivered within a short deadline; anything else
//! gets the socket dropped without a reply. An authenticated socket is
//! attached to the dispatcher, and its remaining inbound lines are the
//! processor command protocol:
//!
//! ```text
//! connect <host> <port> <ssl|nossl> <metadata>
//! disconnect <connId>
//! send <connId> <payload>
//! terminate
//! ```
//!
//! Malformed commands are logged and ignored. When the stream ends the
//! attachment is detached; if a newer processor has displaced this one, the
//! detach is a no-op thanks to the token check.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use irclog_core::io::{read_clean_line, spawn_writer};
use irclog_core::CleanLine;

use crate::dispatcher::{DispatcherHandle, ProcessorToken};

const AUTH_DEADLINE: Duration = Duration::from_secs(3);

/// Accept processor attachments until the connector-wide shutdown signal.
pub async fn run_listener(listener: TcpListener, password: String, dispatcher: DispatcherHandle) {
    let mut shutdown = dispatcher.subscribe_shutdown();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                debug!("processor candidate from {addr}");
                let password = password.clone();
                let dispatcher = dispatcher.clone();
                tokio::spawn(serve_processor(stream, password, dispatcher));
            }
            Err(err) => {
                warn!("accept failed: {err}");
            }
        }
    }
    info!("processor listener stopped");
}

async fn serve_processor(stream: TcpStream, password: String, dispatcher: DispatcherHandle) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Authenticate: exactly one chance, within the deadline.
    let first = match timeout(AUTH_DEADLINE, read_clean_line(&mut reader)).await {
        Ok(Ok(Some(line))) => line,
        _ => {
            debug!("processor candidate dropped before authenticating");
            return;
        }
    };
    if first.as_bytes() != password.as_bytes() {
        warn!("processor candidate failed authentication");
        return;
    }

    let writer = spawn_writer(write_half, b"\n");
    let Some(token) = dispatcher.attach_processor(writer.clone()).await else {
        // Terminating; no new attachments.
        writer.terminate();
        return;
    };

    while let Ok(Some(line)) = read_clean_line(&mut reader).await {
        handle_command(&dispatcher, token, &line).await;
    }

    dispatcher.detach_processor(token).await;
    writer.terminate();
}

/// Parse and apply one processor command line.
async fn handle_command(dispatcher: &DispatcherHandle, token: ProcessorToken, line: &CleanLine) {
    let text = String::from_utf8_lossy(line.as_bytes()).into_owned();
    let mut parts = text.splitn(2, ' ');
    let verb = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");

    match verb {
        "connect" => {
            // connect <host> <port> <ssl|nossl> <metadata>
            let mut args = rest.splitn(4, ' ');
            let (host, port, mode, metadata) =
                (args.next(), args.next(), args.next(), args.next().unwrap_or(""));
            match (host, port.and_then(|p| p.parse::<u16>().ok()), mode) {
                (Some(host), Some(port), Some(mode @ ("ssl" | "nossl"))) => {
                    dispatcher
                        .connect_server(
                            host.to_string(),
                            port,
                            mode == "ssl",
                            CleanLine::from(metadata),
                            token,
                        )
                        .await;
                }
                _ => warn!("malformed connect command: {text:?}"),
            }
        }
        "disconnect" => match rest.parse::<u64>() {
            Ok(id) => dispatcher.disconnect_server(id, token).await,
            Err(_) => warn!("malformed disconnect command: {text:?}"),
        },
        "send" => {
            // send <connId> <payload>; payload keeps its spaces.
            let mut args = rest.splitn(2, ' ');
            match (args.next().and_then(|id| id.parse::<u64>().ok()), args.next()) {
                (Some(id), Some(payload)) => {
                    dispatcher.send_line(id, CleanLine::from(payload), token).await;
                }
                _ => warn!("malformed send command: {text:?}"),
            }
        }
        "terminate" => dispatcher.terminate(token).await,
        _ => warn!("unknown processor command: {text:?}"),
    }
}
