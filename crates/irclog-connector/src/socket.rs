//! IRC server connection workers
//!
//! One task per connection: open the socket (TLS when requested), report
//! `ConnectionOpened` with a writer handle, then loop reading lines into the
//! dispatcher until end of stream, socket error, or a disconnect signal.
//! Whatever happens, including a failed connect, the worker's last act is
//! reporting `ConnectionClosed`, so every `connect` event in the store is
//! eventually matched by a `closed` event.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use irclog_core::io::{read_clean_line, spawn_writer};

use crate::dispatcher::DispatcherHandle;
use crate::error::{ConnectorError, Result};

/// Spawn the connection worker for connection `id`.
///
/// `cancel` carries the disconnect signal from the dispatcher; it aborts an
/// in-progress connect as well as the read loop.
pub fn spawn_connection(
    id: u64,
    host: String,
    port: u16,
    use_tls: bool,
    dispatcher: DispatcherHandle,
    cancel: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_connection(id, host, port, use_tls, &dispatcher, &cancel).await;
        // Always, even when the connect itself failed.
        dispatcher.connection_closed(id).await;
    })
}

async fn run_connection(
    id: u64,
    host: String,
    port: u16,
    use_tls: bool,
    dispatcher: &DispatcherHandle,
    cancel: &Notify,
) {
    let connect = async {
        let tcp = TcpStream::connect((host.as_str(), port)).await?;
        tcp.peer_addr().map(|addr| (tcp, addr))
    };
    let connected = tokio::select! {
        _ = cancel.notified() => {
            info!(id, "connection cancelled before socket opened");
            return;
        }
        result = connect => result,
    };
    let (tcp, addr) = match connected {
        Ok(pair) => pair,
        Err(err) => {
            warn!(id, host, port, "connect failed: {err}");
            return;
        }
    };

    if use_tls {
        let handshake = async {
            let stream = tls_connector()
                .connect(server_name(&host)?, tcp)
                .await
                .map_err(ConnectorError::Io)?;
            Ok::<_, ConnectorError>(stream)
        };
        let stream = tokio::select! {
            _ = cancel.notified() => {
                info!(id, "connection cancelled during TLS handshake");
                return;
            }
            result = handshake => match result {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(id, host, "TLS handshake failed: {err}");
                    return;
                }
            },
        };
        serve_stream(id, stream, addr, dispatcher, cancel).await;
    } else {
        serve_stream(id, tcp, addr, dispatcher, cancel).await;
    }
}

/// Report the opened connection and pump received lines into the dispatcher.
async fn serve_stream<S>(
    id: u64,
    stream: S,
    addr: std::net::SocketAddr,
    dispatcher: &DispatcherHandle,
    cancel: &Notify,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let writer = spawn_writer(write_half, b"\r\n");
    dispatcher.connection_opened(id, addr.ip(), writer.clone()).await;

    let mut reader = BufReader::new(read_half);
    loop {
        let line = tokio::select! {
            _ = cancel.notified() => break,
            result = read_clean_line(&mut reader) => match result {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!(id, "socket read failed: {err}");
                    break;
                }
            },
        };
        dispatcher.line_received(id, line).await;
    }
    writer.terminate();
}

fn tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| ConnectorError::InvalidServerName(host.to_string()))
}
