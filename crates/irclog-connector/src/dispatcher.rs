//! Connection registry and dispatcher
//!
//! All connector state (the connection registry, per-connection sequence
//! counters, and the single attached processor link) is owned by one task
//! that handles messages strictly in order. That serialization is the
//! ordering guarantee of the whole system: a sequence number is assigned, the
//! live copy relayed, and the durable copy enqueued within one message step,
//! so the live stream and the store can never disagree about the order of a
//! connection's events.
//!
//! Caller identity is a generation token: each processor attachment gets a
//! fresh [`ProcessorToken`], and any message carrying a stale token is
//! silently ignored. That defends against the races a displaced processor
//! can produce with its final few commands.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use irclog_core::io::WriterHandle;
use irclog_core::{pong_for_ping, wire, CleanLine, Event, EventKind};

use crate::logger::LoggerHandle;
use crate::socket;

const DISPATCHER_QUEUE_DEPTH: usize = 256;

// ----------------------------------------------------------------------------
// Messages and handle
// ----------------------------------------------------------------------------

/// Identity of one processor attachment, compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorToken(u64);

enum DispatcherMsg {
    AttachProcessor {
        writer: WriterHandle,
        reply: oneshot::Sender<ProcessorToken>,
    },
    DetachProcessor {
        token: ProcessorToken,
    },
    ConnectServer {
        host: String,
        port: u16,
        use_tls: bool,
        metadata: CleanLine,
        token: ProcessorToken,
    },
    DisconnectServer {
        id: u64,
        token: ProcessorToken,
    },
    ConnectionOpened {
        id: u64,
        addr: IpAddr,
        writer: WriterHandle,
    },
    ConnectionClosed {
        id: u64,
    },
    LineReceived {
        id: u64,
        line: CleanLine,
    },
    SendLine {
        id: u64,
        line: CleanLine,
        token: ProcessorToken,
    },
    PingConnections,
    Terminate {
        token: ProcessorToken,
    },
}

/// Cloneable handle for submitting operations to the dispatcher task.
///
/// Every method is fire-and-forget from the caller's point of view; the
/// dispatcher applies its own identity and registry checks. Sends to a
/// stopped dispatcher are silently dropped.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatcherMsg>,
    shutdown: watch::Receiver<bool>,
}

impl DispatcherHandle {
    /// Install a new processor link. Returns the attachment's token, or
    /// `None` when the dispatcher no longer accepts attachments.
    pub async fn attach_processor(&self, writer: WriterHandle) -> Option<ProcessorToken> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherMsg::AttachProcessor { writer, reply }).await;
        rx.await.ok()
    }

    /// Clear the processor link, if `token` is still the attached one.
    pub async fn detach_processor(&self, token: ProcessorToken) {
        self.send(DispatcherMsg::DetachProcessor { token }).await;
    }

    /// Open a new outbound IRC connection on behalf of the processor.
    pub async fn connect_server(
        &self,
        host: String,
        port: u16,
        use_tls: bool,
        metadata: CleanLine,
        token: ProcessorToken,
    ) {
        self.send(DispatcherMsg::ConnectServer { host, port, use_tls, metadata, token })
            .await;
    }

    /// Close connection `id` on behalf of the processor.
    pub async fn disconnect_server(&self, id: u64, token: ProcessorToken) {
        self.send(DispatcherMsg::DisconnectServer { id, token }).await;
    }

    /// Socket worker callback: the connection's socket is open.
    pub async fn connection_opened(&self, id: u64, addr: IpAddr, writer: WriterHandle) {
        self.send(DispatcherMsg::ConnectionOpened { id, addr, writer }).await;
    }

    /// Socket worker callback: the connection is gone.
    pub async fn connection_closed(&self, id: u64) {
        self.send(DispatcherMsg::ConnectionClosed { id }).await;
    }

    /// Socket worker callback: one line arrived from the IRC server.
    pub async fn line_received(&self, id: u64, line: CleanLine) {
        self.send(DispatcherMsg::LineReceived { id, line }).await;
    }

    /// Send a line to connection `id` on behalf of the processor.
    pub async fn send_line(&self, id: u64, line: CleanLine, token: ProcessorToken) {
        self.send(DispatcherMsg::SendLine { id, line, token }).await;
    }

    /// Keepalive tick: probe every open connection with a blank line.
    pub async fn ping_connections(&self) {
        self.send(DispatcherMsg::PingConnections).await;
    }

    /// Shut the connector down on behalf of the processor.
    pub async fn terminate(&self, token: ProcessorToken) {
        self.send(DispatcherMsg::Terminate { token }).await;
    }

    /// Observe the connector-wide shutdown signal (pinger, listener).
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    async fn send(&self, msg: DispatcherMsg) {
        let _ = self.tx.send(msg).await;
    }
}

// ----------------------------------------------------------------------------
// Dispatcher state
// ----------------------------------------------------------------------------

struct ConnectionInfo {
    /// Sequence number the connection's next event will get.
    next_sequence: u64,
    /// Present once the socket has actually opened.
    writer: Option<WriterHandle>,
    /// Disconnect signal into the connection worker.
    cancel: Arc<Notify>,
    /// Worker task, joined during termination.
    worker: Option<JoinHandle<()>>,
}

struct AttachedProcessor {
    token: ProcessorToken,
    writer: WriterHandle,
}

/// The single owner of all connector state. Create with [`Dispatcher::new`],
/// then drive with [`Dispatcher::run`].
pub struct Dispatcher {
    rx: mpsc::Receiver<DispatcherMsg>,
    handle: DispatcherHandle,
    shutdown_tx: watch::Sender<bool>,
    logger: LoggerHandle,
    next_connection_id: u64,
    next_token: u64,
    connections: HashMap<u64, ConnectionInfo>,
    processor: Option<AttachedProcessor>,
    /// False once termination starts; new attachments are then refused.
    accepting: bool,
    terminating: bool,
    pending_joins: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// `next_connection_id` comes from the store scan at startup.
    pub fn new(next_connection_id: u64, logger: LoggerHandle) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(DISPATCHER_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = DispatcherHandle { tx, shutdown: shutdown_rx };
        let dispatcher = Dispatcher {
            rx,
            handle: handle.clone(),
            shutdown_tx,
            logger,
            next_connection_id,
            next_token: 0,
            connections: HashMap::new(),
            processor: None,
            accepting: true,
            terminating: false,
            pending_joins: Vec::new(),
        };
        (dispatcher, handle)
    }

    /// Run until terminated. Joins every connection worker and drains the
    /// durable logger before returning.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.handle_message(msg).await;
            if self.terminating && self.connections.is_empty() {
                break;
            }
        }

        // Join workers outside the serialized loop; their close reports have
        // already been handled above.
        for join in self.pending_joins.drain(..) {
            let _ = join.await;
        }

        self.logger.request_termination();
        let logger = self.logger.clone();
        let _ = tokio::task::spawn_blocking(move || logger.join()).await;
        info!("connector terminated");
    }

    async fn handle_message(&mut self, msg: DispatcherMsg) {
        match msg {
            DispatcherMsg::AttachProcessor { writer, reply } => {
                self.attach_processor(writer, reply).await;
            }
            DispatcherMsg::DetachProcessor { token } => self.detach_processor(token),
            DispatcherMsg::ConnectServer { host, port, use_tls, metadata, token } => {
                self.connect_server(host, port, use_tls, metadata, token);
            }
            DispatcherMsg::DisconnectServer { id, token } => self.disconnect_server(id, token),
            DispatcherMsg::ConnectionOpened { id, addr, writer } => {
                self.connection_opened(id, addr, writer);
            }
            DispatcherMsg::ConnectionClosed { id } => self.connection_closed(id),
            DispatcherMsg::LineReceived { id, line } => self.line_received(id, line),
            DispatcherMsg::SendLine { id, line, token } => {
                if self.is_attached(token) {
                    self.send_line_internal(id, line);
                }
            }
            DispatcherMsg::PingConnections => self.ping_connections(),
            DispatcherMsg::Terminate { token } => self.terminate(token),
        }
    }

    // ------------------------------------------------------------------
    // Processor link
    // ------------------------------------------------------------------

    async fn attach_processor(&mut self, writer: WriterHandle, reply: oneshot::Sender<ProcessorToken>) {
        if !self.accepting {
            // Dropping the reply tells the listener the attachment was refused.
            return;
        }

        // Pin a consistent catch-up cutoff: everything queued so far must be
        // durable before the connection table is captured. This blocks the
        // whole dispatcher, which is exactly the point.
        self.logger.flush().await;

        writer.post_write(CleanLine::from(wire::ACTIVE_CONNECTIONS));
        for (&id, info) in &self.connections {
            writer.post_write(CleanLine::from(
                wire::format_table_line(id, info.next_sequence).as_str(),
            ));
        }
        writer.post_write(CleanLine::from(wire::LIVE_EVENTS));

        if let Some(old) = self.processor.take() {
            // Asynchronous termination; not awaited.
            old.writer.terminate();
        }
        self.next_token += 1;
        let token = ProcessorToken(self.next_token);
        self.processor = Some(AttachedProcessor { token, writer });
        info!("processor attached");
        let _ = reply.send(token);
    }

    fn detach_processor(&mut self, token: ProcessorToken) {
        if self.is_attached(token) {
            self.processor = None;
            info!("processor detached");
        }
    }

    fn is_attached(&self, token: ProcessorToken) -> bool {
        self.processor.as_ref().is_some_and(|p| p.token == token)
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    fn connect_server(
        &mut self,
        host: String,
        port: u16,
        use_tls: bool,
        metadata: CleanLine,
        token: ProcessorToken,
    ) {
        if !self.is_attached(token) {
            return;
        }
        let id = self.next_connection_id;
        self.next_connection_id += 1;

        let cancel = Arc::new(Notify::new());
        self.connections.insert(
            id,
            ConnectionInfo {
                next_sequence: 0,
                writer: None,
                cancel: Arc::clone(&cancel),
                worker: None,
            },
        );

        let mut payload = format!(
            "connect {host} {port} {} ",
            if use_tls { "ssl" } else { "nossl" }
        )
        .into_bytes();
        payload.extend_from_slice(metadata.as_bytes());
        self.post_event(id, EventKind::Connection, CleanLine::from_clean(payload));

        let worker = socket::spawn_connection(id, host, port, use_tls, self.handle.clone(), cancel);
        if let Some(info) = self.connections.get_mut(&id) {
            info.worker = Some(worker);
        }
    }

    fn disconnect_server(&mut self, id: u64, token: ProcessorToken) {
        if !self.is_attached(token) {
            return;
        }
        self.disconnect_internal(id);
    }

    fn disconnect_internal(&mut self, id: u64) {
        match self.connections.get(&id) {
            None => warn!("connection {id} does not exist"),
            Some(info) => {
                let cancel = Arc::clone(&info.cancel);
                self.post_event(id, EventKind::Connection, CleanLine::from("disconnect"));
                cancel.notify_one();
            }
        }
    }

    fn connection_opened(&mut self, id: u64, addr: IpAddr, writer: WriterHandle) {
        if !self.connections.contains_key(&id) {
            debug_assert!(false, "connection_opened for unknown id {id}");
            error!("socket worker reported open for unknown connection {id}");
            return;
        }
        self.post_event(
            id,
            EventKind::Connection,
            CleanLine::from(format!("opened {addr}").as_str()),
        );
        if let Some(info) = self.connections.get_mut(&id) {
            info.writer = Some(writer);
        }
    }

    fn connection_closed(&mut self, id: u64) {
        let Some(info) = self.connections.remove(&id) else {
            debug_assert!(false, "connection_closed for unknown id {id}");
            error!("socket worker reported close for unknown connection {id}");
            return;
        };
        self.emit(id, info.next_sequence, EventKind::Connection, CleanLine::from("closed"));
        if self.terminating {
            if let Some(worker) = info.worker {
                self.pending_joins.push(worker);
            }
        }
    }

    // ------------------------------------------------------------------
    // Line traffic
    // ------------------------------------------------------------------

    fn line_received(&mut self, id: u64, line: CleanLine) {
        if !self.connections.contains_key(&id) {
            debug_assert!(false, "line_received for unknown id {id}");
            error!("socket worker reported line for unknown connection {id}");
            return;
        }
        let pong = pong_for_ping(line.as_bytes());
        self.post_event(id, EventKind::Receive, line);
        if let Some(pong) = pong {
            // Rides the normal send path so it is logged and relayed like
            // any processor-initiated line.
            self.send_line_internal(id, CleanLine::from_clean(pong));
        }
    }

    fn send_line_internal(&mut self, id: u64, line: CleanLine) {
        let writer = match self.connections.get(&id) {
            Some(info) => info.writer.clone(),
            None => None,
        };
        match writer {
            Some(writer) => {
                self.post_event(id, EventKind::Send, line.clone());
                writer.post_write(line);
            }
            None => warn!("connection {id} does not exist or is not open, dropping line"),
        }
    }

    fn ping_connections(&mut self) {
        // A blank line is safely ignored by IRC servers but forces the OS to
        // surface dead sockets on the next read. Not logged, not relayed.
        for info in self.connections.values() {
            if let Some(writer) = &info.writer {
                writer.post_write(CleanLine::default());
            }
        }
    }

    // ------------------------------------------------------------------
    // Event emission: the single choke point
    // ------------------------------------------------------------------

    /// Assign the next sequence for `id`, relay the wire copy to the
    /// attached processor, and enqueue the durable copy. All within the
    /// current message step.
    fn post_event(&mut self, id: u64, kind: EventKind, payload: CleanLine) {
        let sequence = match self.connections.get_mut(&id) {
            Some(info) => {
                let sequence = info.next_sequence;
                info.next_sequence += 1;
                sequence
            }
            None => {
                debug_assert!(false, "post_event for unknown id {id}");
                error!("dropping event for unknown connection {id}");
                return;
            }
        };
        self.emit(id, sequence, kind, payload);
    }

    fn emit(&mut self, id: u64, sequence: u64, kind: EventKind, payload: CleanLine) {
        let event = Event::new(id, sequence, kind, payload);
        if let Some(processor) = &self.processor {
            processor.writer.post_write(wire::format_event_line(&event));
        }
        self.logger.post_event(event);
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    fn terminate(&mut self, token: ProcessorToken) {
        if !self.is_attached(token) {
            return;
        }
        info!("connector terminating");
        self.accepting = false;
        self.terminating = true;
        // Stops the pinger and the processor listener.
        let _ = self.shutdown_tx.send(true);

        let ids: Vec<u64> = self.connections.keys().copied().collect();
        for id in ids {
            if let Some(info) = self.connections.get_mut(&id) {
                if let Some(worker) = info.worker.take() {
                    self.pending_joins.push(worker);
                }
            }
            self.disconnect_internal(id);
        }

        if let Some(processor) = self.processor.take() {
            processor.writer.terminate();
        }
        debug!("waiting for {} connection workers", self.pending_joins.len());
    }
}
