//! Periodic keepalive prober
//!
//! Sends the dispatcher a probe tick on a fixed interval. The probe itself
//! (a blank line per open connection) is cheap and invisible: not logged,
//! not relayed. Its only purpose is to make the OS surface dead sockets on
//! the next read instead of blocking silently for hours.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::dispatcher::DispatcherHandle;

/// Spawn the prober. It stops on the connector-wide shutdown signal.
pub fn spawn_pinger(dispatcher: DispatcherHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = dispatcher.subscribe_shutdown();
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => dispatcher.ping_connections().await,
            }
        }
        debug!("pinger stopped");
    })
}
