//! Configuration for the connector and processor binaries
//!
//! Both halves load a small TOML file. The connector owns the event store
//! and the listening port; the processor needs matching credentials plus
//! read access to the same store for catch-up.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::Result;

/// Settings for the connector process.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// SQLite event store path; created on first run.
    pub database_file: PathBuf,
    /// Local TCP port the processor attaches to.
    pub server_port: u16,
    /// Shared secret; the first line of every processor attachment.
    pub password: String,
    /// How long the durable logger waits for a burst of events to gather
    /// before opening a transaction.
    #[serde(default = "default_gather_delay_ms")]
    pub gather_delay_ms: u64,
    /// Minimum pause between commits under steady low-rate traffic.
    #[serde(default = "default_commit_delay_ms")]
    pub commit_delay_ms: u64,
    /// Interval between blank-line keepalive probes on live IRC sockets.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

/// Settings for the processor process.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Host the connector listens on; the two processes normally share a box.
    #[serde(default = "default_connector_host")]
    pub connector_host: String,
    /// Port the connector listens on.
    pub connector_port: u16,
    /// Shared secret, must match the connector's.
    pub password: String,
    /// The connector's SQLite event store, opened read-only for catch-up.
    pub database_file: PathBuf,
}

fn default_gather_delay_ms() -> u64 {
    2_000
}

fn default_commit_delay_ms() -> u64 {
    10_000
}

fn default_ping_interval_secs() -> u64 {
    20
}

fn default_connector_host() -> String {
    "localhost".to_string()
}

impl ConnectorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }
}

impl ProcessorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }
}
