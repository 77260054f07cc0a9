//! irclog connector daemon entry point

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use irclog_connector::{listener, pinger, Dispatcher, DurableLogger};
use irclog_core::ConnectorConfig;

#[derive(Parser)]
#[command(name = "irclog-connector", about = "Always-on IRC connector with a durable event log")]
struct Cli {
    /// Path to the connector TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Enable debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = ConnectorConfig::load(&cli.config)?;

    let (logger, next_connection_id) = DurableLogger::open(
        &config.database_file,
        Duration::from_millis(config.gather_delay_ms),
        Duration::from_millis(config.commit_delay_ms),
    )?;
    info!(
        "database opened, next connection id {}",
        next_connection_id
    );

    let (dispatcher, handle) = Dispatcher::new(next_connection_id, logger);

    let socket = TcpListener::bind(("0.0.0.0", config.server_port)).await?;
    info!("listening on port {}", config.server_port);
    tokio::spawn(listener::run_listener(
        socket,
        config.password.clone(),
        handle.clone(),
    ));

    pinger::spawn_pinger(handle, Duration::from_secs(config.ping_interval_secs));

    info!("connector ready");
    // Returns once a processor issues the terminate command.
    dispatcher.run().await;
    Ok(())
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}
