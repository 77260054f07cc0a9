//! irclog processor demo binary
//!
//! Attaches to a running connector and prints every event to stdout,
//! archived history first, then the live tail. Useful for watching a
//! connector and as a template for a real consumer.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use irclog_core::{Event, ProcessorConfig};
use irclog_processor::{run_processor, EventSink};

#[derive(Parser)]
#[command(name = "irclog-processor", about = "Replay and tail an irclog connector's event stream")]
struct Cli {
    /// Path to the processor TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Enable debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

struct StdoutSink;

impl EventSink for StdoutSink {
    fn handle_event(&mut self, event: Event, realtime: bool) {
        let tag = if realtime { "live" } else { "hist" };
        println!(
            "[{tag}] conn={} seq={} ts={} {:?} {}",
            event.connection_id, event.sequence, event.timestamp, event.kind, event.payload
        );
    }

    fn catchup_complete(&mut self) {
        println!("--- catch-up complete, live events follow ---");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = ProcessorConfig::load(&cli.config)?;
    if let Err(err) = run_processor(config, StdoutSink).await {
        error!("attachment ended: {err}");
        std::process::exit(1);
    }
    info!("connector stream ended, exiting");
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
