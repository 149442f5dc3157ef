//! smtp-stub: an SMTP server that echoes what it gets to stdout
//!
//! Useful for testing that an application actually sends mail. Every
//! client gets a canned conversation:
//! - `220 Awesome SMTP server` on connect
//! - `250 OK` for every command, `354 Intermediate` for `DATA`
//! - message bodies are swallowed until a lone `.`
//!
//! Every line a client sends is printed verbatim to stdout, along with a
//! notice when a client connects or disconnects. Diagnostics go to stderr.
//!
//! Features:
//! - One task per connection, no connection limit
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod server;
mod sink;

use config::Config;
use server::Server;
use sink::{QueuedSink, WriterSink};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(listen = %config.listen(), "Starting smtp-stub server");

    // Observed lines are written to stdout off the runtime's worker threads
    let (sink, _writer) = QueuedSink::spawn(Arc::new(WriterSink::stdout()))?;

    // A bind failure is reported once, by the error returned from main
    let server = Server::bind(&config, Arc::new(sink))?;

    server.run().await;
    Ok(())
}
