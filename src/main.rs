//! appendlog: a line-framed persistent log server
//!
//! Every newline-terminated record received on a TCP connection is
//! appended to one shared log file, and the full contents of that file are
//! sent back to the client after each record.
//!
//! Features:
//! - Strictly sequential connection handling
//! - Orderly shutdown on SIGINT/SIGTERM, removing the log file
//! - Optional daemon mode (`-d`)
//! - Configuration via CLI arguments or TOML file

mod binder;
mod config;
mod daemon;
mod framer;
mod handler;
mod server;
mod signal;
mod store;

use config::Config;
use server::Server;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    init_logging(&config)?;

    info!(
        host = config.host.as_deref().unwrap_or("*"),
        port = config.port,
        store = %config.store_path.display(),
        daemon = config.daemon,
        "Starting appendlog server"
    );

    let mut server = Server::bind(&config).map_err(|e| {
        error!(error = %e, "Server setup failed");
        e
    })?;

    if config.daemon {
        daemon::daemonize().map_err(|e| {
            error!(error = %e, "Failed to daemonize");
            e
        })?;
        info!(pid = std::process::id(), "Running in daemon mode");
    }

    server.install_signal_handlers()?;
    server.run()?;
    Ok(())
}

/// Install the global tracing subscriber.
fn init_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_file {
        Some(ref path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }

    Ok(())
}
