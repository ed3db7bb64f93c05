//! chat-relay: TCP chat relay server
//!
//! Accepts concurrent clients on a single readiness-driven event loop,
//! exchanges a one-time metadata handshake, appends each client's traffic to
//! `client_files/<peer-ip>/cli_<N>.txt`, and echoes every message back to its
//! sender wrapped in a color escape.

use chat_relay::config::Config;
use chat_relay::runtime;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Usage errors (e.g. a missing port) exit with status 2 inside clap.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(1);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        max_connections = config.max_connections,
        debug_level = ?config.debug_level,
        "Starting chat-relay server"
    );

    match runtime::run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::from(1)
        }
    }
}
