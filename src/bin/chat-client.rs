//! chat-client: terminal client for chat-relay
//!
//! Usage: `chat-client <server_ip> <port> [-D]`

use chat_relay::client;
use chat_relay::config::{ClientArgs, ClientConfig};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Every argument problem exits with status 1, unlike clap's default 2.
    let args = match ClientArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match ClientConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[Error] | {}", e);
            return ExitCode::from(1);
        }
    };

    // Initialize logging on stderr, quiet unless -D
    let default_level = if config.debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match client::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[Error] | {}", e);
            ExitCode::from(1)
        }
    }
}
