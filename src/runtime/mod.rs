//! Relay server runtime.
//!
//! A single-threaded, readiness-based event loop (mio: epoll on Linux,
//! kqueue on macOS) built from:
//! - `ConnectionTable`: bounded slot table owning each connection
//! - `ClientLog`: per-connection traffic file
//! - `Server`: the accept/service loop itself

mod client_log;
mod connection;
mod debug;
mod event_loop;

pub use client_log::ClientLog;
pub use connection::{Connection, ConnectionTable, PeerIdentity, Phase, TableFull};
pub use debug::{hex_dump, DebugLevel};
pub use event_loop::{Server, Tick, READ_CHUNK};

use crate::config::Config;

/// Bind the listener and serve forever.
pub fn run(config: &Config) -> std::io::Result<()> {
    let mut server = Server::bind(config)?;
    server.run()
}
