//! chat-relay: a TCP chat relay and its terminal client
//!
//! The server:
//! - Multiplexes every connection on one mio event loop
//! - Holds connections in a bounded slot table
//! - Exchanges a one-time `name!?!?payload` metadata handshake
//! - Logs each client's traffic to its own file
//! - Echoes every message back to its sender in color
//!
//! The client splits into a background receiver thread and a foreground
//! line-editing loop that owns the terminal.

pub mod client;
pub mod config;
pub mod protocol;
pub mod runtime;
