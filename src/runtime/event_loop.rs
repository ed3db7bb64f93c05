//! mio event loop for the relay server.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue on
//! macOS. Everything runs on one thread, which owns the connection table and
//! every log handle.
//!
//! Each tick:
//!
//! ```text
//! wait (idle timeout) -> [nothing ready: heartbeat]
//!                     -> accept phase  (listener ready)
//!                     -> service phase (ready slots, ascending slot order)
//! ```

use crate::config::Config;
use crate::protocol::color::{map_color, ColorTag};
use crate::protocol::echo::push_echo;
use crate::protocol::metadata::{CodecError, META_BUFFER_SIZE};
use crate::protocol::{ClientHello, ServerHello};
use crate::runtime::client_log::ClientLog;
use crate::runtime::connection::{Connection, ConnectionTable, PeerIdentity, Phase, TableFull};
use crate::runtime::DebugLevel;
use bytes::Buf;
use chrono::Local;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Largest single read from a client socket.
pub const READ_CHUNK: usize = 4096;

/// Pending echo output beyond which a client is considered stuck.
const MAX_OUTBOX: usize = 1024 * 1024;

/// Poll timeout while an accept failure left connections in the backlog.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Outcome of a single event loop tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The idle timeout elapsed with nothing ready.
    Idle,
    /// The wait was interrupted by a signal.
    Interrupted,
    /// At least one socket was ready.
    Serviced { accepted: usize, serviced: usize },
}

/// What a readable event left the connection in.
enum ReadStatus {
    Open,
    PeerClosed,
}

/// The relay server: listener, poller and connection table.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionTable<Connection>,
    log_root: PathBuf,
    /// Arrival counter across the process lifetime.
    next_sequence: usize,
    server_name: String,
    handshake: bool,
    debug_level: DebugLevel,
    idle_timeout: Duration,
    read_buf: Vec<u8>,
    /// Set when accepting stopped on an error rather than an empty backlog.
    accept_pending: bool,
}

impl Server {
    /// Create the listening socket and register it with a new poller.
    ///
    /// Any failure here is fatal for the process.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // Reject names that could never be sent in a handshake.
        ServerHello::new(config.server_name.as_str(), 0)
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let poll = Poll::new()?;
        let listener = create_listener(addr)?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        info!(
            addr = %local_addr,
            max_connections = config.max_connections,
            log_dir = %config.log_dir.display(),
            handshake = config.handshake,
            "Listening"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(config.max_connections.clamp(16, 1024)),
            listener,
            local_addr,
            connections: ConnectionTable::new(config.max_connections),
            log_root: config.log_dir.clone(),
            next_sequence: 0,
            server_name: config.server_name.clone(),
            handshake: config.handshake,
            debug_level: config.debug_level,
            idle_timeout: config.idle_timeout,
            read_buf: vec![0u8; READ_CHUNK],
            accept_pending: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of occupied connection slots.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve until a fatal poll error.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.tick(self.idle_timeout)?;
        }
    }

    /// Run one wait/accept/service cycle.
    pub fn tick(&mut self, timeout: Duration) -> io::Result<Tick> {
        // Edge-triggered readiness won't fire again for connections already
        // in the backlog, so a failed accept is retried on a short timer.
        let timeout = if self.accept_pending {
            timeout.min(ACCEPT_RETRY)
        } else {
            timeout
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Tick::Interrupted),
            Err(e) => return Err(e),
        }

        if self.events.is_empty() && !self.accept_pending {
            info!(connections = self.connections.len(), "[Timeout] no activity");
            return Ok(Tick::Idle);
        }

        let mut listener_ready = false;
        let mut ready = Vec::new();
        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => listener_ready = true,
                Token(slot) => ready.push((
                    slot,
                    event.is_readable() || event.is_read_closed() || event.is_error(),
                    event.is_writable(),
                )),
            }
        }
        ready.sort_unstable_by_key(|&(slot, _, _)| slot);

        let accepted = if listener_ready || self.accept_pending {
            self.accept_connections()
        } else {
            0
        };

        let serviced = ready.len();
        for (slot, readable, writable) in ready {
            if let Err(e) = self.service(slot, readable, writable) {
                if let Some(conn) = self.connections.get(slot) {
                    error!(
                        slot,
                        fd = conn.stream.as_raw_fd(),
                        peer = %conn.peer,
                        error = %e,
                        "Connection error"
                    );
                }
                self.close_connection(slot);
            }
        }

        Ok(Tick::Serviced { accepted, serviced })
    }

    /// Accept until the listener would block. Edge-triggered readiness only
    /// fires again for new arrivals, so the backlog must be drained here.
    fn accept_connections(&mut self) -> usize {
        let mut accepted = 0;
        self.accept_pending = false;

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error; retrying next tick");
                    self.accept_pending = true;
                    break;
                }
            };

            info!(
                fd = stream.as_raw_fd(),
                peer = %peer,
                at = %Local::now().format(TIMESTAMP_FORMAT),
                "Client connected"
            );

            if self.connections.is_full() {
                warn!(
                    fd = stream.as_raw_fd(),
                    peer = %peer,
                    capacity = self.connections.capacity(),
                    "Too many clients; closing connection"
                );
                continue;
            }

            let sequence = self.next_sequence;
            self.next_sequence += 1;

            let log = match ClientLog::create(&self.log_root, peer.ip(), sequence) {
                Ok(log) => log,
                Err(e) => {
                    error!(peer = %peer, error = %e, "Failed to open client log; closing connection");
                    continue;
                }
            };

            let color = map_color(i64::from(ColorTag::code_for_arrival(sequence)));
            let conn = Connection::new(stream, peer, log, sequence, color, self.handshake);

            let slot = match self.connections.allocate(conn) {
                Ok(slot) => slot,
                Err(TableFull(conn)) => {
                    warn!(peer = %peer, "Connection table full; closing connection");
                    let _ = conn.log.close();
                    continue;
                }
            };

            let Some(conn) = self.connections.get_mut(slot) else {
                continue;
            };
            if let Err(e) =
                self.poll
                    .registry()
                    .register(&mut conn.stream, Token(slot), Interest::READABLE)
            {
                error!(slot, peer = %peer, error = %e, "Failed to register connection");
                self.close_connection(slot);
                continue;
            }

            debug!(
                slot,
                sequence,
                peer = %peer,
                log = %conn.log.path().display(),
                "Connection allocated"
            );
            accepted += 1;
        }

        accepted
    }

    fn service(&mut self, slot: usize, readable: bool, writable: bool) -> io::Result<()> {
        if !self.connections.contains(slot) {
            return Ok(());
        }

        if readable {
            if let ReadStatus::PeerClosed = self.read_ready(slot)? {
                // Data may have arrived alongside the EOF; echo what the
                // socket still takes before closing.
                if let Err(e) = self.flush(slot) {
                    debug!(slot, error = %e, "Final flush failed");
                }
                self.close_connection(slot);
                return Ok(());
            }
        }

        if readable || writable {
            self.flush(slot)?;
        }

        Ok(())
    }

    /// Read until the socket would block, handing each chunk to the
    /// connection's current phase.
    fn read_ready(&mut self, slot: usize) -> io::Result<ReadStatus> {
        loop {
            let Some(conn) = self.connections.get_mut(slot) else {
                return Ok(ReadStatus::PeerClosed);
            };

            let n = match conn.stream.read(&mut self.read_buf) {
                Ok(0) => return Ok(ReadStatus::PeerClosed),
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Open),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            let data = &self.read_buf[..n];
            self.debug_level.trace_read(slot, data);
            handle_data(conn, data, &self.server_name)?;
        }
    }

    /// Write as much queued output as the socket takes, toggling write
    /// interest while a remainder is pending.
    fn flush(&mut self, slot: usize) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(slot) else {
            return Ok(());
        };

        while !conn.outbox.is_empty() {
            match conn.stream.write(&conn.outbox) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => conn.outbox.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let want_write = !conn.outbox.is_empty();
        if want_write != conn.write_interest {
            let interest = if want_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(slot), interest)?;
            conn.write_interest = want_write;
        }

        Ok(())
    }

    /// Release a slot, closing its socket and its log together.
    fn close_connection(&mut self, slot: usize) {
        let Some(mut conn) = self.connections.release(slot) else {
            return;
        };

        let _ = self.poll.registry().deregister(&mut conn.stream);
        info!(
            slot,
            fd = conn.stream.as_raw_fd(),
            peer = %conn.peer,
            name = %conn.label(),
            logged = conn.log.written(),
            at = %Local::now().format(TIMESTAMP_FORMAT),
            "Client disconnected"
        );

        if let Err(e) = conn.log.close() {
            warn!(slot, error = %e, "Failed to close client log");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for slot in self.connections.occupied() {
            self.close_connection(slot);
        }
    }
}

/// Route freshly read bytes by handshake phase.
fn handle_data(conn: &mut Connection, data: &[u8], server_name: &str) -> io::Result<()> {
    match std::mem::replace(&mut conn.phase, Phase::Relaying) {
        Phase::Relaying => relay(conn, data),
        Phase::AwaitingHello { mut pending } => {
            pending.extend_from_slice(data);

            let parsed = ClientHello::parse(&pending)
                .map(|hello| hello.map(|(hello, rest)| (hello, rest.to_vec())));

            match parsed {
                Ok(Some((hello, rest))) => {
                    complete_handshake(conn, hello, server_name)?;
                    if !rest.is_empty() {
                        relay(conn, &rest)?;
                    }
                    Ok(())
                }
                Ok(None) if pending.len() < META_BUFFER_SIZE => {
                    conn.phase = Phase::AwaitingHello { pending };
                    Ok(())
                }
                Ok(None) => Err(malformed(CodecError::MalformedFrame)),
                Err(e) => Err(malformed(e)),
            }
        }
    }
}

/// Record the client's identity and queue the server's hello.
fn complete_handshake(
    conn: &mut Connection,
    hello: ClientHello,
    server_name: &str,
) -> io::Result<()> {
    let code = ColorTag::code_for_arrival(conn.sequence);
    let reply = ServerHello::new(server_name, code)
        .encode()
        .map_err(malformed)?;
    conn.outbox.extend_from_slice(&reply);

    info!(
        peer = %conn.peer,
        name = %hello.name,
        uuid = %hello.uuid,
        color = ?conn.color,
        "Handshake complete"
    );

    conn.identity = Some(PeerIdentity {
        name: hello.name,
        uuid: hello.uuid,
    });
    Ok(())
}

/// Log the bytes, then queue their colorized echo.
fn relay(conn: &mut Connection, data: &[u8]) -> io::Result<()> {
    conn.log.append(data)?;
    push_echo(&mut conn.outbox, data);

    if conn.outbox.len() > MAX_OUTBOX {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} bytes of echo pending, client not reading", conn.outbox.len()),
        ));
    }
    Ok(())
}

fn malformed(e: CodecError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(|e| io::Error::new(e.kind(), format!("socket: {}", e)))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| io::Error::new(e.kind(), format!("setsockopt: {}", e)))?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|e| io::Error::new(e.kind(), format!("bind {}: {}", addr, e)))?;
    socket
        .listen(1024)
        .map_err(|e| io::Error::new(e.kind(), format!("listen: {}", e)))?;

    Ok(socket.into())
}
