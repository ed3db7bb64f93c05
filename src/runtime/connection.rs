//! Connection slots for the relay event loop.
//!
//! Each live connection occupies one slot of a bounded [`ConnectionTable`].
//! The slot owns the socket, the per-client log and the handshake state, so
//! releasing a slot always closes socket and log together.

use crate::protocol::ColorTag;
use crate::runtime::client_log::ClientLog;
use bytes::BytesMut;
use mio::net::TcpStream;
use slab::Slab;
use std::fmt;
use std::net::SocketAddr;

/// Handshake progress of a connection.
#[derive(Debug)]
pub enum Phase {
    /// Waiting for the client's `name!?!?uuid` hello.
    AwaitingHello {
        /// Bytes received so far.
        pending: BytesMut,
    },
    /// Relaying chat traffic.
    Relaying,
}

/// Identity the client announced in its hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub name: String,
    pub uuid: String,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub log: ClientLog,
    /// Process-wide arrival index, also used for the log file name.
    pub sequence: usize,
    pub color: ColorTag,
    pub phase: Phase,
    pub identity: Option<PeerIdentity>,
    /// Output not yet accepted by the socket.
    pub outbox: BytesMut,
    /// Whether the socket is currently registered for writability.
    pub write_interest: bool,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        log: ClientLog,
        sequence: usize,
        color: ColorTag,
        handshake: bool,
    ) -> Self {
        let phase = if handshake {
            Phase::AwaitingHello {
                pending: BytesMut::new(),
            }
        } else {
            Phase::Relaying
        };

        Self {
            stream,
            peer,
            log,
            sequence,
            color,
            phase,
            identity: None,
            outbox: BytesMut::new(),
            write_interest: false,
        }
    }

    /// Display name for logging: the announced name, or the peer address.
    pub fn label(&self) -> String {
        match &self.identity {
            Some(identity) => identity.name.clone(),
            None => self.peer.to_string(),
        }
    }
}

/// Returned when every slot is occupied. Hands the rejected value back so the
/// caller can close it.
pub struct TableFull<T>(pub T);

impl<T> fmt::Debug for TableFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TableFull")
    }
}

impl<T> fmt::Display for TableFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection table is full")
    }
}

impl<T> std::error::Error for TableFull<T> {}

/// Fixed-capacity table of connection slots.
///
/// Slot indices are stable for the life of a connection and double as the
/// mio token. Iteration is in ascending slot order.
pub struct ConnectionTable<T> {
    slots: Slab<T>,
    capacity: usize,
}

impl<T> ConnectionTable<T> {
    /// Create a table with room for `capacity` connections.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Place `conn` in a free slot.
    ///
    /// Never touches occupied slots. When the table is full the connection
    /// is returned inside the error.
    pub fn allocate(&mut self, conn: T) -> Result<usize, TableFull<T>> {
        if self.is_full() {
            return Err(TableFull(conn));
        }
        Ok(self.slots.insert(conn))
    }

    /// Free a slot, returning what it held.
    ///
    /// Releasing a free slot returns `None`, so double release is harmless.
    pub fn release(&mut self, slot: usize) -> Option<T> {
        self.slots.try_remove(slot)
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.slots.get_mut(slot)
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.slots.contains(slot)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupied slots in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter()
    }

    /// Occupied slot indices in ascending order.
    pub fn occupied(&self) -> Vec<usize> {
        self.slots.iter().map(|(slot, _)| slot).collect()
    }

    /// Visit every occupied slot in ascending index order.
    pub fn for_each_occupied<F>(&mut self, mut f: F)
    where
        F: FnMut(usize, &mut T),
    {
        for (slot, conn) in self.slots.iter_mut() {
            f(slot, conn);
        }
    }
}
