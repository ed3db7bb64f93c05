//! Terminal chat client.
//!
//! Connects, exchanges the metadata handshake, then splits into:
//! - a background receiver thread polling the socket (`receiver`)
//! - the foreground send loop that owns the terminal (`session`)
//!
//! The two share an `AtomicBool` active flag and a channel of display
//! events; only the foreground thread ever writes to the terminal.

pub mod display;
pub mod editor;
pub mod identity;
pub mod receiver;
pub mod session;
pub mod terminal;

use crate::config::ClientConfig;
use crate::protocol::color::RESET;
use crate::protocol::metadata::META_BUFFER_SIZE;
use crate::protocol::{ClientHello, CodecError, ServerHello};
use identity::{clean_name, load_or_create_uuid, ClientIdentity};
use receiver::spawn_receiver;
use session::{Session, SessionEnd};
use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use terminal::{RawModeGuard, TerminalInput};
use tracing::{debug, info};

/// How long to wait for the server's half of the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client errors. All of them end the session.
#[derive(Debug)]
pub enum ClientError {
    Prompt(io::Error),
    Identity(io::Error),
    Connect(SocketAddr, io::Error),
    Handshake(CodecError),
    HandshakeIo(io::Error),
    /// The server closed the connection before answering the handshake.
    Rejected,
    Terminal(io::Error),
    Send(io::Error),
    Receive(io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Prompt(e) => write!(f, "Failed to read name: {}", e),
            ClientError::Identity(e) => write!(f, "Failed to load client uuid: {}", e),
            ClientError::Connect(addr, e) => write!(f, "Connect to {}: {}", addr, e),
            ClientError::Handshake(e) => write!(f, "Handshake: {}", e),
            ClientError::HandshakeIo(e) => write!(f, "Handshake: {}", e),
            ClientError::Rejected => write!(f, "Server closed the connection during handshake"),
            ClientError::Terminal(e) => write!(f, "Terminal: {}", e),
            ClientError::Send(e) => write!(f, "send_all: {}", e),
            ClientError::Receive(e) => write!(f, "recv: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

/// Run a complete client session.
pub fn run(config: ClientConfig) -> Result<(), ClientError> {
    let name = match config.name.as_deref() {
        Some(name) => clean_name(name),
        None => prompt_name()?,
    };
    let uuid = load_or_create_uuid(&config.uuid_file).map_err(ClientError::Identity)?;

    let addr = SocketAddr::new(config.server_ip, config.port);
    let mut stream = TcpStream::connect(addr).map_err(|e| ClientError::Connect(addr, e))?;
    let server = handshake(&mut stream, &name, &uuid.hyphenated().to_string())?;

    let identity = ClientIdentity {
        display_name: name,
        uuid: uuid.hyphenated().to_string(),
        display_color: server.color(),
    };
    print_banner(addr, &server, &identity);

    let active = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel();
    let reader = stream.try_clone().map_err(ClientError::Receive)?;
    let receiver_thread =
        spawn_receiver(reader, Arc::clone(&active), tx).map_err(ClientError::Receive)?;

    let result = RawModeGuard::enable()
        .map_err(ClientError::Terminal)
        .and_then(|_raw| {
            Session::new(
                TerminalInput,
                io::stdout(),
                &stream,
                Arc::clone(&active),
                rx,
                identity.display_color,
            )
            .with_debug(config.debug)
            .run()
        });

    active.store(false, Ordering::SeqCst);
    let _ = receiver_thread.join();
    let _ = stream.shutdown(Shutdown::Both);

    match result? {
        SessionEnd::Quit => info!("Session ended by user"),
        SessionEnd::ServerClosed => info!("Session ended by server"),
    }
    Ok(())
}

/// Send our hello and wait for the server's.
pub fn handshake(stream: &mut TcpStream, name: &str, uuid: &str) -> Result<ServerHello, ClientError> {
    let hello = ClientHello::new(name, uuid)
        .encode()
        .map_err(ClientError::Handshake)?;
    stream.write_all(&hello).map_err(ClientError::HandshakeIo)?;
    debug!(bytes = hello.len(), "Sent metadata");

    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(ClientError::HandshakeIo)?;
    let mut buf = [0u8; META_BUFFER_SIZE];
    let n = match stream.read(&mut buf) {
        Ok(0) => return Err(ClientError::Rejected),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Err(ClientError::Rejected),
        Err(e) => return Err(ClientError::HandshakeIo(e)),
    };
    stream
        .set_read_timeout(None)
        .map_err(ClientError::HandshakeIo)?;
    debug!(bytes = n, "Received metadata");

    ServerHello::parse(&buf[..n]).map_err(ClientError::Handshake)
}

fn prompt_name() -> Result<String, ClientError> {
    print!("Choose a name to connect server :\t");
    io::stdout().flush().map_err(ClientError::Prompt)?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(ClientError::Prompt)?;
    Ok(clean_name(&line))
}

fn print_banner(addr: SocketAddr, server: &ServerHello, identity: &ClientIdentity) {
    println!("Connected to server [ IP= {} ] [ Port= {} ]", addr.ip(), addr.port());
    println!("Server Name : {}", server.name);
    println!("Client Name : {}", identity.display_name);
    println!("Client UUID : {}", identity.uuid);
    println!(
        "Your color  : {}xxxxx{}",
        identity.display_color.escape(),
        RESET
    );
    println!("Type 'quit' to leave.\n");
}
