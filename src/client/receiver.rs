//! Background receive loop.
//!
//! The receiver never touches the terminal, not even through logging, since
//! stderr is the same raw-mode tty. It polls a non-blocking socket and
//! forwards what it reads to the foreground thread as [`DisplayEvent`]s.

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest single read from the server.
pub const RECV_CHUNK: usize = 4095;

/// Sleep between polls while the socket has nothing to read.
pub const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Messages from the receiver to the terminal owner.
#[derive(Debug)]
pub enum DisplayEvent {
    /// Bytes received from the server.
    Message(Vec<u8>),
    /// The server closed the connection.
    Closed,
    /// The socket failed.
    Failed(io::Error),
}

/// Put `stream` into non-blocking mode and run [`receive_loop`] on a new
/// thread.
pub fn spawn_receiver(
    stream: TcpStream,
    active: Arc<AtomicBool>,
    events: Sender<DisplayEvent>,
) -> io::Result<JoinHandle<()>> {
    stream.set_nonblocking(true)?;
    thread::Builder::new()
        .name("receiver".to_string())
        .spawn(move || receive_loop(stream, &active, &events))
}

/// Poll `reader` until the peer closes, an error occurs, or `active` is
/// cleared. Always clears `active` on the way out.
pub fn receive_loop<R: Read>(mut reader: R, active: &AtomicBool, events: &Sender<DisplayEvent>) {
    let mut buf = [0u8; RECV_CHUNK];

    while active.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = events.send(DisplayEvent::Closed);
                break;
            }
            Ok(n) => {
                if events.send(DisplayEvent::Message(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(RETRY_DELAY),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = events.send(DisplayEvent::Failed(e));
                break;
            }
        }
    }

    active.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::mpsc;

    /// Reader that replays a fixed script of results.
    struct Scripted(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn script(steps: Vec<io::Result<Vec<u8>>>) -> Scripted {
        Scripted(steps.into_iter().collect())
    }

    #[test]
    fn test_forwards_messages_until_close() {
        let reader = script(vec![
            Err(io::ErrorKind::WouldBlock.into()),
            Ok(b"one".to_vec()),
            Err(io::ErrorKind::Interrupted.into()),
            Ok(b"two".to_vec()),
            Ok(Vec::new()),
        ]);
        let active = AtomicBool::new(true);
        let (tx, rx) = mpsc::channel();

        receive_loop(reader, &active, &tx);

        assert!(!active.load(Ordering::SeqCst));
        let events: Vec<DisplayEvent> = rx.try_iter().collect();
        assert!(matches!(&events[0], DisplayEvent::Message(m) if m == b"one"));
        assert!(matches!(&events[1], DisplayEvent::Message(m) if m == b"two"));
        assert!(matches!(events[2], DisplayEvent::Closed));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_error_signals_shutdown() {
        let reader = script(vec![Err(io::ErrorKind::ConnectionReset.into())]);
        let active = AtomicBool::new(true);
        let (tx, rx) = mpsc::channel();

        receive_loop(reader, &active, &tx);

        assert!(!active.load(Ordering::SeqCst));
        match rx.try_recv().unwrap() {
            DisplayEvent::Failed(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_stops_when_flag_cleared() {
        let reader = script(vec![Ok(b"never read".to_vec())]);
        let active = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel();

        receive_loop(reader, &active, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_spawned_receiver_reads_socket() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let active = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let handle = spawn_receiver(client, Arc::clone(&active), tx).unwrap();

        server.write_all(b"ping").unwrap();
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            DisplayEvent::Message(m) => assert_eq!(m, b"ping"),
            other => panic!("unexpected event: {:?}", other),
        }

        drop(server);
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            DisplayEvent::Closed
        ));
        handle.join().unwrap();
        assert!(!active.load(Ordering::SeqCst));
    }
}
