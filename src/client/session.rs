//! Foreground send loop.
//!
//! Owns the terminal: drains display events from the receiver, polls the
//! keyboard with a short timeout so shutdown is noticed promptly, and sends
//! each committed line to the server.

use crate::client::display::Display;
use crate::client::editor::{EditOutcome, LineEditor};
use crate::client::receiver::DisplayEvent;
use crate::client::terminal::InputSource;
use crate::client::ClientError;
use crate::protocol::echo::frame_line;
use crate::protocol::ColorTag;
use crossterm::event::{Event, KeyEventKind};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Keyboard poll timeout; bounds how long shutdown can go unnoticed.
pub const INPUT_POLL: Duration = Duration::from_millis(100);

/// Pause before retrying a write the socket would not take.
const SEND_RETRY_DELAY: Duration = Duration::from_millis(1);

/// A committed input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    Empty,
    Quit,
    Message(&'a str),
}

/// Classify a committed line. Only the literal `quit` ends the session.
pub fn classify_line(line: &str) -> Input<'_> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.is_empty() {
        Input::Empty
    } else if line == "quit" {
        Input::Quit
    } else {
        Input::Message(line)
    }
}

/// Write all of `buf`, retrying partial writes, interrupts and would-block.
/// Only a genuine error fails.
pub fn send_all<W: Write>(writer: &mut W, buf: &[u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match writer.write(&buf[total..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => total += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // The receiver shares this socket in non-blocking mode.
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(SEND_RETRY_DELAY),
            Err(e) => return Err(e),
        }
    }
    writer.flush()?;
    Ok(total)
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user typed `quit` or pressed Ctrl-C / Ctrl-D.
    Quit,
    /// The server closed the connection.
    ServerClosed,
}

pub struct Session<I, W: Write, S> {
    input: I,
    display: Display<W>,
    editor: LineEditor,
    socket: S,
    active: Arc<AtomicBool>,
    events: Receiver<DisplayEvent>,
    color: ColorTag,
    debug: bool,
}

impl<I, W, S> Session<I, W, S>
where
    I: InputSource,
    W: Write,
    S: Write,
{
    pub fn new(
        input: I,
        out: W,
        socket: S,
        active: Arc<AtomicBool>,
        events: Receiver<DisplayEvent>,
        color: ColorTag,
    ) -> Self {
        Self {
            input,
            display: Display::new(out),
            editor: LineEditor::new(),
            socket,
            active,
            events,
            color,
            debug: false,
        }
    }

    /// Report sent and received byte counts above the prompt.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn display(&self) -> &Display<W> {
        &self.display
    }

    /// Run until the user quits, the server closes, or I/O fails.
    pub fn run(&mut self) -> Result<SessionEnd, ClientError> {
        self.display.render(&self.editor).map_err(ClientError::Terminal)?;

        while self.active.load(Ordering::SeqCst) {
            if let Some(end) = self.drain_events()? {
                return Ok(end);
            }

            let Some(event) = self
                .input
                .poll_event(INPUT_POLL)
                .map_err(ClientError::Terminal)?
            else {
                continue;
            };

            if let Some(end) = self.handle_event(event)? {
                return Ok(end);
            }
        }

        // The receiver clears the flag after queueing its final event.
        Ok(self.drain_events()?.unwrap_or(SessionEnd::ServerClosed))
    }

    fn drain_events(&mut self) -> Result<Option<SessionEnd>, ClientError> {
        loop {
            match self.events.try_recv() {
                Ok(DisplayEvent::Message(bytes)) => {
                    self.display
                        .inject(&self.editor, &bytes, self.color)
                        .map_err(ClientError::Terminal)?;
                    if self.debug {
                        let note = format!("[Debug] received {} bytes", bytes.len());
                        self.display
                            .notice(&self.editor, &note)
                            .map_err(ClientError::Terminal)?;
                    }
                }
                Ok(DisplayEvent::Closed) => {
                    self.display
                        .notice(&self.editor, "Server closed the connection.")
                        .map_err(ClientError::Terminal)?;
                    return Ok(Some(SessionEnd::ServerClosed));
                }
                Ok(DisplayEvent::Failed(e)) => return Err(ClientError::Receive(e)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(None),
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Result<Option<SessionEnd>, ClientError> {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                match self.editor.handle_key(key) {
                    EditOutcome::Continue => {
                        self.display
                            .render(&self.editor)
                            .map_err(ClientError::Terminal)?;
                    }
                    EditOutcome::Interrupt => {
                        self.display.commit().map_err(ClientError::Terminal)?;
                        return Ok(Some(SessionEnd::Quit));
                    }
                    EditOutcome::Submit(line) => {
                        self.display.commit().map_err(ClientError::Terminal)?;
                        match classify_line(&line) {
                            Input::Empty => {}
                            Input::Quit => return Ok(Some(SessionEnd::Quit)),
                            Input::Message(text) => self.send_line(text)?,
                        }
                        self.display
                            .render(&self.editor)
                            .map_err(ClientError::Terminal)?;
                    }
                }
            }
            Event::Resize(..) => {
                self.display
                    .render(&self.editor)
                    .map_err(ClientError::Terminal)?;
            }
            _ => {}
        }
        Ok(None)
    }

    fn send_line(&mut self, text: &str) -> Result<(), ClientError> {
        let frame = frame_line(text);
        let sent = send_all(&mut self.socket, &frame).map_err(ClientError::Send)?;
        if self.debug {
            // Logging would write to the raw-mode tty behind the display.
            let note = format!("[Debug] sent {} bytes", sent);
            self.display
                .notice(&self.editor, &note)
                .map_err(ClientError::Terminal)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::collections::VecDeque;
    use std::sync::mpsc::{self, Sender};

    /// Replays scripted events; once exhausted behaves like Ctrl-C.
    struct ScriptedInput {
        steps: VecDeque<Step>,
        injector: Sender<DisplayEvent>,
    }

    enum Step {
        Key(Event),
        Idle,
        Deliver(DisplayEvent),
    }

    impl InputSource for ScriptedInput {
        fn poll_event(&mut self, _timeout: Duration) -> io::Result<Option<Event>> {
            match self.steps.pop_front() {
                Some(Step::Key(event)) => Ok(Some(event)),
                Some(Step::Idle) => Ok(None),
                Some(Step::Deliver(event)) => {
                    let _ = self.injector.send(event);
                    Ok(None)
                }
                None => Ok(Some(Event::Key(KeyEvent::new(
                    KeyCode::Char('c'),
                    KeyModifiers::CONTROL,
                )))),
            }
        }
    }

    fn typed(text: &str) -> Vec<Step> {
        let mut steps: Vec<Step> = text
            .chars()
            .map(|c| Step::Key(Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))))
            .collect();
        steps.push(Step::Key(Event::Key(KeyEvent::new(
            KeyCode::Enter,
            KeyModifiers::NONE,
        ))));
        steps
    }

    fn session(
        steps: Vec<Step>,
    ) -> (Session<ScriptedInput, Vec<u8>, Vec<u8>>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel();
        let active = Arc::new(AtomicBool::new(true));
        let input = ScriptedInput {
            steps: steps.into_iter().collect(),
            injector: tx,
        };
        let session = Session::new(
            input,
            Vec::new(),
            Vec::new(),
            Arc::clone(&active),
            rx,
            ColorTag::BrightMagenta,
        );
        (session, active)
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line(""), Input::Empty);
        assert_eq!(classify_line("\n"), Input::Empty);
        assert_eq!(classify_line("quit"), Input::Quit);
        assert_eq!(classify_line("quit\n"), Input::Quit);
        assert_eq!(classify_line("quit now"), Input::Message("quit now"));
        assert_eq!(classify_line(" quit"), Input::Message(" quit"));
        assert_eq!(classify_line("hello"), Input::Message("hello"));
    }

    /// Accepts at most `chunk` bytes per call and fails transiently first.
    struct Trickle {
        data: Vec<u8>,
        chunk: usize,
        hiccups: VecDeque<io::ErrorKind>,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.hiccups.pop_front() {
                return Err(kind.into());
            }
            let n = buf.len().min(self.chunk);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_send_all_retries_partial_writes() {
        let mut writer = Trickle {
            data: Vec::new(),
            chunk: 3,
            hiccups: VecDeque::from([io::ErrorKind::Interrupted, io::ErrorKind::WouldBlock]),
        };
        assert_eq!(send_all(&mut writer, b"hello world\n").unwrap(), 12);
        assert_eq!(writer.data, b"hello world\n");
    }

    #[test]
    fn test_send_all_fails_on_error() {
        let mut writer = Trickle {
            data: Vec::new(),
            chunk: 3,
            hiccups: VecDeque::from([io::ErrorKind::BrokenPipe]),
        };
        let err = send_all(&mut writer, b"hello").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_send_all_zero_write() {
        let mut writer = Trickle {
            data: Vec::new(),
            chunk: 0,
            hiccups: VecDeque::new(),
        };
        let err = send_all(&mut writer, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_sends_framed_lines_until_quit() {
        let mut steps = typed("hi");
        steps.extend(typed(""));
        steps.extend(typed("second"));
        steps.extend(typed("quit"));
        steps.extend(typed("never sent"));

        let (mut session, _active) = session(steps);
        assert_eq!(session.run().unwrap(), SessionEnd::Quit);
        assert_eq!(session.socket, b"hi\nsecond\n");
    }

    #[test]
    fn test_ctrl_c_quits() {
        let (mut session, _active) = session(Vec::new());
        assert_eq!(session.run().unwrap(), SessionEnd::Quit);
        assert!(session.socket.is_empty());
    }

    #[test]
    fn test_message_injected_mid_edit() {
        let mut steps: Vec<Step> = Vec::new();
        steps.push(Step::Key(Event::Key(KeyEvent::new(
            KeyCode::Char('a'),
            KeyModifiers::NONE,
        ))));
        steps.push(Step::Key(Event::Key(KeyEvent::new(
            KeyCode::Char('b'),
            KeyModifiers::NONE,
        ))));
        steps.push(Step::Deliver(DisplayEvent::Message(b"from server\n".to_vec())));
        steps.push(Step::Idle);
        steps.extend(typed("c"));
        steps.extend(typed("quit"));

        let (mut session, _active) = session(steps);
        assert_eq!(session.run().unwrap(), SessionEnd::Quit);

        // The half-typed line survived the injection intact.
        assert_eq!(session.socket, b"abc\n");
        let out = String::from_utf8_lossy(session.display().get_ref()).into_owned();
        assert!(out.contains("from server"));
    }

    #[test]
    fn test_server_close_ends_session() {
        let steps = vec![Step::Deliver(DisplayEvent::Closed), Step::Idle];
        let (mut session, _active) = session(steps);
        assert_eq!(session.run().unwrap(), SessionEnd::ServerClosed);

        let out = String::from_utf8_lossy(session.display().get_ref()).into_owned();
        assert!(out.contains("Server closed the connection."));
    }

    #[test]
    fn test_receive_failure_is_reported() {
        let steps = vec![Step::Deliver(DisplayEvent::Failed(
            io::ErrorKind::ConnectionReset.into(),
        ))];
        let (mut session, _active) = session(steps);
        match session.run() {
            Err(ClientError::Receive(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_cleared_flag_stops_loop() {
        let (mut session, active) = session(Vec::new());
        active.store(false, Ordering::SeqCst);
        assert_eq!(session.run().unwrap(), SessionEnd::ServerClosed);
    }

    #[test]
    fn test_debug_counts_go_through_display() {
        let mut steps = vec![
            Step::Deliver(DisplayEvent::Message(b"ping\n".to_vec())),
            Step::Idle,
        ];
        steps.extend(typed("hi"));
        steps.extend(typed("quit"));

        let (session, _active) = session(steps);
        let mut session = session.with_debug(true);
        assert_eq!(session.run().unwrap(), SessionEnd::Quit);

        let out = String::from_utf8_lossy(session.display().get_ref()).into_owned();
        assert!(out.contains("[Debug] received 5 bytes"));
        assert!(out.contains("[Debug] sent 3 bytes"));
    }
}
