//! Colorized echo framing.
//!
//! Chat traffic is newline-framed with no length prefix. The server sends
//! each received chunk back wrapped in a color escape:
//!
//! ```text
//! Client sends:   hello\n
//! Server echoes:  ESC[93m hello\n ESC[0m
//! ```

use crate::protocol::color::{ColorTag, RESET};
use bytes::{BufMut, BytesMut};

/// Escape written before every echoed payload (5 bytes).
pub const ECHO_PREFIX: &[u8] = b"\x1b[93m";

/// Escape written after every echoed payload (4 bytes).
pub const ECHO_SUFFIX: &[u8] = RESET.as_bytes();

/// Color the echo prefix selects.
pub const ECHO_COLOR: ColorTag = ColorTag::BrightYellow;

/// Append the colorized echo of `payload` to `out`.
pub fn push_echo(out: &mut BytesMut, payload: &[u8]) {
    out.reserve(ECHO_PREFIX.len() + payload.len() + ECHO_SUFFIX.len());
    out.put_slice(ECHO_PREFIX);
    out.put_slice(payload);
    out.put_slice(ECHO_SUFFIX);
}

/// Frame a line for transmission: the line plus one trailing newline.
pub fn frame_line(line: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    frame
}

/// Removes echo envelopes from a byte stream.
///
/// Reads do not line up with echoes: one read may carry several envelopes
/// and an escape may be split between two reads. A trailing partial escape
/// is held back until the next chunk decides it.
#[derive(Debug, Default)]
pub struct EchoStripper {
    carry: Vec<u8>,
}

impl EchoStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk, returning the payload bytes it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(chunk);

        let mut out = Vec::with_capacity(data.len());
        let mut i = 0;
        while i < data.len() {
            let rest = &data[i..];
            if rest.starts_with(ECHO_PREFIX) {
                i += ECHO_PREFIX.len();
            } else if rest.starts_with(ECHO_SUFFIX) {
                i += ECHO_SUFFIX.len();
            } else if is_partial_escape(rest) {
                self.carry = rest.to_vec();
                break;
            } else {
                out.push(data[i]);
                i += 1;
            }
        }
        out
    }

    /// Bytes held back waiting for the rest of an escape.
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }
}

fn is_partial_escape(rest: &[u8]) -> bool {
    (rest.len() < ECHO_PREFIX.len() && ECHO_PREFIX.starts_with(rest))
        || (rest.len() < ECHO_SUFFIX.len() && ECHO_SUFFIX.starts_with(rest))
}
