//! Handshake metadata codec.
//!
//! Each side sends exactly one metadata message when a connection starts:
//!
//! ```text
//! Client -> Server:  <name>!?!?<36-char uuid>
//! Server -> Client:  <server name>!?!?<color digit>
//! ```
//!
//! Messages are split on the first separator occurrence. Names must not
//! contain the separator and a whole message must stay below
//! [`META_BUFFER_SIZE`] bytes.

use crate::protocol::color::{map_color, ColorTag};
use std::fmt;

/// Separator between the name and the payload.
pub const SEPARATOR: &[u8] = b"!?!?";

/// Upper bound (exclusive) on the encoded message length.
pub const META_BUFFER_SIZE: usize = 256;

/// Length of a hyphenated UUID string.
pub const UUID_LEN: usize = 36;

/// Handshake encode/decode errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The encoded message would not fit in the metadata buffer.
    Overflow { len: usize },
    /// The name contains the separator sequence.
    SeparatorInName,
    /// No separator found.
    MalformedFrame,
    /// The client payload is not a UUID-length string.
    InvalidUuid,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Overflow { len } => write!(
                f,
                "metadata message of {} bytes exceeds the {} byte limit",
                len, META_BUFFER_SIZE
            ),
            CodecError::SeparatorInName => write!(f, "name contains the metadata separator"),
            CodecError::MalformedFrame => write!(f, "metadata separator not found"),
            CodecError::InvalidUuid => write!(f, "metadata payload is not a uuid"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Join `name` and `payload` with the separator.
///
/// Fails instead of truncating when the result would reach
/// [`META_BUFFER_SIZE`].
pub fn encode(name: &[u8], payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if find_separator(name).is_some() {
        return Err(CodecError::SeparatorInName);
    }

    let len = name.len() + SEPARATOR.len() + payload.len();
    if len >= META_BUFFER_SIZE {
        return Err(CodecError::Overflow { len });
    }

    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(name);
    out.extend_from_slice(SEPARATOR);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a message on the first separator.
///
/// The payload is everything after the separator, verbatim, including any
/// trailing newline or NUL bytes the transport added.
pub fn decode(input: &[u8]) -> Result<(&[u8], &[u8]), CodecError> {
    let pos = find_separator(input).ok_or(CodecError::MalformedFrame)?;
    Ok((&input[..pos], &input[pos + SEPARATOR.len()..]))
}

/// Position of the first separator in `buffer`.
pub fn find_separator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(SEPARATOR.len())
        .position(|window| window == SEPARATOR)
}

/// Client leg of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub name: String,
    pub uuid: String,
}

impl ClientHello {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.uuid.len() != UUID_LEN {
            return Err(CodecError::InvalidUuid);
        }
        encode(self.name.as_bytes(), self.uuid.as_bytes())
    }

    /// Parse a client hello from an accumulated read buffer.
    ///
    /// Returns `Ok(None)` while the separator or the full UUID has not
    /// arrived yet. On success also returns the bytes that followed the
    /// UUID, which belong to the chat stream.
    pub fn parse(input: &[u8]) -> Result<Option<(Self, &[u8])>, CodecError> {
        let (name, payload) = match decode(input) {
            Ok(parts) => parts,
            Err(CodecError::MalformedFrame) if input.len() < META_BUFFER_SIZE => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };

        // Same bound as `encode`, however the bytes were split across reads.
        let len = name.len() + SEPARATOR.len() + UUID_LEN;
        if len >= META_BUFFER_SIZE {
            return Err(CodecError::Overflow { len });
        }

        if payload.len() < UUID_LEN {
            return Ok(None);
        }

        let uuid = std::str::from_utf8(&payload[..UUID_LEN]).map_err(|_| CodecError::InvalidUuid)?;
        let rest = trim_leading_padding(&payload[UUID_LEN..]);

        Ok(Some((
            Self {
                name: String::from_utf8_lossy(name).into_owned(),
                uuid: uuid.to_string(),
            },
            rest,
        )))
    }
}

/// Server leg of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub name: String,
    pub color_code: u8,
}

impl ServerHello {
    pub fn new(name: impl Into<String>, color_code: u8) -> Self {
        Self {
            name: name.into(),
            color_code,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let digit = b'0'.wrapping_add(self.color_code);
        encode(self.name.as_bytes(), &[digit])
    }

    pub fn parse(input: &[u8]) -> Result<Self, CodecError> {
        let (name, payload) = decode(input)?;
        // A missing digit becomes an out-of-range code, i.e. the default color.
        let color_code = payload.first().map_or(u8::MAX, |b| b.wrapping_sub(b'0'));
        Ok(Self {
            name: String::from_utf8_lossy(name).into_owned(),
            color_code,
        })
    }

    /// Display color for the code carried in this hello.
    pub fn color(&self) -> ColorTag {
        map_color(i64::from(self.color_code))
    }
}

fn trim_leading_padding(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != 0 && b != b'\n' && b != b'\r')
        .unwrap_or(bytes.len());
    &bytes[start..]
}
