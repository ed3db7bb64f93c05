//! Read tracing for the relay's debug levels.

use std::fmt::Write;
use std::str::FromStr;
use tracing::info;

/// How much of each read the server reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugLevel {
    /// Nothing beyond lifecycle events.
    #[default]
    Off,
    /// Byte count and payload text.
    Normal,
    /// Hex dump with a printable column.
    Advanced,
}

impl DebugLevel {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(DebugLevel::Off),
            1 => Some(DebugLevel::Normal),
            2 => Some(DebugLevel::Advanced),
            _ => None,
        }
    }

    /// Report a completed read from `slot`.
    pub fn trace_read(self, slot: usize, data: &[u8]) {
        match self {
            DebugLevel::Off => {}
            DebugLevel::Normal => {
                info!(
                    slot,
                    bytes = data.len(),
                    payload = %String::from_utf8_lossy(data),
                    "Read"
                );
            }
            DebugLevel::Advanced => {
                info!(slot, bytes = data.len(), "Read\n{}", hex_dump(data));
            }
        }
    }
}

impl FromStr for DebugLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .ok()
            .and_then(DebugLevel::from_level)
            .ok_or_else(|| format!("invalid debug level '{}', expected 0, 1 or 2", s.trim()))
    }
}

/// Format `data` as 16-byte rows of hex followed by printable ASCII.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for row in data.chunks(16) {
        for byte in row {
            let _ = write!(out, "{:02x} ", byte);
        }
        for _ in row.len()..16 {
            out.push_str("   ");
        }
        for &byte in row {
            out.push(if (32..=126).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("0".parse::<DebugLevel>(), Ok(DebugLevel::Off));
        assert_eq!(" 1\n".parse::<DebugLevel>(), Ok(DebugLevel::Normal));
        assert_eq!("2".parse::<DebugLevel>(), Ok(DebugLevel::Advanced));
        assert!("3".parse::<DebugLevel>().is_err());
        assert!("x".parse::<DebugLevel>().is_err());
    }

    #[test]
    fn test_hex_dump_single_row() {
        assert_eq!(
            hex_dump(b"hi\n"),
            format!("68 69 0a {}hi.\n", "   ".repeat(13))
        );
    }

    #[test]
    fn test_hex_dump_rows() {
        let data: Vec<u8> = (0x41..0x41 + 20).collect();
        let dump = hex_dump(&data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(lines[1].starts_with("51 52 53 54 "));
        assert!(lines[1].ends_with("QRST"));
    }

    #[test]
    fn test_hex_dump_empty() {
        assert_eq!(hex_dump(b""), "");
    }
}
