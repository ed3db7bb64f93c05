//! Display colors shared by the server and the client.
//!
//! The server hands each connection a single-digit color code during the
//! handshake. Codes `0..=6` select one of seven bright foreground colors;
//! anything else selects the default (bright black).

/// Reset all terminal attributes.
pub const RESET: &str = "\x1b[0m";

/// Number of assignable colors. Connection colors cycle through this many
/// codes in arrival order.
pub const PALETTE_SIZE: usize = 7;

/// A display color tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorTag {
    BrightBlue,
    BrightCyan,
    BrightGreen,
    BrightMagenta,
    BrightRed,
    BrightWhite,
    BrightYellow,
    /// Fallback for any code outside the palette.
    BrightBlack,
}

impl ColorTag {
    /// ANSI escape sequence selecting this foreground color.
    pub fn escape(self) -> &'static str {
        match self {
            ColorTag::BrightBlue => "\x1b[94m",
            ColorTag::BrightCyan => "\x1b[96m",
            ColorTag::BrightGreen => "\x1b[92m",
            ColorTag::BrightMagenta => "\x1b[95m",
            ColorTag::BrightRed => "\x1b[91m",
            ColorTag::BrightWhite => "\x1b[97m",
            ColorTag::BrightYellow => "\x1b[93m",
            ColorTag::BrightBlack => "\x1b[90m",
        }
    }

    /// Color code assigned to the `sequence`th accepted connection.
    ///
    /// Colors depend on arrival order only, so a reconnecting client can
    /// come back with a different color.
    pub fn code_for_arrival(sequence: usize) -> u8 {
        (sequence % PALETTE_SIZE) as u8
    }
}

/// Map a numeric color code to a tag.
///
/// Total over all integers: `0..=6` map to seven distinct tags and every
/// other value, negatives included, maps to [`ColorTag::BrightBlack`].
pub fn map_color(code: i64) -> ColorTag {
    match code {
        0 => ColorTag::BrightBlue,
        1 => ColorTag::BrightCyan,
        2 => ColorTag::BrightGreen,
        3 => ColorTag::BrightMagenta,
        4 => ColorTag::BrightRed,
        5 => ColorTag::BrightWhite,
        6 => ColorTag::BrightYellow,
        _ => ColorTag::BrightBlack,
    }
}
