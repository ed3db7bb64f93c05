//! Wire protocol shared by the relay server and the chat client.
//!
//! - `metadata`: the one-time handshake (`name!?!?payload`)
//! - `color`: the display palette and color codes
//! - `echo`: newline framing and the colorized echo envelope

pub mod color;
pub mod echo;
pub mod metadata;

pub use color::{map_color, ColorTag};
pub use metadata::{ClientHello, CodecError, ServerHello};
