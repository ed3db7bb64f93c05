//! Terminal rendering for the chat client.
//!
//! Only the foreground thread owns a `Display`. Inbound messages are drawn
//! above the prompt by clearing the input line, printing the message and
//! redrawing the prompt with the editor's untouched buffer and cursor.

use crate::client::editor::LineEditor;
use crate::protocol::color::{ColorTag, RESET};
use crate::protocol::echo::EchoStripper;
use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::queue;
use std::io::{self, Write};

const PROMPT: &str = ">>>  ";
const PROMPT_COLOR: ColorTag = ColorTag::BrightGreen;

pub struct Display<W: Write> {
    out: W,
    /// Echo envelopes span receive chunks, so stripping is stateful.
    stripper: EchoStripper,
}

impl<W: Write> Display<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            stripper: EchoStripper::new(),
        }
    }

    /// Redraw the prompt line from the editor state.
    pub fn render(&mut self, editor: &LineEditor) -> io::Result<()> {
        let column = PROMPT.chars().count() + editor.cursor();
        queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(PROMPT_COLOR.escape()),
            Print(PROMPT),
            Print(RESET),
            Print(editor.contents()),
            MoveToColumn(u16::try_from(column).unwrap_or(u16::MAX)),
        )?;
        self.out.flush()
    }

    /// Print an inbound chunk above the prompt, then restore the prompt.
    pub fn inject(&mut self, editor: &LineEditor, chunk: &[u8], color: ColorTag) -> io::Result<()> {
        let payload = self.stripper.feed(chunk);
        if payload.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&payload);
        self.print_above(editor, &text, color)
    }

    /// Print a status line above the prompt.
    pub fn notice(&mut self, editor: &LineEditor, text: &str) -> io::Result<()> {
        self.print_above(editor, text, ColorTag::BrightBlack)
    }

    /// Move past a committed line.
    pub fn commit(&mut self) -> io::Result<()> {
        queue!(self.out, Print("\r\n"))?;
        self.out.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn print_above(&mut self, editor: &LineEditor, text: &str, color: ColorTag) -> io::Result<()> {
        queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        for line in text.trim_end_matches(['\n', '\r']).split('\n') {
            queue!(
                self.out,
                Print(color.escape()),
                Print(line.trim_end_matches('\r')),
                Print(RESET),
                Print("\r\n"),
            )?;
        }
        self.render(editor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    fn editor_with(text: &str, lefts: usize) -> LineEditor {
        let mut editor = LineEditor::new();
        for c in text.chars() {
            editor.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
        for _ in 0..lefts {
            editor.handle_key(KeyEvent::new(KeyCode::Left, KeyModifiers::NONE));
        }
        editor
    }

    #[test]
    fn test_inject_preserves_edit_state() {
        let editor = editor_with("partial msg", 4);
        let before = (editor.contents(), editor.cursor());

        let mut display = Display::new(Vec::new());
        display
            .inject(&editor, b"\x1b[93mincoming\n\x1b[0m", ColorTag::BrightCyan)
            .unwrap();

        assert_eq!((editor.contents(), editor.cursor()), before);

        let out = String::from_utf8(display.get_ref().clone()).unwrap();
        let msg_at = out.find("incoming").unwrap();
        let line_at = out.rfind("partial msg").unwrap();
        assert!(msg_at < line_at, "prompt must be redrawn after the message");
        assert!(out[..msg_at].ends_with(ColorTag::BrightCyan.escape()));
        assert!(out.contains("incoming\x1b[0m\r\n"));
    }

    #[test]
    fn test_render_places_cursor() {
        let editor = editor_with("abc", 1);
        let mut display = Display::new(Vec::new());
        display.render(&editor).unwrap();

        let out = String::from_utf8(display.get_ref().clone()).unwrap();
        // Columns are 1-based in the escape: prompt (5) + cursor (2) + 1.
        assert!(out.ends_with("abc\x1b[8G"));
    }

    #[test]
    fn test_multiline_message() {
        let editor = LineEditor::new();
        let mut display = Display::new(Vec::new());
        display.notice(&editor, "one\r\ntwo\n").unwrap();

        let out = String::from_utf8(display.get_ref().clone()).unwrap();
        assert!(out.contains("one\x1b[0m\r\n"));
        assert!(out.contains("two\x1b[0m\r\n"));
        assert!(!out.contains("\r\r"));
    }

    #[test]
    fn test_inject_strips_envelopes_across_chunks() {
        let editor = LineEditor::new();
        let mut display = Display::new(Vec::new());
        display
            .inject(&editor, b"\x1b[93mone\n\x1b[0m\x1b[93mtw", ColorTag::BrightRed)
            .unwrap();
        display
            .inject(&editor, b"o\n\x1b[", ColorTag::BrightRed)
            .unwrap();
        display.inject(&editor, b"0m", ColorTag::BrightRed).unwrap();

        let out = String::from_utf8(display.get_ref().clone()).unwrap();
        assert!(!out.contains("\x1b[93m"));
        assert!(out.contains("one\x1b[0m\r\n"));
        assert!(out.contains("tw\x1b[0m\r\n"));
        assert!(out.contains("o\x1b[0m\r\n"));
        // Only the resets Display itself writes after each printed line.
        assert_eq!(out.matches("\x1b[0m\r\n").count(), 3);
    }
}
