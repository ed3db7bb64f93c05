//! Readline-style line editing.
//!
//! The editor only holds state; drawing is done by
//! [`Display`](crate::client::display::Display).

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Result of feeding one key to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The buffer may have changed; keep editing.
    Continue,
    /// Enter was pressed; the committed line, without newline.
    Submit(String),
    /// Ctrl-C, or Ctrl-D on an empty line.
    Interrupt,
}

/// An editable line with a cursor and a submit history.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: Vec<char>,
    /// Cursor position in chars, `0..=buffer.len()`.
    cursor: usize,
    history: Vec<String>,
    /// Index into `history` while browsing it.
    history_pos: Option<usize>,
    /// Line being edited before history browsing started.
    stash: Vec<char>,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn insert(&mut self, c: char) {
        self.buffer.insert(self.cursor, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            self.buffer.remove(self.cursor);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.buffer.len() {
            self.buffer.remove(self.cursor);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.buffer.len());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.buffer.len();
    }

    /// Ctrl-U
    pub fn kill_to_start(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
    }

    /// Ctrl-K
    pub fn kill_to_end(&mut self) {
        self.buffer.truncate(self.cursor);
    }

    /// Ctrl-W: delete the word before the cursor and the spaces after it.
    pub fn delete_word_back(&mut self) {
        let mut start = self.cursor;
        while start > 0 && self.buffer[start - 1].is_whitespace() {
            start -= 1;
        }
        while start > 0 && !self.buffer[start - 1].is_whitespace() {
            start -= 1;
        }
        self.buffer.drain(start..self.cursor);
        self.cursor = start;
    }

    pub fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let pos = match self.history_pos {
            None => {
                self.stash = std::mem::take(&mut self.buffer);
                self.history.len() - 1
            }
            Some(pos) => pos.saturating_sub(1),
        };
        self.history_pos = Some(pos);
        self.load(self.history[pos].chars().collect());
    }

    pub fn history_next(&mut self) {
        let Some(pos) = self.history_pos else {
            return;
        };
        if pos + 1 < self.history.len() {
            self.history_pos = Some(pos + 1);
            self.load(self.history[pos + 1].chars().collect());
        } else {
            self.history_pos = None;
            let stash = std::mem::take(&mut self.stash);
            self.load(stash);
        }
    }

    /// Take the current line, recording non-empty lines in history.
    pub fn submit(&mut self) -> String {
        let line = self.contents();
        if !line.trim().is_empty() && self.history.last() != Some(&line) {
            self.history.push(line.clone());
        }
        self.buffer.clear();
        self.stash.clear();
        self.cursor = 0;
        self.history_pos = None;
        line
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> EditOutcome {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Enter => return EditOutcome::Submit(self.submit()),
            KeyCode::Char('c') if ctrl => return EditOutcome::Interrupt,
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    return EditOutcome::Interrupt;
                }
                self.delete();
            }
            KeyCode::Char('a') if ctrl => self.home(),
            KeyCode::Char('e') if ctrl => self.end(),
            KeyCode::Char('b') if ctrl => self.move_left(),
            KeyCode::Char('f') if ctrl => self.move_right(),
            KeyCode::Char('u') if ctrl => self.kill_to_start(),
            KeyCode::Char('k') if ctrl => self.kill_to_end(),
            KeyCode::Char('w') if ctrl => self.delete_word_back(),
            KeyCode::Char(_) if ctrl => {}
            KeyCode::Char(c) => self.insert(c),
            KeyCode::Backspace => self.backspace(),
            KeyCode::Delete => self.delete(),
            KeyCode::Left => self.move_left(),
            KeyCode::Right => self.move_right(),
            KeyCode::Home => self.home(),
            KeyCode::End => self.end(),
            KeyCode::Up => self.history_prev(),
            KeyCode::Down => self.history_next(),
            _ => {}
        }

        EditOutcome::Continue
    }

    fn load(&mut self, buffer: Vec<char>) {
        self.buffer = buffer;
        self.cursor = self.buffer.len();
    }
}
