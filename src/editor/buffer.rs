use ropey::Rope;

use crate::script::lexer::is_ident_continue;

/// Spaces inserted by the Tab key.
pub const TAB_WIDTH: usize = 2;

/// Cursor position in the editor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Zero-based line index.
    pub line: usize,
    /// Zero-based column (byte offset within the line).
    pub col: usize,
    /// Remembered column for vertical movement (sticky column).
    col_memory: usize,
}

impl Cursor {
    pub const fn new() -> Self {
        Self::at(0, 0)
    }

    pub const fn at(line: usize, col: usize) -> Self {
        Self {
            line,
            col,
            col_memory: col,
        }
    }

    const fn set_col(&mut self, col: usize) {
        self.col = col;
        self.col_memory = col;
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Direction for cursor movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// The snippet source, backed by a rope.
///
/// Every mutation bumps [`EditorBuffer::revision`], which is how the rest of
/// the app notices that the text changed.
pub struct EditorBuffer {
    rope: Rope,
    cursor: Cursor,
    revision: u64,
}

impl EditorBuffer {
    pub fn from_text(text: &str) -> Self {
        Self {
            rope: Rope::from_str(&normalize_newlines(text)),
            cursor: Cursor::new(),
            revision: 0,
        }
    }

    pub fn empty() -> Self {
        Self::from_text("")
    }

    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Counter bumped by every edit.
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Content of a line without its trailing newline.
    pub fn line_at(&self, line_idx: usize) -> Option<String> {
        if line_idx >= self.rope.len_lines() {
            return None;
        }
        let mut line = self.rope.line(line_idx).to_string();
        if line.ends_with('\n') {
            line.pop();
        }
        Some(line)
    }

    /// Length of a line in bytes, newline excluded.
    pub fn line_len(&self, line_idx: usize) -> usize {
        self.line_at(line_idx).map_or(0, |s| s.len())
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    /// Replace the whole text and put the cursor at the start.
    pub fn set_text(&mut self, text: &str) {
        self.rope = Rope::from_str(&normalize_newlines(text));
        self.cursor = Cursor::new();
        self.touch();
    }

    pub fn insert_char(&mut self, ch: char) {
        if ch == '\n' {
            self.split_line();
            return;
        }
        let char_idx = self.cursor_char_idx();
        self.rope.insert_char(char_idx, ch);
        self.cursor.set_col(self.cursor.col + ch.len_utf8());
        self.touch();
    }

    /// Insert text at the cursor and leave the cursor after it.
    pub fn insert_str(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        let s = normalize_newlines(s);
        let char_idx = self.cursor_char_idx();
        self.rope.insert(char_idx, &s);

        match s.rsplit_once('\n') {
            Some((head, tail)) => {
                self.cursor.line += head.matches('\n').count() + 1;
                self.cursor.set_col(tail.len());
            }
            None => self.cursor.set_col(self.cursor.col + s.len()),
        }
        self.touch();
    }

    pub fn insert_tab(&mut self) {
        self.insert_str(&" ".repeat(TAB_WIDTH));
    }

    /// Break the line at the cursor, carrying its indentation onto the new line.
    pub fn split_line(&mut self) {
        let indent: String = self
            .line_at(self.cursor.line)
            .unwrap_or_default()
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect();
        let indent = &indent[..indent.len().min(self.cursor.col)];
        let char_idx = self.cursor_char_idx();
        self.rope.insert(char_idx, &format!("\n{indent}"));
        self.cursor.line += 1;
        self.cursor.set_col(indent.len());
        self.touch();
    }

    /// Backspace. Returns `true` if something was removed.
    pub fn delete_back(&mut self) -> bool {
        if self.cursor.col == 0 && self.cursor.line == 0 {
            return false;
        }

        let char_idx = self.cursor_char_idx();
        if self.cursor.col == 0 {
            let prev_len = self.line_len(self.cursor.line - 1);
            self.rope.remove(char_idx - 1..char_idx);
            self.cursor.line -= 1;
            self.cursor.set_col(prev_len);
        } else {
            let prev_len = self.prev_char_len();
            self.rope.remove(char_idx - 1..char_idx);
            self.cursor.set_col(self.cursor.col - prev_len);
        }
        self.touch();
        true
    }

    /// Delete. Returns `true` if something was removed.
    pub fn delete_forward(&mut self) -> bool {
        let at_line_end = self.cursor.col >= self.line_len(self.cursor.line);
        if at_line_end && self.cursor.line + 1 >= self.line_count() {
            return false;
        }
        let char_idx = self.cursor_char_idx();
        self.rope.remove(char_idx..=char_idx);
        self.touch();
        true
    }

    /// The identifier fragment ending at the cursor and the column it starts at.
    pub fn word_before_cursor(&self) -> (usize, String) {
        let line = self.line_at(self.cursor.line).unwrap_or_default();
        let before = &line[..self.cursor.col.min(line.len())];
        let start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| is_ident_continue(*c))
            .last()
            .map_or(before.len(), |(i, _)| i);
        (start, before[start..].to_string())
    }

    /// The character just before column `col` on the cursor line.
    pub fn char_before(&self, col: usize) -> Option<char> {
        let line = self.line_at(self.cursor.line)?;
        line.get(..col.min(line.len()))?.chars().next_back()
    }

    /// Replace the text between `start_col` and the cursor on the cursor line.
    pub fn replace_before_cursor(&mut self, start_col: usize, text: &str) {
        let start_col = start_col.min(self.cursor.col);
        let line_start = self.rope.line_to_char(self.cursor.line);
        let line = self.rope.line(self.cursor.line);
        let from = line_start + line.byte_to_char(start_col);
        let to = self.cursor_char_idx();
        self.rope.remove(from..to);
        self.rope.insert(from, text);
        self.cursor.set_col(start_col + text.len());
        self.touch();
    }

    pub fn move_cursor(&mut self, direction: Direction) {
        match direction {
            Direction::Left => self.move_left(),
            Direction::Right => self.move_right(),
            Direction::Up => self.move_vertical(-1),
            Direction::Down => self.move_vertical(1),
        }
    }

    /// Home: first non-blank character, or column 0 if already there.
    pub fn move_home(&mut self) {
        let line = self.line_at(self.cursor.line).unwrap_or_default();
        let indent = line.len() - line.trim_start().len();
        let target = if self.cursor.col == indent { 0 } else { indent };
        self.cursor.set_col(target);
    }

    pub fn move_end(&mut self) {
        self.cursor.set_col(self.line_len(self.cursor.line));
    }

    pub fn move_word_left(&mut self) {
        if self.cursor.col == 0 {
            if self.cursor.line > 0 {
                self.cursor.line -= 1;
                self.cursor.set_col(self.line_len(self.cursor.line));
            }
            return;
        }

        let line = self.line_at(self.cursor.line).unwrap_or_default();
        let trimmed = line[..self.cursor.col].trim_end_matches(|c: char| !is_ident_continue(c));
        let pos = trimmed
            .char_indices()
            .rev()
            .find(|(_, c)| !is_ident_continue(*c))
            .map_or(0, |(i, c)| i + c.len_utf8());
        self.cursor.set_col(pos);
    }

    pub fn move_word_right(&mut self) {
        let line_len = self.line_len(self.cursor.line);
        if self.cursor.col >= line_len {
            if self.cursor.line + 1 < self.line_count() {
                self.cursor.line += 1;
                self.cursor.set_col(0);
            }
            return;
        }

        let line = self.line_at(self.cursor.line).unwrap_or_default();
        let after = &line[self.cursor.col..];
        let word_end = after
            .find(|c: char| !is_ident_continue(c))
            .unwrap_or(after.len());
        let rest = &after[word_end..];
        let gap = rest.find(is_ident_continue).unwrap_or(rest.len());
        self.cursor.set_col(self.cursor.col + word_end + gap);
    }

    /// Move to a position, clamped to the text. Columns inside a multi-byte
    /// character snap back to its start.
    pub fn move_to(&mut self, line: usize, col: usize) {
        self.cursor.line = line.min(self.line_count().saturating_sub(1));
        let text = self.line_at(self.cursor.line).unwrap_or_default();
        let mut col = col.min(text.len());
        while !text.is_char_boundary(col) {
            col -= 1;
        }
        self.cursor.set_col(col);
    }

    pub const fn move_to_start(&mut self) {
        self.cursor = Cursor::new();
    }

    pub fn move_to_end(&mut self) {
        let last = self.line_count().saturating_sub(1);
        self.cursor.line = last;
        self.cursor.set_col(self.line_len(last));
    }

    // --- Private helpers ---

    const fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn cursor_char_idx(&self) -> usize {
        let line = self.rope.line(self.cursor.line);
        let col = self.cursor.col.min(line.len_bytes());
        self.rope.line_to_char(self.cursor.line) + line.byte_to_char(col)
    }

    fn prev_char_len(&self) -> usize {
        self.char_before(self.cursor.col).map_or(1, char::len_utf8)
    }

    fn move_left(&mut self) {
        if self.cursor.col > 0 {
            let len = self.prev_char_len();
            self.cursor.set_col(self.cursor.col - len);
        } else if self.cursor.line > 0 {
            self.cursor.line -= 1;
            self.cursor.set_col(self.line_len(self.cursor.line));
        }
    }

    fn move_right(&mut self) {
        let line = self.line_at(self.cursor.line).unwrap_or_default();
        if let Some(ch) = line[self.cursor.col.min(line.len())..].chars().next() {
            self.cursor.set_col(self.cursor.col + ch.len_utf8());
        } else if self.cursor.line + 1 < self.line_count() {
            self.cursor.line += 1;
            self.cursor.set_col(0);
        }
    }

    fn move_vertical(&mut self, delta: isize) {
        let Some(target) = self.cursor.line.checked_add_signed(delta) else {
            return;
        };
        if target >= self.line_count() {
            return;
        }
        self.cursor.line = target;
        let text = self.line_at(target).unwrap_or_default();
        let mut col = self.cursor.col_memory.min(text.len());
        while !text.is_char_boundary(col) {
            col -= 1;
        }
        self.cursor.col = col;
    }
}

impl Default for EditorBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for EditorBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorBuffer")
            .field("lines", &self.rope.len_lines())
            .field("cursor", &self.cursor)
            .field("revision", &self.revision)
            .finish()
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_end(text: &str) -> EditorBuffer {
        let mut buf = EditorBuffer::from_text(text);
        buf.move_to_end();
        buf
    }

    #[test]
    fn test_empty_buffer_has_one_line() {
        let buf = EditorBuffer::empty();
        assert_eq!(buf.line_count(), 1);
        assert_eq!(buf.line_at(0), Some(String::new()));
        assert_eq!(buf.line_at(1), None);
    }

    #[test]
    fn test_crlf_is_normalized() {
        let buf = EditorBuffer::from_text("a\r\nb\rc");
        assert_eq!(buf.text(), "a\nb\nc");
        assert_eq!(buf.line_count(), 3);
    }

    #[test]
    fn test_every_edit_bumps_revision() {
        let mut buf = EditorBuffer::from_text("x");
        let start = buf.revision();
        buf.insert_char('y');
        buf.delete_back();
        buf.split_line();
        buf.set_text("fresh");
        assert_eq!(buf.revision(), start + 4);
    }

    #[test]
    fn test_noop_edits_keep_revision() {
        let mut buf = EditorBuffer::from_text("x");
        buf.insert_str("");
        assert!(!buf.delete_back());
        buf.move_cursor(Direction::Right);
        assert!(!buf.delete_forward());
        assert_eq!(buf.revision(), 0);
    }

    #[test]
    fn test_set_text_replaces_and_resets_cursor() {
        let mut buf = at_end("old\ntext");
        buf.set_text("new");
        assert_eq!(buf.text(), "new");
        assert_eq!(buf.cursor(), Cursor::at(0, 0));
    }

    #[test]
    fn test_insert_char_and_multibyte() {
        let mut buf = at_end("caf");
        buf.insert_char('é');
        assert_eq!(buf.text(), "café");
        assert_eq!(buf.cursor().col, 5);
        buf.move_cursor(Direction::Left);
        assert_eq!(buf.cursor().col, 3);
        buf.delete_forward();
        assert_eq!(buf.text(), "caf");
    }

    #[test]
    fn test_insert_str_multiline_moves_cursor() {
        let mut buf = EditorBuffer::from_text("()");
        buf.move_to(0, 1);
        buf.insert_str("a,\r\n  b");
        assert_eq!(buf.text(), "(a,\n  b)");
        assert_eq!(buf.cursor(), Cursor::at(1, 3));
    }

    #[test]
    fn test_tab_inserts_spaces() {
        let mut buf = EditorBuffer::empty();
        buf.insert_tab();
        assert_eq!(buf.text(), "  ");
        assert_eq!(buf.cursor().col, TAB_WIDTH);
    }

    #[test]
    fn test_split_line_keeps_indent() {
        let mut buf = at_end("  if (x) {");
        buf.split_line();
        assert_eq!(buf.line_at(1), Some("  ".to_string()));
        assert_eq!(buf.cursor(), Cursor::at(1, 2));
    }

    #[test]
    fn test_split_line_inside_indent() {
        let mut buf = EditorBuffer::from_text("    x");
        buf.move_to(0, 1);
        buf.split_line();
        assert_eq!(buf.text(), " \n    x");
    }

    #[test]
    fn test_delete_back_joins_lines() {
        let mut buf = EditorBuffer::from_text("hello\nworld");
        buf.move_to(1, 0);
        assert!(buf.delete_back());
        assert_eq!(buf.text(), "helloworld");
        assert_eq!(buf.cursor(), Cursor::at(0, 5));
    }

    #[test]
    fn test_delete_forward_joins_lines() {
        let mut buf = EditorBuffer::from_text("hello\nworld");
        buf.move_to(0, 5);
        assert!(buf.delete_forward());
        assert_eq!(buf.text(), "helloworld");
    }

    #[test]
    fn test_left_right_wrap_across_lines() {
        let mut buf = EditorBuffer::from_text("ab\ncd");
        buf.move_to(1, 0);
        buf.move_cursor(Direction::Left);
        assert_eq!(buf.cursor(), Cursor::at(0, 2));
        buf.move_cursor(Direction::Right);
        assert_eq!(buf.cursor(), Cursor::at(1, 0));
    }

    #[test]
    fn test_vertical_movement_remembers_column() {
        let mut buf = EditorBuffer::from_text("hello\nhi\nworld");
        buf.move_to(0, 4);
        buf.move_cursor(Direction::Down);
        assert_eq!(buf.cursor().col, 2);
        buf.move_cursor(Direction::Down);
        assert_eq!(buf.cursor().col, 4);
        buf.move_cursor(Direction::Down);
        assert_eq!(buf.cursor().line, 2);
    }

    #[test]
    fn test_vertical_movement_snaps_to_char_boundary() {
        let mut buf = EditorBuffer::from_text("abc\né");
        buf.move_to(0, 1);
        buf.move_cursor(Direction::Down);
        assert_eq!(buf.cursor().col, 0);
    }

    #[test]
    fn test_home_toggles_between_indent_and_column_zero() {
        let mut buf = at_end("    let x");
        buf.move_home();
        assert_eq!(buf.cursor().col, 4);
        buf.move_home();
        assert_eq!(buf.cursor().col, 0);
    }

    #[test]
    fn test_word_motion_treats_dollar_as_identifier() {
        let mut buf = EditorBuffer::from_text("let $el = x");
        buf.move_word_right();
        assert_eq!(buf.cursor().col, 4);
        buf.move_word_right();
        assert_eq!(buf.cursor().col, 10);
        buf.move_word_left();
        assert_eq!(buf.cursor().col, 4);
    }

    #[test]
    fn test_word_left_wraps_to_previous_line() {
        let mut buf = EditorBuffer::from_text("hello\nworld");
        buf.move_to(1, 0);
        buf.move_word_left();
        assert_eq!(buf.cursor(), Cursor::at(0, 5));
    }

    #[test]
    fn test_word_before_cursor() {
        let buf = at_end("console.lo");
        assert_eq!(buf.word_before_cursor(), (8, "lo".to_string()));
        assert_eq!(buf.char_before(8), Some('.'));

        let buf = at_end("x = ");
        assert_eq!(buf.word_before_cursor(), (4, String::new()));
    }

    #[test]
    fn test_replace_before_cursor() {
        let mut buf = EditorBuffer::from_text("console.lo(1)");
        buf.move_to(0, 10);
        buf.replace_before_cursor(8, "log");
        assert_eq!(buf.text(), "console.log(1)");
        assert_eq!(buf.cursor().col, 11);
    }

    #[test]
    fn test_move_to_clamps() {
        let mut buf = EditorBuffer::from_text("hello");
        buf.move_to(100, 100);
        assert_eq!(buf.cursor(), Cursor::at(0, 5));
    }
}
