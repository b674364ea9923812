//! Completion candidates for the identifier under the cursor.
//!
//! Candidates come from the language's keywords and globals plus every
//! identifier already present in the buffer. After a `.`, property names
//! are offered instead.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::EditorBuffer;
use crate::script::{known_members, known_words};

/// Most entries shown in the popup.
pub const MAX_CANDIDATES: usize = 50;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").expect("identifier pattern"));
static MEMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.\s*([A-Za-z_$][A-Za-z0-9_$]*)").expect("member pattern")
});

/// An open completion popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Column where the replaced fragment starts.
    pub start_col: usize,
    pub prefix: String,
    pub items: Vec<String>,
    pub selected: usize,
}

impl Completion {
    /// Completion for the fragment before the cursor, if anything matches.
    pub fn for_buffer(buffer: &EditorBuffer) -> Option<Self> {
        let (start_col, prefix) = buffer.word_before_cursor();
        let after_dot = buffer.char_before(start_col) == Some('.');
        let items = candidates(&buffer.text(), &prefix, after_dot);
        if items.is_empty() {
            return None;
        }
        Some(Self {
            start_col,
            prefix,
            items,
            selected: 0,
        })
    }

    pub fn selected_item(&self) -> Option<&str> {
        self.items.get(self.selected).map(String::as_str)
    }

    pub const fn select_next(&mut self) {
        if !self.items.is_empty() {
            self.selected = (self.selected + 1) % self.items.len();
        }
    }

    pub const fn select_prev(&mut self) {
        if !self.items.is_empty() {
            self.selected = match self.selected {
                0 => self.items.len() - 1,
                n => n - 1,
            };
        }
    }
}

/// Words that complete `prefix`, best matches first.
///
/// Matching ignores case; words that match with the exact case sort ahead.
pub fn candidates(source: &str, prefix: &str, after_dot: bool) -> Vec<String> {
    let mut pool: BTreeSet<String> = BTreeSet::new();
    if after_dot {
        pool.extend(known_members().map(str::to_string));
        pool.extend(
            MEMBER
                .captures_iter(source)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
        );
    } else {
        pool.extend(known_words().map(str::to_string));
        pool.extend(
            IDENTIFIER
                .find_iter(source)
                .filter(|m| !preceded_by_digit(source, m.start()))
                .map(|m| m.as_str().to_string()),
        );
    }

    let lower = prefix.to_lowercase();
    let mut matches: Vec<String> = pool
        .into_iter()
        .filter(|word| word != prefix && word.to_lowercase().starts_with(&lower))
        .collect();
    matches.sort_by(|a, b| {
        let exact_a = !a.starts_with(prefix);
        let exact_b = !b.starts_with(prefix);
        exact_a
            .cmp(&exact_b)
            .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
            .then_with(|| a.cmp(b))
    });
    matches.truncate(MAX_CANDIDATES);
    matches
}

// `1e5` or `0x1f` should not contribute `e5` or `x1f`.
fn preceded_by_digit(source: &str, start: usize) -> bool {
    source[..start]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_and_globals_complete() {
        let items = candidates("", "cons", false);
        assert_eq!(items, vec!["console", "const"]);
    }

    #[test]
    fn test_buffer_identifiers_are_offered() {
        let items = candidates("let totalCount = 1;\nlet other = 0x1f;", "tot", false);
        assert_eq!(items, vec!["totalCount"]);
        assert!(candidates("let a = 0x1f;", "x1", false).is_empty());
    }

    #[test]
    fn test_exact_prefix_excluded() {
        let items = candidates("let value = 1; let values = [];", "value", false);
        assert_eq!(items, vec!["values"]);
    }

    #[test]
    fn test_member_completion_after_dot() {
        let items = candidates("res.customField", "lo", true);
        assert_eq!(items, vec!["log"]);
        let items = candidates("res.customField", "cust", true);
        assert_eq!(items, vec!["customField"]);
    }

    #[test]
    fn test_case_insensitive_with_exact_case_first() {
        let items = candidates("let Parse = 1;", "Pars", false);
        assert_eq!(items.first().map(String::as_str), Some("Parse"));
        assert!(items.contains(&"parseInt".to_string()));
    }

    #[test]
    fn test_for_buffer_uses_fragment_before_cursor() {
        let mut buffer = EditorBuffer::from_text("console.wa");
        buffer.move_to_end();
        let completion = Completion::for_buffer(&buffer).unwrap();
        assert_eq!(completion.start_col, 8);
        assert_eq!(completion.prefix, "wa");
        assert_eq!(completion.selected_item(), Some("warn"));
    }

    #[test]
    fn test_selection_wraps() {
        let mut completion = Completion {
            start_col: 0,
            prefix: String::new(),
            items: vec!["a".to_string(), "b".to_string()],
            selected: 0,
        };
        completion.select_prev();
        assert_eq!(completion.selected, 1);
        completion.select_next();
        assert_eq!(completion.selected, 0);
    }

    #[test]
    fn test_no_match_is_none() {
        let mut buffer = EditorBuffer::from_text("zzzq");
        buffer.move_to_end();
        assert!(Completion::for_buffer(&buffer).is_none());
    }
}
