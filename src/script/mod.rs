//! The snippet language: a JavaScript subset with its own lexer, parser and
//! tree-walking interpreter.
//!
//! Snippets never reach a host dynamic-code facility. The host supplies two
//! capabilities, a [`ConsoleSink`] and a [`Fetcher`], and everything else a
//! snippet can touch lives inside the [`Interpreter`].

pub mod ast;
pub mod builtins;
pub mod host;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use host::{
    BufferedConsole, ConsoleSink, FetchError, FetchRequest, FetchResponse, Fetcher, LogLevel,
};
pub use interpreter::{Interpreter, ScriptError, Unwind};
pub use parser::{ParseError, ParseMode, parse};
pub use value::Value;

/// Global binding the host adds for the relay base URL.
pub const RELAY_URL_GLOBAL: &str = "RELAY_URL";

/// Keywords and global names, for editor completion.
pub fn known_words() -> impl Iterator<Item = &'static str> {
    lexer::KEYWORDS
        .iter()
        .copied()
        .chain(builtins::GLOBAL_NAMES.iter().copied())
        .chain(std::iter::once(RELAY_URL_GLOBAL))
}

/// Property and method names, for completion after a `.`.
pub fn known_members() -> impl Iterator<Item = &'static str> {
    builtins::MEMBER_NAMES.iter().copied()
}
