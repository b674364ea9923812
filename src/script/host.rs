//! Capabilities the host injects into a snippet: a console and `fetch`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// Console severity, one per `console` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [Self; 4] = [Self::Log, Self::Info, Self::Warn, Self::Error];

    /// The `console` method name.
    pub const fn method(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Prefix shown in the output pane.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Log => "",
            Self::Info => "Info: ",
            Self::Warn => "Warning: ",
            Self::Error => "Error: ",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// Receives console output from a running snippet.
pub trait ConsoleSink {
    /// Record one console call whose arguments are already joined.
    ///
    /// Returns `false` once the receiving side has gone away; the
    /// interpreter stops the snippet when that happens.
    fn emit(&mut self, level: LogLevel, text: String) -> bool;
}

/// Collects lines in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferedConsole {
    pub lines: Vec<(LogLevel, String)>,
}

impl ConsoleSink for BufferedConsole {
    fn emit(&mut self, level: LogLevel, text: String) -> bool {
        self.lines.push((level, text));
        true
    }
}

/// Lets the caller keep a handle on a sink after giving it to an interpreter.
impl<T: ConsoleSink> ConsoleSink for Rc<RefCell<T>> {
    fn emit(&mut self, level: LogLevel, text: String) -> bool {
        self.borrow_mut().emit(level, text)
    }
}

/// Outbound request issued by `fetch(url, init)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

/// Response handed back to the snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl FetchResponse {
    pub const fn ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network access is turned off for this session.
    #[error("network access is disabled")]
    Disabled,
    #[error("{0}")]
    Transport(String),
}

/// Performs outbound requests for `fetch`.
///
/// Fetchers are shared with worker threads, so they must be thread-safe.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert_eq!(LogLevel::Log.prefix(), "");
        assert_eq!(LogLevel::Warn.prefix(), "Warning: ");
        assert_eq!(LogLevel::Error.prefix(), "Error: ");
        assert_eq!(LogLevel::Info.prefix(), "Info: ");
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let response = FetchResponse {
            status: 200,
            status_text: "OK".to_string(),
            url: "https://example.test".to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: String::new(),
        };
        assert!(response.ok());
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.header("x-missing"), None);
    }
}
