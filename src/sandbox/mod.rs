//! Executing snippets away from the UI's own state.
//!
//! A [`SandboxRunner`] turns source text into a stream of [`RunEvent`]s.
//! Two strategies exist:
//! - [`inline::InlineRunner`]: wraps the snippet in an async function body,
//!   runs it to completion and reports buffered output at once.
//! - [`worker::WorkerRunner`]: runs the raw snippet on a dedicated thread and
//!   streams console lines back as they are produced.

pub mod inline;
pub mod net;
pub mod worker;

use std::fmt;
use std::panic;
use std::sync::Arc;
use std::thread;

use clap::ValueEnum;
use thiserror::Error;
use tracing::warn;

use crate::script::{Fetcher, LogLevel};

/// Base URL of the public CORS relay snippets are expected to call.
pub const DEFAULT_RELAY_URL: &str = "https://proxy.corsfix.com/?";

/// Stack reserved for a snippet thread; deep recursion hits
/// `MAX_CALL_DEPTH` long before this runs out.
pub const SCRIPT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Name of the thread an inline run executes on.
pub const INLINE_THREAD_NAME: &str = "snipbox-inline";

/// Prefix of every worker thread name; a sequence number follows.
pub const WORKER_THREAD_PREFIX: &str = "snipbox-worker-";

/// Shown when a run finishes without logging or returning anything.
pub const NO_OUTPUT_NOTICE: &str = "Code executed successfully (no output)";

/// Which execution strategy a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RunnerKind {
    /// Run the snippet as an async function body and wait for it.
    #[default]
    Inline,
    /// Run the raw snippet on a background worker thread.
    Worker,
}

impl RunnerKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What produced an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Console(LogLevel),
    /// `String(result)` of the snippet's return value.
    Result,
    /// The snippet failed to build or threw.
    Error,
    /// The isolation boundary itself failed.
    WorkerError,
    /// Fixed informational text such as [`NO_OUTPUT_NOTICE`].
    Notice,
}

impl LineKind {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Console(level) => level.prefix(),
            Self::Error => "Error: ",
            Self::WorkerError => "Worker error: ",
            Self::Result | Self::Notice => "",
        }
    }
}

/// One line of the output log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: LineKind,
    pub text: String,
}

impl OutputLine {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn console(level: LogLevel, text: impl Into<String>) -> Self {
        Self::new(LineKind::Console(level), text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(LineKind::Error, text)
    }

    pub fn worker_error(text: impl Into<String>) -> Self {
        Self::new(LineKind::WorkerError, text)
    }

    /// True for lines that report a failure.
    pub const fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            LineKind::Error | LineKind::WorkerError | LineKind::Console(LogLevel::Error)
        )
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.text)
    }
}

/// Join lines the way the output pane shows them.
pub fn render_lines(lines: &[OutputLine]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Progress reported by a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Line(OutputLine),
    /// The snippet is no longer executing.
    Finished,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn sandbox thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("sandbox thread panicked: {0}")]
    Panicked(String),
}

/// Capabilities every run receives.
#[derive(Clone)]
pub struct RunEnv {
    pub relay_url: String,
    pub fetcher: Arc<dyn Fetcher>,
}

impl RunEnv {
    pub fn new(relay_url: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            relay_url: relay_url.into(),
            fetcher,
        }
    }
}

impl fmt::Debug for RunEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunEnv")
            .field("relay_url", &self.relay_url)
            .finish_non_exhaustive()
    }
}

/// An execution strategy for snippets.
pub trait SandboxRunner {
    fn kind(&self) -> RunnerKind;

    /// Start running `source`, disposing any earlier run first.
    ///
    /// # Errors
    /// Returns an error if the execution context could not be created.
    fn start(&mut self, source: &str) -> Result<(), SandboxError>;

    /// Events produced since the last poll, in the order they happened.
    fn poll(&mut self) -> Vec<RunEvent>;

    /// Block until the current run stops executing.
    fn wait(&mut self);

    /// Dispose of the active execution context, if any.
    fn teardown(&mut self);

    /// Number of live sandbox handles this runner owns.
    fn active_handles(&self) -> usize;

    /// Whether a reset also puts the sample snippet back in the editor.
    fn reset_restores_source(&self) -> bool;
}

/// Build the runner for `kind`.
pub fn create_runner(kind: RunnerKind, env: RunEnv) -> Box<dyn SandboxRunner> {
    match kind {
        RunnerKind::Inline => Box::new(inline::InlineRunner::new(env)),
        RunnerKind::Worker => Box::new(worker::WorkerRunner::new(env)),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// True for threads that execute snippets.
pub fn is_script_thread(name: Option<&str>) -> bool {
    name.is_some_and(|name| name == INLINE_THREAD_NAME || name.starts_with(WORKER_THREAD_PREFIX))
}

/// Wrap the current panic hook so panics on snippet threads skip it.
///
/// Those panics are caught and reported as output lines; the terminal
/// restoring hook must not run for them.
pub fn install_panic_filter() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let current = thread::current();
        if is_script_thread(current.name()) {
            warn!(thread = current.name().unwrap_or_default(), %info, "sandbox.panic");
            return;
        }
        previous(info);
    }));
}
