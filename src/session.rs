//! The playground session: source text, output log, run state and the
//! runner that owns the active sandbox.
//!
//! All mutable playground state lives here so the TEA model holds exactly
//! one owner for it.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::editor::EditorBuffer;
use crate::sandbox::net::OfflineFetcher;
use crate::sandbox::{
    DEFAULT_RELAY_URL, OutputLine, RunEnv, RunEvent, RunnerKind, SandboxRunner, create_runner,
    render_lines,
};

/// Snippet the editor starts with.
pub const SAMPLE_SNIPPET: &str = r#"// F5 runs the snippet. RELAY_URL is the CORS relay base.
fetch(RELAY_URL + "https://api.github.com/zen")
  .then((res) => res.text())
  .then((text) => console.log(text))
  .catch((err) => console.error(err.message));
"#;

/// Output pane text before anything has run.
pub const OUTPUT_PLACEHOLDER: &str = "Output will appear here...";

/// Output pane text while a run has produced nothing yet.
pub const RUNNING_TEXT: &str = "Running...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
}

pub struct Session {
    buffer: EditorBuffer,
    initial_source: String,
    output: Vec<OutputLine>,
    state: RunState,
    pending: Option<String>,
    runner: Box<dyn SandboxRunner>,
}

impl Session {
    pub fn new(initial_source: &str, runner: Box<dyn SandboxRunner>) -> Self {
        Self {
            buffer: EditorBuffer::from_text(initial_source),
            initial_source: initial_source.to_string(),
            output: Vec::new(),
            state: RunState::Idle,
            pending: None,
            runner,
        }
    }

    pub fn with_kind(initial_source: &str, kind: RunnerKind, env: RunEnv) -> Self {
        Self::new(initial_source, create_runner(kind, env))
    }

    pub fn source(&self) -> String {
        self.buffer.text()
    }

    /// Replace the source wholesale.
    pub fn set_source(&mut self, text: &str) {
        self.buffer.set_text(text);
    }

    pub const fn buffer(&self) -> &EditorBuffer {
        &self.buffer
    }

    pub const fn buffer_mut(&mut self) -> &mut EditorBuffer {
        &mut self.buffer
    }

    pub fn output(&self) -> &[OutputLine] {
        &self.output
    }

    pub const fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn runner_kind(&self) -> RunnerKind {
        self.runner.kind()
    }

    pub fn active_handles(&self) -> usize {
        self.runner.active_handles()
    }

    /// Text for the output pane.
    pub fn display_text(&self) -> String {
        if self.output.is_empty() {
            return match self.state {
                RunState::Running => RUNNING_TEXT.to_string(),
                RunState::Idle => OUTPUT_PLACEHOLDER.to_string(),
            };
        }
        render_lines(&self.output)
    }

    /// Whether the Run control accepts a press.
    ///
    /// The inline runner is gated by the running flag; a worker run may be
    /// replaced at any time.
    pub fn run_enabled(&self) -> bool {
        match self.runner.kind() {
            RunnerKind::Inline => !self.is_running(),
            RunnerKind::Worker => true,
        }
    }

    /// Queue a run of the current source. Returns false when the Run
    /// control is disabled.
    pub fn request_run(&mut self) -> bool {
        if !self.run_enabled() {
            return false;
        }
        self.output.clear();
        self.state = RunState::Running;
        self.pending = Some(self.source());
        true
    }

    pub const fn has_pending_start(&self) -> bool {
        self.pending.is_some()
    }

    /// Hand a queued run to the runner.
    ///
    /// With the inline runner this blocks until the snippet finishes.
    pub fn dispatch(&mut self) {
        let Some(source) = self.pending.take() else {
            return;
        };
        debug!(runner = %self.runner.kind(), bytes = source.len(), "session.dispatch");
        if let Err(err) = self.runner.start(&source) {
            warn!(error = %err, "session.start_failed");
            self.output.push(OutputLine::worker_error(err.to_string()));
            self.state = RunState::Idle;
        }
    }

    /// Pull runner events into the output log. Returns true if anything
    /// changed.
    pub fn poll(&mut self) -> bool {
        let events = self.runner.poll();
        let mut changed = false;
        for event in events {
            match event {
                RunEvent::Line(line) => {
                    if self.state == RunState::Running {
                        self.output.push(line);
                        changed = true;
                    }
                }
                RunEvent::Finished => {
                    if self.state == RunState::Running {
                        self.state = RunState::Idle;
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    /// Tear down the sandbox and clear the output. The inline runner also
    /// restores the initial source.
    pub fn reset(&mut self) {
        self.runner.teardown();
        self.pending = None;
        self.output.clear();
        self.state = RunState::Idle;
        if self.runner.reset_restores_source() {
            let initial = self.initial_source.clone();
            self.buffer.set_text(&initial);
        }
        debug!(handles = self.runner.active_handles(), "session.reset");
    }

    /// Run the current source and wait for it to finish.
    pub fn run_to_completion(&mut self) -> String {
        if !self.request_run() {
            return self.display_text();
        }
        self.dispatch();
        self.runner.wait();
        self.poll();
        self.state = RunState::Idle;
        self.display_text()
    }

    pub fn shutdown(&mut self) {
        self.runner.teardown();
        self.pending = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::with_kind(
            SAMPLE_SNIPPET,
            RunnerKind::Inline,
            RunEnv::new(DEFAULT_RELAY_URL, Arc::new(OfflineFetcher)),
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("runner", &self.runner.kind())
            .field("state", &self.state)
            .field("output_lines", &self.output.len())
            .field("pending", &self.pending.is_some())
            .field("revision", &self.buffer.revision())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn session(kind: RunnerKind, source: &str) -> Session {
        Session::with_kind(
            source,
            kind,
            RunEnv::new(DEFAULT_RELAY_URL, Arc::new(OfflineFetcher)),
        )
    }

    #[test]
    fn test_placeholder_before_first_run() {
        let session = Session::default();
        assert_eq!(session.display_text(), OUTPUT_PLACEHOLDER);
        assert_eq!(session.source(), SAMPLE_SNIPPET);
        assert_eq!(session.state(), RunState::Idle);
    }

    #[test]
    fn test_inline_run_shows_running_until_dispatched() {
        let mut session = session(RunnerKind::Inline, "console.log('hi')");
        assert!(session.request_run());
        assert_eq!(session.display_text(), RUNNING_TEXT);
        assert!(!session.run_enabled());
        assert!(!session.request_run());

        session.dispatch();
        assert!(session.poll());
        assert_eq!(session.display_text(), "hi");
        assert!(session.run_enabled());
    }

    #[test]
    fn test_sample_snippet_runs_offline() {
        let mut session = Session::default();
        assert_eq!(session.run_to_completion(), "Error: Failed to fetch");
    }

    #[test]
    fn test_sample_snippet_parses_in_both_modes() {
        use crate::script::{ParseMode, parse};
        assert!(parse(SAMPLE_SNIPPET, ParseMode::FunctionBody).is_ok());
        assert!(parse(SAMPLE_SNIPPET, ParseMode::Script).is_ok());
    }

    #[test]
    fn test_inline_reset_restores_source_and_placeholder() {
        let mut session = session(RunnerKind::Inline, "return 1");
        session.set_source("return 2");
        assert_eq!(session.run_to_completion(), "2");

        session.reset();
        assert_eq!(session.display_text(), OUTPUT_PLACEHOLDER);
        assert_eq!(session.source(), "return 1");
        assert_eq!(session.active_handles(), 0);
    }

    #[test]
    fn test_worker_reset_keeps_source_and_releases_handle() {
        let mut session = session(RunnerKind::Worker, "while (true) {}");
        session.request_run();
        session.dispatch();
        assert_eq!(session.active_handles(), 1);
        assert!(session.run_enabled());

        session.set_source("// edited");
        session.reset();
        assert_eq!(session.active_handles(), 0);
        assert_eq!(session.display_text(), OUTPUT_PLACEHOLDER);
        assert_eq!(session.source(), "// edited");
        assert!(!session.poll());
    }

    #[test]
    fn test_worker_rerun_replaces_handle() {
        let mut session = session(RunnerKind::Worker, "while (true) {}");
        session.request_run();
        session.dispatch();
        session.set_source("console.log('again')");
        session.request_run();
        session.dispatch();
        assert_eq!(session.active_handles(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while session.is_running() && Instant::now() < deadline {
            session.poll();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.display_text(), "again");
    }

    #[test]
    fn test_worker_run_to_completion() {
        let mut session = session(
            RunnerKind::Worker,
            "console.log(1); console.info(2); throw new Error('late')",
        );
        assert_eq!(session.run_to_completion(), "1\nInfo: 2\nError: late");
    }

    #[test]
    fn test_lines_after_reset_are_ignored() {
        let mut session = session(RunnerKind::Inline, "console.log('x')");
        session.request_run();
        session.dispatch();
        session.reset();
        assert!(!session.poll());
        assert!(session.output().is_empty());
    }
}
