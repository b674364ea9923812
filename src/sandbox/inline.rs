//! Inline execution: the snippet becomes the body of an async function that
//! is invoked and awaited before the runner returns.
//!
//! The caller waits for the whole run. A snippet that loops forever stalls
//! the host for as long as it runs.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::{
    INLINE_THREAD_NAME, LineKind, NO_OUTPUT_NOTICE, OutputLine, RunEnv, RunEvent, RunnerKind,
    SCRIPT_STACK_SIZE, SandboxRunner, panic_message, render_lines,
};
use crate::perf;
use crate::script::{
    BufferedConsole, Interpreter, ParseMode, RELAY_URL_GLOBAL, ScriptError, Value, parse,
};

/// Run `source` and return the text the output pane shows.
pub fn run(source: &str, env: &RunEnv) -> String {
    render_lines(&execute(source, env))
}

/// Run `source` and return its output lines.
///
/// On success this is every console line followed by the stringified return
/// value when there is one, or [`NO_OUTPUT_NOTICE`] when the combined text is
/// empty. Blank console output is dropped in front of a return value. Any
/// failure replaces the whole output with a single `Error: ` line.
pub fn execute(source: &str, env: &RunEnv) -> Vec<OutputLine> {
    let _scope = perf::scope("inline.run");
    debug!(bytes = source.len(), "run.start");

    // The interpreter recurses on the native stack; give it room of its own.
    let outcome = thread::scope(|scope| {
        thread::Builder::new()
            .name(INLINE_THREAD_NAME.to_string())
            .stack_size(SCRIPT_STACK_SIZE)
            .spawn_scoped(scope, || execute_on_current_thread(source, env))
            .map(|handle| handle.join())
    });

    let lines = match outcome {
        Ok(Ok(lines)) => lines,
        Ok(Err(payload)) => {
            let message = panic_message(payload.as_ref());
            warn!(%message, "inline.panic");
            vec![OutputLine::error(message)]
        }
        Err(err) => {
            warn!(error = %err, "inline.spawn_failed");
            vec![OutputLine::error(err.to_string())]
        }
    };
    debug!(lines = lines.len(), "run.finished");
    lines
}

fn execute_on_current_thread(source: &str, env: &RunEnv) -> Vec<OutputLine> {
    let program = match parse(source, ParseMode::FunctionBody) {
        Ok(program) => program,
        Err(err) => return vec![OutputLine::error(ScriptError::from(err).message())],
    };

    let console = Rc::new(RefCell::new(BufferedConsole::default()));
    let mut interpreter =
        Interpreter::new(Box::new(Rc::clone(&console)), Arc::clone(&env.fetcher));
    interpreter.define_global(RELAY_URL_GLOBAL, Value::from(env.relay_url.as_str()));

    let result = match interpreter.run_function_body(&program) {
        Ok(value) => value,
        Err(err) => return vec![OutputLine::error(err.message())],
    };
    drop(interpreter);

    let mut lines: Vec<OutputLine> = console
        .borrow_mut()
        .lines
        .drain(..)
        .map(|(level, text)| OutputLine::console(level, text))
        .collect();
    if !matches!(result, Value::Undefined) {
        // The return value only gets its own line when the logs printed something.
        if render_lines(&lines).is_empty() {
            lines.clear();
        }
        lines.push(OutputLine::new(LineKind::Result, result.to_js_string()));
    }
    if render_lines(&lines).is_empty() {
        return vec![OutputLine::new(LineKind::Notice, NO_OUTPUT_NOTICE)];
    }
    lines
}

/// Runs each snippet to completion inside [`SandboxRunner::start`].
#[derive(Debug)]
pub struct InlineRunner {
    env: RunEnv,
    pending: VecDeque<RunEvent>,
}

impl InlineRunner {
    pub const fn new(env: RunEnv) -> Self {
        Self {
            env,
            pending: VecDeque::new(),
        }
    }
}

impl SandboxRunner for InlineRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Inline
    }

    fn start(&mut self, source: &str) -> Result<(), super::SandboxError> {
        self.pending.clear();
        self.pending
            .extend(execute(source, &self.env).into_iter().map(RunEvent::Line));
        self.pending.push_back(RunEvent::Finished);
        Ok(())
    }

    fn poll(&mut self) -> Vec<RunEvent> {
        self.pending.drain(..).collect()
    }

    fn wait(&mut self) {}

    fn teardown(&mut self) {
        self.pending.clear();
    }

    fn active_handles(&self) -> usize {
        0
    }

    fn reset_restores_source(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::sandbox::DEFAULT_RELAY_URL;
    use crate::sandbox::net::OfflineFetcher;

    fn env() -> RunEnv {
        RunEnv::new(DEFAULT_RELAY_URL, Arc::new(OfflineFetcher))
    }

    #[test]
    fn test_log_and_warn() {
        let out = run(r#"console.log("hi"); console.warn("careful")"#, &env());
        assert_eq!(out, "hi\nWarning: careful");
    }

    #[test]
    fn test_uncaught_error_is_single_line() {
        let out = run(r#"console.log("lost"); throw new Error("boom")"#, &env());
        assert_eq!(out, "Error: boom");
    }

    #[test]
    fn test_logs_then_return_value() {
        let out = run("console.info('a'); console.error('b'); return 1 + 2;", &env());
        assert_eq!(out, "Info: a\nError: b\n3");
    }

    #[test]
    fn test_return_value_alone() {
        assert_eq!(run("return [1, 2, 3]", &env()), "1,2,3");
        assert_eq!(run("return 'text'", &env()), "text");
    }

    #[test]
    fn test_blank_logs_do_not_separate_return_value() {
        assert_eq!(run("console.log(''); return 'x'", &env()), "x");
        assert_eq!(run("console.log(''); return ''", &env()), NO_OUTPUT_NOTICE);
        assert_eq!(run("console.log(''); console.log(''); return 'x'", &env()), "\n\nx");
        assert_eq!(run("console.log('')", &env()), NO_OUTPUT_NOTICE);
    }

    #[test]
    fn test_empty_snippet_shows_notice() {
        assert_eq!(run("", &env()), NO_OUTPUT_NOTICE);
        assert_eq!(run("let x = 1;", &env()), NO_OUTPUT_NOTICE);
    }

    #[test]
    fn test_syntax_error_reported() {
        let out = run("let = ;", &env());
        assert!(out.starts_with("Error: "), "{out}");
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn test_reference_error_message() {
        assert_eq!(run("missing()", &env()), "Error: missing is not defined");
    }

    #[test]
    fn test_await_and_returned_promise() {
        let out = run(
            "const v = await Promise.resolve(5); return Promise.resolve(v * 2);",
            &env(),
        );
        assert_eq!(out, "10");
    }

    #[test]
    fn test_offline_fetch_is_caught_by_snippet() {
        let out = run(
            "try { await fetch(RELAY_URL + 'https://example.test'); } \
             catch (e) { console.log(e.name, e.message); }",
            &env(),
        );
        assert_eq!(out, "TypeError Failed to fetch");
    }

    #[test]
    fn test_relay_url_global() {
        assert_eq!(run("return RELAY_URL", &env()), DEFAULT_RELAY_URL);
    }

    #[test]
    fn test_thrown_primitive_message_is_undefined() {
        assert_eq!(run("throw 'oops'", &env()), "Error: undefined");
    }

    #[test]
    fn test_flattening_self_containing_array_is_range_error() {
        let out = run("const a = [1]; a.push(a); return a.flat(Infinity).length", &env());
        assert_eq!(out, "Error: Maximum call stack size exceeded");
    }

    #[test]
    fn test_stringifying_deeply_nested_array_stays_bounded() {
        let out = run(
            "let a = [1]; for (let i = 0; i < 20000; i++) a = [a]; return String(a).length",
            &env(),
        );
        assert_eq!(out, "0");
    }

    #[test]
    fn test_deep_parentheses_are_reported_not_fatal() {
        let nested = |depth: usize| format!("return {}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(run(&nested(1_500), &env()), "1");

        let out = run(&nested(8_000), &env());
        assert!(out.starts_with("Error: Program is nested too deeply"), "{out}");

        let started = Instant::now();
        let out = run(&nested(200_000), &env());
        assert!(out.starts_with("Error: Program is nested too deeply"), "{out}");
        assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());
    }

    #[test]
    fn test_long_flat_literal_runs_in_linear_time() {
        let source = format!("return [{}0].length", "0,".repeat(200_000));
        let started = Instant::now();
        assert_eq!(run(&source, &env()), "200001");
        assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());
    }

    #[test]
    fn test_deeply_nested_values_are_freed_without_overflow() {
        let arrays = "let a = []; for (let i = 0; i < 2000000; i++) { a = [a]; } return 'built'";
        assert_eq!(run(arrays, &env()), "built");

        let objects =
            "let o = null; for (let i = 0; i < 1000000; i++) { o = { next: o }; } return 'linked'";
        assert_eq!(run(objects, &env()), "linked");

        let closures = "
            let f = () => 0
            for (let i = 0; i < 500000; i++) { const g = f; f = () => g }
            return typeof f
        ";
        assert_eq!(run(closures, &env()), "function");
    }

    #[test]
    fn test_runner_reports_lines_then_finished() {
        let mut runner = InlineRunner::new(env());
        runner.start("console.log(1); console.log(2)").unwrap();
        let events = runner.poll();
        assert_eq!(
            events,
            vec![
                RunEvent::Line(OutputLine::console(crate::script::LogLevel::Log, "1")),
                RunEvent::Line(OutputLine::console(crate::script::LogLevel::Log, "2")),
                RunEvent::Finished,
            ]
        );
        assert!(runner.poll().is_empty());
        assert_eq!(runner.active_handles(), 0);
        assert!(runner.reset_restores_source());
    }
}
