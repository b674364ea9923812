use std::sync::Arc;

use proptest::prelude::*;

use snipbox::sandbox::net::OfflineFetcher;
use snipbox::sandbox::{DEFAULT_RELAY_URL, NO_OUTPUT_NOTICE, RunEnv, RunnerKind};
use snipbox::script::LogLevel;
use snipbox::session::{OUTPUT_PLACEHOLDER, Session};

fn session(kind: RunnerKind, source: &str) -> Session {
    Session::with_kind(
        source,
        kind,
        RunEnv::new(DEFAULT_RELAY_URL, Arc::new(OfflineFetcher)),
    )
}

fn run(kind: RunnerKind, source: &str) -> String {
    session(kind, source).run_to_completion()
}

#[test]
fn test_console_levels_are_prefixed_in_both_runners() {
    let source = "console.log('a'); console.info('b'); console.warn('c'); console.error('d')";
    let expected = "a\nInfo: b\nWarning: c\nError: d";
    assert_eq!(run(RunnerKind::Inline, source), expected);
    assert_eq!(run(RunnerKind::Worker, source), expected);
}

#[test]
fn test_console_arguments_are_space_joined() {
    let source = "console.log('n =', 3, [1, 2], null)";
    assert_eq!(run(RunnerKind::Inline, source), "n = 3 1,2 ");
}

#[test]
fn test_inline_failure_replaces_output() {
    let source = "console.log('lost'); throw new Error('boom')";
    assert_eq!(run(RunnerKind::Inline, source), "Error: boom");
}

#[test]
fn test_worker_failure_keeps_earlier_output() {
    let source = "console.log('kept'); throw new Error('boom')";
    assert_eq!(run(RunnerKind::Worker, source), "kept\nError: boom");
}

#[test]
fn test_inline_return_value_and_notice() {
    assert_eq!(run(RunnerKind::Inline, "return 6 * 7"), "42");
    assert_eq!(run(RunnerKind::Inline, "const x = 1;"), NO_OUTPUT_NOTICE);
}

#[test]
fn test_offline_fetch_rejects_like_a_network_error() {
    let source = r#"
try {
  await fetch(RELAY_URL + "https://example.com/data.json");
} catch (err) {
  console.log(err.name + ": " + err.message);
}
"#;
    assert_eq!(run(RunnerKind::Inline, source), "TypeError: Failed to fetch");
}

#[test]
fn test_reset_returns_to_placeholder_for_both_runners() {
    for kind in [RunnerKind::Inline, RunnerKind::Worker] {
        let mut session = session(kind, "console.log('x')");
        session.run_to_completion();
        assert_ne!(session.display_text(), OUTPUT_PLACEHOLDER);
        session.reset();
        assert_eq!(session.display_text(), OUTPUT_PLACEHOLDER, "{kind}");
        assert_eq!(session.active_handles(), 0, "{kind}");
    }
}

fn prefix(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Log => "",
        LogLevel::Info => "Info: ",
        LogLevel::Warn => "Warning: ",
        LogLevel::Error => "Error: ",
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_logs_arrive_in_call_order(count in 1usize..20, worker in any::<bool>()) {
        let kind = if worker { RunnerKind::Worker } else { RunnerKind::Inline };
        let source = format!("for (let i = 0; i < {count}; i++) console.log('line', i)");
        let output = run(kind, &source);
        let expected: Vec<String> = (0..count).map(|i| format!("line {i}")).collect();
        prop_assert_eq!(output.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn prop_mixed_levels_keep_order_and_prefix(
        levels in prop::collection::vec(prop::sample::select(LogLevel::ALL.to_vec()), 1..24),
        worker in any::<bool>(),
    ) {
        let kind = if worker { RunnerKind::Worker } else { RunnerKind::Inline };
        let source: String = levels
            .iter()
            .enumerate()
            .map(|(i, level)| format!("console.{}('call', {i});\n", level.method()))
            .collect();
        let output = run(kind, &source);
        let expected: Vec<String> = levels
            .iter()
            .enumerate()
            .map(|(i, level)| format!("{}call {i}", prefix(*level)))
            .collect();
        prop_assert_eq!(output.lines().collect::<Vec<_>>(), expected);
    }
}
