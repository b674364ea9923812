use std::path::PathBuf;

use snipbox::config::{ConfigFlags, ThemeMode, load_config_flags, parse_flag_tokens};
use snipbox::sandbox::RunnerKind;

#[test]
fn test_config_file_parsing_ignores_comments_and_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".snipboxrc");
    let content = r"
# comment
--runner worker

--theme light

--debug-log=run.log
";
    std::fs::write(&path, content).unwrap();

    let flags = load_config_flags(&path).unwrap();
    assert_eq!(flags.runner, Some(RunnerKind::Worker));
    assert_eq!(flags.theme, Some(ThemeMode::Light));
    assert_eq!(flags.debug_log, Some(PathBuf::from("run.log")));
}

#[test]
fn test_cli_flags_override_file_flags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".snipboxrc");
    let content = "--offline\n--theme light\n--debug-log file.log\n--runner worker\n";
    std::fs::write(&path, content).unwrap();

    let file_flags = load_config_flags(&path).unwrap();
    let cli_args = vec![
        "snipbox".to_string(),
        "--theme".to_string(),
        "dark".to_string(),
        "--perf".to_string(),
    ];
    let cli_flags = parse_flag_tokens(&cli_args);

    let effective = file_flags.union(&cli_flags);
    assert!(effective.offline, "file flags should remain enabled");
    assert!(effective.perf, "cli flags should be applied");
    assert_eq!(effective.theme, Some(ThemeMode::Dark), "cli should override theme");
    assert_eq!(effective.runner, Some(RunnerKind::Worker));
    assert_eq!(
        effective.debug_log,
        Some(PathBuf::from("file.log")),
        "file config should be preserved when CLI does not override"
    );
}

#[test]
fn test_parse_flag_tokens_handles_equals_syntax() {
    let args = vec![
        "snipbox".to_string(),
        "--theme=dark".to_string(),
        "--runner=inline".to_string(),
        "--relay-url=https://relay.test/?url=".to_string(),
    ];
    let flags = parse_flag_tokens(&args);
    assert_eq!(flags.theme, Some(ThemeMode::Dark));
    assert_eq!(flags.runner, Some(RunnerKind::Inline));
    assert_eq!(flags.relay_url.as_deref(), Some("https://relay.test/?url="));
}

#[test]
fn test_global_then_local_then_cli() {
    let global = ConfigFlags {
        runner: Some(RunnerKind::Worker),
        relay_url: Some("https://global.test/?".to_string()),
        ..ConfigFlags::default()
    };
    let local = ConfigFlags {
        relay_url: Some("https://local.test/?".to_string()),
        offline: true,
        ..ConfigFlags::default()
    };
    let cli = ConfigFlags {
        runner: Some(RunnerKind::Inline),
        ..ConfigFlags::default()
    };
    let merged = global.union(&local).union(&cli);
    assert_eq!(merged.runner, Some(RunnerKind::Inline));
    assert_eq!(merged.relay_url.as_deref(), Some("https://local.test/?"));
    assert!(merged.offline);
}
