//! Snipbox - A terminal code playground for JavaScript snippets.
//!
//! # Usage
//!
//! ```bash
//! snipbox
//! snipbox --runner worker snippet.js
//! snipbox --print --offline snippet.js
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use snipbox::app::App;
use snipbox::config::{
    ConfigFlags, ThemeMode, clear_config_flags, global_config_path, load_config_flags,
    local_override_path, save_config_flags,
};
use snipbox::highlight::{HighlightBackground, set_background_mode};
use snipbox::perf;
use snipbox::sandbox::net::{HttpFetcher, OfflineFetcher};
use snipbox::sandbox::{DEFAULT_RELAY_URL, RunEnv, RunnerKind};
use snipbox::script::Fetcher;
use snipbox::session::{SAMPLE_SNIPPET, Session};

/// A terminal code playground with sandboxed snippet execution
#[derive(Parser, Debug)]
#[command(name = "snipbox", version, about, long_about = None)]
struct Cli {
    /// Snippet file to seed the editor with (never written back)
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Execution strategy for runs
    #[arg(long, value_enum)]
    runner: Option<RunnerKind>,

    /// Base URL exposed to snippets as RELAY_URL
    #[arg(long, value_name = "URL")]
    relay_url: Option<String>,

    /// Reject every fetch instead of touching the network
    #[arg(long)]
    offline: bool,

    /// Force syntax highlight theme background (light or dark)
    #[arg(long, value_enum)]
    theme: Option<ThemeMode>,

    /// Run the snippet once, print its output and exit
    #[arg(long)]
    print: bool,

    /// Log timing scopes
    #[arg(long)]
    perf: bool,

    /// Write debug-level events to a file
    #[arg(long, value_name = "PATH")]
    debug_log: Option<PathBuf>,

    /// Save current command-line flags as defaults
    #[arg(long)]
    save: bool,

    /// Clear saved defaults
    #[arg(long)]
    clear: bool,
}

impl Cli {
    /// The saveable subset of the parsed flags.
    fn config_flags(&self) -> ConfigFlags {
        ConfigFlags {
            offline: self.offline,
            perf: self.perf,
            runner: self.runner,
            relay_url: self.relay_url.clone(),
            theme: self.theme,
            debug_log: self.debug_log.clone(),
        }
    }
}

fn init_tracing(debug_log: Option<&Path>, perf_enabled: bool) -> Result<()> {
    let perf_directive: Directive = "snipbox::perf=info".parse()?;
    if let Some(path) = debug_log {
        let file = File::create(path)
            .with_context(|| format!("Failed to open debug log {}", path.display()))?;
        let mut filter = EnvFilter::new("snipbox=debug");
        if perf_enabled {
            filter = filter.add_directive(perf_directive);
        }
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
        return Ok(());
    }

    let mut filter = EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into());
    if perf_enabled {
        filter = filter.add_directive(perf_directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_fetcher(offline: bool) -> Arc<dyn Fetcher> {
    if offline {
        return Arc::new(OfflineFetcher);
    }
    match HttpFetcher::new() {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => {
            warn!(error = %err, "fetch.client_unavailable");
            Arc::new(OfflineFetcher)
        }
    }
}

fn apply_theme(theme: ThemeMode) {
    match theme {
        ThemeMode::Auto => set_background_mode(None),
        ThemeMode::Light => set_background_mode(Some(HighlightBackground::Light)),
        ThemeMode::Dark => set_background_mode(Some(HighlightBackground::Dark)),
    }
}

fn read_source(file: Option<&Path>) -> Result<(String, String)> {
    let Some(path) = file else {
        return Ok((SAMPLE_SNIPPET.to_string(), "snippet.js".to_string()));
    };
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snippet {}", path.display()))?;
    let name = path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().to_string(),
    );
    Ok((source, name))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let global_path = global_config_path();
    let local_path = local_override_path();
    let cli_flags = cli.config_flags();

    if cli.clear {
        clear_config_flags(&global_path)?;
    }
    if cli.save {
        save_config_flags(&global_path, &cli_flags)?;
    }

    let file_flags = if cli.clear {
        ConfigFlags::default()
    } else {
        let global_flags = load_config_flags(&global_path)?;
        let local_flags = load_config_flags(&local_path)?;
        global_flags.union(&local_flags)
    };
    let effective = file_flags.union(&cli_flags);

    let debug_log = effective
        .debug_log
        .clone()
        .or_else(|| std::env::var_os("SNIPBOX_DEBUG_LOG").map(PathBuf::from));
    init_tracing(debug_log.as_deref(), effective.perf)?;
    perf::set_enabled(effective.perf);
    apply_theme(effective.theme.unwrap_or(ThemeMode::Auto));

    let (source, source_name) = read_source(cli.file.as_deref())?;
    let runner = effective.runner.unwrap_or_default();
    let relay_url = effective
        .relay_url
        .clone()
        .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
    let env = RunEnv::new(relay_url, build_fetcher(effective.offline));

    if cli.print {
        let mut session = Session::with_kind(&source, runner, env);
        let output = session.run_to_completion();
        println!("{output}");
        return Ok(());
    }

    let mut app = App::new(source)
        .with_source_name(source_name)
        .with_runner(runner)
        .with_env(env)
        .with_config_paths(
            Some(global_path),
            if local_path.exists() {
                Some(local_path)
            } else {
                None
            },
        );

    app.run().context("Application error")
}
