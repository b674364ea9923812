use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::sandbox::RunnerKind;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeMode {
    Auto,
    Light,
    Dark,
}

impl ThemeMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

/// Flags that can be saved as defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigFlags {
    pub offline: bool,
    pub perf: bool,
    pub runner: Option<RunnerKind>,
    pub relay_url: Option<String>,
    pub theme: Option<ThemeMode>,
    pub debug_log: Option<PathBuf>,
}

impl ConfigFlags {
    /// Merge `other` on top of `self`: booleans accumulate, valued options
    /// from `other` win.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            offline: self.offline || other.offline,
            perf: self.perf || other.perf,
            runner: other.runner.or(self.runner),
            relay_url: other
                .relay_url
                .clone()
                .or_else(|| self.relay_url.clone()),
            theme: other.theme.or(self.theme),
            debug_log: other.debug_log.clone().or_else(|| self.debug_log.clone()),
        }
    }
}

pub fn global_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("snipbox").join("config");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("snipbox")
                .join("config");
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("snipbox").join("config");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join(".config")
                .join("snipbox")
                .join("config");
        }
    }

    PathBuf::from(".snipboxrc")
}

pub fn local_override_path() -> PathBuf {
    PathBuf::from(".snipboxrc")
}

pub fn load_config_flags(path: &Path) -> Result<ConfigFlags> {
    if !path.exists() {
        return Ok(ConfigFlags::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let tokens = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(|line| line.split_whitespace().map(ToOwned::to_owned))
        .collect::<Vec<_>>();
    Ok(parse_flag_tokens(&tokens))
}

pub fn save_config_flags(path: &Path, flags: &ConfigFlags) -> Result<()> {
    let mut lines = vec!["# snipbox defaults (saved with --save)".to_string()];
    if let Some(runner) = flags.runner {
        lines.push(format!("--runner {runner}"));
    }
    if let Some(url) = &flags.relay_url {
        lines.push(format!("--relay-url {url}"));
    }
    if flags.offline {
        lines.push("--offline".to_string());
    }
    if let Some(theme) = flags.theme {
        lines.push(format!("--theme {}", theme.as_str()));
    }
    if flags.perf {
        lines.push("--perf".to_string());
    }
    if let Some(path) = &flags.debug_log {
        lines.push(format!("--debug-log {}", path.display()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir {}", parent.display()))?;
    }
    fs::write(path, format!("{}\n", lines.join("\n")))
        .with_context(|| format!("Failed to write config {}", path.display()))
}

pub fn clear_config_flags(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Pick the saveable flags out of raw arguments. Unknown tokens and
/// positional arguments are skipped.
pub fn parse_flag_tokens(tokens: &[String]) -> ConfigFlags {
    let mut flags = ConfigFlags::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        let (name, inline_value) = match token.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value)),
            _ => (token, None),
        };
        match name {
            "--offline" => flags.offline = true,
            "--perf" => flags.perf = true,
            "--runner" | "--relay-url" | "--theme" | "--debug-log" => {
                let value = match inline_value {
                    Some(value) => Some(value),
                    None => {
                        let next = tokens.get(i + 1).map(String::as_str);
                        if next.is_some() {
                            i += 1;
                        }
                        next
                    }
                };
                if let Some(value) = value {
                    apply_valued_flag(&mut flags, name, value);
                }
            }
            _ => {}
        }
        i += 1;
    }
    flags
}

fn apply_valued_flag(flags: &mut ConfigFlags, name: &str, value: &str) {
    match name {
        "--runner" => flags.runner = parse_runner(value),
        "--relay-url" => flags.relay_url = Some(value.to_string()),
        "--theme" => flags.theme = parse_theme(value),
        "--debug-log" => flags.debug_log = Some(PathBuf::from(value)),
        _ => {}
    }
}

fn parse_runner(s: &str) -> Option<RunnerKind> {
    match s {
        "inline" => Some(RunnerKind::Inline),
        "worker" => Some(RunnerKind::Worker),
        _ => None,
    }
}

fn parse_theme(s: &str) -> Option<ThemeMode> {
    match s {
        "auto" => Some(ThemeMode::Auto),
        "light" => Some(ThemeMode::Light),
        "dark" => Some(ThemeMode::Dark),
        _ => None,
    }
}
