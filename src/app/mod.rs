//! Application state and main event loop.
//!
//! This module implements The Elm Architecture (TEA):
//! - [`Model`]: The complete application state
//! - [`Message`]: All possible events and actions
//! - [`update`]: Pure function for state transitions
//! - [`App::run`]: Main event loop with rendering

mod effects;
mod event_loop;
mod input;
mod model;
mod update;

pub use model::{Model, ToastLevel};
pub use update::{Message, update};

use std::path::PathBuf;
use std::sync::Arc;

use crate::sandbox::net::OfflineFetcher;
use crate::sandbox::{DEFAULT_RELAY_URL, RunEnv, RunnerKind};
use crate::session::SAMPLE_SNIPPET;

/// Main application struct that owns the terminal and runs the event loop.
pub struct App {
    initial_source: String,
    source_name: String,
    runner: RunnerKind,
    env: RunEnv,
    config_global_path: Option<PathBuf>,
    config_local_path: Option<PathBuf>,
}

impl App {
    /// Create a playground seeded with `initial_source`.
    pub fn new(initial_source: impl Into<String>) -> Self {
        Self {
            initial_source: initial_source.into(),
            source_name: "snippet.js".to_string(),
            runner: RunnerKind::default(),
            env: RunEnv::new(DEFAULT_RELAY_URL, Arc::new(OfflineFetcher)),
            config_global_path: None,
            config_local_path: None,
        }
    }

    /// Name shown in the editor title.
    #[must_use]
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Choose the execution strategy.
    #[must_use]
    pub const fn with_runner(mut self, runner: RunnerKind) -> Self {
        self.runner = runner;
        self
    }

    /// Capabilities handed to every run.
    #[must_use]
    pub fn with_env(mut self, env: RunEnv) -> Self {
        self.env = env;
        self
    }

    /// Set config paths to show in help.
    #[must_use]
    pub fn with_config_paths(
        mut self,
        global_path: Option<PathBuf>,
        local_path: Option<PathBuf>,
    ) -> Self {
        self.config_global_path = global_path;
        self.config_local_path = local_path;
        self
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new(SAMPLE_SNIPPET)
    }
}

#[cfg(test)]
mod tests;
