// Only allow lints that are either transitive-dependency noise or
// genuinely opinionated style choices that don't indicate real issues.
#![allow(
    // Transitive dependency version mismatches we can't control
    clippy::multiple_crate_versions,
    // module_name_repetitions is pure style preference (e.g. sandbox::SandboxError)
    clippy::module_name_repetitions
)]

//! # Snipbox
//!
//! A terminal code playground for small JavaScript snippets.
//!
//! Snipbox pairs an editor with an output pane:
//! - Syntax-highlighted editing with completion
//! - Two execution strategies: inline (blocking) or an isolated worker thread
//! - Captured `console.*` output, shown in call order
//! - A `fetch` capability routed through a configurable relay URL
//!
//! ## Architecture
//!
//! Snipbox uses The Elm Architecture (TEA) pattern:
//! - **Model**: Application state
//! - **Message**: Events and actions
//! - **Update**: Pure state transitions
//! - **View**: Render to terminal
//!
//! ## Modules
//!
//! - [`app`]: Main application loop and state
//! - [`session`]: Source, output log and run state
//! - [`sandbox`]: Inline and worker runners
//! - [`script`]: The snippet language interpreter
//! - [`editor`]: Rope-backed editing and completion
//! - [`ui`]: Terminal UI components
//! - [`highlight`]: Syntax highlighting
//! - [`config`]: Saved command-line defaults

pub mod app;
pub mod config;
pub mod editor;
pub mod highlight;
pub mod perf;
pub mod sandbox;
pub mod script;
pub mod session;
pub mod ui;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::{App, Message, Model};
    pub use crate::sandbox::{RunnerKind, SandboxRunner};
    pub use crate::session::Session;
}
