//! The snippet editor: a rope-backed text buffer with cursor management
//! and identifier completion, driven by the TEA update loop.

mod buffer;
mod completion;

pub use buffer::{Cursor, Direction, EditorBuffer, TAB_WIDTH};
pub use completion::{Completion, MAX_CANDIDATES, candidates};
