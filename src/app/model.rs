use std::path::PathBuf;
use std::time::{Duration, Instant};

use ratatui::layout::Rect;
use ratatui::text::Line;

use crate::editor::Completion;
use crate::sandbox::LineKind;
use crate::session::Session;
use crate::ui::PlaygroundLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
struct Toast {
    level: ToastLevel,
    message: String,
    expires_at: Instant,
}

/// The complete application state.
///
/// All state lives here - no global or scattered state. Playground state
/// (source, output, runner) is owned by [`Session`].
pub struct Model {
    /// Source, output log, run state and sandbox
    pub session: Session,
    /// Name shown in the editor title
    pub source_name: String,
    /// Terminal size (columns, rows)
    pub width: u16,
    pub height: u16,
    /// First visible editor line
    pub editor_scroll_offset: usize,
    /// First visible output line
    pub output_scroll_offset: usize,
    /// Keep the newest output line in view
    pub output_follow: bool,
    /// Open completion popup
    pub completion: Option<Completion>,
    /// Whether help overlay is visible
    pub help_visible: bool,
    /// Scroll offset inside the help overlay
    pub help_scroll_offset: usize,
    /// Global config path shown in help
    pub config_global_path: Option<PathBuf>,
    /// Local override path shown in help
    pub config_local_path: Option<PathBuf>,
    /// Whether the app should quit
    pub should_quit: bool,
    toast: Option<Toast>,
    /// Highlighted editor lines keyed by buffer revision
    highlight_cache: Option<(u64, Vec<Line<'static>>)>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("session", &self.session)
            .field("size", &(self.width, self.height))
            .field("completion", &self.completion.is_some())
            .field("help_visible", &self.help_visible)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn new(session: Session, terminal_size: (u16, u16)) -> Self {
        Self {
            session,
            source_name: "snippet.js".to_string(),
            width: terminal_size.0,
            height: terminal_size.1,
            editor_scroll_offset: 0,
            output_scroll_offset: 0,
            output_follow: true,
            completion: None,
            help_visible: false,
            help_scroll_offset: 0,
            config_global_path: None,
            config_local_path: None,
            should_quit: false,
            toast: None,
            highlight_cache: None,
        }
    }

    pub const fn area(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn layout(&self) -> PlaygroundLayout {
        crate::ui::layout(self.area(), self.toast.is_some())
    }

    /// Rows available for editor text.
    pub fn editor_visible_rows(&self) -> usize {
        usize::from(crate::ui::inner_area(self.layout().editor).height)
    }

    /// Rows available for output text.
    pub fn output_visible_rows(&self) -> usize {
        usize::from(crate::ui::inner_area(self.layout().output).height)
    }

    /// Number of rows the output pane content occupies.
    pub fn output_line_count(&self) -> usize {
        self.session.display_text().split('\n').count()
    }

    pub fn max_output_scroll(&self) -> usize {
        self.output_line_count()
            .saturating_sub(self.output_visible_rows())
    }

    /// First output row to draw, honoring tail-follow.
    pub fn effective_output_scroll(&self) -> usize {
        let max = self.max_output_scroll();
        if self.output_follow {
            max
        } else {
            self.output_scroll_offset.min(max)
        }
    }

    /// Keep the cursor line inside the editor viewport.
    pub(super) fn ensure_cursor_visible(&mut self) {
        let cursor_line = self.session.buffer().cursor().line;
        let visible = self.editor_visible_rows();
        if visible == 0 {
            self.editor_scroll_offset = cursor_line;
            return;
        }
        if cursor_line < self.editor_scroll_offset {
            self.editor_scroll_offset = cursor_line;
        } else if cursor_line >= self.editor_scroll_offset + visible {
            self.editor_scroll_offset = cursor_line + 1 - visible;
        }
    }

    /// Highlighted editor lines, recomputed only when the buffer changed.
    pub fn highlighted_lines(&mut self) -> &[Line<'static>] {
        let revision = self.session.buffer().revision();
        let stale = self
            .highlight_cache
            .as_ref()
            .is_none_or(|(cached, _)| *cached != revision);
        if stale {
            let lines = crate::highlight::highlight_source(&self.session.source());
            self.highlight_cache = Some((revision, lines));
        }
        match &self.highlight_cache {
            Some((_, lines)) => lines,
            None => &[],
        }
    }

    /// Pull finished work from the runner. Returns true if the view changed.
    pub fn poll_session(&mut self) -> bool {
        let was_running = self.session.is_running();
        let changed = self.session.poll();
        if was_running && !self.session.is_running() {
            let worker_failed = self
                .session
                .output()
                .iter()
                .any(|line| line.kind == LineKind::WorkerError);
            if worker_failed {
                self.show_toast(ToastLevel::Error, "Worker failed to run the snippet");
            }
        }
        changed
    }

    pub(super) fn show_toast(&mut self, level: ToastLevel, message: impl Into<String>) {
        self.toast = Some(Toast {
            level,
            message: message.into(),
            expires_at: Instant::now() + Duration::from_secs(4),
        });
    }

    pub(super) fn expire_toast(&mut self, now: Instant) -> bool {
        if self
            .toast
            .as_ref()
            .is_some_and(|toast| toast.expires_at <= now)
        {
            self.toast = None;
            return true;
        }
        false
    }

    pub fn active_toast(&self) -> Option<(&str, ToastLevel)> {
        self.toast
            .as_ref()
            .map(|toast| (toast.message.as_str(), toast.level))
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new(Session::default(), (80, 24))
    }
}
