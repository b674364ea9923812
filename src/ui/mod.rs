//! Terminal UI components.
//!
//! - [`layout`]: where the editor, controls and output pane go
//! - [`style`]: Theming and colors
//! - rendering of the panes, overlays and status bars

pub mod style;

mod overlays;
mod render;
mod status;

use ratatui::layout::{Constraint, Layout, Rect};

pub use overlays::{completion_popup_rect, help_popup_rect};
pub use render::{line_number_width, output_lines, render};

/// Share of the main area given to the editor.
pub const EDITOR_HEIGHT_PERCENT: u16 = 60;

/// Label shown on the Run button while the inline runner is busy.
pub const RUNNING_LABEL: &str = "Running...";

/// Screen regions of the playground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaygroundLayout {
    pub editor: Rect,
    pub controls: Rect,
    pub output: Rect,
    pub toast: Option<Rect>,
    pub status: Rect,
}

pub fn layout(area: Rect, toast_active: bool) -> PlaygroundLayout {
    let footer_rows = 1 + u16::from(toast_active);
    let main = Rect {
        height: area.height.saturating_sub(footer_rows),
        ..area
    };
    let [editor, controls, output] = Layout::vertical([
        Constraint::Percentage(EDITOR_HEIGHT_PERCENT),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .areas(main);
    let toast = toast_active.then(|| Rect {
        y: area.y + area.height.saturating_sub(2),
        height: 1,
        ..area
    });
    let status = Rect {
        y: area.y + area.height.saturating_sub(1),
        height: 1,
        ..area
    };
    PlaygroundLayout {
        editor,
        controls,
        output,
        toast,
        status,
    }
}

/// Clickable controls between the editor and the output pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Run,
    Reset,
    Copy,
}

impl Button {
    pub const ALL: [Self; 3] = [Self::Run, Self::Reset, Self::Copy];

    /// Columns reserved for the button; Run leaves room for its busy label.
    const fn slot_width(self) -> u16 {
        match self {
            Self::Run => 14,
            Self::Reset => 9,
            Self::Copy => 8,
        }
    }

    pub const fn label(self, running: bool) -> &'static str {
        match self {
            Self::Run if running => "[ Running... ]",
            Self::Run => "[ Run ]",
            Self::Reset => "[ Reset ]",
            Self::Copy => "[ Copy ]",
        }
    }
}

pub fn button_rects(controls: Rect) -> Vec<(Button, Rect)> {
    let mut x = controls.x + 1;
    let right = controls.x + controls.width;
    let mut rects = Vec::new();
    for button in Button::ALL {
        let width = button.slot_width().min(right.saturating_sub(x));
        rects.push((button, Rect::new(x, controls.y, width, controls.height.min(1))));
        x = x.saturating_add(button.slot_width() + 1);
    }
    rects
}

pub fn button_at(controls: Rect, col: u16, row: u16) -> Option<Button> {
    button_rects(controls)
        .into_iter()
        .find(|(_, rect)| point_in_rect(col, row, *rect))
        .map(|(button, _)| button)
}

/// Text region of the editor: inside the border, right of the gutter.
pub fn editor_text_area(editor: Rect, total_lines: usize) -> Rect {
    let inner = inner_area(editor);
    let gutter = line_number_width(total_lines) + 1;
    Rect {
        x: inner.x + gutter.min(inner.width),
        width: inner.width.saturating_sub(gutter),
        ..inner
    }
}

/// Area inside a bordered block.
pub const fn inner_area(area: Rect) -> Rect {
    Rect {
        x: area.x.saturating_add(1),
        y: area.y.saturating_add(1),
        width: area.width.saturating_sub(2),
        height: area.height.saturating_sub(2),
    }
}

pub const fn point_in_rect(col: u16, row: u16, rect: Rect) -> bool {
    col >= rect.x && col < rect.x + rect.width && row >= rect.y && row < rect.y + rect.height
}
