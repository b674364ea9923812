//! Theming and color definitions.
//!
//! Uses ANSI colors that adapt to the terminal's color palette; highlighted
//! code falls back to the xterm 256-color cube when truecolor is missing.

use ratatui::style::{Color, Modifier, Style};

use crate::sandbox::{LineKind, OutputLine};
use crate::script::LogLevel;

/// Style for one line of the output pane.
pub fn style_for_output_line(line: &OutputLine) -> Style {
    let light_bg = crate::highlight::is_light_background();
    match line.kind {
        LineKind::Console(LogLevel::Log) | LineKind::Result => Style::default(),
        LineKind::Console(LogLevel::Info) => Style::default().fg(if light_bg {
            Color::Indexed(25)
        } else {
            Color::Cyan
        }),
        LineKind::Console(LogLevel::Warn) => Style::default().fg(if light_bg {
            Color::Indexed(136)
        } else {
            Color::Yellow
        }),
        LineKind::Console(LogLevel::Error) | LineKind::Error => Style::default().fg(if light_bg {
            Color::Indexed(124)
        } else {
            Color::Red
        }),
        LineKind::WorkerError => Style::default()
            .fg(if light_bg {
                Color::Indexed(124)
            } else {
                Color::LightRed
            })
            .add_modifier(Modifier::BOLD),
        LineKind::Notice => Style::default()
            .fg(Color::Indexed(245))
            .add_modifier(Modifier::ITALIC),
    }
}

/// Map a highlighter color to something the terminal can show.
pub fn terminal_color(color: Color) -> Color {
    match color {
        Color::Rgb(r, g, b) if !supports_truecolor() => Color::Indexed(rgb_to_xterm_256(r, g, b)),
        other => other,
    }
}

fn supports_truecolor() -> bool {
    if let Ok(force) = std::env::var("SNIPBOX_TRUECOLOR") {
        let value = force.to_ascii_lowercase();
        return matches!(value.as_str(), "1" | "true" | "yes" | "on");
    }
    supports_truecolor_from_env(
        std::env::var("COLORTERM").ok().as_deref(),
        std::env::var("TERM").ok().as_deref(),
    )
}

fn supports_truecolor_from_env(colorterm: Option<&str>, term: Option<&str>) -> bool {
    if let Some(ct) = colorterm {
        let lower = ct.to_ascii_lowercase();
        if lower.contains("truecolor") || lower.contains("24bit") {
            return true;
        }
    }
    if let Some(t) = term {
        let lower = t.to_ascii_lowercase();
        if lower.contains("direct") || lower.contains("truecolor") {
            return true;
        }
    }
    false
}

fn rgb_to_xterm_256(r: u8, g: u8, b: u8) -> u8 {
    // Result is always 0-5, fits in u8
    #[allow(clippy::cast_possible_truncation)]
    let to_cube = |v: u8| ((u16::from(v) * 5) / 255) as u8;
    let ri = to_cube(r);
    let gi = to_cube(g);
    let bi = to_cube(b);
    16 + (36 * ri) + (6 * gi) + bi
}

/// Colors for the playground chrome.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Line-number gutter
    pub gutter: Style,
    /// Block cursor in the editor
    pub cursor: Style,
    /// Border of the focused pane
    pub focus_border: Style,
    /// Enabled button
    pub button: Style,
    /// Disabled button
    pub button_disabled: Style,
    /// Selected completion entry
    pub selection: Style,
    /// Status bar background
    pub status_bg: Color,
    /// Status bar foreground
    pub status_fg: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            gutter: Style::default().fg(Color::DarkGray),
            cursor: Style::default().bg(Color::White).fg(Color::Black),
            focus_border: Style::default().fg(Color::Yellow),
            button: Style::default()
                .fg(Color::Black)
                .bg(Color::Green)
                .add_modifier(Modifier::BOLD),
            button_disabled: Style::default()
                .fg(Color::Indexed(250))
                .bg(Color::Indexed(238)),
            selection: Style::default().fg(Color::Black).bg(Color::Cyan),
            status_bg: Color::Indexed(236), // Dark gray that works on both
            status_fg: Color::Indexed(252), // Light gray
        }
    }
}

impl Theme {
    /// Theme matching the detected terminal background.
    pub fn current() -> Self {
        if crate::highlight::is_light_background() {
            Self::light()
        } else {
            Self::dark()
        }
    }

    /// Create a theme optimized for dark terminals.
    pub fn dark() -> Self {
        Self::default()
    }

    /// Create a theme optimized for light terminals.
    pub fn light() -> Self {
        Self {
            gutter: Style::default().fg(Color::Indexed(245)),
            cursor: Style::default().bg(Color::Black).fg(Color::White),
            focus_border: Style::default().fg(Color::Indexed(136)),
            button: Style::default()
                .fg(Color::White)
                .bg(Color::Indexed(28))
                .add_modifier(Modifier::BOLD),
            button_disabled: Style::default()
                .fg(Color::Indexed(240))
                .bg(Color::Indexed(252)),
            selection: Style::default().fg(Color::White).bg(Color::Indexed(25)),
            status_bg: Color::Indexed(252),
            status_fg: Color::Indexed(235),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_lines_are_red_family() {
        let style = style_for_output_line(&OutputLine::error("boom"));
        assert!(style.fg.is_some());
        let plain = style_for_output_line(&OutputLine::console(LogLevel::Log, "x"));
        assert_eq!(plain.fg, None);
    }

    #[test]
    fn test_worker_error_is_bold() {
        let style = style_for_output_line(&OutputLine::worker_error("x"));
        assert!(style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_dark_and_light_buttons_differ() {
        assert_ne!(Theme::dark().button, Theme::light().button);
        assert!(Theme::dark().button.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_named_colors_pass_through() {
        assert_eq!(terminal_color(Color::Red), Color::Red);
    }

    #[test]
    fn test_truecolor_detection_without_colorterm() {
        assert!(!supports_truecolor_from_env(None, Some("xterm-256color")));
    }

    #[test]
    fn test_truecolor_detection_with_colorterm() {
        assert!(supports_truecolor_from_env(
            Some("truecolor"),
            Some("xterm-256color")
        ));
    }

    #[test]
    fn test_fallback_indexed_color_when_not_truecolor() {
        let idx = rgb_to_xterm_256(255, 0, 0);
        assert_eq!(idx, 196);
    }
}
