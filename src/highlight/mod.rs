//! Syntax highlighting for the snippet editor.
//!
//! Uses syntect's bundled JavaScript definition and converts its styles to
//! ratatui spans.

use std::sync::{Mutex, OnceLock};

use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};

/// One highlighted line per `\n`-separated line of `code`.
///
/// Falls back to unstyled text if the syntax cannot be found or a line
/// fails to highlight.
pub fn highlight_source(code: &str) -> Vec<Line<'static>> {
    let _scope = crate::perf::scope("highlight.source");
    let syntax_set = syntax_set();
    let Some(syntax) = javascript(syntax_set) else {
        return code.split('\n').map(|l| Line::raw(l.to_string())).collect();
    };

    let mode = background_mode();
    let mut highlighter = HighlightLines::new(syntax, theme());
    let mut lines = Vec::new();
    let mut with_newline = String::new();
    for line in code.split('\n') {
        with_newline.clear();
        with_newline.push_str(line);
        with_newline.push('\n');
        let Ok(ranges) = highlighter.highlight_line(&with_newline, syntax_set) else {
            lines.push(Line::raw(line.to_string()));
            continue;
        };
        let spans: Vec<Span<'static>> = ranges
            .into_iter()
            .filter_map(|(style, text)| {
                let text = text.trim_end_matches('\n');
                if text.is_empty() {
                    return None;
                }
                let fg = adjust_fg_for_background(
                    (style.foreground.r, style.foreground.g, style.foreground.b),
                    mode,
                );
                Some(Span::styled(
                    text.to_string(),
                    Style::default().fg(Color::Rgb(fg.0, fg.1, fg.2)),
                ))
            })
            .collect();
        lines.push(Line::from(spans));
    }
    lines
}

fn javascript(syntax_set: &SyntaxSet) -> Option<&SyntaxReference> {
    syntax_set
        .find_syntax_by_token("js")
        .or_else(|| syntax_set.find_syntax_by_name("JavaScript"))
}

fn syntax_set() -> &'static SyntaxSet {
    static SYNTAX_SET: OnceLock<SyntaxSet> = OnceLock::new();
    SYNTAX_SET.get_or_init(|| {
        let _scope = crate::perf::scope("highlight.syntax_set.load_defaults");
        SyntaxSet::load_defaults_newlines()
    })
}

fn theme() -> &'static Theme {
    static THEME: OnceLock<Theme> = OnceLock::new();
    THEME.get_or_init(|| {
        let _scope = crate::perf::scope("highlight.theme.load_defaults");
        let theme_set = ThemeSet::load_defaults();
        let preferred = match background_mode() {
            BackgroundMode::Dark => [
                "Monokai Extended",
                "base16-eighties.dark",
                "Solarized (dark)",
                "base16-ocean.dark",
            ]
            .as_slice(),
            BackgroundMode::Light => [
                "InspiredGitHub",
                "Solarized (light)",
                "base16-ocean.light",
            ]
            .as_slice(),
        };

        for name in preferred {
            if let Some(theme) = theme_set.themes.get(*name) {
                return theme.clone();
            }
        }

        theme_set
            .themes
            .values()
            .next()
            .cloned()
            .unwrap_or_default()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackgroundMode {
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightBackground {
    Light,
    Dark,
}

static BACKGROUND_OVERRIDE: OnceLock<Mutex<Option<HighlightBackground>>> = OnceLock::new();

/// Force the palette used for highlighting; `None` reads `COLORFGBG`.
///
/// Must be called before the first highlight; the theme is chosen once.
pub fn set_background_mode(mode: Option<HighlightBackground>) {
    let lock = BACKGROUND_OVERRIDE.get_or_init(|| Mutex::new(None));
    let mut guard = lock.lock().expect("highlight background lock");
    *guard = mode;
}

/// True when highlighting (and the UI palette) target a light terminal.
pub fn is_light_background() -> bool {
    background_mode() == BackgroundMode::Light
}

fn background_mode() -> BackgroundMode {
    let lock = BACKGROUND_OVERRIDE.get_or_init(|| Mutex::new(None));
    if let Ok(guard) = lock.lock() {
        if let Some(mode) = *guard {
            return match mode {
                HighlightBackground::Light => BackgroundMode::Light,
                HighlightBackground::Dark => BackgroundMode::Dark,
            };
        }
    }
    background_mode_from_colorfgbg(std::env::var("COLORFGBG").ok().as_deref())
}

fn background_mode_from_colorfgbg(colorfgbg: Option<&str>) -> BackgroundMode {
    let Some(value) = colorfgbg else {
        return BackgroundMode::Dark;
    };
    let bg_str = value.rsplit(';').next().unwrap_or(value);
    let Ok(bg) = bg_str.parse::<u8>() else {
        return BackgroundMode::Dark;
    };

    if bg >= 7 {
        BackgroundMode::Light
    } else {
        BackgroundMode::Dark
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names
)]
fn adjust_fg_for_background((r, g, b): (u8, u8, u8), mode: BackgroundMode) -> (u8, u8, u8) {
    match mode {
        BackgroundMode::Dark => (r, g, b),
        BackgroundMode::Light => {
            let luma =
                0.0722f32.mul_add(f32::from(b), 0.2126f32.mul_add(f32::from(r), 0.7152 * f32::from(g)));
            if luma < 155.0 {
                return (r, g, b);
            }
            let dim = |c: u8| (f32::from(c) * 0.42).round() as u8;
            (dim(r), dim(g), dim(b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_highlight_javascript_produces_colored_spans() {
        let code = "const x = 1;\nconsole.log(x);";
        let lines = highlight_source(code);

        assert_eq!(lines.len(), 2);
        let has_color = lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .any(|span| span.style.fg.is_some());
        assert!(has_color, "Expected at least one colored span");
    }

    #[test]
    fn test_highlight_preserves_text_and_line_count() {
        let code = "let a = 'x';\n\n  return a;\n";
        let lines = highlight_source(code);
        assert_eq!(lines.len(), 4);
        assert_eq!(text_of(&lines[0]), "let a = 'x';");
        assert_eq!(text_of(&lines[1]), "");
        assert_eq!(text_of(&lines[2]), "  return a;");
        assert_eq!(text_of(&lines[3]), "");
    }

    #[test]
    fn test_highlight_does_not_set_background_color() {
        let lines = highlight_source("function f() {}");
        let has_bg = lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .any(|span| span.style.bg.is_some());
        assert!(!has_bg, "Highlighting should not override background");
    }

    #[test]
    fn test_colorfgbg_dark_background() {
        let mode = background_mode_from_colorfgbg(Some("15;0"));
        assert_eq!(mode, BackgroundMode::Dark);
    }

    #[test]
    fn test_colorfgbg_light_background() {
        let mode = background_mode_from_colorfgbg(Some("0;15"));
        assert_eq!(mode, BackgroundMode::Light);
    }

    #[test]
    fn test_colorfgbg_garbage_defaults_dark() {
        assert_eq!(
            background_mode_from_colorfgbg(Some("default")),
            BackgroundMode::Dark
        );
        assert_eq!(background_mode_from_colorfgbg(None), BackgroundMode::Dark);
    }

    #[test]
    fn test_background_override() {
        set_background_mode(Some(HighlightBackground::Light));
        assert_eq!(background_mode(), BackgroundMode::Light);
        set_background_mode(Some(HighlightBackground::Dark));
        assert_eq!(background_mode(), BackgroundMode::Dark);
        set_background_mode(None);
    }

    #[test]
    fn test_light_mode_darkens_bright_fg() {
        let bright = (240, 230, 120);
        let adjusted = adjust_fg_for_background(bright, BackgroundMode::Light);
        assert!(adjusted.0 < bright.0);
        assert!(adjusted.1 < bright.1);
        assert!(adjusted.2 < bright.2);
        let luma = 0.0722f32.mul_add(
            f32::from(adjusted.2),
            0.2126f32.mul_add(f32::from(adjusted.0), 0.7152 * f32::from(adjusted.1)),
        );
        assert!(luma < 120.0, "Adjusted color still too bright: {luma}");
    }

    #[test]
    fn test_dark_mode_keeps_colors() {
        let color = (240, 230, 120);
        assert_eq!(adjust_fg_for_background(color, BackgroundMode::Dark), color);
    }
}
