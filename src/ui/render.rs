use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use crate::app::Model;
use crate::session::RunState;

use super::style::{Theme, style_for_output_line, terminal_color};
use super::{Button, button_rects, overlays, status};

/// Render the complete UI.
pub fn render(model: &mut Model, frame: &mut Frame) {
    let _scope = crate::perf::scope("ui.render");
    let area = frame.area();
    let layout = super::layout(area, model.active_toast().is_some());
    let theme = Theme::current();

    render_editor(model, frame, layout.editor, &theme);
    render_controls(model, frame, layout.controls, &theme);
    render_output(model, frame, layout.output);

    if let Some(toast_area) = layout.toast {
        status::render_toast_bar(model, frame, toast_area);
    }
    status::render_status_bar(model, frame, layout.status, &theme);

    if model.help_visible {
        overlays::render_help_overlay(model, frame, area);
    } else if model.completion.is_some() {
        overlays::render_completion_popup(model, frame, layout.editor, &theme);
    }
}

fn render_editor(model: &mut Model, frame: &mut Frame, area: Rect, theme: &Theme) {
    let title = format!(" {} ", model.source_name);
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(theme.focus_border);
    let inner = block.inner(area);
    frame.render_widget(Clear, area);
    frame.render_widget(block, area);

    let total_lines = model.session.buffer().line_count();
    let gutter_width = line_number_width(total_lines);
    let cursor = model.session.buffer().cursor();
    let start = model.editor_scroll_offset;
    let end = (start + usize::from(inner.height)).min(total_lines);

    let highlighted = model.highlighted_lines();
    let mut content: Vec<Line> = Vec::with_capacity(end.saturating_sub(start));
    for line_idx in start..end {
        let line_num = format!("{:>width$} ", line_idx + 1, width = gutter_width as usize);
        let mut spans = vec![Span::styled(line_num, theme.gutter)];

        let code_spans: Vec<Span<'static>> = highlighted
            .get(line_idx)
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| {
                        let mut style = span.style;
                        style.fg = style.fg.map(terminal_color);
                        Span::styled(span.content.clone(), style)
                    })
                    .collect()
            })
            .unwrap_or_default();

        if line_idx == cursor.line {
            spans.extend(splice_cursor(code_spans, cursor.col, theme.cursor));
        } else {
            spans.extend(code_spans);
        }
        content.push(Line::from(spans));
    }

    frame.render_widget(Paragraph::new(content), inner);
}

/// Split styled spans around byte column `col` and draw a block cursor there.
fn splice_cursor(spans: Vec<Span<'static>>, col: usize, cursor_style: Style) -> Vec<Span<'static>> {
    let mut out = Vec::with_capacity(spans.len() + 2);
    let mut offset = 0usize;
    let mut placed = false;

    for span in spans {
        let text = span.content.as_ref();
        let len = text.len();
        let split = col
            .checked_sub(offset)
            .filter(|split| !placed && *split < len && text.is_char_boundary(*split));
        let Some(split) = split else {
            offset += len;
            out.push(span);
            continue;
        };
        let before = &text[..split];
        let mut rest = text[split..].chars();
        let cursor_char = rest.next().map_or_else(|| " ".to_string(), String::from);
        let after = rest.as_str();
        if !before.is_empty() {
            out.push(Span::styled(before.to_string(), span.style));
        }
        out.push(Span::styled(cursor_char, cursor_style));
        if !after.is_empty() {
            out.push(Span::styled(after.to_string(), span.style));
        }
        placed = true;
        offset += len;
    }

    if !placed {
        out.push(Span::styled(" ", cursor_style));
    }
    out
}

fn render_controls(model: &Model, frame: &mut Frame, area: Rect, theme: &Theme) {
    frame.render_widget(Clear, area);
    let running = model.session.is_running();
    for (button, rect) in button_rects(area) {
        if rect.width == 0 {
            continue;
        }
        let enabled = match button {
            Button::Run => model.session.run_enabled(),
            Button::Reset | Button::Copy => true,
        };
        let style = if enabled {
            theme.button
        } else {
            theme.button_disabled
        };
        let label = button.label(running && button == Button::Run);
        frame.render_widget(Paragraph::new(label).style(style), rect);
    }
}

/// Styled rows of the output pane, one per displayed line.
pub fn output_lines(model: &Model) -> Vec<Line<'static>> {
    let output = model.session.output();
    if output.is_empty() {
        let style = Style::default()
            .fg(Color::Indexed(245))
            .add_modifier(Modifier::ITALIC);
        return vec![Line::styled(model.session.display_text(), style)];
    }
    output
        .iter()
        .flat_map(|line| {
            let style = style_for_output_line(line);
            line.to_string()
                .split('\n')
                .map(|row| Line::styled(row.to_string(), style))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn render_output(model: &Model, frame: &mut Frame, area: Rect) {
    let title = match model.session.state() {
        RunState::Running => format!(" Output ({}) ", super::RUNNING_LABEL),
        RunState::Idle => " Output ".to_string(),
    };
    let block = Block::default().title(title).borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(Clear, area);
    frame.render_widget(block, area);

    let scroll = model.effective_output_scroll();
    let visible: Vec<Line> = output_lines(model)
        .into_iter()
        .skip(scroll)
        .take(usize::from(inner.height))
        .collect();
    frame.render_widget(Paragraph::new(visible), inner);
}

/// Calculate the width needed for line numbers.
pub const fn line_number_width(total_lines: usize) -> u16 {
    if total_lines < 10 {
        1
    } else if total_lines < 100 {
        2
    } else if total_lines < 1_000 {
        3
    } else if total_lines < 10_000 {
        4
    } else if total_lines < 100_000 {
        5
    } else {
        6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(spans: &[Span<'_>]) -> String {
        spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_splice_cursor_inside_span() {
        let cursor = Style::default().bg(Color::White);
        let spans = splice_cursor(vec![Span::raw("let x")], 2, cursor);
        assert_eq!(plain(&spans), "let x");
        assert_eq!(spans[1].content, "t");
        assert_eq!(spans[1].style, cursor);
    }

    #[test]
    fn test_splice_cursor_across_spans() {
        let cursor = Style::default().bg(Color::White);
        let spans = splice_cursor(vec![Span::raw("ab"), Span::raw("cd")], 3, cursor);
        assert_eq!(plain(&spans), "abcd");
        assert!(spans.iter().any(|s| s.content == "d" && s.style == cursor));
    }

    #[test]
    fn test_splice_cursor_at_end_appends_block() {
        let cursor = Style::default().bg(Color::White);
        let spans = splice_cursor(vec![Span::raw("ab")], 2, cursor);
        assert_eq!(plain(&spans), "ab ");
        assert_eq!(spans.last().map(|s| s.style), Some(cursor));
    }

    #[test]
    fn test_line_number_width() {
        assert_eq!(line_number_width(9), 1);
        assert_eq!(line_number_width(10), 2);
        assert_eq!(line_number_width(1_000), 4);
    }
}
