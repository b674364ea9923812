use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Padding, Paragraph};
use unicode_width::UnicodeWidthStr;

use crate::app::Model;

use super::style::Theme;

/// Most completion entries shown at once.
const COMPLETION_ROWS: u16 = 8;

/// Where the completion popup goes: under the cursor, flipped above it when
/// the editor has no room below.
pub fn completion_popup_rect(model: &Model, editor: Rect) -> Option<Rect> {
    let completion = model.completion.as_ref()?;
    let buffer = model.session.buffer();
    let text = super::editor_text_area(editor, buffer.line_count());
    let cursor = buffer.cursor();
    let row_offset = cursor.line.checked_sub(model.editor_scroll_offset)?;
    let row_offset = u16::try_from(row_offset).ok()?;
    if row_offset >= text.height {
        return None;
    }
    let cursor_row = text.y + row_offset;

    let widest = completion
        .items
        .iter()
        .map(|item| UnicodeWidthStr::width(item.as_str()))
        .max()
        .unwrap_or(0);
    let width = u16::try_from(widest + 2).unwrap_or(u16::MAX).clamp(12, 40) + 2;
    let rows = u16::try_from(completion.items.len())
        .unwrap_or(u16::MAX)
        .min(COMPLETION_ROWS);
    let height = rows + 2;

    let anchor_col = u16::try_from(completion.start_col).unwrap_or(u16::MAX);
    let right = editor.x + editor.width;
    let x = text
        .x
        .saturating_add(anchor_col)
        .min(right.saturating_sub(width))
        .max(editor.x);

    let bottom = editor.y + editor.height;
    let y = if cursor_row + 1 + height <= bottom {
        cursor_row + 1
    } else {
        cursor_row.saturating_sub(height).max(editor.y)
    };
    Some(Rect::new(x, y, width.min(editor.width), height.min(editor.height)))
}

pub fn render_completion_popup(model: &Model, frame: &mut Frame, editor: Rect, theme: &Theme) {
    let Some(completion) = model.completion.as_ref() else {
        return;
    };
    let Some(popup) = completion_popup_rect(model, editor) else {
        return;
    };

    let visible_rows = usize::from(popup.height.saturating_sub(2));
    // Keep the selected entry in view.
    let start = completion
        .selected
        .saturating_sub(visible_rows.saturating_sub(1));
    let lines: Vec<Line> = completion
        .items
        .iter()
        .enumerate()
        .skip(start)
        .take(visible_rows)
        .map(|(idx, item)| {
            let style = if idx == completion.selected {
                theme.selection
            } else {
                Style::default()
            };
            Line::styled(format!(" {item}"), style)
        })
        .collect();

    let title = format!(" {}/{} ", completion.selected + 1, completion.items.len());
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .style(Style::default().bg(Color::Black).fg(Color::White));
    frame.render_widget(Clear, popup);
    frame.render_widget(Paragraph::new(lines).block(block), popup);
}

pub fn help_popup_rect(area: Rect) -> Rect {
    let popup_width = area.width.saturating_sub(12).max(48);
    let popup_height = area.height.saturating_sub(6).max(12);
    centered_popup_rect(popup_width, popup_height, area)
}

pub fn render_help_overlay(model: &Model, frame: &mut Frame, area: Rect) {
    let popup = help_popup_rect(area);

    let global_cfg = model
        .config_global_path
        .as_ref()
        .map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string());
    let local_cfg = model
        .config_local_path
        .as_ref()
        .map_or_else(|| "<none>".to_string(), |p| p.display().to_string());

    let section_style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);
    let dim_style = Style::default().fg(Color::Indexed(245));

    let mut all_lines: Vec<Line> = Vec::new();

    // Run
    all_lines.push(Line::styled("Run", section_style));
    all_lines.push(Line::raw("  F5 / Ctrl-r         Run snippet"));
    all_lines.push(Line::raw("  F6 / Ctrl-l         Reset sandbox and output"));
    all_lines.push(Line::raw("  Ctrl-y              Copy output"));
    all_lines.push(Line::raw("  Mouse click         Run / Reset / Copy buttons"));
    all_lines.push(Line::raw(""));

    // Editor
    all_lines.push(Line::styled("Editor", section_style));
    all_lines.push(Line::raw("  Arrows, Home/End    Navigate"));
    all_lines.push(Line::raw("  Ctrl+Left/Right     Word movement"));
    all_lines.push(Line::raw("  Ctrl+Home/End       Buffer start / end"));
    all_lines.push(Line::raw("  Tab                 Indent to next tab stop"));
    all_lines.push(Line::raw("  Mouse click/wheel   Move cursor / scroll"));
    all_lines.push(Line::raw(""));

    // Completion
    all_lines.push(Line::styled("Completion", section_style));
    all_lines.push(Line::raw("  Ctrl-Space          Suggest words"));
    all_lines.push(Line::raw("  Up/Down             Select"));
    all_lines.push(Line::raw("  Enter / Tab         Accept"));
    all_lines.push(Line::raw("  Esc                 Dismiss"));
    all_lines.push(Line::raw(""));

    // Output
    all_lines.push(Line::styled("Output", section_style));
    all_lines.push(Line::raw("  PageUp/PageDown     Scroll output"));
    all_lines.push(Line::raw("  Mouse wheel         Scroll output"));
    all_lines.push(Line::raw(""));

    // Other
    all_lines.push(Line::styled("Other", section_style));
    all_lines.push(Line::raw("  Ctrl-c / Ctrl-q     Quit"));
    all_lines.push(Line::raw("  F1                  Toggle help"));
    all_lines.push(Line::raw(""));

    // Config
    all_lines.push(Line::styled("Config", section_style));
    all_lines.push(Line::raw(format!("  Global: {global_cfg}")));
    all_lines.push(Line::raw(format!("  Local override: {local_cfg}")));

    let block = Block::default()
        .title("Help")
        .borders(Borders::ALL)
        .padding(Padding::uniform(1))
        .style(Style::default().bg(Color::Black).fg(Color::White));

    frame.render_widget(Clear, popup);
    frame.render_widget(block, popup);

    // Inner area: border(1) + padding(1) on each side = 4
    let inner = Rect::new(
        popup.x + 2,
        popup.y + 2,
        popup.width.saturating_sub(4),
        popup.height.saturating_sub(4),
    );

    // Reserve 1 row at bottom for footer hint
    let content_height_u16 = inner.height.saturating_sub(1);
    let content_height = content_height_u16 as usize;
    let max_scroll = all_lines.len().saturating_sub(content_height);
    let scroll = model.help_scroll_offset.min(max_scroll);

    let end = (scroll + content_height).min(all_lines.len());
    let visible: Vec<Line> = all_lines[scroll..end].to_vec();

    let content_area = Rect::new(inner.x, inner.y, inner.width, content_height_u16);
    frame.render_widget(Paragraph::new(visible), content_area);

    // Footer hint
    let footer_area = Rect::new(inner.x, inner.y + content_height_u16, inner.width, 1);
    let footer = Line::styled("j/k scroll \u{2502} any key closes", dim_style);
    frame.render_widget(Paragraph::new(footer), footer_area);
}

fn centered_popup_rect(width: u16, height: u16, area: Rect) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(w) / 2);
    let y = area.y + (area.height.saturating_sub(h) / 2);
    Rect::new(x, y, w, h)
}
