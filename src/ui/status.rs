use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::app::{Model, ToastLevel};

use super::style::Theme;

pub fn render_status_bar(model: &Model, frame: &mut Frame, area: Rect, theme: &Theme) {
    let cursor = model.session.buffer().cursor();
    let cursor_info = format!("Ln {}, Col {}", cursor.line + 1, cursor.col + 1);
    let running_indicator = if model.session.is_running() {
        "  [running]"
    } else {
        ""
    };
    let handles = model.session.active_handles();
    let handle_indicator = if handles > 0 {
        format!("  [workers: {handles}]")
    } else {
        String::new()
    };

    let status = format!(
        " snipbox  {}  [{}]  {}{}{}  F5:run F6:reset F1:help",
        model.source_name,
        model.session.runner_kind(),
        cursor_info,
        running_indicator,
        handle_indicator
    );

    let status_bar =
        Paragraph::new(status).style(Style::default().bg(theme.status_bg).fg(theme.status_fg));

    frame.render_widget(status_bar, area);
}

pub fn render_toast_bar(model: &Model, frame: &mut Frame, area: Rect) {
    let Some((message, level)) = model.active_toast() else {
        return;
    };
    let (prefix, style) = match level {
        ToastLevel::Info => (
            "[info]",
            Style::default().bg(Color::DarkGray).fg(Color::White),
        ),
        ToastLevel::Warning => (
            "[warn]",
            Style::default().bg(Color::Yellow).fg(Color::Black),
        ),
        ToastLevel::Error => ("[error]", Style::default().bg(Color::Red).fg(Color::White)),
    };
    let toast = Paragraph::new(format!("{prefix} {message}")).style(style);
    frame.render_widget(toast, area);
}
