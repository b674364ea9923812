use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::Frame;

use crate::app::{App, Message, Model};
use crate::editor::Direction;
use crate::ui::{Button, button_at, editor_text_area, point_in_rect};

use super::event_loop::ResizeDebouncer;

/// Lines moved per mouse wheel notch.
const WHEEL_STEP: usize = 3;

impl App {
    pub(super) fn handle_event(
        event: &Event,
        model: &Model,
        now_ms: u64,
        resize_debouncer: &mut ResizeDebouncer,
    ) -> Option<Message> {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => Self::handle_key(*key, model),
            Event::Mouse(mouse) => Self::handle_mouse(*mouse, model),
            Event::Paste(text) if !model.help_visible => {
                Some(Message::EditorPaste(text.replace("\r\n", "\n").replace('\r', "\n")))
            }
            Event::Resize(w, h) => {
                tracing::debug!(width = w, height = h, "event.resize.queue");
                resize_debouncer.queue(*w, *h, now_ms);
                None
            }
            _ => None,
        }
    }

    pub(super) fn handle_mouse(mouse: MouseEvent, model: &Model) -> Option<Message> {
        if model.help_visible {
            return match mouse.kind {
                MouseEventKind::ScrollUp => Some(Message::HelpScrollUp),
                MouseEventKind::ScrollDown => Some(Message::HelpScrollDown),
                MouseEventKind::Down(MouseButton::Left) => Some(Message::HideHelp),
                _ => None,
            };
        }

        let layout = model.layout();
        let in_editor = point_in_rect(mouse.column, mouse.row, layout.editor);
        let in_output = point_in_rect(mouse.column, mouse.row, layout.output);

        match mouse.kind {
            MouseEventKind::ScrollUp if in_output => Some(Message::OutputScrollUp(WHEEL_STEP)),
            MouseEventKind::ScrollDown if in_output => Some(Message::OutputScrollDown(WHEEL_STEP)),
            MouseEventKind::ScrollUp if in_editor => Some(Message::EditorScrollUp(WHEEL_STEP)),
            MouseEventKind::ScrollDown if in_editor => Some(Message::EditorScrollDown(WHEEL_STEP)),
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(button) = button_at(layout.controls, mouse.column, mouse.row) {
                    return match button {
                        Button::Run if model.session.run_enabled() => Some(Message::Run),
                        Button::Run => None,
                        Button::Reset => Some(Message::Reset),
                        Button::Copy => Some(Message::CopyOutput),
                    };
                }
                if in_editor {
                    return editor_position_at(model, mouse.column, mouse.row)
                        .map(|(line, col)| Message::EditorMoveTo(line, col));
                }
                model.completion.as_ref().map(|_| Message::CancelCompletion)
            }
            _ => None,
        }
    }

    pub(super) fn handle_key(key: KeyEvent, model: &Model) -> Option<Message> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);

        if model.help_visible {
            return match key.code {
                KeyCode::Up | KeyCode::Char('k') => Some(Message::HelpScrollUp),
                KeyCode::Down | KeyCode::Char('j') => Some(Message::HelpScrollDown),
                KeyCode::Char('c' | 'q') if ctrl => Some(Message::Quit),
                _ => Some(Message::HideHelp),
            };
        }

        // Global bindings
        match key.code {
            KeyCode::F(5) => return Some(Message::Run),
            KeyCode::Char('r') if ctrl => return Some(Message::Run),
            KeyCode::F(6) => return Some(Message::Reset),
            KeyCode::Char('l') if ctrl => return Some(Message::Reset),
            KeyCode::Char('y') if ctrl => return Some(Message::CopyOutput),
            KeyCode::F(1) => return Some(Message::ToggleHelp),
            KeyCode::Char('q' | 'c') if ctrl => return Some(Message::Quit),
            KeyCode::PageUp => {
                return Some(Message::OutputScrollUp(model.output_visible_rows().max(1)));
            }
            KeyCode::PageDown => {
                return Some(Message::OutputScrollDown(model.output_visible_rows().max(1)));
            }
            KeyCode::Char(' ') if ctrl => return Some(Message::OpenCompletion),
            KeyCode::Null => return Some(Message::OpenCompletion),
            _ => {}
        }

        if model.completion.is_some() {
            match key.code {
                KeyCode::Up => return Some(Message::CompletionPrev),
                KeyCode::Down => return Some(Message::CompletionNext),
                KeyCode::Enter | KeyCode::Tab => return Some(Message::AcceptCompletion),
                KeyCode::Esc => return Some(Message::CancelCompletion),
                _ => {}
            }
        }

        match key.code {
            KeyCode::Char(c) if !ctrl && !alt => Some(Message::EditorInsertChar(c)),
            KeyCode::Enter => Some(Message::EditorSplitLine),
            KeyCode::Tab => Some(Message::EditorInsertTab),
            KeyCode::Backspace => Some(Message::EditorDeleteBack),
            KeyCode::Delete => Some(Message::EditorDeleteForward),
            KeyCode::Left if ctrl => Some(Message::EditorMoveWordLeft),
            KeyCode::Right if ctrl => Some(Message::EditorMoveWordRight),
            KeyCode::Left => Some(Message::EditorMoveCursor(Direction::Left)),
            KeyCode::Right => Some(Message::EditorMoveCursor(Direction::Right)),
            KeyCode::Up => Some(Message::EditorMoveCursor(Direction::Up)),
            KeyCode::Down => Some(Message::EditorMoveCursor(Direction::Down)),
            KeyCode::Home if ctrl => Some(Message::EditorMoveToStart),
            KeyCode::End if ctrl => Some(Message::EditorMoveToEnd),
            KeyCode::Home => Some(Message::EditorMoveHome),
            KeyCode::End => Some(Message::EditorMoveEnd),
            _ => None,
        }
    }

    pub(super) fn view(model: &mut Model, frame: &mut Frame) {
        crate::ui::render(model, frame);
    }
}

/// Buffer position under a click in the editor pane.
fn editor_position_at(model: &Model, col: u16, row: u16) -> Option<(usize, usize)> {
    let buffer = model.session.buffer();
    let text = editor_text_area(model.layout().editor, buffer.line_count());
    if row < text.y || row >= text.y + text.height {
        return None;
    }
    let line = model.editor_scroll_offset + usize::from(row - text.y);
    if line >= buffer.line_count() {
        return Some((buffer.line_count().saturating_sub(1), usize::MAX));
    }
    let col = usize::from(col.saturating_sub(text.x));
    Some((line, col))
}
