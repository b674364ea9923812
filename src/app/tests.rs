use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, Event, KeyCode, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};

use crate::editor::Direction;
use crate::sandbox::net::OfflineFetcher;
use crate::sandbox::{DEFAULT_RELAY_URL, RunEnv, RunnerKind};
use crate::session::{OUTPUT_PLACEHOLDER, RUNNING_TEXT, Session};
use crate::ui::{Button, button_rects, editor_text_area};

use super::event_loop::ResizeDebouncer;
use super::{App, Message, Model, ToastLevel, update};

fn create_model(kind: RunnerKind, source: &str) -> Model {
    let env = RunEnv::new(DEFAULT_RELAY_URL, Arc::new(OfflineFetcher));
    Model::new(Session::with_kind(source, kind, env), (80, 24))
}

fn create_test_model(source: &str) -> Model {
    create_model(RunnerKind::Inline, source)
}

fn key(code: KeyCode, modifiers: KeyModifiers) -> event::KeyEvent {
    event::KeyEvent::new(code, modifiers)
}

fn click(column: u16, row: u16) -> MouseEvent {
    MouseEvent {
        kind: MouseEventKind::Down(MouseButton::Left),
        column,
        row,
        modifiers: KeyModifiers::NONE,
    }
}

fn run_now(model: Model) -> Model {
    let mut model = update(model, Message::Run);
    App::start_pending_run(&mut model);
    model
}

#[test]
fn test_insert_char_edits_source() {
    let mut model = create_test_model("");
    model = update(model, Message::EditorInsertChar('a'));
    model = update(model, Message::EditorInsertChar('b'));
    assert_eq!(model.session.source(), "ab");
}

#[test]
fn test_split_line_keeps_cursor_visible() {
    let mut model = create_test_model("");
    for _ in 0..40 {
        model = update(model, Message::EditorSplitLine);
    }
    let cursor_line = model.session.buffer().cursor().line;
    let visible = model.editor_visible_rows();
    assert_eq!(cursor_line, 40);
    assert!(cursor_line >= model.editor_scroll_offset);
    assert!(cursor_line < model.editor_scroll_offset + visible);
}

#[test]
fn test_open_and_accept_completion() {
    let mut model = create_test_model("console.log(1)\ncons");
    model = update(model, Message::EditorMoveToEnd);
    model = update(model, Message::OpenCompletion);
    let completion = model.completion.as_ref().expect("completion should open");
    assert_eq!(completion.items[0], "console");

    model = update(model, Message::CompletionNext);
    assert_eq!(
        model.completion.as_ref().and_then(|c| c.selected_item()),
        Some("const")
    );
    model = update(model, Message::AcceptCompletion);
    assert!(model.completion.is_none());
    assert_eq!(model.session.source(), "console.log(1)\nconst");
}

#[test]
fn test_typing_narrows_open_completion() {
    let mut model = create_test_model("console\nco");
    model = update(model, Message::EditorMoveToEnd);
    model = update(model, Message::OpenCompletion);
    assert!(model.completion.is_some());

    model = update(model, Message::EditorInsertChar('n'));
    let completion = model.completion.as_ref().expect("completion stays open");
    assert_eq!(completion.prefix, "con");

    model = update(model, Message::EditorInsertChar('('));
    assert!(model.completion.is_none());
}

#[test]
fn test_cursor_motion_closes_completion() {
    let mut model = create_test_model("console\nco");
    model = update(model, Message::EditorMoveToEnd);
    model = update(model, Message::OpenCompletion);
    model = update(model, Message::EditorMoveCursor(Direction::Left));
    assert!(model.completion.is_none());
}

#[test]
fn test_open_completion_without_matches_shows_toast() {
    let mut model = create_test_model("zzqx");
    model = update(model, Message::EditorMoveToEnd);
    model = update(model, Message::OpenCompletion);
    assert!(model.completion.is_none());
    assert_eq!(
        model.active_toast(),
        Some(("No completions", ToastLevel::Info))
    );
}

#[test]
fn test_run_queues_then_starts_after_render() {
    let mut model = create_test_model("console.log('hi')");
    model = update(model, Message::Run);
    assert!(model.session.is_running());
    assert!(model.session.has_pending_start());
    assert_eq!(model.session.display_text(), RUNNING_TEXT);

    App::start_pending_run(&mut model);
    assert!(!model.session.is_running());
    assert_eq!(model.session.display_text(), "hi");
}

#[test]
fn test_second_inline_run_is_rejected_while_running() {
    let mut model = create_test_model("console.log('hi')");
    model = update(model, Message::Run);
    model = update(model, Message::Run);
    assert_eq!(
        model.active_toast(),
        Some(("A run is already in progress", ToastLevel::Warning))
    );
    App::start_pending_run(&mut model);
    assert_eq!(model.session.display_text(), "hi");
}

#[test]
fn test_reset_restores_placeholder() {
    let mut model = run_now(create_test_model("console.log('hi')"));
    model = update(model, Message::Reset);
    assert_eq!(model.session.display_text(), OUTPUT_PLACEHOLDER);
    assert_eq!(model.active_toast(), Some(("Reset", ToastLevel::Info)));
}

#[test]
fn test_output_scroll_follows_tail_until_scrolled_up() {
    let mut model = run_now(create_test_model(
        "for (let i = 0; i < 40; i++) console.log(i)",
    ));
    assert_eq!(model.output_line_count(), 40);
    let max = model.max_output_scroll();
    assert!(max > 0);
    assert_eq!(model.effective_output_scroll(), max);

    model = update(model, Message::OutputScrollUp(5));
    assert!(!model.output_follow);
    assert_eq!(model.effective_output_scroll(), max - 5);

    model = update(model, Message::OutputScrollDown(100));
    assert!(model.output_follow);
    assert_eq!(model.effective_output_scroll(), max);
}

#[test]
fn test_help_toggle_and_scroll() {
    let mut model = create_test_model("");
    model = update(model, Message::ToggleHelp);
    assert!(model.help_visible);
    model = update(model, Message::HelpScrollDown);
    assert_eq!(model.help_scroll_offset, 1);
    model = update(model, Message::HelpScrollUp);
    model = update(model, Message::HelpScrollUp);
    assert_eq!(model.help_scroll_offset, 0);
    model = update(model, Message::HideHelp);
    assert!(!model.help_visible);
}

#[test]
fn test_quit_sets_should_quit() {
    let model = update(create_test_model(""), Message::Quit);
    assert!(model.should_quit);
}

#[test]
fn test_resize_updates_size() {
    let model = update(create_test_model(""), Message::Resize(120, 40));
    assert_eq!((model.width, model.height), (120, 40));
}

#[test]
fn test_toast_lifecycle() {
    let mut model = create_test_model("");
    model.show_toast(ToastLevel::Warning, "copy failed");
    let (msg, level) = model.active_toast().expect("toast should be set");
    assert_eq!(msg, "copy failed");
    assert_eq!(level, ToastLevel::Warning);
    assert!(!model.expire_toast(Instant::now()));
    assert!(model.expire_toast(Instant::now() + Duration::from_secs(5)));
    assert!(model.active_toast().is_none());
}

#[test]
fn test_copy_with_no_output_shows_toast() {
    let mut model = create_test_model("");
    App::handle_message_side_effects(&mut model, &Message::CopyOutput);
    assert_eq!(
        model.active_toast(),
        Some(("Nothing to copy", ToastLevel::Info))
    );
}

#[test]
fn test_run_keys() {
    let model = create_test_model("");
    assert_eq!(
        App::handle_key(key(KeyCode::F(5), KeyModifiers::NONE), &model),
        Some(Message::Run)
    );
    assert_eq!(
        App::handle_key(key(KeyCode::Char('r'), KeyModifiers::CONTROL), &model),
        Some(Message::Run)
    );
    assert_eq!(
        App::handle_key(key(KeyCode::F(6), KeyModifiers::NONE), &model),
        Some(Message::Reset)
    );
    assert_eq!(
        App::handle_key(key(KeyCode::Char('q'), KeyModifiers::CONTROL), &model),
        Some(Message::Quit)
    );
}

#[test]
fn test_plain_chars_insert_text() {
    let model = create_test_model("");
    assert_eq!(
        App::handle_key(key(KeyCode::Char('q'), KeyModifiers::NONE), &model),
        Some(Message::EditorInsertChar('q'))
    );
    assert_eq!(
        App::handle_key(key(KeyCode::Char('Q'), KeyModifiers::SHIFT), &model),
        Some(Message::EditorInsertChar('Q'))
    );
    assert_eq!(
        App::handle_key(key(KeyCode::Left, KeyModifiers::CONTROL), &model),
        Some(Message::EditorMoveWordLeft)
    );
}

#[test]
fn test_completion_keys_take_priority_when_open() {
    let mut model = create_test_model("console\nco");
    assert_eq!(
        App::handle_key(key(KeyCode::Char(' '), KeyModifiers::CONTROL), &model),
        Some(Message::OpenCompletion)
    );
    assert_eq!(
        App::handle_key(key(KeyCode::Down, KeyModifiers::NONE), &model),
        Some(Message::EditorMoveCursor(Direction::Down))
    );

    model = update(model, Message::EditorMoveToEnd);
    model = update(model, Message::OpenCompletion);
    assert_eq!(
        App::handle_key(key(KeyCode::Down, KeyModifiers::NONE), &model),
        Some(Message::CompletionNext)
    );
    assert_eq!(
        App::handle_key(key(KeyCode::Enter, KeyModifiers::NONE), &model),
        Some(Message::AcceptCompletion)
    );
    assert_eq!(
        App::handle_key(key(KeyCode::Esc, KeyModifiers::NONE), &model),
        Some(Message::CancelCompletion)
    );
}

#[test]
fn test_help_mode_any_key_closes_help() {
    let mut model = create_test_model("");
    model.help_visible = true;
    assert_eq!(
        App::handle_key(key(KeyCode::Char('x'), KeyModifiers::NONE), &model),
        Some(Message::HideHelp)
    );
    assert_eq!(
        App::handle_key(key(KeyCode::Char('j'), KeyModifiers::NONE), &model),
        Some(Message::HelpScrollDown)
    );
}

#[test]
fn test_paste_normalizes_line_endings() {
    let model = create_test_model("");
    let mut debouncer = ResizeDebouncer::new(100);
    let msg = App::handle_event(
        &Event::Paste("a\r\nb\rc".to_string()),
        &model,
        0,
        &mut debouncer,
    );
    assert_eq!(msg, Some(Message::EditorPaste("a\nb\nc".to_string())));
}

#[test]
fn test_resize_event_is_debounced() {
    let model = create_test_model("");
    let mut debouncer = ResizeDebouncer::new(100);
    let msg = App::handle_event(&Event::Resize(100, 30), &model, 0, &mut debouncer);
    assert_eq!(msg, None);
    assert!(debouncer.is_pending());
    assert_eq!(debouncer.take_ready(100), Some((100, 30)));
}

#[test]
fn test_mouse_click_on_buttons() {
    let model = create_test_model("console.log(1)");
    let rects = button_rects(model.layout().controls);
    let expected = [Message::Run, Message::Reset, Message::CopyOutput];
    for ((button, rect), msg) in rects.into_iter().zip(expected) {
        assert_eq!(
            App::handle_mouse(click(rect.x, rect.y), &model),
            Some(msg),
            "{button:?}"
        );
    }
}

#[test]
fn test_inline_run_button_disabled_while_running() {
    let model = update(create_test_model("console.log(1)"), Message::Run);
    let (button, rect) = button_rects(model.layout().controls)[0];
    assert_eq!(button, Button::Run);
    assert_eq!(App::handle_mouse(click(rect.x, rect.y), &model), None);
}

#[test]
fn test_worker_run_button_stays_enabled() {
    let mut model = run_now(create_model(RunnerKind::Worker, "while (true) {}"));
    assert!(model.session.is_running());
    let (_, rect) = button_rects(model.layout().controls)[0];
    assert_eq!(
        App::handle_mouse(click(rect.x, rect.y), &model),
        Some(Message::Run)
    );
    model = update(model, Message::Reset);
    assert_eq!(model.session.active_handles(), 0);
}

#[test]
fn test_mouse_click_in_editor_moves_cursor() {
    let model = create_test_model("abc\ndef");
    let text = editor_text_area(model.layout().editor, 2);
    let msg = App::handle_mouse(click(text.x + 2, text.y + 1), &model);
    assert_eq!(msg, Some(Message::EditorMoveTo(1, 2)));

    let model = update(model, msg.expect("click message"));
    let cursor = model.session.buffer().cursor();
    assert_eq!((cursor.line, cursor.col), (1, 2));
}

#[test]
fn test_mouse_wheel_scrolls_pane_under_pointer() {
    let model = create_test_model("");
    let layout = model.layout();
    let wheel = |kind, area: ratatui::layout::Rect| MouseEvent {
        kind,
        column: area.x + 2,
        row: area.y + 1,
        modifiers: KeyModifiers::NONE,
    };
    assert_eq!(
        App::handle_mouse(wheel(MouseEventKind::ScrollDown, layout.output), &model),
        Some(Message::OutputScrollDown(3))
    );
    assert_eq!(
        App::handle_mouse(wheel(MouseEventKind::ScrollUp, layout.editor), &model),
        Some(Message::EditorScrollUp(3))
    );
}

#[test]
fn test_resize_debouncer_waits_for_quiet_period() {
    let mut debouncer = ResizeDebouncer::new(100);
    debouncer.queue(120, 40, 0);

    assert!(debouncer.take_ready(50).is_none());
    assert_eq!(debouncer.take_ready(100), Some((120, 40)));
}

#[test]
fn test_resize_debouncer_uses_latest_size() {
    let mut debouncer = ResizeDebouncer::new(100);
    debouncer.queue(120, 40, 0);
    debouncer.queue(140, 50, 20);

    assert!(debouncer.take_ready(80).is_none());
    assert_eq!(debouncer.take_ready(120), Some((140, 50)));
}
