use crate::app::{Model, ToastLevel};
use crate::editor::{Completion, Direction};

/// All possible events and actions in the application.
///
/// These represent user input, system events, and internal actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // Editor
    /// Insert a character at the cursor
    EditorInsertChar(char),
    /// Insert pasted text at the cursor
    EditorPaste(String),
    /// Insert spaces up to the next tab stop
    EditorInsertTab,
    /// Delete character before cursor (Backspace)
    EditorDeleteBack,
    /// Delete character at cursor (Delete)
    EditorDeleteForward,
    /// Split line at cursor (Enter)
    EditorSplitLine,
    /// Move cursor in a direction
    EditorMoveCursor(Direction),
    /// Move cursor to beginning of line (Home)
    EditorMoveHome,
    /// Move cursor to end of line (End)
    EditorMoveEnd,
    /// Move cursor one word left (Ctrl+Left)
    EditorMoveWordLeft,
    /// Move cursor one word right (Ctrl+Right)
    EditorMoveWordRight,
    /// Move cursor to start of buffer (Ctrl+Home)
    EditorMoveToStart,
    /// Move cursor to end of buffer (Ctrl+End)
    EditorMoveToEnd,
    /// Move cursor to absolute position (line, col) - e.g. from mouse click
    EditorMoveTo(usize, usize),
    /// Scroll editor viewport up by n lines
    EditorScrollUp(usize),
    /// Scroll editor viewport down by n lines
    EditorScrollDown(usize),

    // Completion
    /// Open the completion popup for the word before the cursor
    OpenCompletion,
    /// Select the next completion entry
    CompletionNext,
    /// Select the previous completion entry
    CompletionPrev,
    /// Replace the word before the cursor with the selected entry
    AcceptCompletion,
    /// Close the completion popup
    CancelCompletion,

    // Playground
    /// Queue a run of the current source
    Run,
    /// Tear down the sandbox and clear the output
    Reset,
    /// Copy the output pane text to the clipboard
    CopyOutput,
    /// Scroll output up by n lines
    OutputScrollUp(usize),
    /// Scroll output down by n lines
    OutputScrollDown(usize),

    // Help
    /// Toggle help overlay
    ToggleHelp,
    /// Hide help overlay
    HideHelp,
    /// Scroll help overlay up
    HelpScrollUp,
    /// Scroll help overlay down
    HelpScrollDown,

    // Window
    /// Terminal resized
    Resize(u16, u16),

    // Application
    /// Quit the application
    Quit,
}

/// Pure function that updates the model based on a message.
///
/// This is the core of TEA - all state transitions happen here. Starting a
/// queued run and clipboard writes happen in the event loop afterwards.
pub fn update(mut model: Model, msg: Message) -> Model {
    match msg {
        // Editor
        Message::EditorInsertChar(ch) => {
            model.session.buffer_mut().insert_char(ch);
            after_edit(&mut model);
        }
        Message::EditorPaste(text) => {
            model.session.buffer_mut().insert_str(&text);
            model.completion = None;
            model.ensure_cursor_visible();
        }
        Message::EditorInsertTab => {
            model.session.buffer_mut().insert_tab();
            model.completion = None;
            model.ensure_cursor_visible();
        }
        Message::EditorDeleteBack => {
            model.session.buffer_mut().delete_back();
            after_edit(&mut model);
        }
        Message::EditorDeleteForward => {
            model.session.buffer_mut().delete_forward();
            after_edit(&mut model);
        }
        Message::EditorSplitLine => {
            model.session.buffer_mut().split_line();
            model.completion = None;
            model.ensure_cursor_visible();
        }
        Message::EditorMoveCursor(dir) => {
            model.session.buffer_mut().move_cursor(dir);
            after_motion(&mut model);
        }
        Message::EditorMoveHome => {
            model.session.buffer_mut().move_home();
            after_motion(&mut model);
        }
        Message::EditorMoveEnd => {
            model.session.buffer_mut().move_end();
            after_motion(&mut model);
        }
        Message::EditorMoveWordLeft => {
            model.session.buffer_mut().move_word_left();
            after_motion(&mut model);
        }
        Message::EditorMoveWordRight => {
            model.session.buffer_mut().move_word_right();
            after_motion(&mut model);
        }
        Message::EditorMoveToStart => {
            model.session.buffer_mut().move_to_start();
            after_motion(&mut model);
        }
        Message::EditorMoveToEnd => {
            model.session.buffer_mut().move_to_end();
            after_motion(&mut model);
        }
        Message::EditorMoveTo(line, col) => {
            model.session.buffer_mut().move_to(line, col);
            after_motion(&mut model);
        }
        Message::EditorScrollUp(n) => {
            model.editor_scroll_offset = model.editor_scroll_offset.saturating_sub(n);
        }
        Message::EditorScrollDown(n) => {
            let max = model.session.buffer().line_count().saturating_sub(1);
            model.editor_scroll_offset = (model.editor_scroll_offset + n).min(max);
        }

        // Completion
        Message::OpenCompletion => {
            model.completion = Completion::for_buffer(model.session.buffer());
            if model.completion.is_none() {
                model.show_toast(ToastLevel::Info, "No completions");
            }
        }
        Message::CompletionNext => {
            if let Some(completion) = &mut model.completion {
                completion.select_next();
            }
        }
        Message::CompletionPrev => {
            if let Some(completion) = &mut model.completion {
                completion.select_prev();
            }
        }
        Message::AcceptCompletion => {
            if let Some(completion) = model.completion.take()
                && let Some(item) = completion.selected_item()
            {
                model
                    .session
                    .buffer_mut()
                    .replace_before_cursor(completion.start_col, item);
                model.ensure_cursor_visible();
            }
        }
        Message::CancelCompletion => {
            model.completion = None;
        }

        // Playground
        Message::Run => {
            model.completion = None;
            if model.session.request_run() {
                model.output_follow = true;
                model.output_scroll_offset = 0;
            } else {
                model.show_toast(ToastLevel::Warning, "A run is already in progress");
            }
        }
        Message::Reset => {
            model.completion = None;
            model.session.reset();
            model.output_follow = true;
            model.output_scroll_offset = 0;
            model.ensure_cursor_visible();
            model.show_toast(ToastLevel::Info, "Reset");
        }
        Message::OutputScrollUp(n) => {
            let current = model.effective_output_scroll();
            model.output_scroll_offset = current.saturating_sub(n);
            model.output_follow = false;
        }
        Message::OutputScrollDown(n) => {
            let max = model.max_output_scroll();
            let next = (model.effective_output_scroll() + n).min(max);
            model.output_scroll_offset = next;
            model.output_follow = next >= max;
        }
        // Handled in side effects
        Message::CopyOutput => {}

        // Help
        Message::ToggleHelp => {
            model.help_visible = !model.help_visible;
            model.help_scroll_offset = 0;
        }
        Message::HideHelp => {
            model.help_visible = false;
        }
        Message::HelpScrollUp => {
            model.help_scroll_offset = model.help_scroll_offset.saturating_sub(1);
        }
        Message::HelpScrollDown => {
            model.help_scroll_offset += 1;
        }

        // Window
        Message::Resize(width, height) => {
            model.width = width;
            model.height = height;
            model.ensure_cursor_visible();
        }

        // Application
        Message::Quit => {
            model.should_quit = true;
        }
    }
    model
}

/// Refresh an open completion after the text changed.
fn after_edit(model: &mut Model) {
    if model.completion.is_some() {
        model.completion = Completion::for_buffer(model.session.buffer())
            .filter(|completion| !completion.prefix.is_empty());
    }
    model.ensure_cursor_visible();
}

fn after_motion(model: &mut Model) {
    model.completion = None;
    model.ensure_cursor_visible();
}
