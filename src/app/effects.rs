use std::io::{Write, stdout};

use base64::Engine;
use tracing::{debug, warn};

use crate::app::{App, Message, Model, ToastLevel};

impl App {
    pub(super) fn handle_message_side_effects(model: &mut Model, msg: &Message) {
        if let Message::CopyOutput = msg {
            Self::copy_output(model);
        }
    }

    /// Hand a queued run to the runner once the frame showing it has been
    /// drawn. The inline runner blocks here until the snippet finishes.
    pub(super) fn start_pending_run(model: &mut Model) {
        if !model.session.has_pending_start() {
            return;
        }
        model.session.dispatch();
        model.poll_session();
    }

    fn copy_output(model: &mut Model) {
        if model.session.output().is_empty() {
            model.show_toast(ToastLevel::Info, "Nothing to copy");
            return;
        }
        let text = model.session.display_text();
        let lines = text.lines().count();
        match copy_to_clipboard(&text) {
            Ok(()) => {
                debug!(lines, "clipboard.copy");
                model.show_toast(ToastLevel::Info, format!("Copied {lines} line(s)"));
            }
            Err(err) => {
                warn!(error = %err, "clipboard.copy_failed");
                model.show_toast(ToastLevel::Error, format!("Copy failed: {err}"));
            }
        }
    }
}

fn copy_to_clipboard(text: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        if copy_to_pbcopy(text).is_ok() {
            return Ok(());
        }
    }
    copy_to_clipboard_osc52(text)
}

#[cfg(target_os = "macos")]
fn copy_to_pbcopy(text: &str) -> std::io::Result<()> {
    use std::process::{Command, Stdio};

    let mut child = Command::new("pbcopy").stdin(Stdio::piped()).spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes())?;
    }
    let status = child.wait()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other("pbcopy failed"))
    }
}

fn copy_to_clipboard_osc52(text: &str) -> std::io::Result<()> {
    let osc = osc52_sequence(text);
    let mut out = stdout();
    out.write_all(osc.as_bytes())?;
    out.flush()
}

fn osc52_sequence(text: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
    format!("\x1b]52;c;{encoded}\x07")
}

#[cfg(test)]
mod tests {
    use super::osc52_sequence;

    #[test]
    fn test_osc52_sequence_encodes_text() {
        let seq = osc52_sequence("hi");
        assert_eq!(seq, "\x1b]52;c;aGk=\x07");
    }

    #[test]
    fn test_osc52_sequence_handles_multiline_output() {
        let seq = osc52_sequence("a\nb");
        assert_eq!(seq, "\x1b]52;c;YQpi\x07");
    }
}
