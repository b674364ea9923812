use std::io::stdout;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event;
use crossterm::event::{
    DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
};
use crossterm::execute;
use ratatui::DefaultTerminal;
use tracing::debug;

use crate::app::{App, Message, Model, update};
use crate::session::Session;

pub(super) struct ResizeDebouncer {
    delay_ms: u64,
    pending: Option<(u16, u16, u64)>,
}

impl ResizeDebouncer {
    pub(super) const fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            pending: None,
        }
    }

    pub(super) const fn queue(&mut self, width: u16, height: u16, now_ms: u64) {
        self.pending = Some((width, height, now_ms));
    }

    pub(super) fn take_ready(&mut self, now_ms: u64) -> Option<(u16, u16)> {
        let (width, height, queued_at) = self.pending?;
        if now_ms.saturating_sub(queued_at) >= self.delay_ms {
            self.pending = None;
            Some((width, height))
        } else {
            None
        }
    }

    pub(super) const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Poll interval while a worker may still post output.
const RUNNING_POLL_MS: u64 = 16;
const IDLE_POLL_MS: u64 = 250;

impl App {
    /// Run the main event loop.
    ///
    /// # Errors
    ///
    /// Returns an error if terminal initialization or the event loop
    /// encounters an I/O failure.
    pub fn run(&mut self) -> Result<()> {
        let _run_scope = crate::perf::scope("app.run.total");

        let init_scope = crate::perf::scope("app.ratatui_init");
        let mut terminal = ratatui::try_init()
            .context("Failed to initialize terminal - snipbox requires an interactive terminal")?;
        crate::sandbox::install_panic_filter();
        let size = terminal.size()?;
        drop(init_scope);

        let session = Session::with_kind(&self.initial_source, self.runner, self.env.clone());
        let mut model = Model::new(session, (size.width, size.height));
        model.source_name.clone_from(&self.source_name);
        model
            .config_global_path
            .clone_from(&self.config_global_path);
        model.config_local_path.clone_from(&self.config_local_path);
        debug!(runner = %self.runner, "app.start");

        let result = execute!(stdout(), EnableMouseCapture, EnableBracketedPaste)
            .context("Failed to enable mouse capture")
            .and_then(|()| Self::event_loop(&mut terminal, &mut model));

        model.session.shutdown();
        let _ = execute!(stdout(), DisableBracketedPaste, DisableMouseCapture);
        ratatui::restore();

        result
    }

    fn apply(model: &mut Model, msg: Message) {
        debug!(?msg, "event.message");
        let side_msg = msg.clone();
        *model = update(std::mem::take(model), msg);
        Self::handle_message_side_effects(model, &side_msg);
    }

    fn event_loop(terminal: &mut DefaultTerminal, model: &mut Model) -> Result<()> {
        let start = Instant::now();
        let mut resize_debouncer = ResizeDebouncer::new(100);
        let mut frame_idx: u64 = 0;
        let mut needs_render = true;

        loop {
            if model.expire_toast(Instant::now()) {
                needs_render = true;
            }

            let now_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            if let Some((width, height)) = resize_debouncer.take_ready(now_ms) {
                debug!(frame = frame_idx, width, height, "event.resize.apply");
                *model = update(std::mem::take(model), Message::Resize(width, height));
                needs_render = true;
            }

            if model.poll_session() {
                needs_render = true;
            }

            // Handle events
            let poll_ms = if needs_render {
                0
            } else if model.session.is_running() || resize_debouncer.is_pending() {
                RUNNING_POLL_MS
            } else {
                IDLE_POLL_MS
            };
            if event::poll(Duration::from_millis(poll_ms))? {
                // Refresh timestamp after poll wait so debouncers use accurate times.
                let event_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                if let Some(msg) =
                    Self::handle_event(&event::read()?, model, event_ms, &mut resize_debouncer)
                {
                    Self::apply(model, msg);
                    needs_render = true;
                }

                // Coalesce key repeat bursts into a single render.
                let mut drained = 0_u32;
                while event::poll(Duration::from_millis(0))? {
                    let drain_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    if let Some(msg) =
                        Self::handle_event(&event::read()?, model, drain_ms, &mut resize_debouncer)
                    {
                        drained += 1;
                        Self::apply(model, msg);
                        needs_render = true;
                    }
                }
                if drained > 0 {
                    debug!(frame = frame_idx, drained, "event.drain");
                }
            }

            if needs_render {
                frame_idx += 1;
                let draw_start = Instant::now();
                terminal.draw(|frame| Self::view(model, frame))?;
                debug!(
                    frame = frame_idx,
                    draw_ms = draw_start.elapsed().as_secs_f64() * 1000.0,
                    "frame.draw"
                );
                needs_render = false;
            }

            // Start only after "Running..." is on screen.
            if model.session.has_pending_start() {
                Self::start_pending_run(model);
                needs_render = true;
            }

            if model.should_quit {
                break;
            }
        }
        Ok(())
    }
}
