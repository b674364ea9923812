//! Worker execution: each run gets its own OS thread, interpreter and
//! message channel.
//!
//! Only the source string and `Send` capabilities cross into the worker.
//! Console calls come back as tagged [`WorkerMessage`]s in the order they
//! were made. There is no "done" message; the host notices the worker has
//! stopped when the channel disconnects.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::{
    OutputLine, RunEnv, RunEvent, RunnerKind, SCRIPT_STACK_SIZE, SandboxError, SandboxRunner,
    WORKER_THREAD_PREFIX, panic_message,
};
use crate::script::{
    ConsoleSink, Interpreter, LogLevel, ParseMode, RELAY_URL_GLOBAL, ScriptError, Value, parse,
};

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(1);

/// Messages a worker posts back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Console { level: LogLevel, text: String },
    /// The snippet threw; caught by the worker's own guard.
    Error(String),
    /// The worker itself failed: the snippet did not compile or the
    /// thread crashed.
    Fault(String),
}

impl From<WorkerMessage> for OutputLine {
    fn from(message: WorkerMessage) -> Self {
        match message {
            WorkerMessage::Console { level, text } => Self::console(level, text),
            WorkerMessage::Error(text) => Self::error(text),
            WorkerMessage::Fault(text) => Self::worker_error(text),
        }
    }
}

struct ChannelConsole {
    tx: Sender<WorkerMessage>,
}

impl ConsoleSink for ChannelConsole {
    fn emit(&mut self, level: LogLevel, text: String) -> bool {
        self.tx.send(WorkerMessage::Console { level, text }).is_ok()
    }
}

/// Live handles and live worker threads, shared by a runner and its workers.
///
/// The two differ after teardown: a handle is released at once, while its
/// thread keeps running until the interpreter reaches its next statement.
/// A worker blocked inside a fetch lingers until the request returns.
#[derive(Debug, Clone, Default)]
pub struct WorkerCounters {
    handles: Arc<AtomicUsize>,
    threads: Arc<AtomicUsize>,
}

impl WorkerCounters {
    pub fn handles(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> usize {
        self.threads.load(Ordering::SeqCst)
    }
}

/// Decrements the thread count when the worker closure ends, however it ends.
struct ThreadSlot(Arc<AtomicUsize>);

impl ThreadSlot {
    fn claim(threads: &Arc<AtomicUsize>) -> Self {
        threads.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(threads))
    }
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns one running (or finished) worker.
///
/// Dropping the handle raises the worker's interrupt flag and closes the
/// channel, so an abandoned worker stops at its next statement. The handle
/// counts as released immediately; see [`WorkerCounters`] for the thread.
pub struct SandboxHandle {
    id: usize,
    interrupt: Arc<AtomicBool>,
    rx: Receiver<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
    handles: Arc<AtomicUsize>,
    exited: bool,
}

impl SandboxHandle {
    /// Spawn a worker for `source`.
    ///
    /// # Errors
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(
        source: &str,
        env: &RunEnv,
        counters: &WorkerCounters,
    ) -> Result<Self, SandboxError> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let interrupt = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let source = source.to_string();
        let env = env.clone();
        let flag = Arc::clone(&interrupt);
        let slot = ThreadSlot::claim(&counters.threads);
        let thread = thread::Builder::new()
            .name(format!("{WORKER_THREAD_PREFIX}{id}"))
            .stack_size(SCRIPT_STACK_SIZE)
            .spawn(move || {
                let _slot = slot;
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_worker(&source, &env, &tx, flag);
                }));
                if let Err(payload) = result {
                    let message = panic_message(payload.as_ref());
                    warn!(worker = id, %message, "worker.fault");
                    let _ = tx.send(WorkerMessage::Fault(message));
                }
            })?;

        counters.handles.fetch_add(1, Ordering::SeqCst);
        debug!(worker = id, "worker.spawn");
        Ok(Self {
            id,
            interrupt,
            rx,
            thread: Some(thread),
            handles: Arc::clone(&counters.handles),
            exited: false,
        })
    }

    pub const fn id(&self) -> usize {
        self.id
    }

    /// Ask the worker to stop at its next statement.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    /// True once the worker thread has finished and every message was read.
    pub const fn has_exited(&self) -> bool {
        self.exited
    }

    /// Everything the worker posted since the last drain. Ends with
    /// [`RunEvent::Finished`] exactly once, after the worker has stopped.
    pub fn drain(&mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        if self.exited {
            return events;
        }
        loop {
            match self.rx.try_recv() {
                Ok(message) => events.push(RunEvent::Line(message.into())),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!(worker = self.id, "worker.exited");
                    self.exited = true;
                    events.push(RunEvent::Finished);
                    break;
                }
            }
        }
        events
    }

    /// Block until the worker thread returns.
    pub fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker = self.id, "worker.join_failed");
            }
        }
    }

    /// Dispose of the handle. The thread is detached and winds down on its own;
    /// one blocked in a fetch stays alive until the request returns.
    pub fn terminate(self) {
        debug!(worker = self.id, "worker.teardown");
        drop(self);
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        self.interrupt();
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_worker(source: &str, env: &RunEnv, tx: &Sender<WorkerMessage>, interrupt: Arc<AtomicBool>) {
    let program = match parse(source, ParseMode::Script) {
        Ok(program) => program,
        Err(err) => {
            let _ = tx.send(WorkerMessage::Fault(ScriptError::from(err).to_string()));
            return;
        }
    };

    let console = ChannelConsole { tx: tx.clone() };
    let mut interpreter =
        Interpreter::new(Box::new(console), Arc::clone(&env.fetcher)).with_interrupt(interrupt);
    interpreter.define_global(RELAY_URL_GLOBAL, Value::from(env.relay_url.as_str()));

    match interpreter.run_script(&program) {
        Ok(()) => {}
        Err(ScriptError::Interrupted) => debug!("worker.interrupted"),
        Err(err) => {
            let _ = tx.send(WorkerMessage::Error(err.message()));
        }
    }
}

/// Runs each snippet on a fresh worker, keeping at most one alive.
pub struct WorkerRunner {
    env: RunEnv,
    handle: Option<SandboxHandle>,
    counters: WorkerCounters,
}

impl WorkerRunner {
    pub fn new(env: RunEnv) -> Self {
        Self {
            env,
            handle: None,
            counters: WorkerCounters::default(),
        }
    }

    pub const fn handle(&self) -> Option<&SandboxHandle> {
        self.handle.as_ref()
    }

    /// Worker threads still running, including torn-down ones that have
    /// not reached an interrupt check yet.
    pub fn running_threads(&self) -> usize {
        self.counters.threads()
    }
}

impl SandboxRunner for WorkerRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Worker
    }

    fn start(&mut self, source: &str) -> Result<(), SandboxError> {
        self.teardown();
        let handle = SandboxHandle::spawn(source, &self.env, &self.counters)?;
        self.handle = Some(handle);
        Ok(())
    }

    fn poll(&mut self) -> Vec<RunEvent> {
        self.handle
            .as_mut()
            .map_or_else(Vec::new, SandboxHandle::drain)
    }

    fn wait(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.wait();
        }
    }

    fn teardown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.terminate();
            debug!(threads = self.counters.threads(), "worker.teardown.threads");
        }
    }

    fn active_handles(&self) -> usize {
        self.counters.handles()
    }

    fn reset_restores_source(&self) -> bool {
        false
    }
}

impl Drop for WorkerRunner {
    fn drop(&mut self) {
        self.teardown();
    }
}
