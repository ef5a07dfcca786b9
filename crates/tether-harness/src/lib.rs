#![forbid(unsafe_code)]

//! Deterministic test doubles for exercising the bridge without real
//! threads or a real script engine.
//!
//! The bridge itself never creates threads; it only posts jobs through a
//! [`Scheduler`]. [`ManualScheduler`] exploits that: both "threads" are
//! plain queues the test drives explicitly, so every interleaving in a
//! test is written down rather than raced. [`SourceTableCompiler`] plays
//! the part of script evaluation with a source-text lookup table, and
//! [`BridgePair`] wires a full UI/host manager pair out of these parts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tether_core::{BridgeError, NativeFn, Result, RuntimeKind, WorkletCompiler};
use tether_runtime::{ErrorHandler, Job, RuntimeManager, Scheduler};

/// Two explicit job queues standing in for the UI and host threads.
///
/// Jobs run in posting order when the test calls [`ManualScheduler::run_ui`]
/// or [`ManualScheduler::run_host`]; nothing runs on its own.
#[derive(Default)]
pub struct ManualScheduler {
    ui: Mutex<VecDeque<Job>>,
    host: Mutex<VecDeque<Job>>,
}

impl ManualScheduler {
    #[must_use]
    pub fn pending_ui(&self) -> usize {
        self.ui.lock().expect("ui queue poisoned").len()
    }

    #[must_use]
    pub fn pending_host(&self) -> usize {
        self.host.lock().expect("host queue poisoned").len()
    }

    /// Drain the UI queue, including jobs enqueued while draining.
    pub fn run_ui(&self) {
        loop {
            let job = self.ui.lock().expect("ui queue poisoned").pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// Drain the host queue, including jobs enqueued while draining.
    pub fn run_host(&self) {
        loop {
            let job = self.host.lock().expect("host queue poisoned").pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// Alternate draining both queues until neither has work, so jobs
    /// that bounce between threads settle.
    pub fn run_all(&self) {
        while self.pending_ui() > 0 || self.pending_host() > 0 {
            self.run_ui();
            self.run_host();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_on_ui(&self, job: Job) {
        self.ui.lock().expect("ui queue poisoned").push_back(job);
    }

    fn schedule_on_host(&self, job: Job) {
        self.host.lock().expect("host queue poisoned").push_back(job);
    }
}

/// Error handler that records every reported message.
#[derive(Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<String>>,
    raised: AtomicUsize,
}

impl RecordingHandler {
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages poisoned").clone()
    }

    /// How many times an error was surfaced.
    #[must_use]
    pub fn raised(&self) -> usize {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.messages.lock().expect("messages poisoned").clear();
        self.raised.store(0, Ordering::SeqCst);
    }
}

impl ErrorHandler for RecordingHandler {
    fn set_error(&self, message: &str) {
        self.messages
            .lock()
            .expect("messages poisoned")
            .push(message.to_string());
    }

    fn raise(&self) {
        self.raised.fetch_add(1, Ordering::SeqCst);
    }
}

/// Worklet "compiler" backed by a source-text lookup table.
///
/// Tests register the native body for each source string up front; an
/// unregistered source compiles to a worklet-execution error. The
/// compile counter exposes how often the bridge actually invoked the
/// compiler, which is how compile-once caching is asserted.
#[derive(Clone, Default)]
pub struct SourceTableCompiler {
    table: Arc<Mutex<std::collections::HashMap<String, NativeFn>>>,
    compiles: Arc<AtomicUsize>,
}

impl SourceTableCompiler {
    pub fn register(&self, source: impl Into<String>, body: NativeFn) {
        self.table
            .lock()
            .expect("compiler table poisoned")
            .insert(source.into(), body);
    }

    #[must_use]
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl WorkletCompiler for SourceTableCompiler {
    fn compile(&self, source: &str, location: &str) -> Result<NativeFn> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.table
            .lock()
            .expect("compiler table poisoned")
            .get(source)
            .cloned()
            .ok_or_else(|| {
                BridgeError::worklet_execution(Some(location), "unknown worklet source")
            })
    }
}

/// A fully wired UI/host manager pair sharing one scheduler and one
/// error handler, with the compiler installed on the UI runtime.
pub struct BridgePair {
    pub ui: Arc<RuntimeManager>,
    pub host: Arc<RuntimeManager>,
    pub scheduler: Arc<ManualScheduler>,
    pub handler: Arc<RecordingHandler>,
    pub compiler: SourceTableCompiler,
}

impl BridgePair {
    #[must_use]
    pub fn new() -> Self {
        let scheduler = Arc::new(ManualScheduler::default());
        let handler = Arc::new(RecordingHandler::default());
        let ui = RuntimeManager::new(
            RuntimeKind::Ui,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            Arc::clone(&handler) as Arc<dyn ErrorHandler>,
        );
        let host = RuntimeManager::new(
            RuntimeKind::Host,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            Arc::clone(&handler) as Arc<dyn ErrorHandler>,
        );
        RuntimeManager::link(&ui, &host);
        let compiler = SourceTableCompiler::default();
        ui.runtime().set_compiler(Box::new(compiler.clone()));
        Self {
            ui,
            host,
            scheduler,
            handler,
            compiler,
        }
    }
}

impl Default for BridgePair {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
