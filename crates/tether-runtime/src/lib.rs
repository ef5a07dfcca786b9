#![forbid(unsafe_code)]

//! Bridge between the UI and host runtimes: transferable boxed values,
//! shared mutable cells, lazily materialized remote records, and dirty
//! propagation mappers.
//!
//! # Design
//!
//! The two runtimes never share heap objects. Everything that crosses is
//! first adapted into a [`Shareable`] box, a `Send` payload with one
//! cached runtime-local reconstruction per side. Cross-thread effects
//! travel exclusively as fire-and-forget jobs through a [`Scheduler`];
//! failures inside those jobs surface through the destination side's
//! [`ErrorHandler`] rather than propagating back to the caller.
//!
//! Each side of the bridge is rooted in a [`RuntimeManager`], created in
//! pairs and connected with [`RuntimeManager::link`].

pub mod cell;
pub mod error_handler;
pub mod frozen;
pub mod manager;
pub mod mapper;
pub mod remote;
pub mod scheduler;
pub mod shareable;
mod worklet;

pub use cell::MutableCell;
pub use error_handler::{ErrorHandler, TracingHandler};
pub use frozen::FrozenRecord;
pub use manager::RuntimeManager;
pub use mapper::{Mapper, MapperRegistry};
pub use remote::{RemoteAccessPolicy, RemoteRecord};
pub use scheduler::{Job, Scheduler};
pub use shareable::{AdaptHint, Shareable, ValueKind};

pub use tether_core::{
    BridgeError, Result, Runtime, RuntimeId, RuntimeKind, Value, WorkletCompiler, WorkletInfo,
};

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tether_core::{NativeFn, Result, RuntimeKind};

    use crate::error_handler::ErrorHandler;
    use crate::manager::RuntimeManager;
    use crate::scheduler::{Job, Scheduler};

    /// Deterministic two-queue scheduler driven explicitly by tests.
    #[derive(Default)]
    pub(crate) struct QueueScheduler {
        ui: Mutex<VecDeque<Job>>,
        host: Mutex<VecDeque<Job>>,
    }

    impl QueueScheduler {
        pub(crate) fn pending_ui(&self) -> usize {
            self.ui.lock().expect("ui queue poisoned").len()
        }

        pub(crate) fn pending_host(&self) -> usize {
            self.host.lock().expect("host queue poisoned").len()
        }

        /// Run queued UI jobs, including ones they enqueue.
        pub(crate) fn run_ui(&self) {
            loop {
                let job = self.ui.lock().expect("ui queue poisoned").pop_front();
                match job {
                    Some(job) => job(),
                    None => break,
                }
            }
        }

        pub(crate) fn run_host(&self) {
            loop {
                let job = self.host.lock().expect("host queue poisoned").pop_front();
                match job {
                    Some(job) => job(),
                    None => break,
                }
            }
        }
    }

    impl Scheduler for QueueScheduler {
        fn schedule_on_ui(&self, job: Job) {
            self.ui.lock().expect("ui queue poisoned").push_back(job);
        }

        fn schedule_on_host(&self, job: Job) {
            self.host.lock().expect("host queue poisoned").push_back(job);
        }
    }

    /// Error handler that records every message for assertions.
    #[derive(Default)]
    pub(crate) struct CollectingHandler {
        messages: Mutex<Vec<String>>,
        raised: AtomicUsize,
    }

    impl CollectingHandler {
        pub(crate) fn messages(&self) -> Vec<String> {
            self.messages.lock().expect("messages poisoned").clone()
        }

        pub(crate) fn raised(&self) -> usize {
            self.raised.load(Ordering::SeqCst)
        }
    }

    impl ErrorHandler for CollectingHandler {
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

    /// Worklet compiler backed by a source-text lookup table.
    #[derive(Clone, Default)]
    pub(crate) struct KeyedCompiler {
        table: Arc<Mutex<ahash::AHashMap<String, NativeFn>>>,
        compiles: Arc<AtomicUsize>,
    }

    impl KeyedCompiler {
        pub(crate) fn register(&self, source: impl Into<String>, body: NativeFn) {
            self.table
                .lock()
                .expect("compiler table poisoned")
                .insert(source.into(), body);
        }

        pub(crate) fn compile_count(&self) -> usize {
            self.compiles.load(Ordering::SeqCst)
        }
    }

    impl tether_core::WorkletCompiler for KeyedCompiler {
        fn compile(&self, source: &str, location: &str) -> Result<NativeFn> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            self.table
                .lock()
                .expect("compiler table poisoned")
                .get(source)
                .cloned()
                .ok_or_else(|| {
                    tether_core::BridgeError::worklet_execution(
                        Some(location),
                        "unknown worklet source",
                    )
                })
        }
    }

    /// A linked UI/host manager pair sharing one scheduler and handler.
    pub(crate) struct Fixture {
        pub(crate) ui: Arc<RuntimeManager>,
        pub(crate) host: Arc<RuntimeManager>,
        pub(crate) scheduler: Arc<QueueScheduler>,
        pub(crate) handler: Arc<CollectingHandler>,
        pub(crate) compiler: KeyedCompiler,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            let scheduler = Arc::new(QueueScheduler::default());
            let handler = Arc::new(CollectingHandler::default());
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
            let compiler = KeyedCompiler::default();
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
}
