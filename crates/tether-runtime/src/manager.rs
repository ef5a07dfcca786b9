#![forbid(unsafe_code)]

//! Per-runtime ownership root.
//!
//! A [`RuntimeManager`] exclusively owns one [`Runtime`] plus the handles
//! that serve it: the scheduler, the error handler, the worklet compile
//! cache, the boxed-object side table, the value-setter and
//! render-request hooks, and (on the UI side) the mapper registry.
//!
//! Ownership is deliberately acyclic: bridge objects (boxes, cells,
//! remote records, live handles) hold `Weak` references back to their
//! manager, never strong ones, so tearing a manager down drops its
//! runtime even while handles are still floating around. A handle whose
//! manager is gone reports [`tether_core::BridgeError::RuntimeTornDown`].

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use ahash::{AHashMap, AHashSet};
use tether_core::{NativeFn, ObjectId, Runtime, RuntimeId, RuntimeKind};

use crate::cell::MutableCell;
use crate::error_handler::ErrorHandler;
use crate::mapper::MapperRegistry;
use crate::remote::RemoteAccessPolicy;
use crate::scheduler::{Job, Scheduler};
use crate::shareable::{BoxInner, Shareable};
use tether_core::Result;

pub struct RuntimeManager {
    kind: RuntimeKind,
    runtime_id: RuntimeId,
    runtime: Mutex<Runtime>,
    scheduler: Arc<dyn Scheduler>,
    error_handler: Arc<dyn ErrorHandler>,
    /// The manager on the other side of the bridge.
    peer: Mutex<Weak<RuntimeManager>>,
    /// Compiled worklets, keyed by source hash.
    worklet_cache: Mutex<AHashMap<u64, NativeFn>>,
    /// Side table mapping already-boxed heap objects to their box, so a
    /// second adapt reuses the first box instead of rebuilding it.
    boxed: Mutex<AHashMap<ObjectId, Weak<BoxInner>>>,
    /// Objects whose adapt walk is still in progress, used to reject
    /// cyclic object graphs.
    adapting: Mutex<AHashSet<ObjectId>>,
    /// User-registered write funnel for mutable cells (a function value).
    value_setter: Mutex<Option<Shareable>>,
    /// Called on every mapper Clean -> Dirty transition.
    render_hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    remote_policy: Mutex<RemoteAccessPolicy>,
    mappers: Mutex<MapperRegistry>,
}

impl RuntimeManager {
    #[must_use]
    pub fn new(
        kind: RuntimeKind,
        scheduler: Arc<dyn Scheduler>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Arc<Self> {
        let runtime = Runtime::new(kind);
        let runtime_id = runtime.id();
        Arc::new(Self {
            kind,
            runtime_id,
            runtime: Mutex::new(runtime),
            scheduler,
            error_handler,
            peer: Mutex::new(Weak::new()),
            worklet_cache: Mutex::new(AHashMap::new()),
            boxed: Mutex::new(AHashMap::new()),
            adapting: Mutex::new(AHashSet::new()),
            value_setter: Mutex::new(None),
            render_hook: Mutex::new(None),
            remote_policy: Mutex::new(RemoteAccessPolicy::Silent),
            mappers: Mutex::new(MapperRegistry::new()),
        })
    }

    /// Connect the two sides of the bridge. Each side holds only a weak
    /// reference to the other.
    pub fn link(ui: &Arc<Self>, host: &Arc<Self>) {
        debug_assert_eq!(ui.kind, RuntimeKind::Ui);
        debug_assert_eq!(host.kind, RuntimeKind::Host);
        *ui.peer.lock().expect("peer lock poisoned") = Arc::downgrade(host);
        *host.peer.lock().expect("peer lock poisoned") = Arc::downgrade(ui);
    }

    #[must_use]
    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    #[must_use]
    pub fn is_ui(&self) -> bool {
        self.kind == RuntimeKind::Ui
    }

    #[must_use]
    pub fn runtime_id(&self) -> RuntimeId {
        self.runtime_id
    }

    /// Lock the owned runtime. Callers must be running on this manager's
    /// thread; the mutex exists to make first-time cache construction and
    /// scheduled-job access serializable, not to invite cross-thread use.
    #[must_use]
    pub fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().expect("runtime mutex poisoned")
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn error_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.error_handler
    }

    #[must_use]
    pub fn peer(&self) -> Option<Arc<RuntimeManager>> {
        self.peer.lock().expect("peer lock poisoned").upgrade()
    }

    /// The UI-side manager: self if this is the UI side, the peer
    /// otherwise.
    #[must_use]
    pub fn ui_manager(self: &Arc<Self>) -> Option<Arc<RuntimeManager>> {
        if self.is_ui() {
            Some(Arc::clone(self))
        } else {
            self.peer()
        }
    }

    /// Post a job onto this manager's own thread.
    pub fn schedule_on_self(&self, job: Job) {
        match self.kind {
            RuntimeKind::Ui => self.scheduler.schedule_on_ui(job),
            RuntimeKind::Host => self.scheduler.schedule_on_host(job),
        }
    }

    // -- Boxed-object side table ---------------------------------------------

    pub(crate) fn lookup_boxed(&self, id: ObjectId) -> Option<Arc<BoxInner>> {
        self.boxed
            .lock()
            .expect("side table poisoned")
            .get(&id)
            .and_then(Weak::upgrade)
    }

    pub(crate) fn register_boxed(&self, id: ObjectId, inner: Weak<BoxInner>) {
        self.boxed
            .lock()
            .expect("side table poisoned")
            .insert(id, inner);
    }

    /// Mark `id` as being adapted. Returns false when the object is
    /// already on the in-progress stack, which means the walk hit a cycle.
    pub(crate) fn begin_adapt(&self, id: ObjectId) -> bool {
        self.adapting
            .lock()
            .expect("adapt stack poisoned")
            .insert(id)
    }

    pub(crate) fn end_adapt(&self, id: ObjectId) {
        self.adapting
            .lock()
            .expect("adapt stack poisoned")
            .remove(&id);
    }

    // -- Worklet compile cache -----------------------------------------------

    pub(crate) fn cached_worklet(&self, hash: u64) -> Option<NativeFn> {
        self.worklet_cache
            .lock()
            .expect("worklet cache poisoned")
            .get(&hash)
            .cloned()
    }

    pub(crate) fn cache_worklet(&self, hash: u64, compiled: NativeFn) {
        self.worklet_cache
            .lock()
            .expect("worklet cache poisoned")
            .insert(hash, compiled);
    }

    // -- Hooks ---------------------------------------------------------------

    /// Register the write funnel every cell write goes through on the UI
    /// thread. The setter is a function value; it receives a raw-access
    /// proxy and the incoming value.
    pub fn register_value_setter(&self, setter: Shareable) {
        *self.value_setter.lock().expect("value setter poisoned") = Some(setter);
    }

    pub(crate) fn value_setter(&self) -> Option<Shareable> {
        self.value_setter
            .lock()
            .expect("value setter poisoned")
            .clone()
    }

    pub fn set_render_request_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.render_hook.lock().expect("render hook poisoned") = Some(Arc::new(hook));
    }

    /// Ask the frame driver for a render pass, if a hook is registered.
    pub fn request_render(&self) {
        let hook = self
            .render_hook
            .lock()
            .expect("render hook poisoned")
            .clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn set_remote_access_policy(&self, policy: RemoteAccessPolicy) {
        *self.remote_policy.lock().expect("remote policy poisoned") = policy;
    }

    #[must_use]
    pub fn remote_access_policy(&self) -> RemoteAccessPolicy {
        *self.remote_policy.lock().expect("remote policy poisoned")
    }

    // -- Mappers -------------------------------------------------------------

    /// Register a mapper over the given input cells. Returns its id.
    /// The mapper starts dirty, so a render pass is requested right away.
    pub fn start_mapper(
        self: &Arc<Self>,
        mapper: Shareable,
        inputs: Vec<Arc<MutableCell>>,
        outputs: Vec<Arc<MutableCell>>,
    ) -> u64 {
        let id = self
            .mappers
            .lock()
            .expect("mapper registry poisoned")
            .start(self, mapper, inputs, outputs);
        self.request_render();
        id
    }

    /// Remove a mapper; its input listeners are unregistered as it drops.
    pub fn stop_mapper(&self, id: u64) -> bool {
        self.mappers
            .lock()
            .expect("mapper registry poisoned")
            .stop(id)
    }

    #[must_use]
    pub fn mapper_count(&self) -> usize {
        self.mappers.lock().expect("mapper registry poisoned").len()
    }

    /// Run every dirty mapper in ascending id order. Called by the frame
    /// driver once per frame on the UI thread.
    pub fn execute_mappers(self: &Arc<Self>) -> Result<()> {
        let dirty = self
            .mappers
            .lock()
            .expect("mapper registry poisoned")
            .collect_dirty();
        if dirty.is_empty() {
            return Ok(());
        }
        tracing::trace!(message = "mappers.execute", count = dirty.len());
        let mut rt = self.runtime();
        for mapper in dirty {
            mapper.execute(self, &mut rt)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
