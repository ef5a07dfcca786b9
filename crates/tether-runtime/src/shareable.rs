#![forbid(unsafe_code)]

//! Transferable boxed values.
//!
//! A [`Shareable`] is the only form in which a value crosses the bridge.
//! Adapting a runtime value classifies it, captures a thread-safe payload
//! (deep-frozen snapshot, live cell, remote record, function handle), and
//! wraps it in an `Arc` so both threads share one box.
//!
//! # Design
//!
//! Each box keeps one lazily built runtime value per side, guarded by a
//! mutex: the home slot for the runtime that adapted the value, the
//! foreign slot for the other one. Repeated unboxing on a runtime
//! therefore yields the identical heap object, which keeps equality
//! checks and freeze state stable across frames.
//!
//! Already-boxed heap objects are recognized through the manager's side
//! table rather than marker properties on the objects themselves, so a
//! box never perturbs what user code can observe on its source object.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tether_core::{BridgeError, ObjectId, Result, Runtime, RuntimeId, RuntimeKind, Value};

use crate::cell::{CellHandle, MutableCell};
use crate::frozen::FrozenRecord;
use crate::manager::RuntimeManager;
use crate::remote::{RemoteHandle, RemoteRecord};
use crate::worklet;

/// Classification assigned when a value is adapted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    FrozenObject,
    FrozenArray,
    RemoteObject,
    MutableCell,
    HostFunction,
    Worklet,
}

impl ValueKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::FrozenObject => "frozen object",
            ValueKind::FrozenArray => "frozen array",
            ValueKind::RemoteObject => "remote object",
            ValueKind::MutableCell => "mutable cell",
            ValueKind::HostFunction => "host function",
            ValueKind::Worklet => "worklet",
        }
    }
}

/// Caller intent for [`Shareable::adapt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdaptHint {
    /// Classify by shape.
    #[default]
    Auto,
    /// Wrap the value in a fresh mutable cell.
    Mutable,
    /// Keep the object on its home runtime and box a lazy reference.
    Remote,
}

/// Reference to a function that must run on its defining runtime.
pub(crate) struct HostFunctionHandle {
    pub(crate) name: String,
    pub(crate) home: RuntimeId,
    pub(crate) func: ObjectId,
    pub(crate) home_manager: Weak<RuntimeManager>,
}

/// Captured worklet: source, identity hash, and boxed environment.
pub(crate) struct WorkletHandle {
    pub(crate) name: String,
    pub(crate) source: String,
    pub(crate) location: String,
    pub(crate) hash: u64,
    pub(crate) env: Shareable,
}

pub(crate) enum Payload {
    /// `Undefined` and `Null` carry no data; the kind disambiguates.
    Empty,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Frozen(Arc<FrozenRecord>),
    Array(Arc<Vec<Shareable>>),
    Remote(Arc<RemoteRecord>),
    Mutable(Arc<MutableCell>),
    HostFunction(Arc<HostFunctionHandle>),
    Worklet(Arc<WorkletHandle>),
}

#[derive(Default)]
struct CacheSlots {
    home: Option<Value>,
    foreign: Option<Value>,
}

pub(crate) struct BoxInner {
    kind: ValueKind,
    payload: Payload,
    /// Runtime the value was adapted on.
    home: RuntimeId,
    cache: Mutex<CacheSlots>,
}

/// A value in transferable form. Cheap to clone and `Send`; see the
/// module docs for the caching contract.
#[derive(Clone)]
pub struct Shareable {
    inner: Arc<BoxInner>,
}

impl fmt::Debug for Shareable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shareable")
            .field("kind", &self.inner.kind)
            .field("home", &self.inner.home)
            .finish_non_exhaustive()
    }
}

impl Shareable {
    fn from_parts(kind: ValueKind, payload: Payload, home: RuntimeId) -> Self {
        Self {
            inner: Arc::new(BoxInner {
                kind,
                payload,
                home,
                cache: Mutex::new(CacheSlots::default()),
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.inner.kind
    }

    /// Whether two shareables are the same box.
    #[must_use]
    pub fn ptr_eq(&self, other: &Shareable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn frozen_record(&self) -> Option<Arc<FrozenRecord>> {
        match &self.inner.payload {
            Payload::Frozen(record) => Some(Arc::clone(record)),
            _ => None,
        }
    }

    #[must_use]
    pub fn mutable_cell(&self) -> Option<Arc<MutableCell>> {
        match &self.inner.payload {
            Payload::Mutable(cell) => Some(Arc::clone(cell)),
            _ => None,
        }
    }

    #[must_use]
    pub fn remote_record(&self) -> Option<Arc<RemoteRecord>> {
        match &self.inner.payload {
            Payload::Remote(record) => Some(Arc::clone(record)),
            _ => None,
        }
    }

    /// Whether unboxing this value anywhere could expose a function that
    /// lives on another runtime.
    #[must_use]
    pub fn references_host_function(&self) -> bool {
        match &self.inner.payload {
            Payload::HostFunction(_) => true,
            Payload::Frozen(record) => record.contains_host_function(),
            Payload::Array(items) => items.iter().any(Shareable::references_host_function),
            _ => false,
        }
    }

    /// Pre-fill the cache slot for `rt_id` if it is still empty. Used
    /// when the adapted source object itself is the canonical unboxing.
    pub(crate) fn seed_cache_for(&self, rt_id: RuntimeId, value: Value) {
        let mut cache = self.inner.cache.lock().expect("box cache poisoned");
        let slot = if rt_id == self.inner.home {
            &mut cache.home
        } else {
            &mut cache.foreign
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    // -- Adapt ---------------------------------------------------------------

    /// Box a runtime value for transfer. `rt` must be the runtime the
    /// value lives in and `mgr` its manager.
    pub fn adapt(
        mgr: &Arc<RuntimeManager>,
        rt: &mut Runtime,
        value: &Value,
        hint: AdaptHint,
    ) -> Result<Shareable> {
        // Reuse the existing box for an already-adapted heap object. This
        // wins over any requested kind.
        if let Value::Object(id) = value
            && let Some(existing) = mgr.lookup_boxed(*id)
        {
            return Ok(Shareable { inner: existing });
        }
        if hint == AdaptHint::Mutable {
            let cell = MutableCell::new(mgr, rt, value)?;
            return Ok(Self::from_parts(
                ValueKind::MutableCell,
                Payload::Mutable(cell),
                rt.id(),
            ));
        }
        let home = rt.id();
        match value {
            Value::Undefined => Ok(Self::from_parts(ValueKind::Undefined, Payload::Empty, home)),
            Value::Null => Ok(Self::from_parts(ValueKind::Null, Payload::Empty, home)),
            Value::Bool(b) => Ok(Self::from_parts(ValueKind::Bool, Payload::Bool(*b), home)),
            Value::Number(n) => Ok(Self::from_parts(
                ValueKind::Number,
                Payload::Number(*n),
                home,
            )),
            Value::String(s) => Ok(Self::from_parts(
                ValueKind::String,
                Payload::String(Arc::clone(s)),
                home,
            )),
            Value::Object(id) => Self::adapt_object(mgr, rt, *id, hint),
        }
    }

    fn adapt_object(
        mgr: &Arc<RuntimeManager>,
        rt: &mut Runtime,
        id: ObjectId,
        hint: AdaptHint,
    ) -> Result<Shareable> {
        // The side table only learns about an object once its snapshot is
        // complete, so a cyclic graph would recurse forever. Track the
        // objects currently being walked and reject a revisit.
        if !mgr.begin_adapt(id) {
            return Err(BridgeError::conversion("self-referential object"));
        }
        let adapted = Self::adapt_object_parts(mgr, rt, id, hint);
        mgr.end_adapt(id);
        adapted
    }

    fn adapt_object_parts(
        mgr: &Arc<RuntimeManager>,
        rt: &mut Runtime,
        id: ObjectId,
        hint: AdaptHint,
    ) -> Result<Shareable> {
        let home = rt.id();

        if let Some(func) = rt.function(id) {
            if let Some(info) = func.worklet {
                let env = Self::adapt(mgr, rt, &Value::Object(info.closure), AdaptHint::Auto)?;
                let handle = WorkletHandle {
                    name: func.name,
                    source: info.source,
                    location: info.location,
                    hash: info.hash,
                    env,
                };
                return Ok(Self::from_parts(
                    ValueKind::Worklet,
                    Payload::Worklet(Arc::new(handle)),
                    home,
                ));
            }
            let handle = HostFunctionHandle {
                name: func.name,
                home,
                func: id,
                home_manager: Arc::downgrade(mgr),
            };
            return Ok(Self::from_parts(
                ValueKind::HostFunction,
                Payload::HostFunction(Arc::new(handle)),
                home,
            ));
        }

        if let Some(items) = rt.array_items(id) {
            let mut boxed = Vec::with_capacity(items.len());
            for item in &items {
                boxed.push(Self::adapt(mgr, rt, item, AdaptHint::Auto)?);
            }
            return Ok(Self::from_parts(
                ValueKind::FrozenArray,
                Payload::Array(Arc::new(boxed)),
                home,
            ));
        }

        if let Some(host) = rt.host_object(id) {
            // Live handles round-trip back to the box they came from.
            if let Some(handle) = host.as_any().downcast_ref::<CellHandle>() {
                let boxed = Self::from_parts(
                    ValueKind::MutableCell,
                    Payload::Mutable(handle.cell()),
                    home,
                );
                boxed.seed_cache_for(home, Value::Object(id));
                return Ok(boxed);
            }
            if let Some(handle) = host.as_any().downcast_ref::<RemoteHandle>() {
                let boxed = Self::from_parts(
                    ValueKind::RemoteObject,
                    Payload::Remote(handle.record()),
                    home,
                );
                boxed.seed_cache_for(home, Value::Object(id));
                return Ok(boxed);
            }
            return Err(BridgeError::conversion("host object"));
        }

        if hint == AdaptHint::Remote {
            let record = FrozenRecord::snapshot(mgr, rt, id)?;
            let remote = RemoteRecord::new(record, mgr.remote_access_policy());
            return Ok(Self::from_parts(
                ValueKind::RemoteObject,
                Payload::Remote(remote),
                home,
            ));
        }

        let record = FrozenRecord::snapshot(mgr, rt, id)?;
        let contains_host_function = record.contains_host_function();
        let boxed = Self::from_parts(ValueKind::FrozenObject, Payload::Frozen(record), home);
        if rt.kind() == RuntimeKind::Host && !contains_host_function {
            // Make the source object the canonical unboxing on its own
            // side and freeze it so the snapshot cannot drift.
            rt.freeze(id);
            mgr.register_boxed(id, Arc::downgrade(&boxed.inner));
            boxed.seed_cache_for(home, Value::Object(id));
        }
        Ok(boxed)
    }

    // -- Unbox ---------------------------------------------------------------

    /// Produce this value on `rt`, building and caching the runtime-local
    /// form on first use.
    pub fn get_value(&self, mgr: &Arc<RuntimeManager>, rt: &mut Runtime) -> Result<Value> {
        let mut cache = self.inner.cache.lock().expect("box cache poisoned");
        let slot = if rt.id() == self.inner.home {
            &mut cache.home
        } else {
            &mut cache.foreign
        };
        if let Some(value) = slot {
            return Ok(value.clone());
        }
        let built = self.to_runtime_value(mgr, rt)?;
        *slot = Some(built.clone());
        Ok(built)
    }

    /// Unbox for use as a field inside a frozen clone. Identical to
    /// [`Shareable::get_value`] except that a plain function unboxed away
    /// from its home runtime becomes a guard that reports synchronous
    /// cross-thread misuse instead of a callable dispatcher.
    pub(crate) fn nested_value(
        &self,
        mgr: &Arc<RuntimeManager>,
        rt: &mut Runtime,
    ) -> Result<Value> {
        if let Payload::HostFunction(handle) = &self.inner.payload
            && rt.id() != handle.home
        {
            return worklet::sync_misuse_guard(mgr, rt, handle);
        }
        self.get_value(mgr, rt)
    }

    fn to_runtime_value(&self, mgr: &Arc<RuntimeManager>, rt: &mut Runtime) -> Result<Value> {
        match &self.inner.payload {
            Payload::Empty => Ok(if self.inner.kind == ValueKind::Null {
                Value::Null
            } else {
                Value::Undefined
            }),
            Payload::Bool(b) => Ok(Value::Bool(*b)),
            Payload::Number(n) => Ok(Value::Number(*n)),
            Payload::String(s) => Ok(Value::String(Arc::clone(s))),
            Payload::Frozen(record) => {
                let id = record.instantiate(mgr, rt)?;
                if !record.contains_host_function() {
                    rt.freeze(id);
                    mgr.register_boxed(id, Arc::downgrade(&self.inner));
                }
                Ok(Value::Object(id))
            }
            Payload::Array(items) => {
                let mut rebuilt = Vec::with_capacity(items.len());
                for item in items.iter() {
                    rebuilt.push(item.get_value(mgr, rt)?);
                }
                Ok(Value::Object(rt.create_array(rebuilt)))
            }
            Payload::Remote(record) => {
                if rt.is_ui() {
                    record.materialize(mgr, rt)?;
                }
                let handle = RemoteHandle::new(Arc::clone(record));
                Ok(Value::Object(rt.create_host_object(Arc::new(handle))))
            }
            Payload::Mutable(cell) => {
                let handle = CellHandle::new(Arc::clone(cell), Arc::downgrade(mgr));
                Ok(Value::Object(rt.create_host_object(Arc::new(handle))))
            }
            Payload::HostFunction(handle) => {
                if rt.id() == handle.home {
                    Ok(Value::Object(handle.func))
                } else {
                    worklet::host_function_dispatcher(mgr, rt, Arc::clone(handle))
                }
            }
            Payload::Worklet(handle) => {
                if rt.is_ui() {
                    worklet::instantiate_on_ui(mgr, rt, handle)
                } else {
                    worklet::remote_dispatcher(mgr, rt, self.clone(), Arc::clone(handle))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
