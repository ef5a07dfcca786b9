#![forbid(unsafe_code)]

//! Lazily materialized UI-side records.
//!
//! A [`RemoteRecord`] defers reconstruction: the snapshot taken at adapt
//! time is held until the first unboxing on the UI runtime, which builds
//! the backing object exactly once. The backing object stays mutable so
//! UI-side code can use it as scratch state.
//!
//! Access from any other runtime follows the configured
//! [`RemoteAccessPolicy`]: reads yield `Undefined` and writes vanish
//! under [`RemoteAccessPolicy::Silent`], or surface as cross-thread
//! misuse errors under [`RemoteAccessPolicy::Strict`]. The policy is the
//! single decision point; the handle traps only consult it.

use std::any::Any;
use std::sync::{Arc, Mutex};

use tether_core::{BridgeError, HostObject, ObjectId, Result, Runtime, Value};

use crate::frozen::FrozenRecord;
use crate::manager::RuntimeManager;

/// What happens when a remote record is touched off the UI runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteAccessPolicy {
    /// Reads return `Undefined`, writes are dropped.
    #[default]
    Silent,
    /// Any off-UI access is reported as cross-thread misuse.
    Strict,
}

pub struct RemoteRecord {
    /// Consumed by the first UI-side materialization.
    initializer: Mutex<Option<Arc<FrozenRecord>>>,
    backing: Mutex<Option<ObjectId>>,
    policy: RemoteAccessPolicy,
}

impl RemoteRecord {
    #[must_use]
    pub(crate) fn new(record: Arc<FrozenRecord>, policy: RemoteAccessPolicy) -> Arc<Self> {
        Arc::new(Self {
            initializer: Mutex::new(Some(record)),
            backing: Mutex::new(None),
            policy,
        })
    }

    /// Build the backing object if this is the first unboxing on the UI
    /// runtime. No-op elsewhere and on every later call.
    pub fn materialize(&self, mgr: &Arc<RuntimeManager>, rt: &mut Runtime) -> Result<()> {
        if !rt.is_ui() {
            return Ok(());
        }
        if self.backing.lock().expect("remote backing poisoned").is_some() {
            return Ok(());
        }
        let record = self
            .initializer
            .lock()
            .expect("remote initializer poisoned")
            .take();
        if let Some(record) = record {
            // Deliberately left unfrozen: the backing object is UI-side
            // scratch state.
            let id = record.instantiate(mgr, rt)?;
            *self.backing.lock().expect("remote backing poisoned") = Some(id);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.backing.lock().expect("remote backing poisoned").is_some()
    }

    pub(crate) fn backing(&self) -> Option<ObjectId> {
        *self.backing.lock().expect("remote backing poisoned")
    }

    #[must_use]
    pub fn policy(&self) -> RemoteAccessPolicy {
        self.policy
    }

    fn denied(&self, what: &str) -> Result<()> {
        match self.policy {
            RemoteAccessPolicy::Silent => Ok(()),
            RemoteAccessPolicy::Strict => Err(BridgeError::cross_thread_misuse(Some(what), None)),
        }
    }
}

/// Host-object projection of a remote record.
pub(crate) struct RemoteHandle {
    record: Arc<RemoteRecord>,
}

impl RemoteHandle {
    pub(crate) fn new(record: Arc<RemoteRecord>) -> Self {
        Self { record }
    }

    pub(crate) fn record(&self) -> Arc<RemoteRecord> {
        Arc::clone(&self.record)
    }
}

impl HostObject for RemoteHandle {
    fn get(&self, rt: &mut Runtime, name: &str) -> Result<Value> {
        if rt.is_ui()
            && let Some(backing) = self.record.backing()
        {
            return rt.get_property(backing, name);
        }
        self.record
            .denied(&format!("remote object property '{name}'"))?;
        Ok(Value::Undefined)
    }

    fn set(&self, rt: &mut Runtime, name: &str, value: Value) -> Result<()> {
        if rt.is_ui()
            && let Some(backing) = self.record.backing()
        {
            return rt.set_property(backing, name, value);
        }
        self.record
            .denied(&format!("remote object property '{name}'"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
