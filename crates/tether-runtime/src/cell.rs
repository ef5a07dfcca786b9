#![forbid(unsafe_code)]

//! Shared mutable cells.
//!
//! A [`MutableCell`] is the one mutable value the bridge offers: a slot
//! holding a boxed value, readable from both runtimes, writable through a
//! UI-thread funnel, with change listeners that drive dirty propagation.
//!
//! # Invariants
//!
//! 1. The canonical value lives on the UI thread's schedule: writes that
//!    originate elsewhere are posted there and apply in posting order.
//! 2. Listeners run on the UI thread, after the stored value changed.
//! 3. When a value setter is registered on the UI manager, every write
//!    through a cell handle funnels through it; the raw `_value` path
//!    bypasses the funnel and is what the setter itself uses to commit.

use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

use ahash::AHashMap;
use tether_core::{BridgeError, HostObject, Result, Runtime, Value};

use crate::manager::RuntimeManager;
use crate::shareable::{AdaptHint, Shareable};

type Listener = Box<dyn Fn() + Send>;

pub struct MutableCell {
    value: Mutex<Shareable>,
    /// Keyed by caller-chosen id so removal does not depend on closure
    /// identity. Listeners must not touch the listener table.
    listeners: Mutex<AHashMap<u64, Listener>>,
    /// UI-private slot for an in-flight animation descriptor.
    animation: Mutex<Option<Value>>,
}

impl MutableCell {
    /// Create a cell seeded with `initial`, boxing it first.
    pub fn new(
        mgr: &Arc<RuntimeManager>,
        rt: &mut Runtime,
        initial: &Value,
    ) -> Result<Arc<Self>> {
        let boxed = Shareable::adapt(mgr, rt, initial, AdaptHint::Auto)?;
        Ok(Arc::new(Self {
            value: Mutex::new(boxed),
            listeners: Mutex::new(AHashMap::new()),
            animation: Mutex::new(None),
        }))
    }

    /// Read the current value, reconstructed on `rt`.
    pub fn value(&self, mgr: &Arc<RuntimeManager>, rt: &mut Runtime) -> Result<Value> {
        let snapshot = self.snapshot();
        snapshot.get_value(mgr, rt)
    }

    /// Replace the value. On the UI runtime the write applies and
    /// notifies immediately; from anywhere else the new value is boxed
    /// now, stored, and listeners are notified on the UI thread.
    pub fn set_value(
        self: &Arc<Self>,
        mgr: &Arc<RuntimeManager>,
        rt: &mut Runtime,
        new: &Value,
    ) -> Result<()> {
        let boxed = Shareable::adapt(mgr, rt, new, AdaptHint::Auto)?;
        self.store(boxed);
        if rt.is_ui() {
            self.notify();
        } else {
            let cell = Arc::clone(self);
            mgr.scheduler().schedule_on_ui(Box::new(move || cell.notify()));
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Shareable {
        self.value.lock().expect("cell value poisoned").clone()
    }

    pub(crate) fn store(&self, boxed: Shareable) {
        *self.value.lock().expect("cell value poisoned") = boxed;
    }

    pub fn add_listener(&self, id: u64, listener: impl Fn() + Send + 'static) {
        self.listeners
            .lock()
            .expect("cell listeners poisoned")
            .insert(id, Box::new(listener));
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        self.listeners
            .lock()
            .expect("cell listeners poisoned")
            .remove(&id)
            .is_some()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("cell listeners poisoned").len()
    }

    pub(crate) fn notify(&self) {
        let listeners = self.listeners.lock().expect("cell listeners poisoned");
        for listener in listeners.values() {
            listener();
        }
    }

    pub(crate) fn animation(&self) -> Option<Value> {
        self.animation
            .lock()
            .expect("cell animation poisoned")
            .clone()
    }

    pub(crate) fn set_animation(&self, value: Option<Value>) {
        *self.animation.lock().expect("cell animation poisoned") = value;
    }

    /// Apply a write on the UI thread, routing through the registered
    /// value setter when one exists. Without a setter the write commits
    /// directly; that bootstrap path is how the setter itself is stored
    /// before registration completes.
    pub(crate) fn write_through_setter(
        self: &Arc<Self>,
        ui: &Arc<RuntimeManager>,
        rt: &mut Runtime,
        boxed: Shareable,
    ) -> Result<()> {
        match ui.value_setter() {
            Some(setter) => {
                let proxy = RawCellProxy {
                    cell: Arc::clone(self),
                    manager: Arc::downgrade(ui),
                };
                let proxy_id = rt.create_host_object(Arc::new(proxy));
                let setter_fn = setter.get_value(ui, rt)?;
                let new_value = boxed.get_value(ui, rt)?;
                rt.call_value(&setter_fn, &[Value::Object(proxy_id), new_value])?;
                Ok(())
            }
            None => {
                self.store(boxed);
                self.notify();
                Ok(())
            }
        }
    }
}

/// Host-object projection of a cell into a runtime.
pub(crate) struct CellHandle {
    cell: Arc<MutableCell>,
    manager: Weak<RuntimeManager>,
}

impl CellHandle {
    pub(crate) fn new(cell: Arc<MutableCell>, manager: Weak<RuntimeManager>) -> Self {
        Self { cell, manager }
    }

    pub(crate) fn cell(&self) -> Arc<MutableCell> {
        Arc::clone(&self.cell)
    }

    fn manager(&self) -> Result<Arc<RuntimeManager>> {
        self.manager
            .upgrade()
            .ok_or(BridgeError::torn_down("cell access"))
    }
}

impl HostObject for CellHandle {
    fn get(&self, rt: &mut Runtime, name: &str) -> Result<Value> {
        match name {
            "value" => self.cell.value(&self.manager()?, rt),
            // Raw slots exist only on the UI runtime.
            "_value" if rt.is_ui() => self.cell.value(&self.manager()?, rt),
            "_animation" if rt.is_ui() => Ok(self.cell.animation().unwrap_or(Value::Undefined)),
            _ => Ok(Value::Undefined),
        }
    }

    fn set(&self, rt: &mut Runtime, name: &str, value: Value) -> Result<()> {
        match name {
            "value" => {
                let mgr = self.manager()?;
                let boxed = Shareable::adapt(&mgr, rt, &value, AdaptHint::Auto)?;
                if rt.is_ui() {
                    self.cell.write_through_setter(&mgr, rt, boxed)
                } else {
                    let ui = mgr
                        .ui_manager()
                        .ok_or(BridgeError::torn_down("cell write"))?;
                    let ui_weak = Arc::downgrade(&ui);
                    let cell = self.cell();
                    ui.schedule_on_self(Box::new(move || {
                        let Some(ui) = ui_weak.upgrade() else {
                            return;
                        };
                        let mut rt = ui.runtime();
                        if let Err(err) = cell.write_through_setter(&ui, &mut rt, boxed) {
                            ui.error_handler().report(&err.to_string());
                        }
                    }));
                    Ok(())
                }
            }
            "_value" if rt.is_ui() => {
                let mgr = self.manager()?;
                let boxed = Shareable::adapt(&mgr, rt, &value, AdaptHint::Auto)?;
                self.cell.store(boxed);
                self.cell.notify();
                Ok(())
            }
            "_animation" if rt.is_ui() => {
                self.cell.set_animation(Some(value));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Raw-access handle passed to the registered value setter. Writes commit
/// directly, bypassing the setter, so the funnel cannot recurse.
pub(crate) struct RawCellProxy {
    cell: Arc<MutableCell>,
    manager: Weak<RuntimeManager>,
}

impl HostObject for RawCellProxy {
    fn get(&self, rt: &mut Runtime, name: &str) -> Result<Value> {
        match name {
            "_value" => {
                let mgr = self
                    .manager
                    .upgrade()
                    .ok_or(BridgeError::torn_down("cell access"))?;
                self.cell.value(&mgr, rt)
            }
            "_animation" => Ok(self.cell.animation().unwrap_or(Value::Undefined)),
            _ => Ok(Value::Undefined),
        }
    }

    fn set(&self, rt: &mut Runtime, name: &str, value: Value) -> Result<()> {
        match name {
            "_value" => {
                let mgr = self
                    .manager
                    .upgrade()
                    .ok_or(BridgeError::torn_down("cell write"))?;
                let boxed = Shareable::adapt(&mgr, rt, &value, AdaptHint::Auto)?;
                self.cell.store(boxed);
                self.cell.notify();
                Ok(())
            }
            "_animation" => {
                self.cell.set_animation(Some(value));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
