#![forbid(unsafe_code)]

//! One execution context: identity, object heap, property access, calls,
//! freezing, and the ambient this-context stack.
//!
//! # Invariants
//!
//! 1. Every runtime has a process-unique [`RuntimeId`]; "is this the
//!    runtime I was created in" is id equality.
//! 2. The heap is append-only. An [`ObjectId`] stays valid for the life of
//!    the runtime and is never reused.
//! 3. Writes to a frozen plain object are silent no-ops, mirroring
//!    non-strict host semantics.
//! 4. The this-context stack is balanced: every [`ThisGuard`] pops exactly
//!    the frame it pushed, on every exit path including early returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BridgeError, Result};
use crate::object::{FunctionData, HostObject, NativeFn, ObjectData, ObjectId, WorkletInfo};
use crate::value::Value;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique runtime identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeId(u64);

/// The two fixed execution contexts the bridge connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// The rendering runtime, driven frame-synchronously.
    Ui,
    /// The background application-logic runtime.
    Host,
}

/// Turns worklet source text into a native function.
///
/// Stands in for real script evaluation, which belongs to the embedding
/// engine. The test harness registers a table-driven compiler.
pub trait WorkletCompiler: Send {
    fn compile(&self, source: &str, location: &str) -> Result<NativeFn>;
}

/// One frame of the ambient this-context stack.
struct ThisContext {
    value: Value,
    location: Option<String>,
}

pub struct Runtime {
    id: RuntimeId,
    kind: RuntimeKind,
    heap: Vec<ObjectData>,
    this_stack: Arc<Mutex<Vec<ThisContext>>>,
    compiler: Option<Box<dyn WorkletCompiler>>,
}

impl Runtime {
    #[must_use]
    pub fn new(kind: RuntimeKind) -> Self {
        Self {
            id: RuntimeId(NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            heap: Vec::new(),
            this_stack: Arc::new(Mutex::new(Vec::new())),
            compiler: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> RuntimeId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    #[must_use]
    pub fn is_ui(&self) -> bool {
        self.kind == RuntimeKind::Ui
    }

    pub fn set_compiler(&mut self, compiler: Box<dyn WorkletCompiler>) {
        self.compiler = Some(compiler);
    }

    /// Compile worklet source through the registered compiler.
    pub fn compile(&self, source: &str, location: &str) -> Result<NativeFn> {
        match &self.compiler {
            Some(compiler) => compiler.compile(source, location),
            None => Err(BridgeError::worklet_execution(
                Some(location),
                "no worklet compiler registered for this runtime",
            )),
        }
    }

    // -- Heap ---------------------------------------------------------------

    fn alloc(&mut self, data: ObjectData) -> ObjectId {
        let id = ObjectId::new(self.heap.len());
        self.heap.push(data);
        id
    }

    pub fn create_object(&mut self, props: Vec<(String, Value)>) -> ObjectId {
        self.alloc(ObjectData::Plain {
            props,
            frozen: false,
        })
    }

    pub fn create_array(&mut self, items: Vec<Value>) -> ObjectId {
        self.alloc(ObjectData::Array(items))
    }

    pub fn create_function(&mut self, name: impl Into<String>, body: NativeFn) -> ObjectId {
        self.alloc(ObjectData::Function(FunctionData {
            name: name.into(),
            body,
            worklet: None,
        }))
    }

    /// Create a worklet function. The body is a placeholder: worklet
    /// bodies execute through the bridge on the UI runtime, never directly
    /// on their defining runtime.
    pub fn create_worklet(&mut self, name: impl Into<String>, info: WorkletInfo) -> ObjectId {
        let location = info.location.clone();
        let body: NativeFn = Arc::new(move |_rt, _args| {
            Err(BridgeError::worklet_execution(
                Some(&location),
                "worklet bodies run through the bridge, not on their defining runtime",
            ))
        });
        self.alloc(ObjectData::Function(FunctionData {
            name: name.into(),
            body,
            worklet: Some(info),
        }))
    }

    pub fn create_host_object(&mut self, host: Arc<dyn HostObject>) -> ObjectId {
        self.alloc(ObjectData::Host(host))
    }

    /// Borrow a heap entry.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this runtime (ids are never
    /// shared across runtimes by construction).
    #[must_use]
    pub fn data(&self, id: ObjectId) -> &ObjectData {
        &self.heap[id.index()]
    }

    fn data_mut(&mut self, id: ObjectId) -> &mut ObjectData {
        &mut self.heap[id.index()]
    }

    /// Clone out a host object's trap handle, if `id` names one.
    #[must_use]
    pub fn host_object(&self, id: ObjectId) -> Option<Arc<dyn HostObject>> {
        match self.data(id) {
            ObjectData::Host(h) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    /// Clone out a function's data, if `id` names one.
    #[must_use]
    pub fn function(&self, id: ObjectId) -> Option<FunctionData> {
        match self.data(id) {
            ObjectData::Function(f) => Some(f.clone()),
            _ => None,
        }
    }

    /// Snapshot a plain object's properties in insertion order.
    #[must_use]
    pub fn props(&self, id: ObjectId) -> Option<Vec<(String, Value)>> {
        match self.data(id) {
            ObjectData::Plain { props, .. } => Some(props.clone()),
            _ => None,
        }
    }

    /// Snapshot an array's elements in index order.
    #[must_use]
    pub fn array_items(&self, id: ObjectId) -> Option<Vec<Value>> {
        match self.data(id) {
            ObjectData::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    // -- Property access ----------------------------------------------------

    pub fn get_property(&mut self, id: ObjectId, name: &str) -> Result<Value> {
        // Host traps need the runtime borrowed mutably, so take the
        // handle out first.
        if let Some(host) = self.host_object(id) {
            return host.get(self, name);
        }
        match self.data(id) {
            ObjectData::Plain { props, .. } => Ok(props
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Undefined)),
            ObjectData::Array(items) => {
                if name == "length" {
                    return Ok(Value::Number(items.len() as f64));
                }
                match name.parse::<usize>() {
                    Ok(index) => Ok(items.get(index).cloned().unwrap_or(Value::Undefined)),
                    Err(_) => Ok(Value::Undefined),
                }
            }
            ObjectData::Function(f) => {
                if name == "name" {
                    Ok(Value::string(&f.name))
                } else {
                    Ok(Value::Undefined)
                }
            }
            // Handled by the trap path above.
            ObjectData::Host(_) => Ok(Value::Undefined),
        }
    }

    pub fn set_property(&mut self, id: ObjectId, name: &str, value: Value) -> Result<()> {
        if let Some(host) = self.host_object(id) {
            return host.set(self, name, value);
        }
        match self.data_mut(id) {
            ObjectData::Plain { props, frozen } => {
                if *frozen {
                    // Silent no-op on frozen objects.
                    return Ok(());
                }
                match props.iter_mut().find(|(key, _)| key == name) {
                    Some((_, slot)) => *slot = value,
                    None => props.push((name.to_string(), value)),
                }
                Ok(())
            }
            ObjectData::Array(items) => {
                if let Ok(index) = name.parse::<usize>()
                    && index < items.len()
                {
                    items[index] = value;
                }
                Ok(())
            }
            // Functions and host objects ignore unknown writes.
            _ => Ok(()),
        }
    }

    /// Make a plain object immutable. No-op for other heap entries.
    pub fn freeze(&mut self, id: ObjectId) {
        if let ObjectData::Plain { frozen, .. } = self.data_mut(id) {
            *frozen = true;
        }
    }

    #[must_use]
    pub fn is_frozen(&self, id: ObjectId) -> bool {
        matches!(self.data(id), ObjectData::Plain { frozen: true, .. })
    }

    // -- Calls --------------------------------------------------------------

    pub fn call(&mut self, func: ObjectId, args: &[Value]) -> Result<Value> {
        let data = match self.data(func) {
            ObjectData::Function(f) => f.clone(),
            other => return Err(BridgeError::not_callable(describe_data(other))),
        };
        (data.body)(self, args)
    }

    pub fn call_value(&mut self, value: &Value, args: &[Value]) -> Result<Value> {
        match value {
            Value::Object(id) => self.call(*id, args),
            other => Err(BridgeError::not_callable(other.type_name())),
        }
    }

    /// Diagnostic label for a value, refined for heap entries.
    #[must_use]
    pub fn describe(&self, value: &Value) -> &'static str {
        match value {
            Value::Object(id) => describe_data(self.data(*id)),
            other => other.type_name(),
        }
    }

    // -- Ambient this-context -----------------------------------------------

    /// The current ambient this-context, or `Undefined` outside any
    /// worklet invocation.
    #[must_use]
    pub fn this(&self) -> Value {
        let stack = self.this_stack.lock().expect("this-context stack poisoned");
        stack
            .last()
            .map(|frame| frame.value.clone())
            .unwrap_or(Value::Undefined)
    }

    /// Source location recorded by the innermost active worklet, if any.
    #[must_use]
    pub fn current_worklet_location(&self) -> Option<String> {
        let stack = self.this_stack.lock().expect("this-context stack poisoned");
        stack.last().and_then(|frame| frame.location.clone())
    }

    #[cfg(test)]
    fn this_depth(&self) -> usize {
        self.this_stack
            .lock()
            .expect("this-context stack poisoned")
            .len()
    }
}

fn describe_data(data: &ObjectData) -> &'static str {
    match data {
        ObjectData::Plain { .. } => "object",
        ObjectData::Array(_) => "array",
        ObjectData::Function(_) => "function",
        ObjectData::Host(_) => "host object",
    }
}

/// RAII installation of an ambient this-context frame.
///
/// Pushes on construction, pops on drop, so restoration happens on every
/// exit path including `?` early-returns from the invocation body.
pub struct ThisGuard {
    stack: Arc<Mutex<Vec<ThisContext>>>,
}

impl ThisGuard {
    pub fn install(rt: &Runtime, value: Value, location: Option<String>) -> Self {
        rt.this_stack
            .lock()
            .expect("this-context stack poisoned")
            .push(ThisContext { value, location });
        Self {
            stack: Arc::clone(&rt.this_stack),
        }
    }
}

impl Drop for ThisGuard {
    fn drop(&mut self) {
        self.stack
            .lock()
            .expect("this-context stack poisoned")
            .pop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
