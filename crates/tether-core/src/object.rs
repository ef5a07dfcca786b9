#![forbid(unsafe_code)]

//! Heap entry model: plain objects, arrays, functions, and host objects.
//!
//! Host objects are the trap mechanism the bridge uses to project live
//! handles (mutable cells, remote records) into a runtime: property reads
//! and writes are routed through [`HostObject::get`]/[`HostObject::set`]
//! with the owning runtime borrowed mutably, so a trap can allocate.
//!
//! Bridge handle recognition goes through [`HostObject::as_any`] downcasts
//! rather than hidden marker properties smuggled through the value model.

use std::any::Any;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::error::Result;
use crate::runtime::Runtime;
use crate::value::Value;

/// Index into the owning runtime's heap.
///
/// Ids are only valid for the runtime that created them; the heap is an
/// append-only arena that lives exactly as long as its runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Wide enough for any heap index; `usize` fits in `u64` on every
    /// supported target.
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u64)
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A function constructible from a native closure.
pub type NativeFn = Arc<dyn Fn(&mut Runtime, &[Value]) -> Result<Value> + Send + Sync>;

/// Snapshot metadata attached to a function that is intended to be
/// compiled and executed on the UI runtime.
#[derive(Debug, Clone)]
pub struct WorkletInfo {
    /// Source text handed to the runtime's worklet compiler.
    pub source: String,
    /// Recorded source location, carried into diagnostics.
    pub location: String,
    /// Stable hash of the source, used as the per-runtime compile cache key.
    pub hash: u64,
    /// Captured environment object in the defining runtime.
    pub closure: ObjectId,
}

impl WorkletInfo {
    #[must_use]
    pub fn new(source: impl Into<String>, location: impl Into<String>, closure: ObjectId) -> Self {
        let source = source.into();
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            source,
            location: location.into(),
            closure,
        }
    }
}

/// A callable heap entry: display name, native body, optional worklet
/// metadata.
#[derive(Clone)]
pub struct FunctionData {
    pub name: String,
    pub body: NativeFn,
    pub worklet: Option<WorkletInfo>,
}

impl fmt::Debug for FunctionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionData")
            .field("name", &self.name)
            .field("worklet", &self.worklet)
            .finish_non_exhaustive()
    }
}

/// Property traps for objects whose backing lives outside the heap.
pub trait HostObject: Send + Sync {
    fn get(&self, rt: &mut Runtime, name: &str) -> Result<Value>;

    fn set(&self, rt: &mut Runtime, name: &str, value: Value) -> Result<()>;

    /// Downcast support so the bridge can recognize its own handle types.
    fn as_any(&self) -> &dyn Any;
}

/// One heap entry.
pub enum ObjectData {
    /// Ordered property list; insertion order is enumeration order.
    Plain {
        props: Vec<(String, Value)>,
        frozen: bool,
    },
    Array(Vec<Value>),
    Function(FunctionData),
    Host(Arc<dyn HostObject>),
}

impl fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectData::Plain { props, frozen } => f
                .debug_struct("Plain")
                .field("props", &props.len())
                .field("frozen", frozen)
                .finish(),
            ObjectData::Array(items) => f.debug_tuple("Array").field(&items.len()).finish(),
            ObjectData::Function(data) => f.debug_tuple("Function").field(&data.name).finish(),
            ObjectData::Host(_) => f.write_str("Host"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
