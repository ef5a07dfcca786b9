#![forbid(unsafe_code)]

//! Core: the miniature runtime object model the bridge is built against.
//!
//! A [`Runtime`] is one execution context (UI-synchronous or background
//! host) with its own object heap. Values are runtime-local; only the
//! boxed representations built by `tether-runtime` cross threads.

pub mod error;
pub mod object;
pub mod runtime;
pub mod value;

pub use error::{BridgeError, Result};
pub use object::{FunctionData, HostObject, NativeFn, ObjectData, ObjectId, WorkletInfo};
pub use runtime::{Runtime, RuntimeId, RuntimeKind, ThisGuard, WorkletCompiler};
pub use value::Value;
