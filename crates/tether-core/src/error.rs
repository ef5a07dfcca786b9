#![forbid(unsafe_code)]

//! Error taxonomy shared by both bridge crates.
//!
//! Errors that occur synchronously on the caller's own thread are returned
//! as `Err(BridgeError)`. Failures inside asynchronously scheduled jobs are
//! never thrown into an unrelated call stack; they are funneled through the
//! `ErrorHandler` hook in `tether-runtime` instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// A runtime value has no shareable representation.
    #[error("cannot adapt value of type {type_name}: no shareable representation")]
    Conversion { type_name: String },

    /// A function owned by one thread was called synchronously from another.
    #[error(
        "tried to synchronously call {name} from a foreign thread{call_site}; \
         mark it as a worklet or dispatch it through the scheduler"
    )]
    CrossThreadMisuse { name: String, call_site: String },

    /// An error escaped a compiled worklet body.
    #[error("worklet at {location} failed: {message}")]
    WorkletExecution { location: String, message: String },

    /// A non-function value was invoked.
    #[error("value of type {type_name} is not callable")]
    NotCallable { type_name: String },

    /// A scheduled job or handle outlived its runtime manager.
    #[error("runtime manager was torn down during {context}")]
    RuntimeTornDown { context: &'static str },
}

impl BridgeError {
    #[must_use]
    pub fn conversion(type_name: impl Into<String>) -> Self {
        Self::Conversion {
            type_name: type_name.into(),
        }
    }

    /// Build a misuse error embedding the function's display name (or
    /// "anonymous function") and the calling worklet's location if known.
    #[must_use]
    pub fn cross_thread_misuse(name: Option<&str>, call_site: Option<&str>) -> Self {
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => "anonymous function".to_string(),
        };
        let call_site = match call_site {
            Some(loc) => format!(" (called from {loc})"),
            None => String::new(),
        };
        Self::CrossThreadMisuse { name, call_site }
    }

    #[must_use]
    pub fn worklet_execution(location: Option<&str>, message: impl Into<String>) -> Self {
        Self::WorkletExecution {
            location: location.unwrap_or("unknown location").to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_callable(type_name: impl Into<String>) -> Self {
        Self::NotCallable {
            type_name: type_name.into(),
        }
    }

    #[must_use]
    pub fn torn_down(context: &'static str) -> Self {
        Self::RuntimeTornDown { context }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
