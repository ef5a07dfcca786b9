#![forbid(unsafe_code)]

//! Out-of-band failure reporting.
//!
//! The bridge never throws across threads. Failures inside asynchronously
//! scheduled jobs are funneled through this hook so the host application
//! decides final disposition (log, crash, developer overlay). Errors on
//! the caller's own thread are returned as `Err` at the call site instead.

pub trait ErrorHandler: Send + Sync {
    /// Record the pending error message.
    fn set_error(&self, message: &str);

    /// Surface the pending error to the application.
    fn raise(&self);

    /// Convenience: record and surface in one step.
    fn report(&self, message: &str) {
        self.set_error(message);
        self.raise();
    }
}

/// Default handler that surfaces errors through `tracing`.
#[derive(Debug, Default)]
pub struct TracingHandler;

impl ErrorHandler for TracingHandler {
    fn set_error(&self, message: &str) {
        tracing::error!(message = "bridge.error", error = message);
    }

    fn raise(&self) {}
}
