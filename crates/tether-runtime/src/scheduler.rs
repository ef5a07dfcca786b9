#![forbid(unsafe_code)]

//! Thread hand-off abstraction.
//!
//! The bridge never creates threads. Both runtimes are driven by external
//! event loops; the bridge only posts closures onto them through this
//! trait. Posting is fire-and-forget by design: there is no completion
//! signal and no way to await a result from the other thread. A posted job
//! either runs to completion on its target thread or is dropped when the
//! owning manager is torn down first.

/// A unit of work posted onto one of the two bridge threads.
pub type Job = Box<dyn FnOnce() + Send>;

pub trait Scheduler: Send + Sync {
    /// Post a job onto the rendering thread.
    fn schedule_on_ui(&self, job: Job);

    /// Post a job onto the background host thread.
    fn schedule_on_host(&self, job: Job);
}
