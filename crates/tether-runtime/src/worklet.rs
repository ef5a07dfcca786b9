#![forbid(unsafe_code)]

//! Function marshalling: worklet instantiation on the UI runtime and the
//! dispatcher stubs that stand in for a function on any other runtime.
//!
//! Three reconstructions exist, chosen by where the function is unboxed:
//!
//! - a worklet unboxed on the UI runtime compiles (once per source hash)
//!   into a directly callable function that runs under its captured
//!   environment as the ambient this-context;
//! - a worklet unboxed elsewhere becomes a dispatcher that posts the
//!   invocation to the UI thread, fire-and-forget;
//! - a plain function unboxed away from its home runtime becomes a
//!   dispatcher that posts the invocation back home, fire-and-forget.
//!
//! Dispatchers adapt their arguments synchronously at call time, so the
//! values that cross are the ones the caller saw, not whatever the
//! sources mutate into before the job runs.

use std::sync::Arc;

use tether_core::{BridgeError, Result, Runtime, ThisGuard, Value};

use crate::manager::RuntimeManager;
use crate::shareable::{AdaptHint, HostFunctionHandle, Shareable, WorkletHandle};

/// Compile (or fetch from the per-runtime cache) and wrap a worklet for
/// direct invocation on the UI runtime.
pub(crate) fn instantiate_on_ui(
    mgr: &Arc<RuntimeManager>,
    rt: &mut Runtime,
    handle: &Arc<WorkletHandle>,
) -> Result<Value> {
    let compiled = match mgr.cached_worklet(handle.hash) {
        Some(compiled) => compiled,
        None => {
            let compiled = rt.compile(&handle.source, &handle.location)?;
            mgr.cache_worklet(handle.hash, Arc::clone(&compiled));
            compiled
        }
    };

    let mgr_weak = Arc::downgrade(mgr);
    let env = handle.env.clone();
    let location = handle.location.clone();
    let body: tether_core::NativeFn = Arc::new(move |rt, args| {
        let mgr = mgr_weak
            .upgrade()
            .ok_or(BridgeError::torn_down("worklet invocation"))?;
        let env_value = env.get_value(&mgr, rt)?;
        let _guard = ThisGuard::install(rt, env_value, Some(location.clone()));
        match compiled(rt, args) {
            Ok(value) => Ok(value),
            // Already carries a worklet location; pass through untouched.
            Err(err @ BridgeError::WorkletExecution { .. }) => Err(err),
            // Synchronous callers see the error at the call site; a
            // dispatched invocation reports once, at the job boundary.
            Err(other) => Err(BridgeError::worklet_execution(
                Some(&location),
                other.to_string(),
            )),
        }
    });
    Ok(Value::Object(rt.create_function(handle.name.clone(), body)))
}

/// Build the stub that forwards worklet invocations to the UI thread.
pub(crate) fn remote_dispatcher(
    mgr: &Arc<RuntimeManager>,
    rt: &mut Runtime,
    target: Shareable,
    handle: Arc<WorkletHandle>,
) -> Result<Value> {
    let caller_weak = Arc::downgrade(mgr);
    let name = handle.name.clone();
    let body: tether_core::NativeFn = Arc::new(move |rt, args| {
        let caller = caller_weak
            .upgrade()
            .ok_or(BridgeError::torn_down("worklet dispatch"))?;
        let mut boxed_args = Vec::with_capacity(args.len());
        for arg in args {
            boxed_args.push(Shareable::adapt(&caller, rt, arg, AdaptHint::Auto)?);
        }
        let ui = caller
            .ui_manager()
            .ok_or(BridgeError::torn_down("worklet dispatch"))?;
        tracing::debug!(message = "worklet.dispatch", name = %handle.name, args = args.len());
        let ui_weak = Arc::downgrade(&ui);
        let target = target.clone();
        ui.schedule_on_self(Box::new(move || {
            let Some(ui) = ui_weak.upgrade() else {
                return;
            };
            let result = (|| {
                let mut rt = ui.runtime();
                let func = target.get_value(&ui, &mut rt)?;
                let mut values = Vec::with_capacity(boxed_args.len());
                for arg in &boxed_args {
                    values.push(arg.get_value(&ui, &mut rt)?);
                }
                rt.call_value(&func, &values)
            })();
            if let Err(err) = result {
                ui.error_handler().report(&err.to_string());
            }
        }));
        // Fire-and-forget: the caller never sees the result.
        Ok(Value::Undefined)
    });
    Ok(Value::Object(rt.create_function(name, body)))
}

/// Build the stub that forwards a plain function's invocations back to
/// its home runtime.
pub(crate) fn host_function_dispatcher(
    mgr: &Arc<RuntimeManager>,
    rt: &mut Runtime,
    handle: Arc<HostFunctionHandle>,
) -> Result<Value> {
    let caller_weak = Arc::downgrade(mgr);
    let name = handle.name.clone();
    let body: tether_core::NativeFn = Arc::new(move |rt, args| {
        let caller = caller_weak
            .upgrade()
            .ok_or(BridgeError::torn_down("host function dispatch"))?;
        let mut boxed_args = Vec::with_capacity(args.len());
        for arg in args {
            boxed_args.push(Shareable::adapt(&caller, rt, arg, AdaptHint::Auto)?);
        }
        let home = handle
            .home_manager
            .upgrade()
            .ok_or(BridgeError::torn_down("host function dispatch"))?;
        tracing::debug!(message = "host_function.dispatch", name = %handle.name, args = args.len());
        let home_weak = Arc::downgrade(&home);
        let func = handle.func;
        home.schedule_on_self(Box::new(move || {
            let Some(home) = home_weak.upgrade() else {
                return;
            };
            let result = (|| {
                let mut rt = home.runtime();
                let mut values = Vec::with_capacity(boxed_args.len());
                for arg in &boxed_args {
                    values.push(arg.get_value(&home, &mut rt)?);
                }
                rt.call(func, &values)
            })();
            if let Err(err) = result {
                home.error_handler().report(&err.to_string());
            }
        }));
        Ok(Value::Undefined)
    });
    Ok(Value::Object(rt.create_function(name, body)))
}

/// Build the guard installed in place of a host function nested inside a
/// frozen clone. Calling it reports cross-thread misuse instead of
/// silently doing nothing or dispatching out of order.
pub(crate) fn sync_misuse_guard(
    mgr: &Arc<RuntimeManager>,
    rt: &mut Runtime,
    handle: &Arc<HostFunctionHandle>,
) -> Result<Value> {
    let mgr_weak = Arc::downgrade(mgr);
    let name = handle.name.clone();
    let guard_name = name.clone();
    let body: tether_core::NativeFn = Arc::new(move |rt, _args| {
        let err = BridgeError::cross_thread_misuse(
            (!name.is_empty()).then_some(name.as_str()),
            rt.current_worklet_location().as_deref(),
        );
        if let Some(mgr) = mgr_weak.upgrade() {
            mgr.error_handler().report(&err.to_string());
        }
        Ok(Value::Undefined)
    });
    Ok(Value::Object(rt.create_function(guard_name, body)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
