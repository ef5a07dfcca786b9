#![forbid(unsafe_code)]

//! Dirty propagation from cells to mapper functions.
//!
//! A [`Mapper`] observes a set of input cells and re-runs a boxed
//! function on the UI thread when any of them changed. Dirtiness is a
//! latch: the first input write after a run flips it and requests a
//! render pass; further writes before the next run are coalesced into
//! that single pending execution.
//!
//! The registry executes dirty mappers in ascending registration order,
//! which makes multi-mapper frames deterministic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tether_core::{Result, Runtime};

use crate::cell::MutableCell;
use crate::manager::RuntimeManager;
use crate::shareable::Shareable;

pub struct Mapper {
    id: u64,
    inputs: Vec<Arc<MutableCell>>,
    outputs: Vec<Arc<MutableCell>>,
    mapper: Shareable,
    dirty: Arc<AtomicBool>,
}

impl Mapper {
    /// Register listeners on every input, keyed by the mapper id. A new
    /// mapper starts dirty so it runs on the next frame; the caller
    /// requests that frame once the registry lock is released.
    fn new(
        ui: &Arc<RuntimeManager>,
        id: u64,
        mapper: Shareable,
        inputs: Vec<Arc<MutableCell>>,
        outputs: Vec<Arc<MutableCell>>,
    ) -> Arc<Self> {
        let dirty = Arc::new(AtomicBool::new(true));
        for input in &inputs {
            let flag = Arc::clone(&dirty);
            let ui_weak = Arc::downgrade(ui);
            input.add_listener(id, move || {
                // Only the Clean -> Dirty edge requests a render.
                if !flag.swap(true, Ordering::AcqRel)
                    && let Some(ui) = ui_weak.upgrade()
                {
                    ui.request_render();
                }
            });
        }
        Arc::new(Self {
            id,
            inputs,
            outputs,
            mapper,
            dirty,
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn inputs(&self) -> &[Arc<MutableCell>] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[Arc<MutableCell>] {
        &self.outputs
    }

    /// Run the mapper function on the UI runtime. Clears the dirty latch
    /// before calling, so writes made during the run re-arm it.
    pub(crate) fn execute(&self, ui: &Arc<RuntimeManager>, rt: &mut Runtime) -> Result<()> {
        self.dirty.store(false, Ordering::Release);
        let func = self.mapper.get_value(ui, rt)?;
        rt.call_value(&func, &[])?;
        Ok(())
    }
}

impl Drop for Mapper {
    fn drop(&mut self) {
        for input in &self.inputs {
            input.remove_listener(self.id);
        }
    }
}

/// Id-ordered mapper table owned by the UI manager.
pub struct MapperRegistry {
    mappers: BTreeMap<u64, Arc<Mapper>>,
    next_id: u64,
}

impl MapperRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mappers: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub(crate) fn start(
        &mut self,
        ui: &Arc<RuntimeManager>,
        mapper: Shareable,
        inputs: Vec<Arc<MutableCell>>,
        outputs: Vec<Arc<MutableCell>>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(message = "mapper.start", id, inputs = inputs.len());
        self.mappers
            .insert(id, Mapper::new(ui, id, mapper, inputs, outputs));
        id
    }

    pub(crate) fn stop(&mut self, id: u64) -> bool {
        let removed = self.mappers.remove(&id).is_some();
        if removed {
            tracing::debug!(message = "mapper.stop", id);
        }
        removed
    }

    /// Dirty mappers in ascending id order.
    pub(crate) fn collect_dirty(&self) -> Vec<Arc<Mapper>> {
        self.mappers
            .values()
            .filter(|mapper| mapper.is_dirty())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shareable::AdaptHint;
    use crate::test_support::Fixture;
    use std::sync::atomic::AtomicUsize;
    use tether_core::Value;

    fn noop_mapper(fx: &Fixture) -> Shareable {
        let mut rt = fx.ui.runtime();
        let func = rt.create_function("mapper", Arc::new(|_, _| Ok(Value::Undefined)));
        Shareable::adapt(&fx.ui, &mut rt, &Value::Object(func), AdaptHint::Auto).unwrap()
    }

    fn cell(fx: &Fixture, initial: f64) -> Arc<MutableCell> {
        let mut rt = fx.ui.runtime();
        MutableCell::new(&fx.ui, &mut rt, &Value::from(initial)).unwrap()
    }

    #[test]
    fn dirty_latch_requests_one_render_per_edge() {
        let fx = Fixture::new();
        let renders = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&renders);
        fx.ui.set_render_request_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let input = cell(&fx, 0.0);
        let id = fx
            .ui
            .start_mapper(noop_mapper(&fx), vec![Arc::clone(&input)], vec![]);
        // Registration itself asks for a frame.
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        input.notify();
        input.notify();
        input.notify();
        // Dirty -> Dirty transitions are coalesced.
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        fx.ui.execute_mappers().unwrap();
        input.notify();
        assert_eq!(renders.load(Ordering::SeqCst), 2);

        assert!(fx.ui.stop_mapper(id));
    }

    #[test]
    fn execute_runs_dirty_mappers_and_clears_them() {
        let fx = Fixture::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let mapper = {
            let mut rt = fx.ui.runtime();
            let counter = Arc::clone(&runs);
            let func = rt.create_function(
                "count",
                Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Undefined)
                }),
            );
            Shareable::adapt(&fx.ui, &mut rt, &Value::Object(func), AdaptHint::Auto).unwrap()
        };
        let input = cell(&fx, 0.0);
        fx.ui.start_mapper(mapper, vec![Arc::clone(&input)], vec![]);

        fx.ui.execute_mappers().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // Clean mapper does not re-run.
        fx.ui.execute_mappers().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        input.notify();
        fx.ui.execute_mappers().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_removes_input_listeners() {
        let fx = Fixture::new();
        let a = cell(&fx, 0.0);
        let b = cell(&fx, 0.0);
        let id = fx.ui.start_mapper(
            noop_mapper(&fx),
            vec![Arc::clone(&a), Arc::clone(&b)],
            vec![],
        );
        assert_eq!(a.listener_count(), 1);
        assert_eq!(b.listener_count(), 1);

        assert!(fx.ui.stop_mapper(id));
        assert_eq!(a.listener_count(), 0);
        assert_eq!(b.listener_count(), 0);
        assert!(!fx.ui.stop_mapper(id));
    }

    #[test]
    fn registry_ids_ascend_from_one() {
        let fx = Fixture::new();
        let first = fx.ui.start_mapper(noop_mapper(&fx), vec![], vec![]);
        let second = fx.ui.start_mapper(noop_mapper(&fx), vec![], vec![]);
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(fx.ui.mapper_count(), 2);
    }
}
