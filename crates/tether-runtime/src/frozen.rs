#![forbid(unsafe_code)]

//! Deep-frozen record snapshots.
//!
//! A [`FrozenRecord`] is the immutable transferable form of a plain
//! object: an ordered list of field names paired with already-adapted
//! boxed values. Snapshotting walks the source object once, in property
//! insertion order, and recursively boxes every field. Materializing on
//! the other side rebuilds an object with the same field order.
//!
//! The `contains_host_function` flag is computed during the snapshot and
//! decides two things downstream: whether the reconstructed clone may be
//! frozen and registered for reuse, and whether nested function fields
//! get the synchronous-misuse guard instead of a direct reference.

use std::sync::Arc;

use tether_core::{BridgeError, ObjectId, Result, Runtime, Value};

use crate::manager::RuntimeManager;
use crate::shareable::{AdaptHint, Shareable};

pub struct FrozenRecord {
    fields: Vec<(String, Shareable)>,
    contains_host_function: bool,
}

impl FrozenRecord {
    /// Snapshot a plain object into its transferable form. Fields are
    /// captured in insertion order and adapted recursively.
    pub(crate) fn snapshot(
        mgr: &Arc<RuntimeManager>,
        rt: &mut Runtime,
        source: ObjectId,
    ) -> Result<Arc<Self>> {
        let props = rt
            .props(source)
            .ok_or_else(|| BridgeError::conversion(rt.describe(&Value::Object(source))))?;
        let mut fields = Vec::with_capacity(props.len());
        let mut contains_host_function = false;
        for (name, value) in props {
            let boxed = Shareable::adapt(mgr, rt, &value, AdaptHint::Auto)?;
            contains_host_function |= boxed.references_host_function();
            fields.push((name, boxed));
        }
        Ok(Arc::new(Self {
            fields,
            contains_host_function,
        }))
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, Shareable)] {
        &self.fields
    }

    #[must_use]
    pub fn contains_host_function(&self) -> bool {
        self.contains_host_function
    }

    /// Build a fresh object on `rt` carrying this record's fields in
    /// order. The caller decides whether to freeze and cache the result.
    pub(crate) fn instantiate(
        &self,
        mgr: &Arc<RuntimeManager>,
        rt: &mut Runtime,
    ) -> Result<ObjectId> {
        let mut props = Vec::with_capacity(self.fields.len());
        for (name, boxed) in &self.fields {
            let value = boxed.nested_value(mgr, rt)?;
            props.push((name.clone(), value));
        }
        Ok(rt.create_object(props))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
