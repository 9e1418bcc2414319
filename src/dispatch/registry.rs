//! Thread-safe directory of consumer wrappers keyed by consumer id.
//!
//! Reads happen once per delivered event; writes only on consumer
//! (de)registration, so lookups use a reader-biased shared-exclusive
//! lock (`parking_lot::RwLock`) rather than a single mutex.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::DispatchContext;
use super::error::DispatchError;
use super::recycler::PooledEvent;
use super::wrapper::{Callback, ConsumerWrapper};

/// In-memory directory mapping consumer identifiers to wrappers.
#[derive(Default)]
pub struct Registry {
    wrappers: RwLock<HashMap<String, Arc<ConsumerWrapper>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `wrapper` under its own `consumer_id`, inserting or
    /// replacing any prior registration for that id.
    pub fn register(&self, wrapper: Arc<ConsumerWrapper>) {
        self.wrappers
            .write()
            .insert(wrapper.consumer_id().to_string(), wrapper);
    }

    pub fn unregister(&self, consumer_id: &str) {
        self.wrappers.write().remove(consumer_id);
    }

    pub fn get(&self, consumer_id: &str) -> Option<Arc<ConsumerWrapper>> {
        self.wrappers.read().get(consumer_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.wrappers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.read().is_empty()
    }

    /// Looks up `consumer_id` and delegates to its wrapper's `invoke`.
    /// A consumer that was never registered (or has since been
    /// removed) is a silent drop — this mirrors the spec's explicit
    /// "absent ⇒ success" behavior rather than treating it as an error.
    pub fn invoke(
        &self,
        ctx: &DispatchContext,
        consumer_id: &str,
        ev: Option<Box<PooledEvent>>,
        callback: Option<&Callback>,
    ) -> Result<(), DispatchError> {
        let Some(wrapper) = self.get(consumer_id) else {
            return Ok(());
        };
        wrapper.invoke(ctx, ev, callback)
    }

    /// Looks up `consumer_id` and delegates to its wrapper's
    /// `update_min_version`. Absent ⇒ no-op.
    pub fn update_min_version(&self, consumer_id: &str, v: u64) {
        if let Some(wrapper) = self.get(consumer_id) {
            wrapper.update_min_version(v);
        }
    }
}
