//! Weak render-target references
//!
//! Render targets belong to the UI. Relay threads only ever copy a weak
//! reference out of a [`TargetSlot`]; the UI task upgrades it and skips the
//! frame if the target has gone away in the meantime.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::media::output::RenderTarget;

/// Rebindable render target of one playback channel
#[derive(Default)]
pub struct TargetSlot {
    target: Mutex<Option<Weak<dyn RenderTarget>>>,
}

impl TargetSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, target: Option<&Arc<dyn RenderTarget>>) {
        *self.target.lock() = target.map(Arc::downgrade);
    }

    /// Copy of the current reference; the lock is released on return
    pub fn current(&self) -> Option<Weak<dyn RenderTarget>> {
        self.target.lock().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.target
            .lock()
            .as_ref()
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false)
    }
}

/// Render targets registered before their participant's video arrived
#[derive(Default)]
pub struct PendingTargets {
    targets: HashMap<String, Weak<dyn RenderTarget>>,
}

impl PendingTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: impl Into<String>, target: &Arc<dyn RenderTarget>) {
        self.targets.insert(identity.into(), Arc::downgrade(target));
    }

    /// Consume the entry for `identity`. A target that was dropped while
    /// waiting counts as absent.
    pub fn take(&mut self, identity: &str) -> Option<Arc<dyn RenderTarget>> {
        self.targets.remove(identity).and_then(|weak| weak.upgrade())
    }

    pub fn remove(&mut self, identity: &str) -> bool {
        self.targets.remove(identity).is_some()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.targets.contains_key(identity)
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
