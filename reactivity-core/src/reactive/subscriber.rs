//! Identity types for the reactive system.
//!
//! Every effect gets a [`SubscriberId`] when created. Deps key their
//! subscriber maps by this ID. Each Dep carries a [`DepId`] that identifies
//! it in `Debug` output and trace events.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber (an effect, or the effect inside a
/// computed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a Dep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(u64);

impl DepId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
