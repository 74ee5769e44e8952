//! Track/Trigger Registry
//!
//! The registry maps each observed target and key to its [`Dep`]. It is the
//! boundary with the interception layer: container wrappers call [`track`]
//! on every read and [`trigger`] on every mutation.
//!
//! # Targets
//!
//! Observed containers are identified by a [`Target`] handle rather than by
//! address. The registry never keeps a target alive; dropping the handle
//! removes the target's entry. Entries also disappear on their own once
//! every Dep under them has lost its last subscriber.
//!
//! # Trigger Resolution
//!
//! A single mutation can fan out to several Deps: adding a key to a map also
//! changes what iteration sees, and shortening a sequence removes every index
//! past the new length. All resolved Deps are notified inside one scheduling
//! pause, so each affected scheduler runs at most once.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::context::{tracking_effect, SchedulingGuard};
use super::dep::Dep;
use super::effect::{track_effect, trigger_effects, DirtyLevel};

/// The shape of an observed container, which decides trigger fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TargetKind {
    /// Records and sets: keyed storage without a length.
    Object,
    /// Index-addressed storage with a `length`.
    Sequence,
    /// Key-value collections whose iteration sees keys and values.
    Map,
}

/// Stable identity of an observed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Handle for an observed container.
///
/// Dropping the handle forgets every Dep registered for it.
pub struct Target {
    id: TargetId,
    kind: TargetKind,
}

impl Target {
    /// Register a new observable target of the given kind.
    pub fn new(kind: TargetKind) -> Self {
        Self {
            id: TargetId::new(),
            kind,
        }
    }

    /// This target's identity.
    pub fn id(&self) -> TargetId {
        self.id
    }

    /// This target's kind.
    pub fn kind(&self) -> TargetKind {
        self.kind
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tracked_keys", &tracked_keys(self))
            .finish()
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        let id = self.id;
        let _ = TARGETS.try_with(|targets| {
            if let Ok(mut targets) = targets.try_borrow_mut() {
                targets.remove(&id);
            }
        });
    }
}

/// A key under which a target's reads and writes are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackKey {
    /// A named property or non-integer map key.
    Name(String),
    /// An integer index or integer map key.
    Index(usize),
    /// A sequence's length.
    Length,
    /// Reserved key read by iteration over a target.
    Iterate,
    /// Reserved key read by iteration over a map's keys only.
    MapKeyIterate,
}

impl From<&str> for TrackKey {
    /// `"length"` becomes [`TrackKey::Length`], canonical non-negative
    /// integers become [`TrackKey::Index`], anything else a name.
    fn from(key: &str) -> Self {
        if key == "length" {
            return TrackKey::Length;
        }
        match key.parse::<usize>() {
            Ok(index) if index.to_string() == key => TrackKey::Index(index),
            _ => TrackKey::Name(key.to_owned()),
        }
    }
}

impl From<String> for TrackKey {
    fn from(key: String) -> Self {
        TrackKey::from(key.as_str())
    }
}

impl From<usize> for TrackKey {
    fn from(index: usize) -> Self {
        TrackKey::Index(index)
    }
}

/// The kind of read being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackOp {
    /// A property or element read.
    Get,
    /// A membership test.
    Has,
    /// An iteration over the target.
    Iterate,
}

/// The kind of mutation being triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TriggerOp {
    /// An existing key was overwritten.
    Set,
    /// A new key was inserted.
    Add,
    /// A key was removed.
    Delete,
    /// The whole target was emptied.
    Clear,
}

type KeyToDepMap = IndexMap<TrackKey, Dep>;

thread_local! {
    static TARGETS: RefCell<HashMap<TargetId, KeyToDepMap>> = RefCell::new(HashMap::new());
}

/// Record that the running effect read `key` of `target`.
///
/// Does nothing unless tracking is enabled and an effect is running.
pub fn track(target: &Target, op: TrackOp, key: TrackKey) {
    let Some(effect) = tracking_effect() else {
        return;
    };
    tracing::trace!(target_id = target.id.0, ?op, ?key, "track");

    let dep = TARGETS.with(|targets| {
        let mut targets = targets.borrow_mut();
        let deps = targets.entry(target.id).or_default();
        match deps.get(&key) {
            Some(dep) => dep.clone(),
            None => {
                let dep = registry_dep(target.id, key.clone());
                deps.insert(key, dep.clone());
                dep
            }
        }
    });
    track_effect(&effect, &dep);
}

/// Notify every effect depending on the part of `target` that `op` changed.
///
/// `new_len` is the new length when `key` is [`TrackKey::Length`] on a
/// sequence; every index at or past it is treated as removed.
pub fn trigger(target: &Target, op: TriggerOp, key: Option<&TrackKey>, new_len: Option<usize>) {
    let deps = TARGETS.with(|targets| {
        targets
            .borrow()
            .get(&target.id)
            .map(|deps| resolve_deps(deps, target.kind, op, key, new_len))
    });
    // Never tracked.
    let Some(deps) = deps else {
        return;
    };
    tracing::trace!(target_id = target.id.0, ?op, ?key, deps = deps.len(), "trigger");

    let _batch = SchedulingGuard::new();
    for dep in &deps {
        trigger_effects(dep, DirtyLevel::Dirty);
    }
}

fn resolve_deps(
    deps: &KeyToDepMap,
    kind: TargetKind,
    op: TriggerOp,
    key: Option<&TrackKey>,
    new_len: Option<usize>,
) -> Vec<Dep> {
    if op == TriggerOp::Clear {
        return deps.values().cloned().collect();
    }

    if kind == TargetKind::Sequence && key == Some(&TrackKey::Length) {
        return deps
            .iter()
            .filter(|(key, _)| match key {
                TrackKey::Length => true,
                TrackKey::Index(index) => new_len.is_some_and(|len| *index >= len),
                _ => false,
            })
            .map(|(_, dep)| dep.clone())
            .collect();
    }

    let mut resolved = Vec::new();
    let mut push = |key: &TrackKey| {
        if let Some(dep) = deps.get(key) {
            resolved.push(dep.clone());
        }
    };

    if let Some(key) = key {
        push(key);
    }
    match op {
        TriggerOp::Add | TriggerOp::Delete if kind != TargetKind::Sequence => {
            push(&TrackKey::Iterate);
            if kind == TargetKind::Map {
                push(&TrackKey::MapKeyIterate);
            }
        }
        TriggerOp::Add => {
            if matches!(key, Some(TrackKey::Index(_))) {
                push(&TrackKey::Length);
            }
        }
        TriggerOp::Set if kind == TargetKind::Map => push(&TrackKey::Iterate),
        TriggerOp::Set | TriggerOp::Delete | TriggerOp::Clear => {}
    }
    resolved
}

fn registry_dep(target: TargetId, key: TrackKey) -> Dep {
    Dep::new(move || forget_dep(target, &key))
}

fn forget_dep(target: TargetId, key: &TrackKey) {
    let _ = TARGETS.try_with(|targets| {
        let Ok(mut targets) = targets.try_borrow_mut() else {
            return;
        };
        let Some(deps) = targets.get_mut(&target) else {
            return;
        };
        if deps.get(key).is_some_and(Dep::is_empty) {
            deps.shift_remove(key);
            tracing::debug!(target_id = target.0, ?key, "dep removed from registry");
        }
        if deps.is_empty() {
            targets.remove(&target);
        }
    });
}

/// The Dep currently registered for `key` of `target`, if any.
pub fn dep_for(target: &Target, key: &TrackKey) -> Option<Dep> {
    TARGETS.with(|targets| {
        targets
            .borrow()
            .get(&target.id)
            .and_then(|deps| deps.get(key).cloned())
    })
}

/// Number of keys of `target` with a live Dep.
pub fn tracked_keys(target: &Target) -> usize {
    TARGETS.with(|targets| targets.borrow().get(&target.id).map_or(0, |deps| deps.len()))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
