//! Minimal container wrappers for integration tests.
//!
//! They stand in for an interception layer: every read calls `track`, every
//! mutation calls `trigger`, and mutators bracket their internal reads with
//! paused tracking and paused scheduling.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;

use reactivity_core::reactive::{
    has_changed, track, trigger, SchedulingGuard, Target, TargetKind, TrackKey, TrackOp,
    TrackingGuard, TriggerOp,
};

/// Pause tracking and scheduling for the duration of a mutator.
///
/// Scheduling is released first, so queued effects flush while tracking is
/// still paused for the mutator's caller.
struct Mutation {
    _scheduling: SchedulingGuard,
    _tracking: TrackingGuard,
}

impl Mutation {
    fn begin() -> Self {
        let tracking = TrackingGuard::pause();
        Self {
            _scheduling: SchedulingGuard::new(),
            _tracking: tracking,
        }
    }
}

/// An observable growable list.
pub struct ReactiveVec<T> {
    target: Target,
    items: RefCell<Vec<T>>,
}

impl<T: Clone + PartialEq> ReactiveVec<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            target: Target::new(TargetKind::Sequence),
            items: RefCell::new(items),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn get(&self, index: usize) -> Option<T> {
        track(&self.target, TrackOp::Get, TrackKey::Index(index));
        self.items.borrow().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        track(&self.target, TrackOp::Get, TrackKey::Length);
        self.items.borrow().len()
    }

    pub fn to_vec(&self) -> Vec<T> {
        track(&self.target, TrackOp::Iterate, TrackKey::Length);
        self.items.borrow().clone()
    }

    pub fn push(&self, value: T) {
        let _mutation = Mutation::begin();
        let index = {
            let mut items = self.items.borrow_mut();
            items.push(value);
            items.len() - 1
        };
        trigger(&self.target, TriggerOp::Add, Some(&TrackKey::Index(index)), None);
    }

    pub fn set(&self, index: usize, value: T) {
        let op = {
            let mut items = self.items.borrow_mut();
            match items.get_mut(index) {
                Some(slot) if !has_changed(&value, &*slot) => return,
                Some(slot) => {
                    *slot = value;
                    TriggerOp::Set
                }
                None => {
                    assert_eq!(index, items.len(), "sparse writes are not supported");
                    items.push(value);
                    TriggerOp::Add
                }
            }
        };
        trigger(&self.target, op, Some(&TrackKey::Index(index)), None);
    }

    pub fn truncate(&self, len: usize) {
        {
            let mut items = self.items.borrow_mut();
            if len >= items.len() {
                return;
            }
            items.truncate(len);
        }
        trigger(&self.target, TriggerOp::Set, Some(&TrackKey::Length), Some(len));
    }

    pub fn clear(&self) {
        let had_items = {
            let mut items = self.items.borrow_mut();
            let had_items = !items.is_empty();
            items.clear();
            had_items
        };
        if had_items {
            trigger(&self.target, TriggerOp::Clear, None, None);
        }
    }
}

/// An observable string-keyed map.
pub struct ReactiveMap<V> {
    target: Target,
    entries: RefCell<BTreeMap<String, V>>,
}

impl<V: Clone + PartialEq> ReactiveMap<V> {
    pub fn new() -> Self {
        Self {
            target: Target::new(TargetKind::Map),
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn get(&self, key: &str) -> Option<V> {
        track(&self.target, TrackOp::Get, TrackKey::from(key));
        self.entries.borrow().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        track(&self.target, TrackOp::Has, TrackKey::from(key));
        self.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        track(&self.target, TrackOp::Iterate, TrackKey::Iterate);
        self.entries.borrow().len()
    }

    pub fn keys(&self) -> Vec<String> {
        track(&self.target, TrackOp::Iterate, TrackKey::MapKeyIterate);
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        track(&self.target, TrackOp::Iterate, TrackKey::Iterate);
        self.entries.borrow().values().cloned().collect()
    }

    pub fn insert(&self, key: &str, value: V) {
        let op = {
            let mut entries = self.entries.borrow_mut();
            match entries.get_mut(key) {
                Some(slot) if !has_changed(&value, &*slot) => return,
                Some(slot) => {
                    *slot = value;
                    TriggerOp::Set
                }
                None => {
                    entries.insert(key.to_owned(), value);
                    TriggerOp::Add
                }
            }
        };
        trigger(&self.target, op, Some(&TrackKey::from(key)), None);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let removed = self.entries.borrow_mut().remove(key);
        if removed.is_some() {
            trigger(&self.target, TriggerOp::Delete, Some(&TrackKey::from(key)), None);
        }
        removed
    }

    pub fn clear(&self) {
        let had_entries = {
            let mut entries = self.entries.borrow_mut();
            let had_entries = !entries.is_empty();
            entries.clear();
            had_entries
        };
        if had_entries {
            trigger(&self.target, TriggerOp::Clear, None, None);
        }
    }
}
