//! Dependency sets.
//!
//! A [`Dep`] is the set of effects subscribed to one observable slot: a
//! property of a tracked target, a ref, or a computed. Each subscriber is
//! stored with the `track_id` of the run that last read the slot, which is
//! how the effect machinery tells live subscriptions from stale ones.
//!
//! Deps hold their subscribers weakly. The owning effect keeps the Dep alive
//! through its own `deps` list, so a Dep lives as long as its longest-lived
//! subscriber or its owning slot.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::computed::ComputedRefresh;
use super::effect::EffectCore;
use super::subscriber::{DepId, SubscriberId};

struct Subscription {
    effect: Weak<EffectCore>,
    track_id: u64,
}

struct DepInner {
    id: DepId,
    subscribers: RefCell<IndexMap<SubscriberId, Subscription>>,
    cleanup: Box<dyn Fn()>,
    computed: Option<Weak<dyn ComputedRefresh>>,
}

/// The set of effects subscribed to one observable slot.
///
/// Cloning a `Dep` yields another handle to the same set.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Dep {
    /// Create an empty Dep. `cleanup` runs whenever a [`delete`](Self::delete)
    /// leaves the Dep without subscribers.
    pub fn new<F>(cleanup: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::build(Box::new(cleanup), None)
    }

    pub(crate) fn for_computed<F>(cleanup: F, computed: Weak<dyn ComputedRefresh>) -> Self
    where
        F: Fn() + 'static,
    {
        Self::build(Box::new(cleanup), Some(computed))
    }

    fn build(cleanup: Box<dyn Fn()>, computed: Option<Weak<dyn ComputedRefresh>>) -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: DepId::new(),
                subscribers: RefCell::new(IndexMap::new()),
                cleanup,
                computed,
            }),
        }
    }

    /// This Dep's identity.
    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// The track stamp recorded for `subscriber`, if it is subscribed.
    pub fn get(&self, subscriber: SubscriberId) -> Option<u64> {
        self.inner
            .subscribers
            .borrow()
            .get(&subscriber)
            .map(|subscription| subscription.track_id)
    }

    /// Subscribe `effect` (or refresh its stamp) with `track_id`.
    pub(crate) fn set(&self, effect: &Rc<EffectCore>, track_id: u64) {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        match subscribers.get_mut(&effect.id()) {
            Some(subscription) => subscription.track_id = track_id,
            None => {
                subscribers.insert(
                    effect.id(),
                    Subscription {
                        effect: Rc::downgrade(effect),
                        track_id,
                    },
                );
            }
        }
    }

    /// Remove `subscriber`. If that empties the Dep, its cleanup runs.
    ///
    /// Returns whether the subscriber was present.
    pub fn delete(&self, subscriber: SubscriberId) -> bool {
        let (removed, now_empty) = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            let removed = subscribers.shift_remove(&subscriber).is_some();
            (removed, subscribers.is_empty())
        };
        if removed && now_empty {
            tracing::debug!(dep = ?self.inner.id, "dep emptied, running cleanup");
            (self.inner.cleanup)();
        }
        removed
    }

    /// Number of subscribed effects.
    pub fn len(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Whether no effect is subscribed.
    pub fn is_empty(&self) -> bool {
        self.inner.subscribers.borrow().is_empty()
    }

    /// Whether this Dep belongs to a computed.
    pub fn is_computed(&self) -> bool {
        self.inner.computed.is_some()
    }

    /// Whether two handles refer to the same Dep.
    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn computed(&self) -> Option<Rc<dyn ComputedRefresh>> {
        self.inner.computed.as_ref().and_then(Weak::upgrade)
    }

    /// Live subscribers in subscription order.
    ///
    /// Notification works on this snapshot so that callbacks are free to
    /// subscribe to or unsubscribe from the Dep while it is being walked.
    pub(crate) fn subscribers(&self) -> Vec<Rc<EffectCore>> {
        self.inner
            .subscribers
            .borrow()
            .values()
            .filter_map(|subscription| subscription.effect.upgrade())
            .collect()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subscribers", &self.len())
            .field("computed", &self.is_computed())
            .finish()
    }
}
