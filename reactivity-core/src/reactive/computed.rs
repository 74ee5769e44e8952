//! Computed Implementation
//!
//! A [`Computed`] is a cached derived value that re-evaluates only when its
//! dependencies change, and only when someone reads it.
//!
//! # How Computeds Work
//!
//! 1. The getter runs inside an effect, so every reactive read it performs
//!    becomes a dependency of the computed.
//!
//! 2. When a dependency changes, the computed does not recompute. Its effect's
//!    trigger only tells the computed's own subscribers they are
//!    `MaybeDirty`: the computed has not yet proven its value changed.
//!
//! 3. On the next read the getter re-runs. If the result differs from the
//!    cached value, subscribers are raised to `Dirty`.
//!
//! # Why This Matters
//!
//! In a chain `source -> a -> b`, changing `source` in a way that leaves `a`
//! equal means `b`'s getter never re-runs. Subscribers resolve their
//! `MaybeDirty` level by asking each upstream computed to refresh, in the
//! order they were read.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use super::changed::has_changed;
use super::context::{current_subscriber, untracked};
use super::effect::{DirtyLevel, ReactiveEffect};
use super::refs::RefDep;
use crate::error::{ReactiveError, Result};

/// Lets a subscriber's dirty check refresh an upstream computed without
/// knowing its value type.
pub(crate) trait ComputedRefresh {
    fn refresh(&self);
}

struct ComputedInner<T: 'static> {
    value: Rc<RefCell<Option<T>>>,
    dep: RefDep,
    effect: ReactiveEffect<T>,
}

impl<T: Clone + PartialEq + 'static> ComputedInner<T> {
    fn evaluate(&self) {
        if !self.effect.dirty() {
            return;
        }
        let next = self.effect.run();
        let changed = {
            let mut cached = self.value.borrow_mut();
            let changed = cached.as_ref().map_or(true, |old| has_changed(&next, old));
            *cached = Some(next);
            changed
        };
        tracing::trace!(computed = self.effect.id().raw(), changed, "computed re-evaluated");
        if changed {
            self.dep.trigger(DirtyLevel::Dirty);
        }
    }
}

impl<T: Clone + PartialEq + 'static> ComputedRefresh for ComputedInner<T> {
    fn refresh(&self) {
        self.evaluate();
    }
}

/// A cached, lazily recomputed derived value.
///
/// The getter receives the previously cached value, if any. Clones share the
/// same cache and dependencies.
///
/// # Example
///
/// ```rust
/// use reactivity_core::reactive::{Computed, Ref};
///
/// let count = Ref::new(2);
/// let source = count.clone();
/// let doubled = Computed::new(move |_| source.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed from `getter`. Nothing runs until the first read.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn(Option<&T>) -> T + 'static,
    {
        let value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let dep = RefDep::new();

        let previous = Rc::clone(&value);
        let subscribers = dep.clone();
        let effect = ReactiveEffect::new(
            move || {
                let previous = previous.borrow().clone();
                getter(previous.as_ref())
            },
            move || subscribers.trigger(DirtyLevel::MaybeDirty),
            None,
        );

        Self {
            inner: Rc::new(ComputedInner { value, dep, effect }),
        }
    }

    /// Get the value, recomputing if needed, and subscribe the running effect.
    ///
    /// # Panics
    ///
    /// Panics with [`ReactiveError::CyclicComputed`] if the getter reads this
    /// computed before it has produced a first value.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("Computed::get failed: {err}"),
        }
    }

    /// Fallible form of [`get`](Self::get).
    ///
    /// A getter that reads its own computed after a first value exists gets
    /// the previous value back.
    pub fn try_get(&self) -> Result<T> {
        self.inner.evaluate();
        // A computed never subscribes to itself.
        if current_subscriber() != Some(self.inner.effect.id()) {
            self.inner.dep.track(Some(self.refresh_handle()));
        }

        let cached = self.inner.value.borrow().clone();
        match cached {
            Some(value) => {
                if self.inner.effect.is_running() {
                    tracing::warn!(
                        computed = self.inner.effect.id().raw(),
                        "computed read itself while evaluating; returning previous value"
                    );
                }
                Ok(value)
            }
            None => Err(ReactiveError::CyclicComputed),
        }
    }

    /// Get the value without subscribing the running effect.
    pub fn get_untracked(&self) -> T {
        untracked(|| self.get())
    }

    /// Whether the next read will re-run the getter.
    pub fn is_dirty(&self) -> bool {
        self.inner.effect.dirty()
    }

    /// Force the next read to re-run the getter, or mark the cache current.
    pub fn set_dirty(&self, dirty: bool) {
        self.inner.effect.set_dirty(dirty);
    }

    /// The effect that runs the getter.
    pub fn effect(&self) -> &ReactiveEffect<T> {
        &self.inner.effect
    }

    /// Number of effects subscribed to this computed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.current().map_or(0, |dep| dep.len())
    }

    /// Whether a value has been computed yet.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    fn refresh_handle(&self) -> Weak<dyn ComputedRefresh> {
        let weak: Weak<ComputedInner<T>> = Rc::downgrade(&self.inner);
        weak
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Computed");
        match self.inner.value.try_borrow() {
            Ok(value) => debug.field("value", &*value),
            Err(_) => debug.field("value", &"<borrowed>"),
        };
        debug
            .field("dirty_level", &self.inner.effect.dirty_level())
            .finish()
    }
}

/// Create a read-only computed. See [`Computed::new`].
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn(Option<&T>) -> T + 'static,
{
    Computed::new(getter)
}

/// A computed with a user-supplied setter.
pub struct WritableComputed<T: 'static> {
    computed: Computed<T>,
    setter: Rc<dyn Fn(T)>,
}

impl<T: Clone + PartialEq + 'static> WritableComputed<T> {
    /// Read the value. See [`Computed::get`].
    pub fn get(&self) -> T {
        self.computed.get()
    }

    /// Hand `value` to the setter.
    pub fn set(&self, value: T) {
        (self.setter)(value);
    }

    /// The read side of this computed.
    pub fn computed(&self) -> &Computed<T> {
        &self.computed
    }
}

impl<T: 'static> Clone for WritableComputed<T> {
    fn clone(&self) -> Self {
        Self {
            computed: self.computed.clone(),
            setter: Rc::clone(&self.setter),
        }
    }
}

impl<T: Debug + 'static> Debug for WritableComputed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WritableComputed").field(&self.computed).finish()
    }
}

/// Create a computed whose writes are routed to `setter`.
pub fn computed_with_setter<T, G, S>(getter: G, setter: S) -> WritableComputed<T>
where
    T: Clone + PartialEq + 'static,
    G: Fn(Option<&T>) -> T + 'static,
    S: Fn(T) + 'static,
{
    WritableComputed {
        computed: Computed::new(getter),
        setter: Rc::new(setter),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
