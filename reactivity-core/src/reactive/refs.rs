//! Ref Implementation
//!
//! A [`Ref`] is the smallest observable container: one value and one Dep.
//!
//! # How Refs Work
//!
//! 1. Reading a ref inside a running effect subscribes that effect to the
//!    ref's Dep. The Dep is created on the first tracked read and dropped
//!    again once its last subscriber leaves.
//!
//! 2. Writing a ref compares the new value with the old one using
//!    [`has_changed`]. Only an actual change notifies subscribers.
//!
//! # Nested Refs
//!
//! A [`MaybeRef`] slot holds either a plain value or another ref. Writing a
//! plain value into a slot that holds a ref writes through to that ref
//! instead of replacing it.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use super::changed::has_changed;
use super::computed::ComputedRefresh;
use super::context::tracking_effect;
use super::dep::Dep;
use super::effect::{track_effect, trigger_effects, DirtyLevel};
use crate::error::{ReactiveError, Result};

/// A lazily created Dep owned by a single observable value.
#[derive(Clone, Default)]
pub(crate) struct RefDep {
    slot: Rc<RefCell<Option<Dep>>>,
}

impl RefDep {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn current(&self) -> Option<Dep> {
        self.slot.borrow().clone()
    }

    /// Subscribe the running effect, creating the Dep if needed.
    pub(crate) fn track(&self, computed: Option<Weak<dyn ComputedRefresh>>) {
        let Some(effect) = tracking_effect() else {
            return;
        };
        let dep = match self.current() {
            Some(dep) => dep,
            None => {
                let dep = self.create(computed);
                *self.slot.borrow_mut() = Some(dep.clone());
                dep
            }
        };
        track_effect(&effect, &dep);
    }

    /// Notify subscribers, if there are any.
    pub(crate) fn trigger(&self, level: DirtyLevel) {
        if let Some(dep) = self.current() {
            trigger_effects(&dep, level);
        }
    }

    fn create(&self, computed: Option<Weak<dyn ComputedRefresh>>) -> Dep {
        let slot = Rc::downgrade(&self.slot);
        let cleanup = move || {
            let Some(slot) = slot.upgrade() else {
                return;
            };
            let Ok(mut current) = slot.try_borrow_mut() else {
                return;
            };
            if current.as_ref().is_some_and(Dep::is_empty) {
                *current = None;
            }
        };
        match computed {
            Some(computed) => Dep::for_computed(cleanup, computed),
            None => Dep::new(cleanup),
        }
    }
}

struct RefInner<T> {
    value: RefCell<T>,
    dep: RefDep,
}

/// A reactive container holding a single value.
///
/// Clones share the same value and Dep.
///
/// # Example
///
/// ```rust
/// use reactivity_core::reactive::Ref;
///
/// let count = Ref::new(0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
///
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Ref<T: 'static> {
    inner: Rc<RefInner<T>>,
}

impl<T: 'static> Ref<T> {
    /// Create a ref holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefInner {
                value: RefCell::new(value),
                dep: RefDep::new(),
            }),
        }
    }

    /// Get a clone of the value, subscribing the running effect.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.get_untracked()
    }

    /// Get a clone of the value without subscribing anything.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the value, subscribing the running effect.
    ///
    /// Writing this ref from inside `f` fails with
    /// [`ReactiveError::ValueBorrowed`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Store `value` and notify subscribers if it differs from the current
    /// value.
    ///
    /// # Panics
    ///
    /// Panics if the value is currently borrowed through [`with`](Self::with).
    pub fn set(&self, value: T)
    where
        T: PartialEq,
    {
        if let Err(err) = self.try_set(value) {
            panic!("Ref::set failed: {err}");
        }
    }

    /// Fallible form of [`set`](Self::set). Returns whether the value changed.
    pub fn try_set(&self, value: T) -> Result<bool>
    where
        T: PartialEq,
    {
        {
            let mut current = self
                .inner
                .value
                .try_borrow_mut()
                .map_err(|_| ReactiveError::ValueBorrowed)?;
            if !has_changed(&value, &*current) {
                return Ok(false);
            }
            *current = value;
        }
        self.inner.dep.trigger(DirtyLevel::Dirty);
        Ok(true)
    }

    /// Compute a new value from the current one and [`set`](Self::set) it.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
        T: PartialEq,
    {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }

    /// Number of effects subscribed to this ref.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.current().map_or(0, |dep| dep.len())
    }

    /// The ref's Dep, if any effect has subscribed since it last emptied.
    pub fn dep(&self) -> Option<Dep> {
        self.inner.dep.current()
    }

    /// Whether two handles refer to the same ref.
    pub fn ptr_eq(&self, other: &Ref<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn track(&self) {
        self.inner.dep.track(None);
    }
}

impl<T: 'static> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Default + 'static> Default for Ref<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Debug + 'static> Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Ref");
        match self.inner.value.try_borrow() {
            Ok(value) => debug.field("value", &*value),
            Err(_) => debug.field("value", &"<borrowed>"),
        };
        debug
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T: 'static> From<MaybeRef<T>> for Ref<T> {
    /// Wrap a plain value, or hand back an existing ref unchanged.
    fn from(value: MaybeRef<T>) -> Self {
        match value {
            MaybeRef::Value(value) => Ref::new(value),
            MaybeRef::Ref(existing) => existing,
        }
    }
}

/// Force subscribers of `target` to be notified, even though its value did
/// not change. Useful after mutating the value in place through interior
/// mutability.
pub fn trigger_ref<T: 'static>(target: &Ref<T>) {
    target.inner.dep.trigger(DirtyLevel::Dirty);
}

/// A slot holding either a plain value or a nested ref.
#[derive(Clone)]
pub enum MaybeRef<T: 'static> {
    /// A plain value.
    Value(T),
    /// A ref whose value the slot forwards.
    Ref(Ref<T>),
}

impl<T: 'static> MaybeRef<T> {
    /// Whether the slot holds a nested ref.
    pub fn is_ref(&self) -> bool {
        matches!(self, MaybeRef::Ref(_))
    }

    /// The slot's value, unwrapping (and tracking) a nested ref.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        match self {
            MaybeRef::Value(value) => value.clone(),
            MaybeRef::Ref(inner) => inner.get(),
        }
    }

    /// Write a plain value. A nested ref receives the write through its own
    /// setter and stays in place.
    pub fn set(&mut self, value: T)
    where
        T: PartialEq,
    {
        match self {
            MaybeRef::Ref(inner) => inner.set(value),
            MaybeRef::Value(current) => *current = value,
        }
    }

    /// Assign another slot's contents. Plain values are written through
    /// [`set`](Self::set); a ref replaces whatever the slot held.
    pub fn assign(&mut self, value: MaybeRef<T>)
    where
        T: PartialEq,
    {
        match value {
            MaybeRef::Value(value) => self.set(value),
            MaybeRef::Ref(inner) => *self = MaybeRef::Ref(inner),
        }
    }
}

impl<T: 'static> From<Ref<T>> for MaybeRef<T> {
    fn from(inner: Ref<T>) -> Self {
        MaybeRef::Ref(inner)
    }
}

impl<T: Debug + 'static> Debug for MaybeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeRef::Value(value) => f.debug_tuple("Value").field(value).finish(),
            MaybeRef::Ref(inner) => f.debug_tuple("Ref").field(inner).finish(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
