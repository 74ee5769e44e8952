//! Effect Implementation
//!
//! A [`ReactiveEffect`] wraps a function and records which [`Dep`]s it read
//! during its latest run. When one of those Deps is triggered, the effect's
//! dirty level rises and its scheduler is queued.
//!
//! # Dirty Levels
//!
//! Effects carry a four-step staleness level:
//!
//! - `NotDirty`: the last run is current.
//! - `QueryingDirty`: a `MaybeDirty` effect is asking its computed
//!   dependencies whether they really changed.
//! - `MaybeDirty`: an upstream computed was invalidated, but has not proven
//!   its value changed.
//! - `Dirty`: a dependency definitely changed.
//!
//! Reading [`ReactiveEffect::dirty`] resolves `MaybeDirty` by refreshing the
//! upstream computeds in order, so a chain of computeds only re-runs
//! downstream work when a value actually differs.
//!
//! # Dependency Reconciliation
//!
//! Each run bumps the effect's `track_id` and rewinds a cursor over its
//! `deps` list. Every tracked read either confirms the Dep already at the
//! cursor or replaces it, and whatever lies past the cursor after the run was
//! not read again and is unsubscribed. Conditional dependencies are pruned in
//! a single pass without reallocating the list.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::{queue_scheduler, ReactiveContext, SchedulingGuard, TrackingGuard};
use super::dep::Dep;
use super::subscriber::SubscriberId;

/// A deferred callback queued when an effect is triggered.
pub type EffectScheduler = Rc<dyn Fn()>;

/// How stale an effect's last run is, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DirtyLevel {
    /// The last run is up to date.
    NotDirty,
    /// Computed dependencies are being asked whether they changed.
    QueryingDirty,
    /// An upstream computed might have changed.
    MaybeDirty,
    /// A dependency changed.
    Dirty,
}

/// Type-erased effect state shared with Deps and the reactive context.
pub(crate) struct EffectCore {
    id: SubscriberId,
    active: Cell<bool>,
    deps: RefCell<SmallVec<[Dep; 4]>>,
    deps_length: Cell<usize>,
    track_id: Cell<u64>,
    dirty_level: Cell<DirtyLevel>,
    runnings: Cell<u32>,
    should_schedule: Cell<bool>,
    allow_recurse: Cell<bool>,
    trigger: Box<dyn Fn()>,
    scheduler: RefCell<Option<EffectScheduler>>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl EffectCore {
    fn new(trigger: Box<dyn Fn()>, scheduler: Option<EffectScheduler>) -> Self {
        Self {
            id: SubscriberId::new(),
            active: Cell::new(true),
            deps: RefCell::new(SmallVec::new()),
            deps_length: Cell::new(0),
            track_id: Cell::new(0),
            dirty_level: Cell::new(DirtyLevel::Dirty),
            runnings: Cell::new(0),
            should_schedule: Cell::new(false),
            allow_recurse: Cell::new(false),
            trigger,
            scheduler: RefCell::new(scheduler),
            on_stop: RefCell::new(None),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_running(&self) -> bool {
        self.runnings.get() > 0
    }

    fn dirty(&self) -> bool {
        if self.dirty_level.get() == DirtyLevel::MaybeDirty {
            self.dirty_level.set(DirtyLevel::QueryingDirty);
            let _querying = QueryGuard { effect: self };
            let _untracked = TrackingGuard::pause();
            let mut index = 0;
            while index < self.deps_length.get() {
                let dep = self.deps.borrow().get(index).cloned();
                if let Some(computed) = dep.and_then(|dep| dep.computed()) {
                    computed.refresh();
                    if self.dirty_level.get() >= DirtyLevel::Dirty {
                        break;
                    }
                }
                index += 1;
            }
        }
        self.dirty_level.get() >= DirtyLevel::Dirty
    }

    fn pre_cleanup(&self) {
        self.track_id.set(self.track_id.get() + 1);
        self.deps_length.set(0);
    }

    fn post_cleanup(&self) {
        let valid = self.deps_length.get();
        let stale: SmallVec<[Dep; 4]> = {
            let mut deps = self.deps.borrow_mut();
            if deps.len() <= valid {
                return;
            }
            deps.drain(valid..).collect()
        };
        for dep in &stale {
            cleanup_dep_effect(dep, self);
        }
    }

    fn stop(&self) {
        if !self.active.get() {
            return;
        }
        self.pre_cleanup();
        self.post_cleanup();
        let on_stop = self.on_stop.borrow_mut().take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }
        self.active.set(false);
        tracing::debug!(effect = self.id.raw(), "effect stopped");
    }
}

impl Drop for EffectCore {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().drain(..) {
            dep.delete(self.id);
        }
    }
}

/// Settles a `QueryingDirty` level when [`EffectCore::dirty`] finishes.
///
/// A finished query found nothing changed. A query cut short by a panicking
/// computed proves nothing, so the effect is left `Dirty` and schedulable.
struct QueryGuard<'a> {
    effect: &'a EffectCore,
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        let effect = self.effect;
        if effect.dirty_level.get() != DirtyLevel::QueryingDirty {
            return;
        }
        if std::thread::panicking() {
            effect.dirty_level.set(DirtyLevel::Dirty);
            effect.should_schedule.set(true);
        } else {
            effect.dirty_level.set(DirtyLevel::NotDirty);
        }
    }
}

/// Unsubscribe `effect` from `dep` unless the current run has read it.
fn cleanup_dep_effect(dep: &Dep, effect: &EffectCore) {
    if let Some(track_id) = dep.get(effect.id) {
        if track_id != effect.track_id.get() {
            dep.delete(effect.id);
        }
    }
}

/// Record that `effect` read `dep` during its current run.
pub(crate) fn track_effect(effect: &Rc<EffectCore>, dep: &Dep) {
    let track_id = effect.track_id.get();
    if dep.get(effect.id) == Some(track_id) {
        return;
    }
    dep.set(effect, track_id);

    let index = effect.deps_length.get();
    let old = effect.deps.borrow().get(index).cloned();
    match old {
        Some(old) if old.ptr_eq(dep) => {}
        Some(old) => {
            cleanup_dep_effect(&old, effect);
            effect.deps.borrow_mut()[index] = dep.clone();
        }
        None => effect.deps.borrow_mut().push(dep.clone()),
    }
    effect.deps_length.set(index + 1);
}

/// Raise every live subscriber of `dep` to `level` and queue the schedulers
/// of those that were clean.
pub(crate) fn trigger_effects(dep: &Dep, level: DirtyLevel) {
    let _batch = SchedulingGuard::new();
    let subscribers = dep.subscribers();
    tracing::trace!(dep = ?dep.id(), subscribers = subscribers.len(), ?level, "triggering dep");

    for effect in subscribers {
        // A stale stamp means the effect is mid-run and has not re-read this
        // Dep yet. Notifying it would let a self-modifying effect retrigger
        // itself forever.
        let mut tracking = None;
        let mut is_tracking = || {
            *tracking.get_or_insert_with(|| dep.get(effect.id) == Some(effect.track_id.get()))
        };

        if effect.dirty_level.get() < level && is_tracking() {
            if effect.dirty_level.get() == DirtyLevel::NotDirty {
                effect.should_schedule.set(true);
            }
            effect.dirty_level.set(level);
        }
        if effect.should_schedule.get() && is_tracking() {
            (effect.trigger)();
            if !effect.is_running() || effect.allow_recurse.get() {
                effect.should_schedule.set(false);
                let scheduler = effect.scheduler.borrow().clone();
                if let Some(scheduler) = scheduler {
                    queue_scheduler(scheduler);
                }
            }
        }
    }
}

/// Keeps an effect marked as running, and attributes reads to it, for the
/// duration of one run.
struct RunGuard {
    effect: Rc<EffectCore>,
    // Declared after `effect` so the context is restored after pruning.
    _context: ReactiveContext,
}

impl RunGuard {
    fn enter(effect: &Rc<EffectCore>) -> Self {
        let context = ReactiveContext::enter(effect);
        effect.runnings.set(effect.runnings.get() + 1);
        effect.pre_cleanup();
        Self {
            effect: Rc::clone(effect),
            _context: context,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.effect.post_cleanup();
        self.effect.runnings.set(self.effect.runnings.get() - 1);
    }
}

/// A computation that tracks the reactive state it reads.
///
/// # Example
///
/// ```rust
/// use reactivity_core::reactive::{ReactiveEffect, Ref};
///
/// let count = Ref::new(1);
/// let source = count.clone();
/// let effect = ReactiveEffect::new(move || source.get() * 2, || {}, None);
///
/// assert_eq!(effect.run(), 2);
/// count.set(5);
/// assert!(effect.dirty());
/// assert_eq!(effect.run(), 10);
/// ```
pub struct ReactiveEffect<T: 'static> {
    core: Rc<EffectCore>,
    f: Rc<dyn Fn() -> T>,
}

impl<T: 'static> ReactiveEffect<T> {
    /// Create an effect around `f`.
    ///
    /// `trigger` is called synchronously whenever the effect becomes dirty;
    /// `scheduler`, if present, is queued and runs once the current batch
    /// ends. The effect does not run until [`run`](Self::run) is called.
    pub fn new<F, N>(f: F, trigger: N, scheduler: Option<EffectScheduler>) -> Self
    where
        F: Fn() -> T + 'static,
        N: Fn() + 'static,
    {
        Self {
            core: Rc::new(EffectCore::new(Box::new(trigger), scheduler)),
            f: Rc::new(f),
        }
    }

    /// Run the function, re-collecting dependencies.
    ///
    /// A stopped effect still runs its function, but nothing it reads is
    /// tracked. Panics from the function propagate after the dependency list
    /// has been pruned and the previous active effect restored.
    pub fn run(&self) -> T {
        self.core.dirty_level.set(DirtyLevel::NotDirty);
        if !self.core.active.get() {
            return (self.f)();
        }
        tracing::trace!(effect = self.core.id.raw(), "running effect");
        let _run = RunGuard::enter(&self.core);
        (self.f)()
    }

    /// Unsubscribe from every dependency and deactivate. Idempotent.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Whether the effect needs to re-run, resolving `MaybeDirty` first.
    pub fn dirty(&self) -> bool {
        self.core.dirty()
    }

    /// Force the effect dirty or clean.
    pub fn set_dirty(&self, dirty: bool) {
        self.core.dirty_level.set(if dirty {
            DirtyLevel::Dirty
        } else {
            DirtyLevel::NotDirty
        });
    }

    /// The raw dirty level, without resolving `MaybeDirty`.
    pub fn dirty_level(&self) -> DirtyLevel {
        self.core.dirty_level.get()
    }

    /// Whether the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        self.core.active.get()
    }

    /// Whether the effect is somewhere on the current call stack.
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Whether the effect may be scheduled while it is running.
    pub fn allow_recurse(&self) -> bool {
        self.core.allow_recurse.get()
    }

    /// Allow or forbid scheduling while the effect is running.
    pub fn set_allow_recurse(&self, allow: bool) {
        self.core.allow_recurse.set(allow);
    }

    /// Replace the scheduler.
    pub fn set_scheduler(&self, scheduler: Option<EffectScheduler>) {
        *self.core.scheduler.borrow_mut() = scheduler;
    }

    /// Register a hook that runs when the effect is stopped.
    pub fn set_on_stop<F>(&self, on_stop: F)
    where
        F: FnOnce() + 'static,
    {
        *self.core.on_stop.borrow_mut() = Some(Box::new(on_stop));
    }

    /// The effect's subscriber identity.
    pub fn id(&self) -> SubscriberId {
        self.core.id
    }

    /// Number of Deps the effect is currently subscribed to.
    pub fn dep_count(&self) -> usize {
        self.core.deps.borrow().len()
    }

    /// The Deps read during the latest run, in read order.
    pub fn deps(&self) -> Vec<Dep> {
        let valid = self.core.deps_length.get();
        self.core.deps.borrow().iter().take(valid).cloned().collect()
    }

    /// A handle that does not keep the effect alive.
    pub fn downgrade(&self) -> WeakEffect<T> {
        WeakEffect {
            core: Rc::downgrade(&self.core),
            f: Rc::clone(&self.f),
        }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Rc<EffectCore> {
        &self.core
    }
}

impl<T: 'static> Clone for ReactiveEffect<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            f: Rc::clone(&self.f),
        }
    }
}

impl<T: 'static> fmt::Debug for ReactiveEffect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.core.id)
            .field("active", &self.is_active())
            .field("dirty_level", &self.dirty_level())
            .field("dep_count", &self.dep_count())
            .finish()
    }
}

/// Non-owning handle to a [`ReactiveEffect`].
pub struct WeakEffect<T: 'static> {
    core: Weak<EffectCore>,
    f: Rc<dyn Fn() -> T>,
}

impl<T: 'static> WeakEffect<T> {
    /// Recover the effect if it is still alive.
    pub fn upgrade(&self) -> Option<ReactiveEffect<T>> {
        self.core.upgrade().map(|core| ReactiveEffect {
            core,
            f: Rc::clone(&self.f),
        })
    }
}

impl<T: 'static> Clone for WeakEffect<T> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
            f: Rc::clone(&self.f),
        }
    }
}

impl<T: 'static> fmt::Debug for WeakEffect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEffect")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Runner API
// ----------------------------------------------------------------------------

/// Options for [`effect`].
#[derive(Default)]
pub struct EffectOptions {
    lazy: bool,
    scheduler: Option<EffectScheduler>,
    allow_recurse: bool,
    on_stop: Option<Box<dyn FnOnce()>>,
}

impl EffectOptions {
    /// Default options: run immediately, re-run when dirty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the initial run.
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Replace the default re-run scheduler.
    pub fn scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Let the effect be scheduled by its own writes.
    pub fn allow_recurse(mut self, allow: bool) -> Self {
        self.allow_recurse = allow;
        self
    }

    /// Hook called once when the effect is stopped.
    pub fn on_stop<F>(mut self, on_stop: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        self.on_stop = Some(Box::new(on_stop));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler.is_some())
            .field("allow_recurse", &self.allow_recurse)
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

/// Callable handle returned by [`effect`].
///
/// Dropping the last runner (and every clone of its effect) unsubscribes the
/// effect.
#[must_use = "the effect is unsubscribed as soon as the runner is dropped"]
pub struct EffectRunner<T: 'static> {
    effect: ReactiveEffect<T>,
}

impl<T: 'static> EffectRunner<T> {
    /// Run the effect now, regardless of its dirty level.
    pub fn run(&self) -> T {
        self.effect.run()
    }

    /// The underlying effect.
    pub fn effect(&self) -> &ReactiveEffect<T> {
        &self.effect
    }
}

impl<T: 'static> Clone for EffectRunner<T> {
    fn clone(&self) -> Self {
        Self {
            effect: self.effect.clone(),
        }
    }
}

impl<T: 'static> fmt::Debug for EffectRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EffectRunner").field(&self.effect).finish()
    }
}

/// Create an effect that re-runs whenever its dependencies change.
///
/// Unless `options` supply their own scheduler, the effect re-runs at the end
/// of the batch that dirtied it. The effect stays registered for as long as a
/// runner (or a clone of its effect) is alive.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use reactivity_core::reactive::{effect, EffectOptions, Ref};
///
/// let count = Ref::new(0);
/// let seen = Rc::new(Cell::new(-1));
///
/// let (source, sink) = (count.clone(), seen.clone());
/// let _runner = effect(move || sink.set(source.get()), EffectOptions::new());
/// assert_eq!(seen.get(), 0);
///
/// count.set(7);
/// assert_eq!(seen.get(), 7);
/// ```
pub fn effect<T, F>(f: F, options: EffectOptions) -> EffectRunner<T>
where
    T: 'static,
    F: Fn() -> T + 'static,
{
    let effect = ReactiveEffect::new(f, || {}, None);

    let scheduler = options.scheduler.unwrap_or_else(|| {
        let weak = effect.downgrade();
        Rc::new(move || {
            if let Some(effect) = weak.upgrade() {
                if effect.is_active() && effect.dirty() {
                    effect.run();
                }
            }
        })
    });
    effect.set_scheduler(Some(scheduler));
    effect.set_allow_recurse(options.allow_recurse);
    if let Some(on_stop) = options.on_stop {
        effect.set_on_stop(on_stop);
    }

    if !options.lazy {
        effect.run();
    }
    EffectRunner { effect }
}

/// Stop the effect behind `runner`.
pub fn stop<T: 'static>(runner: &EffectRunner<T>) {
    runner.effect.stop();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::{batch, current_subscriber, tracking_effect};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn source() -> Dep {
        Dep::new(|| {})
    }

    fn read(dep: &Dep) {
        if let Some(effect) = tracking_effect() {
            track_effect(&effect, dep);
        }
    }

    fn write(dep: &Dep) {
        trigger_effects(dep, DirtyLevel::Dirty);
    }

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        (Rc::clone(&count), count)
    }

    #[test]
    fn run_collects_dependencies() {
        let a = source();
        let b = source();
        let (a2, b2) = (a.clone(), b.clone());
        let effect = ReactiveEffect::new(
            move || {
                read(&a2);
                read(&b2);
                read(&a2);
            },
            || {},
            None,
        );

        assert_eq!(effect.dirty_level(), DirtyLevel::Dirty);
        effect.run();
        assert_eq!(effect.dirty_level(), DirtyLevel::NotDirty);
        assert_eq!(effect.dep_count(), 2);
        assert!(a.get(effect.id()).is_some());
        assert!(b.get(effect.id()).is_some());

        let deps = effect.deps();
        assert_eq!(deps.len(), 2);
        assert!(deps[0].ptr_eq(&a));
        assert!(deps[1].ptr_eq(&b));
    }

    #[test]
    fn trigger_marks_dirty_and_queues_scheduler() {
        let dep = source();
        let (runs, seen) = counter();
        let reader = dep.clone();
        let effect = ReactiveEffect::new(
            move || read(&reader),
            || {},
            Some(Rc::new(move || runs.set(runs.get() + 1))),
        );
        effect.run();

        write(&dep);
        assert_eq!(effect.dirty_level(), DirtyLevel::Dirty);
        assert!(effect.dirty());
        assert_eq!(seen.get(), 1);

        // Already dirty and not re-run: nothing new to schedule.
        write(&dep);
        assert_eq!(seen.get(), 1);

        effect.run();
        write(&dep);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn batched_writes_schedule_once() {
        let dep = source();
        let (runs, seen) = counter();
        let reader = dep.clone();
        let effect = ReactiveEffect::new(
            move || read(&reader),
            || {},
            Some(Rc::new(move || runs.set(runs.get() + 1))),
        );
        effect.run();

        batch(|| {
            for _ in 0..5 {
                write(&dep);
            }
            assert_eq!(seen.get(), 0);
        });
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn trigger_notifier_fires_before_scheduler() {
        let dep = source();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (trigger_log, scheduler_log) = (Rc::clone(&log), Rc::clone(&log));
        let reader = dep.clone();
        let effect = ReactiveEffect::new(
            move || read(&reader),
            move || trigger_log.borrow_mut().push("trigger"),
            Some(Rc::new(move || scheduler_log.borrow_mut().push("scheduler"))),
        );
        effect.run();

        write(&dep);
        assert_eq!(*log.borrow(), vec!["trigger", "scheduler"]);
    }

    #[test]
    fn unread_dependencies_are_pruned() {
        let flag = source();
        let a = source();
        let b = source();
        let branch = Rc::new(Cell::new(true));

        let (flag2, a2, b2, branch2) = (flag.clone(), a.clone(), b.clone(), Rc::clone(&branch));
        let effect = ReactiveEffect::new(
            move || {
                read(&flag2);
                if branch2.get() {
                    read(&a2);
                } else {
                    read(&b2);
                }
            },
            || {},
            None,
        );

        effect.run();
        assert!(a.get(effect.id()).is_some());
        assert!(b.get(effect.id()).is_none());

        branch.set(false);
        effect.run();
        assert!(a.is_empty());
        assert!(b.get(effect.id()).is_some());
        assert_eq!(effect.dep_count(), 2);

        write(&a);
        assert_eq!(effect.dirty_level(), DirtyLevel::NotDirty);
        write(&b);
        assert_eq!(effect.dirty_level(), DirtyLevel::Dirty);
    }

    #[test]
    fn shrinking_dependency_list_runs_cleanup() {
        let cleaned = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cleaned);
        let tail = Dep::new(move || flag.set(true));
        let head = source();
        let read_tail = Rc::new(Cell::new(true));

        let (head2, tail2, read_tail2) = (head.clone(), tail.clone(), Rc::clone(&read_tail));
        let effect = ReactiveEffect::new(
            move || {
                read(&head2);
                if read_tail2.get() {
                    read(&tail2);
                }
            },
            || {},
            None,
        );
        effect.run();
        assert_eq!(effect.dep_count(), 2);

        read_tail.set(false);
        effect.run();
        assert_eq!(effect.dep_count(), 1);
        assert!(cleaned.get());
    }

    #[test]
    fn self_write_does_not_reschedule() {
        let dep = source();
        let (runs, seen) = counter();
        let holder: Rc<RefCell<Option<ReactiveEffect<()>>>> = Rc::new(RefCell::new(None));

        let reader = dep.clone();
        let scheduled = Rc::clone(&holder);
        let effect = ReactiveEffect::new(
            move || {
                runs.set(runs.get() + 1);
                read(&reader);
                write(&reader);
            },
            || {},
            Some(Rc::new(move || {
                let effect = scheduled.borrow().clone();
                if let Some(effect) = effect {
                    effect.run();
                }
            })),
        );
        *holder.borrow_mut() = Some(effect.clone());

        effect.run();
        assert_eq!(seen.get(), 1);
        holder.borrow_mut().take();
    }

    #[test]
    fn allow_recurse_lets_effect_reschedule_itself() {
        let dep = source();
        let (runs, seen) = counter();
        let holder: Rc<RefCell<Option<ReactiveEffect<()>>>> = Rc::new(RefCell::new(None));

        let reader = dep.clone();
        let scheduled = Rc::clone(&holder);
        let effect = ReactiveEffect::new(
            move || {
                runs.set(runs.get() + 1);
                read(&reader);
                if runs.get() < 3 {
                    write(&reader);
                }
            },
            || {},
            Some(Rc::new(move || {
                let effect = scheduled.borrow().clone();
                if let Some(effect) = effect {
                    effect.run();
                }
            })),
        );
        assert!(!effect.allow_recurse());
        effect.set_allow_recurse(true);
        assert!(effect.allow_recurse());
        *holder.borrow_mut() = Some(effect.clone());

        effect.run();
        assert_eq!(seen.get(), 3);
        holder.borrow_mut().take();
    }

    #[test]
    fn stop_unsubscribes_and_is_idempotent() {
        let dep = source();
        let (stops, seen) = counter();
        let reader = dep.clone();
        let effect = ReactiveEffect::new(move || read(&reader), || {}, None);
        effect.set_on_stop(move || stops.set(stops.get() + 1));
        effect.run();
        assert_eq!(dep.len(), 1);

        effect.stop();
        assert!(!effect.is_active());
        assert!(dep.is_empty());
        assert_eq!(effect.dep_count(), 0);
        assert_eq!(seen.get(), 1);

        effect.stop();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn stopped_effect_runs_without_tracking() {
        let dep = source();
        let (runs, seen) = counter();
        let reader = dep.clone();
        let effect = ReactiveEffect::new(
            move || {
                runs.set(runs.get() + 1);
                assert!(current_subscriber().is_none());
                read(&reader);
            },
            || {},
            None,
        );
        effect.stop();

        effect.run();
        assert_eq!(seen.get(), 1);
        assert!(dep.is_empty());
    }

    #[test]
    fn nested_runs_restore_outer_attribution() {
        let outer_dep = source();
        let inner_dep = source();
        let late_dep = source();

        let inner_reader = inner_dep.clone();
        let inner = ReactiveEffect::new(move || read(&inner_reader), || {}, None);

        let (outer_reader, late_reader, nested) = (outer_dep.clone(), late_dep.clone(), inner.clone());
        let outer = ReactiveEffect::new(
            move || {
                read(&outer_reader);
                nested.run();
                read(&late_reader);
            },
            || {},
            None,
        );
        outer.run();

        assert!(outer_dep.get(outer.id()).is_some());
        assert!(late_dep.get(outer.id()).is_some());
        assert!(inner_dep.get(outer.id()).is_none());
        assert!(inner_dep.get(inner.id()).is_some());
        assert!(current_subscriber().is_none());
    }

    #[test]
    fn panicking_run_still_prunes_and_restores() {
        let a = source();
        let b = source();
        let fail = Rc::new(Cell::new(false));

        let (a2, b2, fail2) = (a.clone(), b.clone(), Rc::clone(&fail));
        let effect = ReactiveEffect::new(
            move || {
                read(&a2);
                if fail2.get() {
                    panic!("effect failed");
                }
                read(&b2);
            },
            || {},
            None,
        );
        effect.run();
        assert_eq!(effect.dep_count(), 2);

        fail.set(true);
        let result = catch_unwind(AssertUnwindSafe(|| effect.run()));
        assert!(result.is_err());

        assert!(current_subscriber().is_none());
        assert!(!effect.is_running());
        assert_eq!(effect.dep_count(), 1);
        assert!(b.is_empty());
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn dropping_effect_unsubscribes() {
        let cleaned = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cleaned);
        let dep = Dep::new(move || flag.set(true));

        let reader = dep.clone();
        let effect = ReactiveEffect::new(move || read(&reader), || {}, None);
        effect.run();
        assert_eq!(dep.len(), 1);

        drop(effect);
        assert!(dep.is_empty());
        assert!(cleaned.get());
    }

    #[test]
    fn maybe_dirty_without_computed_deps_resolves_clean() {
        let dep = source();
        let reader = dep.clone();
        let effect = ReactiveEffect::new(move || read(&reader), || {}, None);
        effect.run();

        trigger_effects(&dep, DirtyLevel::MaybeDirty);
        assert_eq!(effect.dirty_level(), DirtyLevel::MaybeDirty);
        assert!(!effect.dirty());
        assert_eq!(effect.dirty_level(), DirtyLevel::NotDirty);
    }

    #[test]
    fn set_dirty_forces_level() {
        let effect = ReactiveEffect::new(|| 1, || {}, None);
        effect.run();
        effect.set_dirty(true);
        assert!(effect.dirty());
        effect.set_dirty(false);
        assert!(!effect.dirty());
    }

    #[test]
    fn runner_runs_immediately_unless_lazy() {
        let (runs, seen) = counter();
        let eager = effect(move || runs.set(runs.get() + 1), EffectOptions::new());
        assert_eq!(seen.get(), 1);
        eager.run();
        assert_eq!(seen.get(), 2);

        let (runs, seen) = counter();
        let lazy = effect(move || runs.set(runs.get() + 1), EffectOptions::new().lazy(true));
        assert_eq!(seen.get(), 0);
        lazy.run();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn runner_reruns_on_trigger() {
        let dep = source();
        let (runs, seen) = counter();
        let reader = dep.clone();
        let _runner = effect(
            move || {
                runs.set(runs.get() + 1);
                read(&reader);
            },
            EffectOptions::new(),
        );

        write(&dep);
        assert_eq!(seen.get(), 2);
        write(&dep);
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn runner_custom_scheduler_replaces_rerun() {
        let dep = source();
        let (runs, run_count) = counter();
        let (schedules, schedule_count) = counter();
        let reader = dep.clone();
        let runner = effect(
            move || {
                runs.set(runs.get() + 1);
                read(&reader);
            },
            EffectOptions::new().scheduler(move || schedules.set(schedules.get() + 1)),
        );

        write(&dep);
        assert_eq!(run_count.get(), 1);
        assert_eq!(schedule_count.get(), 1);
        assert!(runner.effect().dirty());
    }

    #[test]
    fn stop_runner_fires_on_stop_once() {
        let dep = source();
        let (stops, seen) = counter();
        let reader = dep.clone();
        let runner = effect(
            move || read(&reader),
            EffectOptions::new().on_stop(move || stops.set(stops.get() + 1)),
        );

        stop(&runner);
        stop(&runner);
        assert_eq!(seen.get(), 1);
        assert!(dep.is_empty());
    }

    #[test]
    fn runner_stopped_mid_batch_does_not_rerun() {
        let dep = source();
        let (runs, seen) = counter();
        let reader = dep.clone();
        let runner = effect(
            move || {
                runs.set(runs.get() + 1);
                read(&reader);
            },
            EffectOptions::new(),
        );

        batch(|| {
            write(&dep);
            stop(&runner);
        });
        assert_eq!(seen.get(), 1);
    }
}
