//! Reactive Context
//!
//! The reactive context holds the engine's per-thread state: which effect is
//! currently running, whether reads should be tracked at all, and the
//! scheduling pause counter with its queue of pending schedulers.
//!
//! # Tracking
//!
//! `should_track` is a flag with a stack of saved values behind it.
//! [`pause_tracking`] and [`enable_tracking`] push the current value and
//! overwrite it; [`reset_tracking`] pops. Mutation code uses this to perform
//! internal reads that must not become dependencies.
//!
//! # Scheduling
//!
//! [`pause_scheduling`] increments a counter. While the counter is non-zero,
//! triggered schedulers are only queued. [`reset_scheduling`] decrements it
//! and, once it reaches zero, drains the queue in FIFO order. A scheduler that
//! queues more work during the drain is processed in the same flush.
//!
//! # Nesting
//!
//! Running an effect enters a [`ReactiveContext`], which saves the previous
//! active effect and tracking flag and restores them when dropped. Nested
//! runs therefore attribute reads to the innermost effect and hand
//! attribution back to the outer effect afterwards, even if the inner run
//! panics.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::effect::{EffectCore, EffectScheduler};
use super::SubscriberId;

struct ReactiveState {
    should_track: Cell<bool>,
    track_stack: RefCell<Vec<bool>>,
    active_effect: RefCell<Option<Rc<EffectCore>>>,
    pause_schedule: Cell<usize>,
    queue: RefCell<VecDeque<EffectScheduler>>,
}

impl ReactiveState {
    fn new() -> Self {
        Self {
            should_track: Cell::new(true),
            track_stack: RefCell::new(Vec::new()),
            active_effect: RefCell::new(None),
            pause_schedule: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
        }
    }
}

thread_local! {
    static STATE: ReactiveState = ReactiveState::new();
}

/// Whether reads are currently allowed to register dependencies.
pub fn should_track() -> bool {
    STATE.with(|state| state.should_track.get())
}

/// Whether a read right now would be recorded: tracking is enabled and an
/// effect is running.
pub fn is_tracking() -> bool {
    STATE.with(|state| state.should_track.get() && state.active_effect.borrow().is_some())
}

/// The subscriber ID of the running effect, if any.
pub fn current_subscriber() -> Option<SubscriberId> {
    STATE.with(|state| state.active_effect.borrow().as_ref().map(|effect| effect.id()))
}

/// The effect a tracked read should be attributed to, if any.
pub(crate) fn tracking_effect() -> Option<Rc<EffectCore>> {
    STATE.with(|state| {
        if state.should_track.get() {
            state.active_effect.borrow().clone()
        } else {
            None
        }
    })
}

/// Temporarily pauses tracking.
pub fn pause_tracking() {
    STATE.with(|state| {
        state.track_stack.borrow_mut().push(state.should_track.get());
        state.should_track.set(false);
    });
}

/// Re-enables tracking (if it was paused).
pub fn enable_tracking() {
    STATE.with(|state| {
        state.track_stack.borrow_mut().push(state.should_track.get());
        state.should_track.set(true);
    });
}

/// Restores the tracking state saved by the last [`pause_tracking`] or
/// [`enable_tracking`]. With nothing saved, tracking is enabled.
pub fn reset_tracking() {
    STATE.with(|state| {
        let last = state.track_stack.borrow_mut().pop();
        state.should_track.set(last.unwrap_or(true));
    });
}

/// Defers scheduler execution until the matching [`reset_scheduling`].
pub fn pause_scheduling() {
    STATE.with(|state| state.pause_schedule.set(state.pause_schedule.get() + 1));
}

/// Ends one level of scheduling pause, flushing queued schedulers once no
/// pause remains.
pub fn reset_scheduling() {
    if release_scheduling() == 0 {
        flush_schedulers();
    }
}

/// Number of schedulers waiting for the current pause to end.
pub fn pending_schedulers() -> usize {
    STATE.with(|state| state.queue.borrow().len())
}

/// Whether scheduling is currently paused.
pub fn is_batching() -> bool {
    STATE.with(|state| state.pause_schedule.get() > 0)
}

pub(crate) fn queue_scheduler(scheduler: EffectScheduler) {
    STATE.with(|state| state.queue.borrow_mut().push_back(scheduler));
}

fn release_scheduling() -> usize {
    STATE.with(|state| {
        let current = state.pause_schedule.get();
        if current == 0 {
            tracing::warn!("reset_scheduling called without a matching pause_scheduling");
        }
        let remaining = current.saturating_sub(1);
        state.pause_schedule.set(remaining);
        remaining
    })
}

fn flush_schedulers() {
    let mut flushed = 0usize;
    loop {
        // The queue borrow must end before the scheduler runs, since the
        // scheduler may trigger and queue more work.
        let next = STATE.with(|state| {
            if state.pause_schedule.get() == 0 {
                state.queue.borrow_mut().pop_front()
            } else {
                None
            }
        });
        match next {
            Some(scheduler) => {
                scheduler();
                flushed += 1;
            }
            None => break,
        }
    }
    if flushed > 0 {
        tracing::trace!(flushed, "flushed effect schedulers");
    }
}

/// Runs `f` with tracking paused.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = TrackingGuard::pause();
    f()
}

/// Runs `f` with scheduling paused, so every scheduler triggered inside runs
/// once, after `f` returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _guard = SchedulingGuard::new();
    f()
}

/// Guard that restores the previous tracking state when dropped.
#[must_use = "tracking is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct TrackingGuard {
    _private: (),
}

impl TrackingGuard {
    /// Pause tracking until the guard is dropped.
    pub fn pause() -> Self {
        pause_tracking();
        Self { _private: () }
    }

    /// Enable tracking until the guard is dropped.
    pub fn enable() -> Self {
        enable_tracking();
        Self { _private: () }
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Guard that pauses scheduling and flushes when dropped.
///
/// When dropped during a panic, the pause is released but the queue is left
/// for the next flush instead of running user schedulers mid-unwind.
#[must_use = "scheduling resumes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SchedulingGuard {
    _private: (),
}

impl SchedulingGuard {
    /// Pause scheduling until the guard is dropped.
    pub fn new() -> Self {
        pause_scheduling();
        Self { _private: () }
    }
}

impl Default for SchedulingGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SchedulingGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            release_scheduling();
        } else {
            reset_scheduling();
        }
    }
}

/// Scope during which an effect is the active effect.
///
/// Entering saves the previous active effect and tracking flag, then marks
/// `effect` active with tracking enabled. Dropping restores both.
pub(crate) struct ReactiveContext {
    subscriber_id: SubscriberId,
    last_effect: Option<Rc<EffectCore>>,
    last_should_track: bool,
}

impl ReactiveContext {
    pub(crate) fn enter(effect: &Rc<EffectCore>) -> Self {
        STATE.with(|state| {
            let last_should_track = state.should_track.replace(true);
            let last_effect = state.active_effect.replace(Some(Rc::clone(effect)));
            Self {
                subscriber_id: effect.id(),
                last_effect,
                last_should_track,
            }
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        STATE.with(|state| {
            let popped = state.active_effect.replace(self.last_effect.take());

            // Verify we're popping the right context.
            debug_assert_eq!(
                popped.as_ref().map(|effect| effect.id()),
                Some(self.subscriber_id),
                "ReactiveContext mismatch"
            );
            state.should_track.set(self.last_should_track);
        });
    }
}
