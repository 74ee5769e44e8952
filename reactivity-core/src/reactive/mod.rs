//! Reactive Primitives
//!
//! This module implements the core reactive system: refs, computeds, and
//! effects, plus the registry that lets container wrappers take part in
//! dependency tracking.
//!
//! # Concepts
//!
//! ## Refs
//!
//! A [`Ref`] is a container for one mutable value. Reading it inside a running
//! effect registers that effect as a dependent. Writing a different value
//! marks every dependent dirty and schedules it.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changed, and only when read. When it
//! recomputes to an equal value, its own dependents are left alone.
//!
//! ## Effects
//!
//! A [`ReactiveEffect`] wraps a function and records everything it reads on
//! each run. The [`effect`] helper builds one that re-runs itself whenever
//! its dependencies change.
//!
//! ## Deps and the Registry
//!
//! A [`Dep`] is the subscriber set of one observable location. Refs and
//! computeds own theirs directly; containers observed through [`track`] and
//! [`trigger`] get one per target and key from the registry.
//!
//! # Implementation Notes
//!
//! The reactive system is single-threaded. The running effect, the tracking
//! flag stack, and the scheduler queue live in thread-local state. Deps hold
//! their subscribers weakly and effects hold their deps strongly, so dropping
//! the last handle to an effect is enough to unsubscribe it everywhere.
//!
//! Staleness is tracked with dirty levels rather than a plain flag. Writes to
//! a ref make direct dependents `Dirty`; a computed that may have changed
//! makes its dependents `MaybeDirty`, which is resolved lazily by asking the
//! computed to refresh before deciding whether to re-run.

mod changed;
mod computed;
mod context;
mod dep;
mod effect;
mod refs;
mod registry;
mod subscriber;

pub use changed::has_changed;
pub use computed::{computed, computed_with_setter, Computed, WritableComputed};
pub use context::{
    batch, current_subscriber, enable_tracking, is_batching, is_tracking, pause_scheduling,
    pause_tracking, pending_schedulers, reset_scheduling, reset_tracking, should_track,
    untracked, SchedulingGuard, TrackingGuard,
};
pub use dep::Dep;
pub use effect::{
    effect, stop, DirtyLevel, EffectOptions, EffectRunner, EffectScheduler, ReactiveEffect,
    WeakEffect,
};
pub use refs::{trigger_ref, MaybeRef, Ref};
pub use registry::{
    dep_for, track, tracked_keys, trigger, Target, TargetId, TargetKind, TrackKey, TrackOp,
    TriggerOp,
};
pub use subscriber::{DepId, SubscriberId};
