//! Reactivity Core
//!
//! This crate provides a fine-grained reactivity engine. It implements:
//!
//! - Reactive primitives (refs, computeds, effects)
//! - Dirty-level propagation with lazy computed refresh
//! - Batched scheduling of effect re-runs
//! - A track/trigger registry for observed containers
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: Reactive primitives, dependency tracking, and scheduling
//! - `error`: Errors reported by the fallible accessors
//!
//! # Example
//!
//! ```rust
//! use reactivity_core::reactive::{computed, effect, EffectOptions, Ref};
//!
//! // Create a ref
//! let count = Ref::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     computed(move |_| count.get() * 2)
//! };
//!
//! // Create an effect
//! let seen = Ref::new(0);
//! let _runner = {
//!     let (doubled, seen) = (doubled.clone(), seen.clone());
//!     effect(move || seen.set(doubled.get()), EffectOptions::new())
//! };
//!
//! // Update the ref
//! count.set(5);
//! assert_eq!(seen.get_untracked(), 10);
//! ```

pub mod error;
pub mod reactive;

pub use error::{ReactiveError, Result};
