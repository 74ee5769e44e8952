//! Error types.
//!
//! The engine itself never fails: panics raised by user functions propagate
//! unchanged. The errors here cover re-entrant access that Rust's borrow
//! rules cannot allow.

use thiserror::Error;

/// Errors reported by fallible reactive accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed read itself before producing its first value.
    #[error("computed value read re-entrantly before its first evaluation finished")]
    CyclicComputed,

    /// A ref was written while its value was borrowed by `Ref::with`.
    #[error("ref value written while it is borrowed")]
    ValueBorrowed,
}

/// Result alias for reactive operations.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
