//! Change detection shared by refs and computeds.

/// Returns `true` when `value` should be treated as a change from `old`.
///
/// This is plain inequality, except that two self-unequal values (such as
/// two `f64::NAN`s) count as the same value. Without that exception a ref
/// holding NaN would notify its subscribers on every write.
#[allow(clippy::eq_op)]
pub fn has_changed<T: PartialEq + ?Sized>(value: &T, old: &T) -> bool {
    value != old && (value == value || old == old)
}
