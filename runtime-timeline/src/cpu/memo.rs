//! Values that are computed on first use and never invalidated

use std::cell::OnceCell;

/// Derived value which is computed at most once
///
/// The value is frozen after the first computation. This is only correct if
/// whatever it is derived from is not modified afterwards, which is the case
/// for a CPU profile once its construction is over.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Memoized<T>(OnceCell<T>);
//
impl<T> Memoized<T> {
    /// Start in the uncomputed state
    pub fn new() -> Self {
        Self(OnceCell::new())
    }

    /// Value, computing it if this has not been done yet
    pub fn get_or_compute(&self, compute: impl FnOnce() -> T) -> &T {
        self.0.get_or_init(compute)
    }

    /// Value, if it was computed already
    pub fn get(&self) -> Option<&T> {
        self.0.get()
    }

    /// Truth that the value was computed already
    pub fn is_computed(&self) -> bool {
        self.0.get().is_some()
    }

    /// Record a value computed by other means, if none was recorded yet
    ///
    /// Returns false if a value was already there, in which case it is kept.
    pub fn set(&self, value: T) -> bool {
        self.0.set(value).is_ok()
    }
}
