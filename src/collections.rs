//! Set type alias that switches between gxhash and std collections
//! based on feature flags. This allows building on systems without specific
//! CPU intrinsics (AES-NI, SSE2) while providing better performance for the
//! large path sets built during verification.

#[cfg(feature = "gxhash")]
pub use gxhash::{HashSet as GxHashSet, HashSetExt};

#[cfg(not(feature = "gxhash"))]
use std::collections::HashSet as StdHashSet;

/// Type alias for HashSet that uses gxhash when available, std otherwise
#[cfg(feature = "gxhash")]
pub type HashSet<T> = GxHashSet<T>;

/// Type alias for HashSet that uses gxhash when available, std otherwise
#[cfg(not(feature = "gxhash"))]
pub type HashSet<T> = StdHashSet<T>;

/// Extension trait for creating HashSet instances
#[cfg(not(feature = "gxhash"))]
pub trait HashSetExt {
    /// Creates a new HashSet with default capacity
    fn new() -> Self;

    /// Creates a new HashSet with specified capacity
    fn with_capacity(capacity: usize) -> Self;
}

#[cfg(not(feature = "gxhash"))]
impl<T> HashSetExt for StdHashSet<T> {
    fn new() -> Self {
        StdHashSet::new()
    }

    fn with_capacity(capacity: usize) -> Self {
        StdHashSet::with_capacity(capacity)
    }
}
