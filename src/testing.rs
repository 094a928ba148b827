//! Testing utilities for code that manages resources.
//!
//! This module provides a release-function spy, a capacity pool for driving
//! allocation failures on demand, and assertion macros.
//!
//! # Examples
//!
//! ## ReleaseCounter
//!
//! ```rust
//! use holdfast::testing::ReleaseCounter;
//! use holdfast::{assert_released, OwnedResource};
//!
//! let counter = ReleaseCounter::new();
//! {
//!     let _fd: OwnedResource<i32> = OwnedResource::from_raw(3, counter.release_fn());
//! }
//! assert_released!(counter, 3, 1);
//! ```
//!
//! ## CapacityPool
//!
//! ```rust
//! use holdfast::testing::CapacityPool;
//!
//! let pool = CapacityPool::new(1);
//! let slot = pool.try_take().unwrap();
//! assert!(pool.try_take().is_none());
//! drop(slot);
//! assert_eq!(pool.available(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Records every value passed to the release functions it hands out.
///
/// Values are keyed by their `Debug` rendering, so any resource type can be
/// counted without extra bounds.
#[derive(Debug, Clone, Default)]
pub struct ReleaseCounter {
    released: Arc<Mutex<HashMap<String, usize>>>,
}

impl ReleaseCounter {
    /// Create a counter with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// A release function that records its argument and then drops it.
    pub fn release_fn<R: fmt::Debug + 'static>(&self) -> impl Fn(R) + Send + Sync + 'static {
        let released = Arc::clone(&self.released);
        move |resource: R| {
            *released.lock().entry(format!("{:?}", resource)).or_insert(0) += 1;
        }
    }

    /// Total number of releases recorded.
    pub fn total(&self) -> usize {
        self.released.lock().values().sum()
    }

    /// Number of times `value` was released.
    pub fn count_of<R: fmt::Debug + ?Sized>(&self, value: &R) -> usize {
        self.released
            .lock()
            .get(&format!("{:?}", value))
            .copied()
            .unwrap_or(0)
    }
}

/// A fixed pool of capacity units that can run dry.
///
/// [`try_take`](Self::try_take) is a fallible allocation primitive for the
/// retry chain; [`grow`](Self::grow) is what a handler calls to make room.
#[derive(Debug, Clone)]
pub struct CapacityPool {
    available: Arc<AtomicUsize>,
}

impl CapacityPool {
    /// Create a pool with `capacity` free units.
    pub fn new(capacity: usize) -> Self {
        Self {
            available: Arc::new(AtomicUsize::new(capacity)),
        }
    }

    /// Take one unit, or `None` if the pool is empty.
    pub fn try_take(&self) -> Option<PoolSlot> {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|_| PoolSlot {
                available: Arc::clone(&self.available),
            })
    }

    /// Free units right now.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Add `n` free units.
    pub fn grow(&self, n: usize) {
        self.available.fetch_add(n, Ordering::AcqRel);
    }
}

#[cfg(test)]
impl CapacityPool {
    /// A system allocation primitive that spends one unit per success and
    /// fails while the pool is empty.
    pub(crate) fn gated_alloc(
        &self,
    ) -> impl FnMut(std::alloc::Layout) -> Option<std::ptr::NonNull<u8>> + '_ {
        move |layout| {
            let unit = self.try_take()?;
            std::mem::forget(unit);
            crate::shared::system_alloc(layout)
        }
    }
}

/// One unit taken from a [`CapacityPool`]. Returned to the pool on drop.
#[derive(Debug)]
pub struct PoolSlot {
    available: Arc<AtomicUsize>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.available.fetch_add(1, Ordering::AcqRel);
    }
}

/// Assert that a [`ReleaseCounter`] saw `value` released exactly `times`.
///
/// # Example
///
/// ```rust
/// use holdfast::testing::ReleaseCounter;
/// use holdfast::{assert_released, SharedResource};
///
/// let counter = ReleaseCounter::new();
/// let conn = SharedResource::from_raw(7u32, counter.release_fn()).unwrap();
/// let copy = conn.clone();
/// drop(conn);
/// assert_released!(counter, 7u32, 0);
/// drop(copy);
/// assert_released!(counter, 7u32, 1);
/// ```
#[macro_export]
macro_rules! assert_released {
    ($counter:expr, $value:expr, $times:expr) => {{
        let actual = $counter.count_of(&$value);
        if actual != $times {
            panic!(
                "Expected {:?} to be released {} time(s), got {}",
                $value, $times, actual
            );
        }
    }};
}

/// Assert that a wrapper holds no resource.
///
/// # Example
///
/// ```rust
/// use holdfast::{assert_empty, OwnedResource};
///
/// let mut fd: OwnedResource<i32> = OwnedResource::from_raw(3, |_: i32| {});
/// fd.reset();
/// assert_empty!(fd);
/// ```
#[macro_export]
macro_rules! assert_empty {
    ($wrapper:expr) => {
        if !$crate::ResourceWrapper::is_empty(&$wrapper) {
            panic!("Expected empty wrapper, got one holding a resource");
        }
    };
}

#[cfg(feature = "proptest")]
use proptest::prelude::*;

#[cfg(feature = "proptest")]
impl Arbitrary for crate::config::ReleaseFailurePolicy {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        use crate::config::ReleaseFailurePolicy;
        prop_oneof![Just(ReleaseFailurePolicy::Log), Just(ReleaseFailurePolicy::Abort)].boxed()
    }
}

/// Bounded policies only: every generated policy passes `validate`.
#[cfg(feature = "proptest")]
impl Arbitrary for crate::retry::BackoffPolicy {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        use crate::retry::BackoffPolicy;
        use std::time::Duration;

        (0u8..3, 0u64..100, 0u32..16, proptest::option::of(1u64..500))
            .prop_map(|(kind, base, retries, cap)| {
                let base = Duration::from_millis(base);
                let policy = match kind {
                    0 => BackoffPolicy::constant(base),
                    1 => BackoffPolicy::linear(base),
                    _ => BackoffPolicy::exponential(base),
                }
                .with_max_retries(retries);
                match cap {
                    Some(ms) => policy.with_max_delay(Duration::from_millis(ms)),
                    None => policy,
                }
            })
            .boxed()
    }
}
