//! The release contract shared by every wrapper.
//!
//! A [`Releaser`] binds a caller-supplied release function to a resource type.
//! Running it never fails from the caller's point of view: returned errors and
//! panics are turned into a [`ReleaseFailure`] and handed to the configured
//! policy.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::diagnostics;
use crate::error::ReleaseFailure;

/// Return types a release function may use.
///
/// Implemented for `()` (infallible release) and `Result<(), E>` where the
/// error is displayable.
pub trait ReleaseOutcome {
    /// Convert into a plain result whose error is a description of the failure.
    fn into_outcome(self) -> Result<(), String>;
}

impl ReleaseOutcome for () {
    fn into_outcome(self) -> Result<(), String> {
        Ok(())
    }
}

impl<E: fmt::Display> ReleaseOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), String> {
        self.map_err(|e| e.to_string())
    }
}

type ReleaseFn<R> = dyn Fn(R) -> Result<(), String> + Send + Sync;

/// A bound release function.
///
/// Cloning a `Releaser` shares the function, which lets deep copies and
/// ownership conversions keep releasing through the same code path.
///
/// # Examples
///
/// ```rust
/// use holdfast::release::Releaser;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let closed = Arc::new(AtomicU32::new(0));
/// let c = closed.clone();
/// let releaser = Releaser::new(move |_fd: i32| {
///     c.fetch_add(1, Ordering::SeqCst);
/// });
///
/// releaser.run(3);
/// assert_eq!(closed.load(Ordering::SeqCst), 1);
/// ```
pub struct Releaser<R> {
    f: Arc<ReleaseFn<R>>,
}

impl<R> Releaser<R> {
    /// Bind a release function.
    pub fn new<F, O>(f: F) -> Self
    where
        R: 'static,
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        Self {
            f: Arc::new(move |r| f(r).into_outcome()),
        }
    }

    /// A releaser that simply drops the resource.
    pub fn drop_only() -> Self
    where
        R: 'static,
    {
        Self::new(drop::<R>)
    }

    /// Release `resource`. Failures go to the configured policy.
    pub fn run(&self, resource: R) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.f)(resource)));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(reason)) => ReleaseFailure::returned(std::any::type_name::<R>(), reason),
            Err(payload) => ReleaseFailure::panicked(std::any::type_name::<R>(), payload.as_ref()),
        };
        diagnostics::release_failed(failure);
    }

    /// Returns true if both releasers share the same function.
    pub fn same_fn(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl<R> Clone for Releaser<R> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<R> fmt::Debug for Releaser<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Releaser")
            .field("resource", &std::any::type_name::<R>())
            .field("f", &"<function>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn infallible_release_runs_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let releaser = Releaser::new(move |_: u8| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        releaser.run(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_release_is_swallowed() {
        let before = diagnostics::swallowed_release_failures();
        let releaser = Releaser::new(|_: u8| Err::<(), _>("device busy"));
        releaser.run(1);
        assert!(diagnostics::swallowed_release_failures() > before);
    }

    #[test]
    fn panicking_release_is_swallowed() {
        let before = diagnostics::swallowed_release_failures();
        let releaser = Releaser::new(|_: u8| -> () { panic!("close failed") });
        releaser.run(1);
        assert!(diagnostics::swallowed_release_failures() > before);
    }

    #[test]
    fn clones_share_function() {
        let a = Releaser::<u8>::drop_only();
        let b = a.clone();
        let c = Releaser::<u8>::drop_only();
        assert!(a.same_fn(&b));
        assert!(!a.same_fn(&c));
    }

    #[test]
    fn debug_hides_function() {
        let releaser = Releaser::<u8>::drop_only();
        let debug = format!("{:?}", releaser);
        assert!(debug.contains("Releaser"));
        assert!(debug.contains("<function>"));
    }
}
