//! Ready-made allocation failure handlers.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::backoff::BackoffPolicy;
use super::chain::{handler, Handler, HandlerOutcome};

/// A handler that always gives up.
///
/// Installing it over an outer handler makes allocations in that scope fail
/// fast instead of escalating.
pub fn give_up() -> Handler {
    handler(|| HandlerOutcome::GiveUp)
}

/// A handler that aborts the process.
pub fn terminate() -> Handler {
    handler(|| HandlerOutcome::Terminate)
}

/// A handler that calls `free` and retries if it reports freeing anything.
///
/// # Examples
///
/// ```rust
/// use holdfast::retry::{handlers, RetryChain};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let cache = Arc::new(AtomicUsize::new(3));
/// let chain = RetryChain::new();
///
/// let c = cache.clone();
/// chain.install(handlers::free_capacity(move || {
///     c.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
///         .is_ok()
/// }));
///
/// // Every eviction is followed by a failing retry, until nothing is left.
/// let err = chain.allocate::<u8, _>(|| None).unwrap_err();
/// assert_eq!(err.attempts, 4);
/// assert_eq!(cache.load(Ordering::SeqCst), 0);
/// ```
pub fn free_capacity<F>(free: F) -> Handler
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    handler(move || {
        if free() {
            HandlerOutcome::Retry
        } else {
            HandlerOutcome::GiveUp
        }
    })
}

/// A handler that sleeps according to `policy` and retries, giving up once
/// the policy's retry bound is reached.
///
/// The invocation count is shared by every allocation that reaches this
/// handler, so the bound limits the handler's lifetime, not a single
/// allocation. Install a fresh handler (or use a scoped guard) per burst.
///
/// Returns an error if the policy has no retry bound.
pub fn backoff(policy: BackoffPolicy) -> Result<Handler, &'static str> {
    policy.validate()?;
    let invocations = AtomicU32::new(0);
    Ok(handler(move || {
        let attempt = invocations.fetch_add(1, Ordering::SeqCst);
        match policy.jittered_delay(attempt) {
            Some(delay) => {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                HandlerOutcome::Retry
            }
            None => HandlerOutcome::GiveUp,
        }
    }))
}

/// Memory set aside up front and surrendered on the first allocation
/// failure.
///
/// The classic out-of-memory strategy: hold a reserve while things are
/// healthy, then drop it so the failing allocation (and any cleanup after
/// it) has room to succeed.
///
/// # Examples
///
/// ```rust
/// use holdfast::retry::{handlers::EmergencyReserve, RetryChain};
///
/// let reserve = EmergencyReserve::bytes(4096);
/// let chain = RetryChain::new();
/// let _guard = chain.scoped(reserve.handler());
///
/// assert!(!reserve.is_spent());
/// let _ = chain.allocate::<u8, _>(|| None);
/// assert!(reserve.is_spent());
/// ```
pub struct EmergencyReserve<T> {
    held: Arc<Mutex<Option<T>>>,
}

impl<T: Send + 'static> EmergencyReserve<T> {
    /// Hold `reserve` until the first allocation failure.
    pub fn new(reserve: T) -> Self {
        Self {
            held: Arc::new(Mutex::new(Some(reserve))),
        }
    }

    /// True once the reserve has been surrendered.
    pub fn is_spent(&self) -> bool {
        self.held.lock().is_none()
    }

    /// A handler that drops the reserve and retries, then gives up on every
    /// later failure.
    pub fn handler(&self) -> Handler {
        let held = Arc::clone(&self.held);
        handler(move || {
            // Drop outside the lock.
            let reserve = held.lock().take();
            match reserve {
                Some(reserve) => {
                    drop(reserve);
                    HandlerOutcome::Retry
                }
                None => HandlerOutcome::GiveUp,
            }
        })
    }
}

impl EmergencyReserve<Vec<u8>> {
    /// Reserve `n` bytes of heap.
    pub fn bytes(n: usize) -> Self {
        Self::new(vec![0u8; n])
    }
}

impl<T> fmt::Debug for EmergencyReserve<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmergencyReserve")
            .field("spent", &self.held.lock().is_none())
            .finish()
    }
}
