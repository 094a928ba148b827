//! Reference-counted shared ownership.
//!
//! A [`SharedResource`] points at a heap control block holding the resource,
//! its release function and an atomic reference count. Cloning increments the
//! count; dropping decrements it, and the drop that observes the transition to
//! zero runs the release function exactly once and frees the block.
//!
//! The control block is allocated through a [`RetryChain`], so installed
//! allocation handlers get a chance to free capacity when the system
//! allocator fails.
//!
//! # Example
//!
//! ```rust
//! use holdfast::SharedResource;
//!
//! let conn = SharedResource::acquire(
//!     || Ok::<_, std::io::Error>("db-conn-1".to_string()),
//!     |conn: String| println!("closing {}", conn),
//! )
//! .unwrap();
//!
//! let other = conn.clone();
//! assert_eq!(conn.use_count(), 2);
//! drop(other);
//! assert_eq!(conn.use_count(), 1);
//! ```

use std::alloc::{dealloc, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize, Ordering};

use crate::error::{AcquisitionError, OutOfResourceError, ResourceError};
use crate::owned::OwnedResource;
use crate::policy::{Duplicate, RefCounted, ResourceWrapper};
use crate::release::{ReleaseOutcome, Releaser};
use crate::retry::{self, RetryChain};

/// Counts above this abort the process rather than risk overflow.
const MAX_COUNT: usize = isize::MAX as usize;

struct ControlBlock<R> {
    count: AtomicUsize,
    resource: ManuallyDrop<R>,
    release: ManuallyDrop<Releaser<R>>,
}

impl<R> ControlBlock<R> {
    fn layout() -> Layout {
        Layout::new::<Self>()
    }
}

/// Uninitialized control block memory.
///
/// Freed on drop unless [`fill`](BlockSlot::fill) turned it into a
/// [`SharedResource`].
pub(crate) struct BlockSlot<R> {
    ptr: NonNull<ControlBlock<R>>,
}

/// The system allocator as a block allocation primitive.
pub(crate) fn system_alloc(layout: Layout) -> Option<NonNull<u8>> {
    if layout.size() == 0 {
        return None;
    }
    // SAFETY: the layout has non-zero size.
    NonNull::new(unsafe { std::alloc::alloc(layout) })
}

impl<R: 'static> BlockSlot<R> {
    /// Allocate control block memory with `alloc`, consulting `chain` on
    /// failure.
    ///
    /// Handlers registered for the resource type `R` take precedence over
    /// global handlers. Memory returned by `alloc` is freed with the global
    /// allocator, so the primitive must allocate from it.
    pub(crate) fn reserve_with<M>(
        chain: &RetryChain,
        mut alloc: M,
    ) -> Result<Self, OutOfResourceError>
    where
        M: FnMut(Layout) -> Option<NonNull<u8>>,
    {
        let layout = ControlBlock::<R>::layout();
        let ptr = chain.allocate_keyed::<R, _, _>(|| alloc(layout))?;
        Ok(Self { ptr: ptr.cast() })
    }
}

impl<R> BlockSlot<R> {
    pub(crate) fn fill(self, resource: R, release: Releaser<R>) -> SharedResource<R> {
        let ptr = self.ptr;
        std::mem::forget(self);
        // SAFETY: ptr is a live, uninitialized allocation with ControlBlock's layout.
        unsafe {
            ptr.as_ptr().write(ControlBlock {
                count: AtomicUsize::new(1),
                resource: ManuallyDrop::new(resource),
                release: ManuallyDrop::new(release),
            });
        }
        SharedResource {
            block: ptr,
            _owns: PhantomData,
        }
    }
}

impl<R> Drop for BlockSlot<R> {
    fn drop(&mut self) {
        // SAFETY: allocated in `reserve_with` with this layout and never initialized.
        unsafe { dealloc(self.ptr.as_ptr().cast(), ControlBlock::<R>::layout()) }
    }
}

/// A reference-counted resource shared between owners.
///
/// The release function is bound per instance, so one `SharedResource<R>`
/// type can manage resources that come from different sources and must be
/// returned differently.
pub struct SharedResource<R> {
    block: NonNull<ControlBlock<R>>,
    _owns: PhantomData<ControlBlock<R>>,
}

// SAFETY: the count is atomic; the resource is only reachable through `&R`
// while shared, and is moved out only by the last owner.
unsafe impl<R: Send + Sync> Send for SharedResource<R> {}
// SAFETY: see above.
unsafe impl<R: Send + Sync> Sync for SharedResource<R> {}

impl<R: 'static> SharedResource<R> {
    /// Acquire a resource into a new control block with count 1.
    ///
    /// The block is allocated through the global chain before `acquire` runs,
    /// so an allocation failure never strands an acquired resource.
    pub fn acquire<A, E, F, O>(acquire: A, release: F) -> Result<Self, ResourceError>
    where
        A: FnOnce() -> Result<R, E>,
        E: Into<AcquisitionError>,
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        Self::acquire_in(retry::global(), acquire, release)
    }

    /// Like [`acquire`](Self::acquire), allocating through `chain`.
    pub fn acquire_in<A, E, F, O>(
        chain: &RetryChain,
        acquire: A,
        release: F,
    ) -> Result<Self, ResourceError>
    where
        A: FnOnce() -> Result<R, E>,
        E: Into<AcquisitionError>,
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        Self::acquire_with(chain, system_alloc, acquire, release)
    }

    pub(crate) fn acquire_with<M, A, E, F, O>(
        chain: &RetryChain,
        alloc: M,
        acquire: A,
        release: F,
    ) -> Result<Self, ResourceError>
    where
        M: FnMut(Layout) -> Option<NonNull<u8>>,
        A: FnOnce() -> Result<R, E>,
        E: Into<AcquisitionError>,
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        let slot = BlockSlot::<R>::reserve_with(chain, alloc)?;
        let resource = acquire().map_err(Into::into)?;
        Ok(slot.fill(resource, Releaser::new(release)))
    }

    /// Share an already acquired resource.
    ///
    /// If the control block cannot be allocated the resource is released
    /// before the error is returned.
    pub fn from_raw<F, O>(resource: R, release: F) -> Result<Self, OutOfResourceError>
    where
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        Self::from_raw_in(retry::global(), resource, release)
    }

    /// Like [`from_raw`](Self::from_raw), allocating through `chain`.
    pub fn from_raw_in<F, O>(
        chain: &RetryChain,
        resource: R,
        release: F,
    ) -> Result<Self, OutOfResourceError>
    where
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        Self::from_raw_with(chain, system_alloc, resource, release)
    }

    pub(crate) fn from_raw_with<M, F, O>(
        chain: &RetryChain,
        alloc: M,
        resource: R,
        release: F,
    ) -> Result<Self, OutOfResourceError>
    where
        M: FnMut(Layout) -> Option<NonNull<u8>>,
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        let releaser = Releaser::new(release);
        match BlockSlot::<R>::reserve_with(chain, alloc) {
            Ok(slot) => Ok(slot.fill(resource, releaser)),
            Err(err) => {
                releaser.run(resource);
                Err(err)
            }
        }
    }
}

impl<R> SharedResource<R> {
    fn inner(&self) -> &ControlBlock<R> {
        // SAFETY: the block stays alive while this owner holds a count.
        unsafe { self.block.as_ref() }
    }

    /// The shared resource.
    pub fn get(&self) -> &R {
        &self.inner().resource
    }

    /// Current number of owners.
    ///
    /// Advisory only: other threads may change the count immediately after
    /// it is read.
    pub fn use_count(&self) -> usize {
        self.inner().count.load(Ordering::Acquire)
    }

    /// Returns true if both point at the same control block.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    /// Make `self` share `other`'s control block.
    ///
    /// Assigning a wrapper that already shares the block leaves the count
    /// unchanged and never releases.
    pub fn assign_from(&mut self, other: &Self) {
        if Self::ptr_eq(self, other) {
            return;
        }
        *self = other.clone();
    }

    /// The release function bound to this control block.
    pub fn releaser(&self) -> &Releaser<R> {
        &self.inner().release
    }

    /// Recover unique ownership if this is the only owner.
    ///
    /// The release function moves into the returned wrapper; nothing is
    /// released. Otherwise `self` is handed back unchanged.
    pub fn try_unwrap(self) -> Result<OwnedResource<R>, Self> {
        if self
            .inner()
            .count
            .compare_exchange(1, 0, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(self);
        }

        let this = ManuallyDrop::new(self);
        let ptr = this.block.as_ptr();
        // SAFETY: the count went from 1 to 0 under our ownership, so no other
        // owner can observe the block. Both fields are moved out exactly once
        // before the memory is freed.
        let (resource, release) = unsafe {
            let resource = ManuallyDrop::take(&mut (*ptr).resource);
            let release = ManuallyDrop::take(&mut (*ptr).release);
            dealloc(ptr.cast(), ControlBlock::<R>::layout());
            (resource, release)
        };
        Ok(OwnedResource::with_releaser(Some(resource), release))
    }
}

impl<R> Clone for SharedResource<R> {
    fn clone(&self) -> Self {
        let old = self.inner().count.fetch_add(1, Ordering::Relaxed);
        if old > MAX_COUNT {
            std::process::abort();
        }
        Self {
            block: self.block,
            _owns: PhantomData,
        }
    }
}

impl<R> Drop for SharedResource<R> {
    fn drop(&mut self) {
        if self.inner().count.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);

        let ptr = self.block.as_ptr();
        // SAFETY: this drop observed the transition to zero, so it is the only
        // remaining access to the block. Fields are taken once, the release
        // function never unwinds, and the memory is freed last.
        unsafe {
            let resource = ManuallyDrop::take(&mut (*ptr).resource);
            let release = ManuallyDrop::take(&mut (*ptr).release);
            release.run(resource);
            drop(release);
            dealloc(ptr.cast(), ControlBlock::<R>::layout());
        }
    }
}

impl<R> Deref for SharedResource<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.get()
    }
}

impl<R> AsRef<R> for SharedResource<R> {
    fn as_ref(&self) -> &R {
        self.get()
    }
}

impl<R> ResourceWrapper for SharedResource<R> {
    type Policy = RefCounted;

    fn is_empty(&self) -> bool {
        false
    }
}

impl<R> Duplicate for SharedResource<R> {
    fn duplicate(&mut self) -> Result<Self, AcquisitionError> {
        Ok(self.clone())
    }
}

impl<R: fmt::Debug> fmt::Debug for SharedResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResource")
            .field("resource", self.get())
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_released;
    use crate::error::ExhaustionCause;
    use crate::retry::{handler, Handler, HandlerOutcome};
    use crate::testing::{CapacityPool, ReleaseCounter};
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn shared(counter: &ReleaseCounter, id: u32) -> SharedResource<u32> {
        SharedResource::acquire(|| Ok::<_, AcquisitionError>(id), counter.release_fn()).unwrap()
    }

    fn counting(
        calls: &Arc<AtomicU32>,
        pool: &CapacityPool,
        outcome: fn(&CapacityPool) -> HandlerOutcome,
    ) -> Handler {
        let calls = calls.clone();
        let pool = pool.clone();
        handler(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            outcome(&pool)
        })
    }

    #[test]
    fn clone_increments_and_drop_decrements() {
        let counter = ReleaseCounter::new();
        let a = shared(&counter, 1);
        assert_eq!(a.use_count(), 1);

        let b = a.clone();
        assert_eq!(a.use_count(), 2);
        assert!(SharedResource::ptr_eq(&a, &b));

        drop(b);
        assert_eq!(a.use_count(), 1);
        assert_eq!(counter.total(), 0);

        drop(a);
        assert_released!(counter, 1, 1);
    }

    #[test]
    fn last_of_three_releases_in_any_order() {
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let counter = ReleaseCounter::new();
            let first = shared(&counter, 7);
            let mut copies: Vec<Option<SharedResource<u32>>> =
                vec![Some(first.clone()), Some(first.clone()), Some(first)];
            for (step, idx) in order.iter().enumerate() {
                copies[*idx] = None;
                let expected = if step == 2 { 1 } else { 0 };
                assert_eq!(counter.total(), expected, "order {:?} step {}", order, step);
            }
        }
    }

    #[test]
    fn self_assignment_keeps_count() {
        let counter = ReleaseCounter::new();
        let mut a = shared(&counter, 2);
        let alias = a.clone();
        assert_eq!(a.use_count(), 2);

        a.assign_from(&alias);
        assert_eq!(a.use_count(), 2);

        a = a.clone();
        assert_eq!(a.use_count(), 2);
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn assign_from_other_block_releases_old() {
        let counter = ReleaseCounter::new();
        let mut a = shared(&counter, 1);
        let b = shared(&counter, 2);
        a.assign_from(&b);
        assert_released!(counter, 1, 1);
        assert_eq!(*a.get(), 2);
        assert_eq!(b.use_count(), 2);
    }

    #[test]
    fn per_instance_release_functions() {
        let heap = ReleaseCounter::new();
        let pool = ReleaseCounter::new();
        let a: SharedResource<u32> =
            SharedResource::acquire(|| Ok::<_, AcquisitionError>(1), heap.release_fn()).unwrap();
        let b: SharedResource<u32> =
            SharedResource::acquire(|| Ok::<_, AcquisitionError>(2), pool.release_fn()).unwrap();
        drop(a);
        drop(b);
        assert_released!(heap, 1, 1);
        assert_released!(pool, 2, 1);
        assert_eq!(heap.total(), 1);
        assert_eq!(pool.total(), 1);
    }

    #[test]
    fn failed_acquire_frees_block_and_releases_nothing() {
        let counter = ReleaseCounter::new();
        let result: Result<SharedResource<u32>, _> = SharedResource::acquire(
            || Err::<u32, _>(AcquisitionError::new("refused")),
            counter.release_fn(),
        );
        let err = result.unwrap_err();
        assert_eq!(err.acquisition_error().map(|e| e.message()), Some("refused"));
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn try_unwrap_sole_owner() {
        let counter = ReleaseCounter::new();
        let a = shared(&counter, 3);
        let owned = a.try_unwrap().unwrap();
        assert_eq!(counter.total(), 0);
        assert_eq!(*owned.get().unwrap(), 3);
        drop(owned);
        assert_released!(counter, 3, 1);
    }

    #[test]
    fn try_unwrap_with_other_owners_fails() {
        let counter = ReleaseCounter::new();
        let a = shared(&counter, 4);
        let b = a.clone();
        let a = a.try_unwrap().unwrap_err();
        assert_eq!(a.use_count(), 2);
        drop(b);
        drop(a);
        assert_released!(counter, 4, 1);
    }

    #[test]
    fn duplicate_is_refcounted() {
        let counter = ReleaseCounter::new();
        let mut a = shared(&counter, 5);
        let b = a.duplicate().unwrap();
        assert_eq!(b.use_count(), 2);
    }

    #[test]
    fn deref_and_debug() {
        let a: SharedResource<String> =
            SharedResource::from_raw("socket".to_string(), |_: String| {}).unwrap();
        assert_eq!(a.len(), 6);
        let debug = format!("{:?}", a);
        assert!(debug.contains("socket"));
        assert!(debug.contains("use_count: 1"));
    }

    #[test]
    fn concurrent_clones_release_once() {
        let counter = ReleaseCounter::new();
        let root = shared(&counter, 9);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let local = root.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let extra = local.clone();
                        drop(extra);
                    }
                    drop(local);
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(root.use_count(), 1);
        drop(root);
        assert_released!(counter, 9, 1);
    }

    #[test]
    fn from_raw_releases_resource_when_block_unavailable() {
        let chain = RetryChain::new();
        let pool = CapacityPool::new(0);
        let calls = Arc::new(AtomicU32::new(0));
        chain.install(counting(&calls, &pool, |_| HandlerOutcome::GiveUp));

        let counter = ReleaseCounter::new();
        let err =
            SharedResource::from_raw_with(&chain, pool.gated_alloc(), 12u32, counter.release_fn())
                .unwrap_err();
        assert_eq!(err.cause, ExhaustionCause::HandlerGaveUp);
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_released!(counter, 12u32, 1);
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn acquire_never_runs_when_block_unavailable() {
        let chain = RetryChain::new();
        let pool = CapacityPool::new(0);
        let calls = Arc::new(AtomicU32::new(0));
        chain.install(counting(&calls, &pool, |_| HandlerOutcome::GiveUp));

        let acquired = Arc::new(AtomicU32::new(0));
        let a = acquired.clone();
        let counter = ReleaseCounter::new();
        let result: Result<SharedResource<u32>, _> = SharedResource::acquire_with(
            &chain,
            pool.gated_alloc(),
            move || {
                a.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AcquisitionError>(1)
            },
            counter.release_fn(),
        );
        assert!(result.unwrap_err().is_out_of_resource());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn block_allocation_retries_after_handler_frees_capacity() {
        let chain = RetryChain::new();
        let pool = CapacityPool::new(0);
        let calls = Arc::new(AtomicU32::new(0));
        chain.install_for::<u32>(counting(&calls, &pool, |pool| {
            pool.grow(1);
            HandlerOutcome::Retry
        }));

        let counter = ReleaseCounter::new();
        let a = SharedResource::acquire_with(
            &chain,
            pool.gated_alloc(),
            || Ok::<_, AcquisitionError>(21u32),
            counter.release_fn(),
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*a, 21);
        drop(a);
        assert_released!(counter, 21u32, 1);
    }

    #[test]
    fn from_raw_in_uses_given_chain() {
        let chain = RetryChain::new();
        let counter = ReleaseCounter::new();
        let a = SharedResource::from_raw_in(&chain, 3u8, counter.release_fn()).unwrap();
        assert_eq!(a.use_count(), 1);
        drop(a);
        assert_released!(counter, 3u8, 1);
    }

    #[test]
    fn system_alloc_refuses_zero_size() {
        assert!(system_alloc(Layout::new::<()>()).is_none());
    }

    #[test]
    fn block_allocation_uses_given_chain() {
        // Allocation succeeds on the system allocator, so handlers are never called.
        let chain = RetryChain::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        chain.install(handler(move || {
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            HandlerOutcome::GiveUp
        }));
        let a: SharedResource<u8> =
            SharedResource::acquire_in(&chain, || Ok::<_, AcquisitionError>(1), |_: u8| {})
                .unwrap();
        assert_eq!(*a, 1);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
