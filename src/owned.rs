//! Unique ownership of an acquired resource.
//!
//! An [`OwnedResource`] holds at most one resource together with the function
//! that releases it. The release function runs exactly once: when the wrapper
//! is dropped, when it is reset, or never if the resource is detached with
//! [`release`](OwnedResource::release).
//!
//! # Example
//!
//! ```rust
//! use holdfast::OwnedResource;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! let closed = Arc::new(AtomicU32::new(0));
//! let c = closed.clone();
//!
//! {
//!     let fd: OwnedResource<i32> = OwnedResource::acquire(
//!         || Ok::<_, std::io::Error>(7),
//!         move |_fd| {
//!             c.fetch_add(1, Ordering::SeqCst);
//!         },
//!     )
//!     .unwrap();
//!     assert_eq!(*fd.get().unwrap(), 7);
//! }
//!
//! assert_eq!(closed.load(Ordering::SeqCst), 1);
//! ```

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{AcquisitionError, EmptyResourceError, ResourceError};
use crate::policy::{DeepCopy, Duplicate, OwnedPolicy, Prohibited, ResourceWrapper, Transfer};
use crate::release::{ReleaseOutcome, Releaser};
use crate::retry::{self, RetryChain};
use crate::shared::{system_alloc, BlockSlot, SharedResource};

type Acquirer<R> = Arc<dyn Fn() -> Result<R, AcquisitionError> + Send + Sync>;

/// A uniquely owned resource with a bound release function.
///
/// The copy policy `P` defaults to [`Prohibited`]. See [`crate::policy`] for
/// the alternatives.
pub struct OwnedResource<R, P: OwnedPolicy = Prohibited> {
    resource: Option<R>,
    release: Releaser<R>,
    acquire: Option<Acquirer<R>>,
    _policy: PhantomData<P>,
}

impl<R: 'static, P: OwnedPolicy> OwnedResource<R, P> {
    /// Acquire a resource and bind its release function.
    ///
    /// If `acquire` fails the error is returned and nothing is owned, so the
    /// release function is never called. The acquisition function is kept so
    /// a [`DeepCopy`] wrapper can acquire again when copied.
    pub fn acquire<A, E, F, O>(acquire: A, release: F) -> Result<Self, AcquisitionError>
    where
        A: Fn() -> Result<R, E> + Send + Sync + 'static,
        E: Into<AcquisitionError>,
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        let acquirer: Acquirer<R> = Arc::new(move || acquire().map_err(Into::into));
        let resource = acquirer()?;
        Ok(Self {
            resource: Some(resource),
            release: Releaser::new(release),
            acquire: Some(acquirer),
            _policy: PhantomData,
        })
    }

    /// Take ownership of an already acquired resource.
    pub fn from_raw<F, O>(resource: R, release: F) -> Self
    where
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        Self::with_releaser(Some(resource), Releaser::new(release))
    }

    /// An empty wrapper that will release with `release` once it owns something.
    pub fn empty<F, O>(release: F) -> Self
    where
        F: Fn(R) -> O + Send + Sync + 'static,
        O: ReleaseOutcome,
    {
        Self::with_releaser(None, Releaser::new(release))
    }
}

impl<R, P: OwnedPolicy> OwnedResource<R, P> {
    pub(crate) fn with_releaser(resource: Option<R>, release: Releaser<R>) -> Self {
        Self {
            resource,
            release,
            acquire: None,
            _policy: PhantomData,
        }
    }

    /// Peek at the held resource.
    pub fn get(&self) -> Result<&R, EmptyResourceError> {
        self.resource.as_ref().ok_or_else(EmptyResourceError::of::<R>)
    }

    /// Mutable access to the held resource.
    pub fn get_mut(&mut self) -> Result<&mut R, EmptyResourceError> {
        self.resource.as_mut().ok_or_else(EmptyResourceError::of::<R>)
    }

    /// Returns true if nothing is owned.
    pub fn is_empty(&self) -> bool {
        self.resource.is_none()
    }

    /// Detach the resource without releasing it.
    ///
    /// The caller becomes responsible for the raw resource. The wrapper is
    /// left empty.
    pub fn release(&mut self) -> Option<R> {
        self.resource.take()
    }

    /// Release the held resource, if any, and become empty.
    pub fn reset(&mut self) {
        if let Some(old) = self.resource.take() {
            self.release.run(old);
        }
    }

    /// Release the held resource and take ownership of `resource`.
    ///
    /// A moved-in value is always a distinct resource, so the old one is
    /// released even when the two compare equal.
    pub fn reset_to(&mut self, resource: R) {
        if let Some(old) = self.resource.replace(resource) {
            self.release.run(old);
        }
    }

    /// [`reset_to`](Self::reset_to) for copyable handles such as descriptors
    /// or raw pointers, where an equal handle names the resource already held.
    ///
    /// Passing the held handle is a no-op: it stays owned and is not released.
    pub fn reset_to_handle(&mut self, handle: R)
    where
        R: Copy + PartialEq,
    {
        if self.resource == Some(handle) {
            return;
        }
        self.reset_to(handle);
    }

    /// Move the resource into a new wrapper, leaving this one empty.
    ///
    /// The new wrapper keeps the same release function.
    pub fn take(&mut self) -> Self {
        Self {
            resource: self.resource.take(),
            release: self.release.clone(),
            acquire: self.acquire.clone(),
            _policy: PhantomData,
        }
    }

    /// The bound release function.
    pub fn releaser(&self) -> &Releaser<R> {
        &self.release
    }

    /// Convert into shared ownership.
    ///
    /// The control block is allocated through the global
    /// [`RetryChain`]. On failure the wrapper is handed back unchanged inside
    /// the error.
    pub fn into_shared(self) -> Result<SharedResource<R>, IntoSharedError<R, P>>
    where
        R: 'static,
    {
        self.into_shared_in(retry::global())
    }

    /// Like [`into_shared`](Self::into_shared), allocating through `chain`.
    pub fn into_shared_in(
        self,
        chain: &RetryChain,
    ) -> Result<SharedResource<R>, IntoSharedError<R, P>>
    where
        R: 'static,
    {
        self.into_shared_with(chain, system_alloc)
    }

    pub(crate) fn into_shared_with<M>(
        mut self,
        chain: &RetryChain,
        alloc: M,
    ) -> Result<SharedResource<R>, IntoSharedError<R, P>>
    where
        R: 'static,
        M: FnMut(Layout) -> Option<NonNull<u8>>,
    {
        let slot = match BlockSlot::<R>::reserve_with(chain, alloc) {
            Ok(slot) => slot,
            Err(err) => return Err(IntoSharedError::new(err.into(), self)),
        };
        match self.resource.take() {
            Some(resource) => Ok(slot.fill(resource, self.release.clone())),
            None => Err(IntoSharedError::new(
                EmptyResourceError::of::<R>().into(),
                self,
            )),
        }
    }
}

impl<R> OwnedResource<R, DeepCopy> {
    /// Acquire an independent equivalent resource.
    ///
    /// Strong guarantee: on failure the source is untouched and no new
    /// wrapper exists. Copying an empty wrapper yields an empty wrapper.
    pub fn try_clone(&self) -> Result<Self, AcquisitionError> {
        let resource = match self.resource {
            None => None,
            Some(_) => {
                let acquire = self
                    .acquire
                    .as_ref()
                    .ok_or_else(|| AcquisitionError::unrepeatable(std::any::type_name::<R>()))?;
                Some(acquire()?)
            }
        };
        Ok(Self {
            resource,
            release: self.release.clone(),
            acquire: self.acquire.clone(),
            _policy: PhantomData,
        })
    }
}

impl<R, P: OwnedPolicy> ResourceWrapper for OwnedResource<R, P> {
    type Policy = P;

    fn is_empty(&self) -> bool {
        self.resource.is_none()
    }
}

impl<R> Duplicate for OwnedResource<R, DeepCopy> {
    fn duplicate(&mut self) -> Result<Self, AcquisitionError> {
        self.try_clone()
    }
}

impl<R> Duplicate for OwnedResource<R, Transfer> {
    fn duplicate(&mut self) -> Result<Self, AcquisitionError> {
        Ok(self.take())
    }
}

impl<R, P: OwnedPolicy> Drop for OwnedResource<R, P> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.release.run(resource);
        }
    }
}

impl<R: fmt::Debug, P: OwnedPolicy> fmt::Debug for OwnedResource<R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedResource")
            .field("resource", &self.resource)
            .field("policy", &P::NAME)
            .finish()
    }
}

/// Error returned by [`OwnedResource::into_shared`]; gives the wrapper back.
pub struct IntoSharedError<R, P: OwnedPolicy = Prohibited> {
    /// Why the conversion failed.
    pub error: ResourceError,
    /// The unconverted wrapper.
    pub owned: OwnedResource<R, P>,
}

impl<R, P: OwnedPolicy> IntoSharedError<R, P> {
    fn new(error: ResourceError, owned: OwnedResource<R, P>) -> Self {
        Self { error, owned }
    }

    /// Recover the wrapper, discarding the error.
    pub fn into_owned(self) -> OwnedResource<R, P> {
        self.owned
    }
}

impl<R, P: OwnedPolicy> fmt::Debug for IntoSharedError<R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntoSharedError")
            .field("error", &self.error)
            .field("owned", &"<wrapper>")
            .finish()
    }
}

impl<R, P: OwnedPolicy> fmt::Display for IntoSharedError<R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conversion to shared ownership failed: {}", self.error)
    }
}

impl<R, P: OwnedPolicy> std::error::Error for IntoSharedError<R, P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
