//! Copy policies for resource wrappers.
//!
//! A wrapper type picks exactly one policy at definition time through a type
//! parameter. The policy decides, at compile time, what "copying" the wrapper
//! means:
//!
//! | Marker | Copy behavior | Wrapper |
//! |--------|---------------|---------|
//! | [`Prohibited`] | does not compile | `OwnedResource<R, Prohibited>` |
//! | [`DeepCopy`] | acquires an independent resource | `OwnedResource<R, DeepCopy>` |
//! | [`Transfer`] | moves, leaving the source empty | `OwnedResource<R, Transfer>` |
//! | [`RefCounted`] | shares one control block | `SharedResource<R>` |
//!
//! All markers are zero-sized.
//!
//! Copying a `Prohibited` wrapper is rejected by the compiler:
//!
//! ```rust,compile_fail
//! use holdfast::{OwnedResource, Duplicate};
//!
//! let mut fd: OwnedResource<i32> = OwnedResource::from_raw(3, |_fd: i32| {});
//! let copy = fd.duplicate();
//! ```

use crate::error::AcquisitionError;

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for copy policies.
pub trait CopyPolicy: sealed::Sealed + Send + Sync + 'static {
    /// Human-readable name for debugging.
    const NAME: &'static str;
}

/// Policies an [`OwnedResource`](crate::OwnedResource) may carry.
///
/// Reference counting needs a control block, so [`RefCounted`] belongs to
/// [`SharedResource`](crate::SharedResource) instead.
pub trait OwnedPolicy: CopyPolicy {}

/// Copying is a compile-time error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Prohibited;

/// Copies share one reference-counted control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RefCounted;

/// Copies acquire an independent equivalent resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeepCopy;

/// Copies move the resource and leave the source empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Transfer;

impl sealed::Sealed for Prohibited {}
impl sealed::Sealed for RefCounted {}
impl sealed::Sealed for DeepCopy {}
impl sealed::Sealed for Transfer {}

impl CopyPolicy for Prohibited {
    const NAME: &'static str = "Prohibited";
}

impl CopyPolicy for RefCounted {
    const NAME: &'static str = "RefCounted";
}

impl CopyPolicy for DeepCopy {
    const NAME: &'static str = "DeepCopy";
}

impl CopyPolicy for Transfer {
    const NAME: &'static str = "Transfer";
}

impl OwnedPolicy for Prohibited {}
impl OwnedPolicy for DeepCopy {}
impl OwnedPolicy for Transfer {}

/// Common surface of every resource wrapper.
pub trait ResourceWrapper {
    /// The wrapper's copy policy.
    type Policy: CopyPolicy;

    /// Returns true if the wrapper currently owns nothing.
    fn is_empty(&self) -> bool;
}

/// Copying according to the wrapper's policy.
///
/// Implemented for every wrapper whose policy permits copying. Takes
/// `&mut self` because a [`Transfer`] copy invalidates its source; the other
/// policies leave the source untouched.
pub trait Duplicate: ResourceWrapper + Sized {
    /// Produce a copy of this wrapper.
    ///
    /// On error nothing observable has changed.
    fn duplicate(&mut self) -> Result<Self, AcquisitionError>;
}

/// Name of a wrapper's copy policy.
pub fn policy_name<W: ResourceWrapper>() -> &'static str {
    <W::Policy as CopyPolicy>::NAME
}
