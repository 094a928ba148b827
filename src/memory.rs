//! Heap memory as a managed resource.
//!
//! [`acquire_block`] allocates raw, zeroed memory through the retry chain and
//! hands it back inside an [`OwnedResource`] whose release function returns
//! the memory to the allocator.
//!
//! # Example
//!
//! ```rust
//! use holdfast::memory;
//! use std::alloc::Layout;
//!
//! let mut block = memory::acquire_block(Layout::array::<u8>(64).unwrap()).unwrap();
//! let bytes = block.get_mut().unwrap().as_mut_slice();
//! bytes[0] = 0xAB;
//! assert_eq!(bytes.len(), 64);
//! // Deallocated when `block` drops.
//! ```

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::error::{AcquisitionError, ResourceError};
use crate::owned::OwnedResource;
use crate::retry::{self, RetryChain};

/// A raw heap allocation.
///
/// A plain handle: dropping it does nothing. Wrap it in an
/// [`OwnedResource`] (as [`acquire_block`] does) or call
/// [`deallocate`](Self::deallocate) explicitly.
pub struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: a RawBlock is the unique handle to its allocation; the bytes carry
// no thread affinity.
unsafe impl Send for RawBlock {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for RawBlock {}

impl RawBlock {
    /// Start of the allocation.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Layout the block was allocated with.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false: zero-sized blocks cannot be acquired.
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// The block's bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation is live, zero-initialized and `len` bytes long.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    /// The block's bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }

    /// Return the memory to the allocator.
    pub fn deallocate(self) {
        // SAFETY: RawBlocks are only created by `allocate` with this layout and
        // are neither Clone nor Copy, so this is the only deallocation.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }

    fn allocate(layout: Layout) -> Option<Self> {
        // SAFETY: callers reject zero-sized layouts.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { ptr, layout })
    }
}

impl fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBlock")
            .field("ptr", &self.ptr)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

/// Allocate a zeroed block through the global retry chain.
pub fn acquire_block(layout: Layout) -> Result<OwnedResource<RawBlock>, ResourceError> {
    acquire_block_in(retry::global(), layout)
}

/// Allocate a zeroed block, consulting `chain` if the allocator fails.
///
/// Handlers installed for [`RawBlock`] take precedence over global ones.
pub fn acquire_block_in(
    chain: &RetryChain,
    layout: Layout,
) -> Result<OwnedResource<RawBlock>, ResourceError> {
    if layout.size() == 0 {
        return Err(AcquisitionError::new("zero-sized memory block").into());
    }
    let block = chain.allocate_keyed::<RawBlock, _, _>(|| RawBlock::allocate(layout))?;
    Ok(OwnedResource::from_raw(block, RawBlock::deallocate))
}
