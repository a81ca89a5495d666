//! # The Allocator Capability
//!
//! An allocator hands out raw handle values instead of pointers. The value
//! only means something to the allocator that produced it: the heap uses
//! the address itself, a pool uses a block index. Turning a handle back
//! into an address is always a fresh call to [`Allocator::resolve_raw`], so
//! an allocator is free to move memory between resolutions.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::error::{AllocError, AllocResult};
use crate::stats::AllocStats;

/// Raw handle value that never refers to an allocation.
pub const NULL_HANDLE: usize = usize::MAX;

/// Largest log2 alignment a handle can record.
pub const MAX_LOG2_ALIGN: u32 = usize::BITS - 1;

/// Contract every Keystone allocator fulfils.
///
/// A raw handle returned by [`allocate_raw`](Allocator::allocate_raw) stays
/// resolvable until it is passed to
/// [`deallocate_raw`](Allocator::deallocate_raw). It is never
/// [`NULL_HANDLE`].
///
/// # Thread Safety
///
/// Allocators are shared as `&'static dyn Allocator` and must be callable
/// from any thread. Whether concurrent `resolve_raw` calls are cheap is up to
/// the implementation.
pub trait Allocator: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Allocates memory for `layout`.
    ///
    /// `is_backing` marks memory that itself backs another allocator; it is
    /// only used for statistics.
    ///
    /// # Errors
    ///
    /// Returns an [`AllocError`] when the request cannot be served. A failed
    /// request leaves no allocation behind.
    fn allocate_raw(&self, layout: Layout, is_backing: bool) -> AllocResult<usize>;

    /// Returns an allocation to the allocator.
    ///
    /// # Safety
    ///
    /// `raw` must come from `allocate_raw` on this allocator with the same
    /// `layout` and `is_backing`, and must not have been deallocated yet.
    unsafe fn deallocate_raw(&self, raw: usize, layout: Layout, is_backing: bool);

    /// Resolves a raw handle to the current address of its memory.
    ///
    /// Returns `None` for [`NULL_HANDLE`]. The address is only good until the
    /// next operation that could relocate memory.
    fn resolve_raw(&self, raw: usize) -> Option<NonNull<u8>>;

    /// Snapshot of this allocator's statistics.
    fn stats(&self) -> AllocStats;
}

/// Builds the layout actually requested from an allocator.
///
/// Zero-sized requests are padded to one byte so that every allocation has a
/// distinct, resolvable handle.
///
/// # Errors
///
/// Returns [`AllocError::InvalidLayout`] when `align` is not a power of two,
/// exceeds `2^MAX_LOG2_ALIGN`, or the padded size overflows.
pub fn request_layout(size: usize, align: usize) -> AllocResult<Layout> {
    if !align.is_power_of_two() || align.trailing_zeros() > MAX_LOG2_ALIGN {
        return Err(AllocError::InvalidLayout { size, align });
    }
    Layout::from_size_align(size.max(1), align).map_err(|_| AllocError::InvalidLayout { size, align })
}
