//! # Pool Allocator
//!
//! Fixed-size block allocator for objects that are frequently allocated and
//! freed.
//!
//! The raw handle value is the block index, not an address. The address is
//! recomputed from the backing allocation on every resolve, which is what
//! lets the backing memory move without invalidating handles.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::allocator::{request_layout, Allocator};
use crate::error::{AllocError, AllocResult};
use crate::stats::{AllocStats, StatsRecorder};

/// A pool of equally sized blocks carved out of one backing allocation.
///
/// # Thread Safety
///
/// The free list is behind a mutex, so the pool can be shared. Allocation
/// and deallocation are O(1).
///
/// # Example
///
/// ```rust,ignore
/// let pool = PoolAllocator::new(global_allocator(), 64, 16, 10_000)?;
///
/// // Allocate - O(1), no heap allocation
/// let raw = pool.allocate_raw(Layout::new::<Particle>(), false)?;
///
/// // Free - O(1), no heap deallocation
/// unsafe { pool.deallocate_raw(raw, Layout::new::<Particle>(), false) };
/// ```
pub struct PoolAllocator {
    /// Allocator that owns the blocks' memory.
    backing: &'static dyn Allocator,
    /// Raw handle of the backing allocation.
    backing_raw: usize,
    /// Layout the backing allocation was requested with.
    backing_layout: Layout,
    /// Distance between two blocks, a multiple of `block_align`.
    stride: usize,
    /// Largest request a block can hold.
    block_size: usize,
    /// Strictest alignment a block guarantees.
    block_align: usize,
    /// Total number of blocks.
    capacity: usize,
    /// Indices of free blocks.
    free_list: Mutex<Vec<usize>>,
    stats: StatsRecorder,
}

impl PoolAllocator {
    /// Creates a pool of `block_count` blocks of `block_size` bytes.
    ///
    /// The backing memory is requested from `backing` in one piece and
    /// marked as backing memory.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidLayout`] for a bad alignment or an
    /// overflowing total size, or whatever `backing` reports when it cannot
    /// provide the memory.
    pub fn new(
        backing: &'static dyn Allocator,
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> AllocResult<Self> {
        let invalid = AllocError::InvalidLayout {
            size: block_size,
            align: block_align,
        };
        if !block_align.is_power_of_two() {
            return Err(invalid);
        }
        let stride = block_size
            .max(1)
            .checked_next_multiple_of(block_align)
            .ok_or_else(|| invalid.clone())?;
        let total = stride.checked_mul(block_count).ok_or(invalid)?;

        let backing_layout = request_layout(total, block_align)?;
        let backing_raw = backing.allocate_raw(backing_layout, true)?;

        tracing::debug!(
            block_size,
            block_align,
            block_count,
            backing = backing.name(),
            "pool allocator created"
        );

        Ok(Self {
            backing,
            backing_raw,
            backing_layout,
            stride,
            block_size,
            block_align,
            capacity: block_count,
            free_list: Mutex::new((0..block_count).rev().collect()),
            stats: StatsRecorder::new(),
        })
    }

    /// Returns the total number of blocks.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the largest request a block can hold.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the alignment every block satisfies.
    #[inline]
    #[must_use]
    pub const fn block_align(&self) -> usize {
        self.block_align
    }

    /// Returns the number of free blocks.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of blocks in use.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.capacity - self.free_count()
    }
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("backing", &self.backing.name())
            .field("block_size", &self.block_size)
            .field("block_align", &self.block_align)
            .field("capacity", &self.capacity)
            .field("free", &self.free_count())
            .finish()
    }
}

impl Allocator for PoolAllocator {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn allocate_raw(&self, layout: Layout, is_backing: bool) -> AllocResult<usize> {
        if layout.size() > self.block_size || layout.align() > self.block_align {
            return Err(AllocError::UnsupportedLayout {
                allocator: self.name(),
                size: layout.size(),
                align: layout.align(),
            });
        }

        let Some(index) = self.free_list.lock().pop() else {
            tracing::warn!(capacity = self.capacity, size = layout.size(), "pool exhausted");
            return Err(AllocError::OutOfMemory {
                size: layout.size(),
                align: layout.align(),
            });
        };

        self.stats
            .add_alloc(layout.size(), self.stride - layout.size(), is_backing);
        tracing::trace!(index, size = layout.size(), "pool allocation");
        Ok(index)
    }

    unsafe fn deallocate_raw(&self, raw: usize, layout: Layout, is_backing: bool) {
        debug_assert!(raw < self.capacity, "block index {raw} out of range");
        if raw >= self.capacity {
            return;
        }

        self.free_list.lock().push(raw);
        self.stats
            .remove_alloc(layout.size(), self.stride - layout.size(), is_backing);
        tracing::trace!(index = raw, "pool free");
    }

    fn resolve_raw(&self, raw: usize) -> Option<NonNull<u8>> {
        if raw >= self.capacity {
            return None;
        }
        let base = self.backing.resolve_raw(self.backing_raw)?;
        NonNull::new(base.as_ptr().wrapping_add(raw * self.stride))
    }

    fn stats(&self) -> AllocStats {
        self.stats.snapshot()
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        let leaked = self.allocated_count();
        if leaked > 0 {
            tracing::warn!(leaked, "pool dropped with live blocks");
        }
        // SAFETY: `backing_raw` was allocated in `new` with this layout and
        // the backing flag, and is released exactly once here.
        unsafe {
            self.backing
                .deallocate_raw(self.backing_raw, self.backing_layout, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapAllocator;

    static BACKING: HeapAllocator = HeapAllocator::new();

    #[test]
    fn test_pool_allocate_free() {
        let pool = PoolAllocator::new(&BACKING, 16, 8, 10).unwrap();
        let layout = Layout::new::<u32>();

        let h1 = pool.allocate_raw(layout, false).unwrap();
        assert_eq!(pool.allocated_count(), 1);

        let ptr = pool.resolve_raw(h1).unwrap();
        // SAFETY: block is 16 bytes, aligned to 8.
        unsafe {
            ptr.cast::<u32>().as_ptr().write(42);
            assert_eq!(*ptr.cast::<u32>().as_ptr(), 42);
            pool.deallocate_raw(h1, layout, false);
        }
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_pool_full() {
        let pool = PoolAllocator::new(&BACKING, 8, 8, 2).unwrap();
        let layout = Layout::new::<u8>();

        let _ = pool.allocate_raw(layout, false).unwrap();
        let _ = pool.allocate_raw(layout, false).unwrap();
        assert_eq!(
            pool.allocate_raw(layout, false),
            Err(AllocError::OutOfMemory { size: 1, align: 1 })
        );
    }

    #[test]
    fn test_pool_reuse() {
        let pool = PoolAllocator::new(&BACKING, 8, 8, 1).unwrap();
        let layout = Layout::new::<u64>();

        let h1 = pool.allocate_raw(layout, false).unwrap();
        // SAFETY: h1 is live.
        unsafe { pool.deallocate_raw(h1, layout, false) };

        let h2 = pool.allocate_raw(layout, false).unwrap();
        assert_eq!(h1, h2); // Same slot reused
    }

    #[test]
    fn test_oversized_request_rejected() {
        let pool = PoolAllocator::new(&BACKING, 8, 8, 4).unwrap();
        let err = pool.allocate_raw(Layout::new::<[u64; 2]>(), false).unwrap_err();
        assert!(matches!(err, AllocError::UnsupportedLayout { size: 16, .. }));
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_blocks_are_strided_and_aligned() {
        let pool = PoolAllocator::new(&BACKING, 12, 16, 3).unwrap();
        let a = pool.allocate_raw(Layout::new::<u32>(), false).unwrap();
        let b = pool.allocate_raw(Layout::new::<u32>(), false).unwrap();

        let pa = pool.resolve_raw(a).unwrap().as_ptr() as usize;
        let pb = pool.resolve_raw(b).unwrap().as_ptr() as usize;
        assert_eq!(pa % 16, 0);
        assert_eq!(pb % 16, 0);
        assert_eq!(pa.abs_diff(pb), 16);
    }

    #[test]
    fn test_backing_memory_returned_on_drop() {
        static HEAP: HeapAllocator = HeapAllocator::new();
        {
            let _pool = PoolAllocator::new(&HEAP, 32, 8, 4).unwrap();
            assert_eq!(HEAP.stats().cur_backing, 128);
        }
        assert_eq!(HEAP.stats().cur_backing, 0);
        assert_eq!(HEAP.stats().cur_allocs, 0);
    }
}
