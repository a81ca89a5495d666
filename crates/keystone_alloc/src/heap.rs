//! # Heap Allocator
//!
//! Thin wrapper around the system heap. The raw handle value is the address
//! of the allocation, so resolution is free.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::allocator::{Allocator, NULL_HANDLE};
use crate::error::{AllocError, AllocResult};
use crate::stats::{AllocStats, StatsRecorder};

/// Allocator backed by `std::alloc`.
///
/// `const`-constructible so it can serve as the process default from a
/// `static`.
pub struct HeapAllocator {
    stats: StatsRecorder,
}

impl HeapAllocator {
    /// Creates a heap allocator with empty statistics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stats: StatsRecorder::new(),
        }
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for HeapAllocator {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn allocate_raw(&self, layout: Layout, is_backing: bool) -> AllocResult<usize> {
        if layout.size() == 0 {
            return Err(AllocError::UnsupportedLayout {
                allocator: self.name(),
                size: 0,
                align: layout.align(),
            });
        }

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            tracing::warn!(size = layout.size(), align = layout.align(), "heap allocation failed");
            return Err(AllocError::OutOfMemory {
                size: layout.size(),
                align: layout.align(),
            });
        };

        self.stats.add_alloc(layout.size(), 0, is_backing);
        tracing::trace!(size = layout.size(), align = layout.align(), is_backing, "heap allocation");
        Ok(ptr.as_ptr() as usize)
    }

    unsafe fn deallocate_raw(&self, raw: usize, layout: Layout, is_backing: bool) {
        if raw == NULL_HANDLE {
            return;
        }
        // SAFETY: the caller guarantees `raw` is a live address returned by
        // `alloc::alloc` with this exact layout.
        unsafe { alloc::dealloc(raw as *mut u8, layout) };
        self.stats.remove_alloc(layout.size(), 0, is_backing);
        tracing::trace!(size = layout.size(), align = layout.align(), "heap free");
    }

    fn resolve_raw(&self, raw: usize) -> Option<NonNull<u8>> {
        if raw == NULL_HANDLE {
            return None;
        }
        NonNull::new(raw as *mut u8)
    }

    fn stats(&self) -> AllocStats {
        self.stats.snapshot()
    }
}
