//! # Memory Ownership
//!
//! Handles and the three ways of owning what they point to.
//!
//! ## Design Philosophy
//!
//! Resolving a handle and destroying its memory are separate rights:
//! - [`MemoryHandle`] only describes and resolves
//! - [`ExclusiveOwner`] destroys when its single owner goes
//! - [`SharedOwner`] destroys when the last of its owners goes
//! - [`WeakObserver`] never destroys the value

mod control;
mod deleter;
mod exclusive;
mod handle;
mod shared;
mod weak;

pub use control::{AtomicControlBlock, ControlBlock, PlainControlBlock};
pub use deleter::{DefaultDeleter, Deleter};
pub use exclusive::ExclusiveOwner;
pub use handle::MemoryHandle;
pub use shared::SharedOwner;
pub use weak::WeakObserver;

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::Cell;

    use keystone_alloc::{HeapAllocator, TrackingAllocator};

    static HEAP: HeapAllocator = HeapAllocator::new();

    /// A fresh tracker per test keeps the counts isolated.
    pub(crate) fn tracker() -> &'static TrackingAllocator {
        Box::leak(Box::new(TrackingAllocator::new(&HEAP)))
    }

    pub(crate) fn tracker_with_limit(limit: usize) -> &'static TrackingAllocator {
        Box::leak(Box::new(TrackingAllocator::with_live_limit(&HEAP, limit)))
    }

    /// Counts how often it was dropped.
    #[derive(Debug)]
    pub(crate) struct DropCounter<'a>(pub(crate) &'a Cell<usize>);

    impl Drop for DropCounter<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }
}
