//! # Process-wide Default Allocator
//!
//! Owners created without an explicit allocator draw from here. Until
//! something else is installed this is a static [`HeapAllocator`].

use parking_lot::{const_rwlock, RwLock};

use crate::allocator::Allocator;
use crate::heap::HeapAllocator;

static HEAP: HeapAllocator = HeapAllocator::new();

static GLOBAL: RwLock<Option<&'static dyn Allocator>> = const_rwlock(None);

/// Returns the current default allocator.
#[must_use]
pub fn global_allocator() -> &'static dyn Allocator {
    let current = *GLOBAL.read();
    current.unwrap_or(&HEAP)
}

/// Installs `alloc` as the default allocator.
///
/// Handles already allocated keep referring to the allocator that produced
/// them; only later allocations are affected.
pub fn set_global_allocator(alloc: &'static dyn Allocator) {
    tracing::debug!(allocator = alloc.name(), "global allocator replaced");
    *GLOBAL.write() = Some(alloc);
}

/// Restores the static heap as the default allocator.
pub fn reset_global_allocator() {
    tracing::debug!("global allocator reset to heap");
    *GLOBAL.write() = None;
}
