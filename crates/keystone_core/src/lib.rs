//! # Keystone Core
//!
//! Handle-based memory ownership: memory is referenced through
//! [`MemoryHandle`]s instead of raw pointers so that allocators stay free
//! to move it, and ownership is layered on top of handles.
//!
//! ## Architecture Rules
//!
//! 1. **Resolve late** - A handle becomes an address only in
//!    [`MemoryHandle::resolve`], and only for as long as it is used
//! 2. **Failure is a value** - Construction never panics; a failed
//!    allocation yields an invalid owner or an [`AllocError`]
//! 3. **Threading is a type choice** - [`Shared`] stays on one thread,
//!    [`AtomicShared`] crosses threads
//!
//! ## Example
//!
//! ```rust,ignore
//! use keystone_core::{ExclusiveOwner, Shared};
//!
//! let config = ExclusiveOwner::create(Settings::default());
//! let mesh = Shared::create(Mesh::load("crate.obj"));
//! let observer = mesh.downgrade();
//! assert_eq!(observer.use_count(), 1);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod memory;

pub use keystone_alloc::{global_allocator, AllocError, AllocResult, Allocator};
pub use memory::{
    AtomicControlBlock, ControlBlock, DefaultDeleter, Deleter, ExclusiveOwner, MemoryHandle,
    PlainControlBlock, SharedOwner, WeakObserver,
};

/// Single-threaded shared owner.
pub type Shared<T> = SharedOwner<T, DefaultDeleter<T>, PlainControlBlock>;

/// Thread-safe shared owner.
pub type AtomicShared<T> = SharedOwner<T, DefaultDeleter<T>, AtomicControlBlock>;

/// Observer of a [`Shared`].
pub type Weak<T> = WeakObserver<T, PlainControlBlock>;

/// Observer of an [`AtomicShared`].
pub type AtomicWeak<T> = WeakObserver<T, AtomicControlBlock>;
