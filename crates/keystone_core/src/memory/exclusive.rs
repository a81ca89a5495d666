//! # Exclusive Ownership
//!
//! [`ExclusiveOwner`] is the handle-based counterpart of `Box`: exactly one
//! owner, which runs its deleter when it goes away. It cannot be cloned, so
//! the single-owner rule is enforced by the compiler.

#![allow(unsafe_code)]

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};

use keystone_alloc::{global_allocator, AllocResult, Allocator};

use super::deleter::{emplace, DefaultDeleter, Deleter};
use super::handle::MemoryHandle;

/// Move-only owner of one allocation.
///
/// An owner may be invalid (null), for instance after a failed
/// [`create`](Self::create) or after [`release`](Self::release). Check
/// [`is_valid`](Self::is_valid) or use [`get`](Self::get) before touching
/// the value.
pub struct ExclusiveOwner<T, D: Deleter<T> = DefaultDeleter<T>> {
    handle: MemoryHandle<T>,
    deleter: D,
}

// SAFETY: the owner is the only path to its value, exactly like `Box`.
unsafe impl<T: Send, D: Deleter<T> + Send> Send for ExclusiveOwner<T, D> {}
// SAFETY: shared access only hands out `&T`.
unsafe impl<T: Sync, D: Deleter<T> + Sync> Sync for ExclusiveOwner<T, D> {}

impl<T, D: Deleter<T>> ExclusiveOwner<T, D> {
    /// Creates an invalid owner.
    #[must_use]
    pub fn null() -> Self {
        Self {
            handle: MemoryHandle::null(),
            deleter: D::default(),
        }
    }

    /// Takes ownership of an existing allocation.
    ///
    /// # Safety
    ///
    /// `handle` must be null or point to an initialized `T` that nothing
    /// else will delete or deallocate.
    #[must_use]
    pub unsafe fn from_handle(handle: MemoryHandle<T>) -> Self {
        Self {
            handle,
            deleter: D::default(),
        }
    }

    /// Takes ownership of an existing allocation with a specific deleter.
    ///
    /// # Safety
    ///
    /// Same as [`from_handle`](Self::from_handle).
    #[must_use]
    pub unsafe fn from_handle_with_deleter(handle: MemoryHandle<T>, deleter: D) -> Self {
        Self { handle, deleter }
    }

    /// Moves `value` into memory from the default allocator.
    ///
    /// Returns an invalid owner if the allocation fails.
    #[must_use]
    pub fn create(value: T) -> Self {
        Self::create_in(global_allocator(), value)
    }

    /// Moves `value` into memory from `alloc`.
    ///
    /// Returns an invalid owner if the allocation fails; `value` is dropped
    /// and the allocator is left untouched.
    #[must_use]
    pub fn create_in(alloc: &'static dyn Allocator, value: T) -> Self {
        Self::try_create_in(alloc, value).unwrap_or_else(|_| Self::null())
    }

    /// Moves `value` into memory from `alloc`, reporting why it failed.
    ///
    /// # Errors
    ///
    /// Returns the allocator's error; `value` is dropped.
    pub fn try_create_in(alloc: &'static dyn Allocator, value: T) -> AllocResult<Self> {
        let handle = emplace(alloc, value)?;
        // SAFETY: `emplace` initialized the memory and nobody else has it.
        Ok(unsafe { Self::from_handle(handle) })
    }

    /// Gives up ownership without running the deleter.
    ///
    /// The owner is left invalid. The caller becomes responsible for the
    /// returned handle.
    #[must_use = "dropping the returned handle leaks the allocation"]
    pub fn release(&mut self) -> MemoryHandle<T> {
        mem::replace(&mut self.handle, MemoryHandle::null())
    }

    /// Deletes the current value, then takes ownership of `handle`.
    ///
    /// # Safety
    ///
    /// Same as [`from_handle`](Self::from_handle).
    pub unsafe fn reset(&mut self, handle: MemoryHandle<T>) {
        let old = mem::replace(&mut self.handle, handle);
        if old.is_valid() {
            // SAFETY: `old` was owned exclusively by this owner.
            unsafe { self.deleter.delete(old) };
        }
    }

    /// Deletes the current value and leaves the owner invalid.
    pub fn clear(&mut self) {
        // SAFETY: a null handle carries no obligations.
        unsafe { self.reset(MemoryHandle::null()) };
    }

    /// Exchanges the contents of two owners.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.handle, &mut other.handle);
        mem::swap(&mut self.deleter, &mut other.deleter);
    }

    /// Returns the value, or `None` for an invalid owner.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: a valid owner points to an initialized `T` that only it
        // can reach; the borrow of `self` keeps the value alive.
        self.handle.resolve().map(|p| unsafe { &*p.as_ptr() })
    }

    /// Returns the value mutably, or `None` for an invalid owner.
    #[must_use]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: as in `get`, and `&mut self` makes the access unique.
        self.handle.resolve().map(|p| unsafe { &mut *p.as_ptr() })
    }

    /// Returns the owned handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &MemoryHandle<T> {
        &self.handle
    }

    /// Returns the deleter.
    #[inline]
    #[must_use]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Returns whether the owner holds an allocation.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Reinterprets the owner as owning a `U` with deleter `E`.
    ///
    /// Ownership moves; nothing is allocated, copied or deleted.
    ///
    /// # Safety
    ///
    /// The allocation must hold an initialized `U` that `E` may delete.
    #[must_use]
    pub unsafe fn cast<U, E: Deleter<U>>(mut self) -> ExclusiveOwner<U, E> {
        let handle = self.release();
        // SAFETY: upheld by the caller.
        unsafe { ExclusiveOwner::from_handle(handle.cast()) }
    }
}

impl<T, D: Deleter<T>> Drop for ExclusiveOwner<T, D> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T, D: Deleter<T>> Default for ExclusiveOwner<T, D> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, D: Deleter<T>> Deref for ExclusiveOwner<T, D> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the owner is invalid.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an invalid ExclusiveOwner"),
        }
    }
}

impl<T, D: Deleter<T>> DerefMut for ExclusiveOwner<T, D> {
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(value) => value,
            None => panic!("dereferenced an invalid ExclusiveOwner"),
        }
    }
}

impl<T, D: Deleter<T>> PartialEq for ExclusiveOwner<T, D> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T: fmt::Debug, D: Deleter<T>> fmt::Debug for ExclusiveOwner<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("ExclusiveOwner").field(value).finish(),
            None => f.write_str("ExclusiveOwner(null)"),
        }
    }
}
