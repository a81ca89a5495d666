//! # Deleters
//!
//! What an owner does with its handle when ownership ends.

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr;

use keystone_alloc::{AllocError, AllocResult, Allocator};

use super::handle::MemoryHandle;

/// Destroys the value behind a handle and returns its memory.
///
/// Deleters are default-constructible so that owners can be created
/// without one. A call must not panic.
pub trait Deleter<T>: Default {
    /// Destroys whatever `handle` refers to.
    ///
    /// # Safety
    ///
    /// `handle` must be valid, point to an initialized `T`, and be reachable
    /// by nobody else once this returns.
    unsafe fn delete(&mut self, handle: MemoryHandle<T>);
}

/// Drops the value in place, then deallocates through the handle.
pub struct DefaultDeleter<T>(PhantomData<fn(T)>);

impl<T> Default for DefaultDeleter<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> Clone for DefaultDeleter<T> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<T> std::fmt::Debug for DefaultDeleter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DefaultDeleter")
    }
}

impl<T> Deleter<T> for DefaultDeleter<T> {
    unsafe fn delete(&mut self, mut handle: MemoryHandle<T>) {
        if let Some(value) = handle.resolve() {
            // SAFETY: the caller guarantees an initialized `T` that nobody
            // else reaches.
            unsafe { ptr::drop_in_place(value.as_ptr()) };
        }
        // SAFETY: same guarantee; the memory is returned exactly once.
        unsafe { handle.dealloc() };
    }
}

/// Creates `T` in freshly allocated memory.
///
/// On failure `value` is dropped and no allocation remains.
pub(crate) fn emplace<T>(alloc: &'static dyn Allocator, value: T) -> AllocResult<MemoryHandle<T>> {
    let mut handle = MemoryHandle::<T>::allocate(alloc)?;
    match handle.resolve() {
        Some(slot) => {
            // SAFETY: the memory was just allocated for one `T`.
            unsafe { slot.as_ptr().write(value) };
            Ok(handle)
        }
        None => {
            // SAFETY: the handle is live and was never shared.
            unsafe { handle.dealloc() };
            Err(AllocError::OutOfMemory {
                size: std::mem::size_of::<T>(),
                align: std::mem::align_of::<T>(),
            })
        }
    }
}
