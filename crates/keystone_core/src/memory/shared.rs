//! # Shared Ownership
//!
//! [`SharedOwner`] keeps its data alive through a separately allocated
//! [`ControlBlock`]. Data and block come from the same allocator but are
//! freed independently: the data when the last owner goes, the block when
//! the last owner or observer goes.
//!
//! The control block type picks the threading model. With the default
//! [`PlainControlBlock`] owners stay on one thread; with
//! [`AtomicControlBlock`] they are `Send + Sync` whenever `T` is.

#![allow(unsafe_code)]

use std::fmt;
use std::mem;
use std::ops::Deref;

use keystone_alloc::{global_allocator, AllocResult, Allocator};

use super::control::{AtomicControlBlock, ControlBlock, PlainControlBlock};
use super::deleter::{emplace, DefaultDeleter, Deleter};
use super::handle::MemoryHandle;
use super::weak::WeakObserver;

/// Resolves a control handle to its block.
///
/// # Safety
///
/// The caller must hold a reference (`self` count) on the block for as long
/// as the returned borrow is used.
pub(super) unsafe fn block_ref<C>(control: &MemoryHandle<C>) -> Option<&C> {
    // SAFETY: upheld by the caller.
    control.resolve().map(|p| unsafe { &*p.as_ptr() })
}

/// Drops and frees a control block.
///
/// # Safety
///
/// The block's `self` count must have reached zero.
pub(super) unsafe fn destroy_block<C: ControlBlock>(control: MemoryHandle<C>) {
    // SAFETY: upheld by the caller; the block was created with `emplace`.
    unsafe { DefaultDeleter::<C>::default().delete(control) };
}

/// Reference-counted owner of one allocation.
pub struct SharedOwner<T, D: Deleter<T> = DefaultDeleter<T>, C: ControlBlock = PlainControlBlock> {
    data: MemoryHandle<T>,
    control: MemoryHandle<C>,
    deleter: D,
}

// SAFETY: the counters are atomic, and like `Arc` the value may be dropped
// on whichever thread releases it last.
unsafe impl<T: Send + Sync, D: Deleter<T> + Send> Send for SharedOwner<T, D, AtomicControlBlock> {}
// SAFETY: shared access hands out `&T` only and touches atomics only.
unsafe impl<T: Send + Sync, D: Deleter<T> + Sync> Sync for SharedOwner<T, D, AtomicControlBlock> {}

impl<T, D: Deleter<T>, C: ControlBlock> SharedOwner<T, D, C> {
    /// Creates an invalid owner.
    #[must_use]
    pub fn null() -> Self {
        Self::null_with(D::default())
    }

    fn null_with(deleter: D) -> Self {
        Self {
            data: MemoryHandle::null(),
            control: MemoryHandle::null(),
            deleter,
        }
    }

    /// Assembles an owner from handles whose references are already counted.
    ///
    /// # Safety
    ///
    /// The caller transfers one strong and one `self` reference on the block
    /// behind `control`, which must govern `data`.
    pub(super) unsafe fn from_parts(data: MemoryHandle<T>, control: MemoryHandle<C>, deleter: D) -> Self {
        Self {
            data,
            control,
            deleter,
        }
    }

    /// Moves `value` into memory from the default allocator.
    ///
    /// Returns an invalid owner if either allocation fails.
    #[must_use]
    pub fn create(value: T) -> Self {
        Self::create_in(global_allocator(), value)
    }

    /// Moves `value` into memory from `alloc`.
    ///
    /// Returns an invalid owner if either allocation fails, with no memory
    /// left allocated.
    #[must_use]
    pub fn create_in(alloc: &'static dyn Allocator, value: T) -> Self {
        Self::try_create_in(alloc, value).unwrap_or_else(|_| Self::null())
    }

    /// Moves `value` into memory from `alloc`, reporting why it failed.
    ///
    /// # Errors
    ///
    /// Returns the allocator's error for the data or the control block.
    pub fn try_create_in(alloc: &'static dyn Allocator, value: T) -> AllocResult<Self> {
        let data = emplace(alloc, value)?;
        let mut deleter = D::default();
        match emplace(alloc, C::new()) {
            Ok(control) => Ok(Self {
                data,
                control,
                deleter,
            }),
            Err(err) => {
                // SAFETY: `data` was just created and never shared.
                unsafe { deleter.delete(data) };
                Err(err)
            }
        }
    }

    /// Takes ownership of an existing allocation.
    ///
    /// The control block is allocated from the handle's allocator. If that
    /// fails the data is deleted and the owner is invalid.
    ///
    /// # Safety
    ///
    /// `handle` must be null or point to an initialized `T` that nothing
    /// else will delete or deallocate.
    #[must_use]
    pub unsafe fn from_handle(handle: MemoryHandle<T>) -> Self {
        // SAFETY: upheld by the caller.
        unsafe { Self::from_handle_with_deleter(handle, D::default()) }
    }

    /// Takes ownership of an existing allocation with a specific deleter.
    ///
    /// # Safety
    ///
    /// Same as [`from_handle`](Self::from_handle).
    #[must_use]
    pub unsafe fn from_handle_with_deleter(handle: MemoryHandle<T>, mut deleter: D) -> Self {
        let alloc = match handle.allocator() {
            Some(alloc) if handle.is_valid() => alloc,
            _ => return Self::null_with(deleter),
        };
        match emplace(alloc, C::new()) {
            Ok(control) => Self {
                data: handle,
                control,
                deleter,
            },
            Err(_) => {
                // SAFETY: the caller handed the allocation over.
                unsafe { deleter.delete(handle) };
                Self::null_with(deleter)
            }
        }
    }

    /// Drops this owner's references and leaves it invalid.
    fn unlink(&mut self) {
        let data = mem::replace(&mut self.data, MemoryHandle::null());
        let control = mem::replace(&mut self.control, MemoryHandle::null());
        // SAFETY: this owner held a reference on the block.
        let Some(block) = (unsafe { block_ref(&control) }) else {
            return;
        };
        if block.dec_strong() && data.is_valid() {
            // SAFETY: that was the last strong reference.
            unsafe { self.deleter.delete(data) };
        }
        if block.release() {
            // SAFETY: that was the last reference to the block.
            unsafe { destroy_block(control) };
        }
    }

    /// Hands the data back without deleting it.
    ///
    /// Only the sole strong owner can do this; any other owner is returned
    /// unchanged. Observers see the data as gone afterwards. An invalid
    /// owner yields a null handle.
    ///
    /// # Errors
    ///
    /// Returns `self` when other strong owners exist.
    pub fn try_release(mut self) -> Result<MemoryHandle<T>, Self> {
        // SAFETY: this owner holds a reference on the block.
        let released = unsafe { block_ref(&self.control) }.map_or(true, ControlBlock::release_data);
        if !released {
            return Err(self);
        }
        let data = mem::replace(&mut self.data, MemoryHandle::null());
        // Dropping `self` now only gives up the block.
        Ok(data)
    }

    /// Drops the current reference, then takes ownership of `handle`.
    ///
    /// # Safety
    ///
    /// Same as [`from_handle`](Self::from_handle).
    pub unsafe fn reset(&mut self, handle: MemoryHandle<T>) {
        self.unlink();
        let deleter = mem::take(&mut self.deleter);
        // SAFETY: upheld by the caller.
        *self = unsafe { Self::from_handle_with_deleter(handle, deleter) };
    }

    /// Drops the current reference and leaves the owner invalid.
    pub fn clear(&mut self) {
        self.unlink();
    }

    /// Exchanges the contents of two owners.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.data, &mut other.data);
        mem::swap(&mut self.control, &mut other.control);
        mem::swap(&mut self.deleter, &mut other.deleter);
    }

    fn block(&self) -> Option<&C> {
        // SAFETY: a valid owner holds a reference on its block.
        unsafe { block_ref(&self.control) }
    }

    /// Returns the value, or `None` for an invalid owner.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        if !self.is_valid() {
            return None;
        }
        // SAFETY: this owner's strong reference keeps the value alive for
        // the borrow of `self`.
        self.data.resolve().map(|p| unsafe { &*p.as_ptr() })
    }

    /// Returns the value mutably if this is the only owner and nobody
    /// observes it.
    #[must_use]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let unique = self
            .block()
            .is_some_and(|b| b.strong_count() == 1 && b.weak_count() == 0);
        if !unique {
            return None;
        }
        // SAFETY: no other owner or observer can reach the value.
        self.data.resolve().map(|p| unsafe { &mut *p.as_ptr() })
    }

    /// Number of owners sharing the value; 0 for an invalid owner.
    #[must_use]
    pub fn use_count(&self) -> u32 {
        self.block().map_or(0, ControlBlock::strong_count)
    }

    /// Number of observers of the value.
    #[must_use]
    pub fn weak_count(&self) -> u32 {
        self.block().map_or(0, ControlBlock::weak_count)
    }

    /// Returns whether the owner holds a value.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.data.is_valid() && self.control.is_valid()
    }

    /// Returns the data handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &MemoryHandle<T> {
        &self.data
    }

    /// Returns the control block handle.
    #[inline]
    #[must_use]
    pub fn control_handle(&self) -> &MemoryHandle<C> {
        &self.control
    }

    /// Returns the deleter.
    #[inline]
    #[must_use]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Creates an observer of this owner's value.
    #[must_use]
    pub fn downgrade(&self) -> WeakObserver<T, C> {
        WeakObserver::from(self)
    }

    /// Reinterprets the owner as owning a `U` with deleter `E`.
    ///
    /// The reference moves; no counter changes. For a second owner of the
    /// new type use `owner.clone().cast()`.
    ///
    /// # Safety
    ///
    /// The allocation must hold an initialized `U` that `E` may delete, and
    /// every other owner of it must agree on how it is deleted.
    #[must_use]
    pub unsafe fn cast<U, E: Deleter<U>>(mut self) -> SharedOwner<U, E, C> {
        let data = mem::replace(&mut self.data, MemoryHandle::null());
        let control = mem::replace(&mut self.control, MemoryHandle::null());
        // SAFETY: the references held by `self` move to the new owner.
        unsafe { SharedOwner::from_parts(data.cast(), control, E::default()) }
    }
}

impl<T, D: Deleter<T> + Clone, C: ControlBlock> Clone for SharedOwner<T, D, C> {
    fn clone(&self) -> Self {
        match self.block() {
            Some(block) if self.is_valid() => {
                block.acquire();
                block.inc_strong();
                Self {
                    data: self.data,
                    control: self.control,
                    deleter: self.deleter.clone(),
                }
            }
            _ => Self::null(),
        }
    }
}

impl<T, D: Deleter<T>, C: ControlBlock> Drop for SharedOwner<T, D, C> {
    fn drop(&mut self) {
        self.unlink();
    }
}

impl<T, D: Deleter<T>, C: ControlBlock> Default for SharedOwner<T, D, C> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, D: Deleter<T>, C: ControlBlock> Deref for SharedOwner<T, D, C> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the owner is invalid.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an invalid SharedOwner"),
        }
    }
}

impl<T, D: Deleter<T>, C: ControlBlock> PartialEq for SharedOwner<T, D, C> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T: fmt::Debug, D: Deleter<T>, C: ControlBlock> fmt::Debug for SharedOwner<T, D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f
                .debug_struct("SharedOwner")
                .field("value", value)
                .field("use_count", &self.use_count())
                .finish(),
            None => f.write_str("SharedOwner(null)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::{tracker, tracker_with_limit, DropCounter};
    use std::cell::Cell;

    type Atomic<T> = SharedOwner<T, DefaultDeleter<T>, AtomicControlBlock>;

    #[test]
    fn test_clone_counts() {
        let t = tracker();
        let a = SharedOwner::<i32>::create_in(t, 5);
        assert_eq!(a.use_count(), 1);
        assert_eq!(t.live_count(), 2);

        let b = a.clone();
        assert_eq!(a.use_count(), 2);
        assert_eq!(a, b);

        drop(b);
        assert_eq!(a.use_count(), 1);
        assert_eq!(*a, 5);
    }

    #[test]
    fn test_last_owner_frees_data_and_block() {
        let t = tracker();
        let drops = Cell::new(0);

        let a = SharedOwner::<_>::create_in(t, DropCounter(&drops));
        let data = a.handle().raw();
        let control = a.control_handle().raw();
        let b = a.clone();
        drop(a);
        assert_eq!(drops.get(), 0);
        drop(b);

        assert_eq!(drops.get(), 1);
        assert_eq!(t.free_count_of(data), 1);
        assert_eq!(t.free_count_of(control), 1);
        assert_eq!(t.live_count(), 0);
        assert_eq!(t.double_free_count(), 0);
    }

    #[test]
    fn test_control_block_failure_leaves_nothing() {
        // Room for the data but not for the control block.
        let t = tracker_with_limit(1);
        let drops = Cell::new(0);

        let owner = SharedOwner::<_>::create_in(t, DropCounter(&drops));
        assert!(!owner.is_valid());
        assert_eq!(owner.use_count(), 0);
        assert_eq!(drops.get(), 1);
        assert_eq!(t.alloc_count(), 1);
        assert_eq!(t.dealloc_count(), 1);
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    fn test_from_handle_control_failure_deletes_data() {
        let t = tracker_with_limit(1);
        let handle = crate::memory::deleter::emplace(t, 3_u64).unwrap();

        // SAFETY: `handle` is initialized and owned by nobody else.
        let owner = unsafe { SharedOwner::<u64>::from_handle(handle) };
        assert!(!owner.is_valid());
        assert!(!t.is_live(handle.raw()));
    }

    #[test]
    fn test_get_mut_requires_unique() {
        let t = tracker();
        let mut a = SharedOwner::<Vec<u8>>::create_in(t, vec![1]);
        if let Some(v) = a.get_mut() {
            v.push(2);
        }
        assert_eq!(a.as_slice(), &[1, 2]);

        let b = a.clone();
        assert!(a.get_mut().is_none());
        drop(b);

        let weak = a.downgrade();
        assert!(a.get_mut().is_none());
        drop(weak);
        assert!(a.get_mut().is_some());
    }

    #[test]
    fn test_try_release_sole_owner() {
        let t = tracker();
        let drops = Cell::new(0);

        let a = SharedOwner::<_>::create_in(t, DropCounter(&drops));
        let b = a.clone();
        let a = a.try_release().unwrap_err();
        assert_eq!(a.use_count(), 2);
        drop(b);

        let weak = a.downgrade();
        let control = a.control_handle().raw();
        let handle = a.try_release().unwrap();
        assert_eq!(drops.get(), 0);
        assert!(!weak.is_valid());
        assert!(t.is_live(handle.raw()));
        // The observer still pins the block.
        assert!(t.is_live(control));
        drop(weak);
        assert!(!t.is_live(control));

        // SAFETY: the released handle is ours to delete.
        unsafe { DefaultDeleter::<DropCounter<'_>>::default().delete(handle) };
        assert_eq!(drops.get(), 1);
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    fn test_reset_and_clear() {
        let t = tracker();
        let mut a = SharedOwner::<u32>::create_in(t, 1);
        let b = a.clone();

        let next = crate::memory::deleter::emplace(t, 2_u32).unwrap();
        // SAFETY: `next` is initialized and owned by nobody else.
        unsafe { a.reset(next) };
        assert_eq!(*a, 2);
        assert_eq!(a.use_count(), 1);
        assert_eq!(*b, 1);
        assert_eq!(b.use_count(), 1);

        a.clear();
        assert!(!a.is_valid());
        assert!(a.get().is_none());
        drop(b);
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    fn test_swap() {
        let t = tracker();
        let mut a = SharedOwner::<u8>::create_in(t, 1);
        let mut b = SharedOwner::<u8>::create_in(t, 2);
        a.swap(&mut b);
        assert_eq!((*a, *b), (2, 1));
    }

    #[test]
    fn test_cast_moves_reference() {
        let t = tracker();
        let a = SharedOwner::<u32>::create_in(t, u32::from_ne_bytes([1, 2, 3, 4]));
        let b = a.clone();
        // SAFETY: a u32 allocation holds a valid [u8; 4] with no drop glue.
        let bytes: SharedOwner<[u8; 4]> = unsafe { a.cast() };
        assert_eq!(bytes.use_count(), 2);
        assert_eq!(*bytes, [1, 2, 3, 4]);
        drop(b);
        drop(bytes);
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    #[should_panic(expected = "invalid SharedOwner")]
    fn test_deref_null_panics() {
        let owner = SharedOwner::<u8>::null();
        assert_eq!(*owner, 0);
    }

    #[test]
    fn test_atomic_owner_is_send_sync() {
        fn assert_send_sync<X: Send + Sync>() {}
        assert_send_sync::<Atomic<String>>();

        let t = tracker();
        let owner = Atomic::create_in(t, String::from("shared"));
        let clone = owner.clone();
        let len = std::thread::spawn(move || clone.len()).join().unwrap();
        assert_eq!(len, 6);
        assert_eq!(owner.use_count(), 1);
    }
}
