//! # Weak Observation
//!
//! A [`WeakObserver`] keeps the control block alive but not the data. It
//! can tell whether the data still exists and can be promoted back to a
//! [`SharedOwner`] while it does.

#![allow(unsafe_code)]

use std::fmt;
use std::mem;
use std::ptr;

use super::control::{AtomicControlBlock, ControlBlock, PlainControlBlock};
use super::deleter::{DefaultDeleter, Deleter};
use super::handle::MemoryHandle;
use super::shared::{block_ref, destroy_block, SharedOwner};

/// Non-owning observer of a shared value.
pub struct WeakObserver<T, C: ControlBlock = PlainControlBlock> {
    data: MemoryHandle<T>,
    control: MemoryHandle<C>,
}

// SAFETY: same reasoning as for the atomic `SharedOwner`.
unsafe impl<T: Send + Sync> Send for WeakObserver<T, AtomicControlBlock> {}
// SAFETY: same reasoning as for the atomic `SharedOwner`.
unsafe impl<T: Send + Sync> Sync for WeakObserver<T, AtomicControlBlock> {}

impl<T, C: ControlBlock> WeakObserver<T, C> {
    /// Creates an observer of nothing.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            data: MemoryHandle::null(),
            control: MemoryHandle::null(),
        }
    }

    fn block(&self) -> Option<&C> {
        // SAFETY: a non-null observer holds a reference on its block.
        unsafe { block_ref(&self.control) }
    }

    /// Whether the observed value is still alive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.block().is_some_and(ControlBlock::is_valid)
    }

    /// Number of owners of the observed value; 0 once it is gone.
    #[must_use]
    pub fn use_count(&self) -> u32 {
        self.block().map_or(0, ControlBlock::strong_count)
    }

    /// Number of observers, this one included.
    #[must_use]
    pub fn weak_count(&self) -> u32 {
        self.block().map_or(0, ControlBlock::weak_count)
    }

    /// Resolves the data handle without checking that the value is alive.
    ///
    /// Null for a null observer.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.data
            .resolve()
            .map_or(ptr::null(), |p| p.as_ptr().cast_const())
    }

    /// Returns the value if it is still alive.
    ///
    /// # Safety
    ///
    /// Nothing stops the last owner from dropping the value while the
    /// returned reference exists. The caller must guarantee an owner
    /// outlives the borrow; reading after the strong count reached zero is
    /// undefined behaviour. Prefer [`upgrade`](Self::upgrade).
    #[must_use]
    pub unsafe fn get(&self) -> Option<&T> {
        if !self.is_valid() {
            return None;
        }
        // SAFETY: the value is alive now; the caller keeps it alive.
        self.data.resolve().map(|p| unsafe { &*p.as_ptr() })
    }

    /// Promotes to an owner with the default deleter.
    ///
    /// Returns `None` once the value is gone.
    #[must_use]
    pub fn upgrade(&self) -> Option<SharedOwner<T, DefaultDeleter<T>, C>> {
        self.upgrade_with()
    }

    /// Promotes to an owner that deletes through `D`.
    ///
    /// Every owner of the value should agree on `D`.
    #[must_use]
    pub fn upgrade_with<D: Deleter<T>>(&self) -> Option<SharedOwner<T, D, C>> {
        let block = self.block()?;
        if !block.try_inc_strong() {
            return None;
        }
        block.acquire();
        // SAFETY: the strong and self references just taken move into the
        // new owner.
        Some(unsafe { SharedOwner::from_parts(self.data, self.control, D::default()) })
    }

    /// Returns the data handle.
    #[inline]
    #[must_use]
    pub fn data_handle(&self) -> &MemoryHandle<T> {
        &self.data
    }

    /// Exchanges the contents of two observers.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.data, &mut other.data);
        mem::swap(&mut self.control, &mut other.control);
    }
}

impl<T, D: Deleter<T>, C: ControlBlock> From<&SharedOwner<T, D, C>> for WeakObserver<T, C> {
    fn from(owner: &SharedOwner<T, D, C>) -> Self {
        if !owner.is_valid() {
            return Self::null();
        }
        let control = *owner.control_handle();
        // SAFETY: the owner holds a reference on the block.
        let Some(block) = (unsafe { block_ref(&control) }) else {
            return Self::null();
        };
        block.inc_weak();
        block.acquire();
        Self {
            data: *owner.handle(),
            control,
        }
    }
}

impl<T, C: ControlBlock> Clone for WeakObserver<T, C> {
    fn clone(&self) -> Self {
        match self.block() {
            Some(block) => {
                block.inc_weak();
                block.acquire();
                Self {
                    data: self.data,
                    control: self.control,
                }
            }
            None => Self::null(),
        }
    }
}

impl<T, C: ControlBlock> Drop for WeakObserver<T, C> {
    fn drop(&mut self) {
        let control = mem::replace(&mut self.control, MemoryHandle::null());
        // SAFETY: this observer held a reference on the block.
        let Some(block) = (unsafe { block_ref(&control) }) else {
            return;
        };
        block.dec_weak();
        if block.release() {
            // SAFETY: that was the last reference to the block.
            unsafe { destroy_block(control) };
        }
    }
}

impl<T, C: ControlBlock> Default for WeakObserver<T, C> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, C: ControlBlock> PartialEq for WeakObserver<T, C> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T, C: ControlBlock> fmt::Debug for WeakObserver<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObserver")
            .field("data", &self.data)
            .field("use_count", &self.use_count())
            .finish()
    }
}
