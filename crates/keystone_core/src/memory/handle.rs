//! # Memory Handles
//!
//! A [`MemoryHandle`] describes one allocation: the raw value the allocator
//! handed out, the allocator itself, and the shape of the request. It is a
//! plain value. Copying it copies the description, never the memory, and
//! dropping it does nothing.
//!
//! [`MemoryHandle::resolve`] is the only place in the crate where a handle
//! becomes an address. Everything else goes through it.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use keystone_alloc::allocator::{request_layout, MAX_LOG2_ALIGN};
use keystone_alloc::{AllocResult, Allocator, NULL_HANDLE};

/// Largest `log2_align` a handle stores; fits in `u8` on every target.
#[allow(clippy::cast_possible_truncation)]
const MAX_LOG2: u8 = MAX_LOG2_ALIGN as u8;

/// Descriptor of a single allocation of `T`.
///
/// The invariant a valid handle upholds: its raw value is not
/// [`NULL_HANDLE`] and it names the allocator that produced it. A handle
/// may name an allocator while still null; such an *unallocated* handle
/// records where a later allocation should come from.
///
/// The address obtained from [`resolve`](Self::resolve) is only good until
/// the allocator next gets a chance to relocate memory.
pub struct MemoryHandle<T> {
    /// Allocator-specific handle value.
    raw: usize,
    /// Allocator that produced `raw`.
    alloc: Option<&'static dyn Allocator>,
    /// Log2 of the alignment.
    log2_align: u8,
    /// Whether the allocation backs another allocator.
    is_backing: bool,
    /// Size in bytes.
    size: usize,
    _marker: PhantomData<*const T>,
}

impl<T> MemoryHandle<T> {
    /// Creates a null handle with no allocator.
    #[inline]
    #[must_use]
    pub const fn null() -> Self {
        Self {
            raw: NULL_HANDLE,
            alloc: None,
            log2_align: 0,
            is_backing: false,
            size: 0,
            _marker: PhantomData,
        }
    }

    /// Creates a null handle that remembers `alloc`.
    #[inline]
    #[must_use]
    pub const fn unallocated(alloc: &'static dyn Allocator) -> Self {
        Self {
            alloc: Some(alloc),
            ..Self::null()
        }
    }

    /// Creates a handle from its parts.
    ///
    /// Building a handle is harmless; resolving or freeing one that does
    /// not describe a real allocation is not, which is why those operations
    /// carry the safety requirements. A `log2_align` beyond what `usize`
    /// can express is clamped to the largest one it can.
    #[inline]
    #[must_use]
    pub const fn from_raw_parts(
        raw: usize,
        alloc: &'static dyn Allocator,
        log2_align: u8,
        size: usize,
        is_backing: bool,
    ) -> Self {
        Self {
            raw,
            alloc: Some(alloc),
            log2_align: if log2_align > MAX_LOG2 { MAX_LOG2 } else { log2_align },
            is_backing,
            size,
            _marker: PhantomData,
        }
    }

    /// Allocates uninitialized memory for one `T` from `alloc`.
    ///
    /// # Errors
    ///
    /// Returns whatever the allocator reports when it cannot serve the
    /// request.
    pub fn allocate(alloc: &'static dyn Allocator) -> AllocResult<Self> {
        Self::allocate_layout(alloc, Layout::new::<T>(), false)
    }

    /// Allocates uninitialized memory for `layout` from `alloc`.
    ///
    /// Zero-sized layouts are padded to one byte.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidLayout`](keystone_alloc::AllocError) for
    /// an unusable layout, or the allocator's own error.
    pub fn allocate_layout(
        alloc: &'static dyn Allocator,
        layout: Layout,
        is_backing: bool,
    ) -> AllocResult<Self> {
        let layout = request_layout(layout.size(), layout.align())?;
        let raw = alloc.allocate_raw(layout, is_backing)?;
        // At most `usize::BITS - 1`, so this fits.
        #[allow(clippy::cast_possible_truncation)]
        let log2_align = layout.align().trailing_zeros() as u8;
        Ok(Self::from_raw_parts(raw, alloc, log2_align, layout.size(), is_backing))
    }

    /// Resolves the handle to the current address of its memory.
    ///
    /// Returns `None` for an invalid handle. The pointer must be re-resolved
    /// after any operation that could relocate the allocation.
    #[inline]
    #[must_use]
    pub fn resolve(&self) -> Option<NonNull<T>> {
        if !self.is_valid() {
            return None;
        }
        self.alloc?.resolve_raw(self.raw).map(NonNull::cast)
    }

    /// Returns the allocator this handle belongs to.
    #[inline]
    #[must_use]
    pub fn allocator(&self) -> Option<&'static dyn Allocator> {
        self.alloc
    }

    /// Returns the alignment of the allocation in bytes.
    #[inline]
    #[must_use]
    pub fn align(&self) -> usize {
        1_usize.checked_shl(u32::from(self.log2_align)).unwrap_or(0)
    }

    /// Returns log2 of the alignment.
    #[inline]
    #[must_use]
    pub const fn log2_align(&self) -> u8 {
        self.log2_align
    }

    /// Returns the size of the allocation in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the raw handle value.
    ///
    /// Only meaningful to the allocator that produced it.
    #[inline]
    #[must_use]
    pub const fn raw(&self) -> usize {
        self.raw
    }

    /// Returns whether the memory backs another allocator.
    #[inline]
    #[must_use]
    pub const fn is_backing(&self) -> bool {
        self.is_backing
    }

    /// Returns whether the handle refers to an allocation.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.raw != NULL_HANDLE && self.alloc.is_some()
    }

    /// Returns whether `alloc` produced this handle.
    #[must_use]
    pub fn is_owned_by(&self, alloc: &dyn Allocator) -> bool {
        self.alloc.is_some_and(|own| same_allocator(own, alloc))
    }

    /// Returns the memory to its allocator and clears the handle.
    ///
    /// The handle is left null (its allocator is kept), so calling this
    /// again on the same value does nothing. Copies taken before the call
    /// are not affected and must not be deallocated.
    ///
    /// Whatever `T` lived in the memory is not dropped.
    ///
    /// # Safety
    ///
    /// The handle must describe a live allocation of its allocator, and no
    /// other copy of it may be used to reach the memory afterwards.
    pub unsafe fn dealloc(&mut self) {
        if !self.is_valid() {
            return;
        }
        if let Some(alloc) = self.alloc {
            let layout = Layout::from_size_align(self.size, self.align());
            debug_assert!(layout.is_ok(), "handle records an impossible layout");
            if let Ok(layout) = layout {
                // SAFETY: the caller guarantees the allocation is live; size
                // and alignment are the ones it was allocated with.
                unsafe { alloc.deallocate_raw(self.raw, layout, self.is_backing) };
            }
        }
        self.raw = NULL_HANDLE;
        self.size = 0;
        self.log2_align = 0;
        self.is_backing = false;
    }

    /// Relabels the handle as pointing to `U`.
    ///
    /// No memory is touched. Whether the allocation is large and aligned
    /// enough for `U` is the caller's concern.
    #[inline]
    #[must_use]
    pub fn cast<U>(self) -> MemoryHandle<U> {
        MemoryHandle {
            raw: self.raw,
            alloc: self.alloc,
            log2_align: self.log2_align,
            is_backing: self.is_backing,
            size: self.size,
            _marker: PhantomData,
        }
    }

    /// Copies `count` elements from this allocation into `dst`.
    ///
    /// Both handles are resolved fresh. Nothing happens if either is
    /// invalid.
    ///
    /// # Safety
    ///
    /// Both allocations must hold at least `count` elements, the source
    /// elements must be initialized, and the two regions must not overlap.
    pub unsafe fn copy_to(&self, dst: &MemoryHandle<T>, count: usize) {
        debug_assert!(count * std::mem::size_of::<T>() <= self.size);
        debug_assert!(count * std::mem::size_of::<T>() <= dst.size);
        let (Some(src), Some(dst)) = (self.resolve(), dst.resolve()) else {
            return;
        };
        // SAFETY: upheld by the caller.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), count) };
    }
}

/// Address of the allocator object, without the vtable.
fn allocator_addr(alloc: &dyn Allocator) -> *const u8 {
    alloc as *const _ as *const u8
}

fn same_allocator(a: &dyn Allocator, b: &dyn Allocator) -> bool {
    ptr::eq(allocator_addr(a), allocator_addr(b))
}

impl<T> Clone for MemoryHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MemoryHandle<T> {}

impl<T> Default for MemoryHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

/// Two handles are equal when both are invalid, or when they carry the same
/// raw value from the same allocator.
impl<T, U> PartialEq<MemoryHandle<U>> for MemoryHandle<T> {
    fn eq(&self, other: &MemoryHandle<U>) -> bool {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => true,
            (true, true) => {
                self.raw == other.raw
                    && match (self.alloc, other.alloc) {
                        (Some(a), Some(b)) => same_allocator(a, b),
                        _ => false,
                    }
            }
            _ => false,
        }
    }
}

impl<T> Eq for MemoryHandle<T> {}

impl<T> Hash for MemoryHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.alloc {
            Some(alloc) if self.is_valid() => {
                self.raw.hash(state);
                allocator_addr(alloc).hash(state);
            }
            _ => NULL_HANDLE.hash(state),
        }
    }
}

impl<T> fmt::Debug for MemoryHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("MemoryHandle(null)");
        }
        f.debug_struct("MemoryHandle")
            .field("raw", &self.raw)
            .field("allocator", &self.alloc.map(|a| a.name()))
            .field("align", &self.align())
            .field("size", &self.size)
            .field("is_backing", &self.is_backing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_alloc::{HeapAllocator, TrackingAllocator};
    use std::collections::HashSet;
    use std::sync::OnceLock;

    static HEAP: HeapAllocator = HeapAllocator::new();
    static OTHER_HEAP: HeapAllocator = HeapAllocator::new();

    fn tracker() -> &'static TrackingAllocator {
        static TRACKER: OnceLock<TrackingAllocator> = OnceLock::new();
        TRACKER.get_or_init(|| TrackingAllocator::new(&HEAP))
    }

    #[test]
    fn test_null_handle() {
        let h = MemoryHandle::<u32>::null();
        assert!(!h.is_valid());
        assert!(h.resolve().is_none());
        assert!(h.allocator().is_none());
        assert_eq!(h.raw(), NULL_HANDLE);
    }

    #[test]
    fn test_unallocated_keeps_allocator() {
        let h = MemoryHandle::<u32>::unallocated(&HEAP);
        assert!(!h.is_valid());
        assert!(h.is_owned_by(&HEAP));
        assert!(!h.is_owned_by(&OTHER_HEAP));
    }

    #[test]
    fn test_allocate_records_shape() {
        let mut h = MemoryHandle::<u64>::allocate(&HEAP).unwrap();
        assert!(h.is_valid());
        assert_eq!(h.size(), 8);
        assert_eq!(h.align(), std::mem::align_of::<u64>());
        assert!(!h.is_backing());
        assert!(h.resolve().is_some());

        // SAFETY: live allocation, no copies used afterwards.
        unsafe { h.dealloc() };
    }

    #[test]
    fn test_zero_sized_allocation_is_padded() {
        let mut h = MemoryHandle::<()>::allocate(&HEAP).unwrap();
        assert!(h.is_valid());
        assert_eq!(h.size(), 1);
        // SAFETY: live allocation.
        unsafe { h.dealloc() };
    }

    #[test]
    fn test_dealloc_twice_is_noop() {
        let t = tracker();
        let mut h = MemoryHandle::<u32>::allocate(t).unwrap();
        let raw = h.raw();

        // SAFETY: first call frees a live allocation, second is a no-op on a
        // cleared handle.
        unsafe {
            h.dealloc();
            h.dealloc();
        }
        assert!(!h.is_valid());
        assert!(h.is_owned_by(t));
        assert_eq!(t.free_count_of(raw), 1);
    }

    #[test]
    fn test_cast_keeps_identity() {
        let mut h = MemoryHandle::<u64>::allocate(&HEAP).unwrap();
        let bytes: MemoryHandle<u8> = h.cast();
        assert_eq!(bytes.size(), 8);
        assert_eq!(bytes, h);
        assert_eq!(
            bytes.resolve().map(|p| p.as_ptr() as usize),
            h.resolve().map(|p| p.as_ptr() as usize)
        );
        // SAFETY: live allocation; `bytes` is not used afterwards.
        unsafe { h.dealloc() };
    }

    #[test]
    fn test_equality_includes_allocator() {
        let a = MemoryHandle::<u8>::from_raw_parts(7, &HEAP, 0, 1, false);
        let b = MemoryHandle::<u8>::from_raw_parts(7, &OTHER_HEAP, 0, 1, false);
        let c = MemoryHandle::<u8>::from_raw_parts(7, &HEAP, 3, 8, false);
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(MemoryHandle::<u8>::null(), MemoryHandle::<u16>::unallocated(&HEAP));
    }

    #[test]
    fn test_hash_agrees_with_eq() {
        let a = MemoryHandle::<u8>::from_raw_parts(7, &HEAP, 0, 1, false);
        let c = MemoryHandle::<u8>::from_raw_parts(7, &HEAP, 3, 8, false);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&c));
        set.insert(MemoryHandle::null());
        assert!(set.contains(&MemoryHandle::unallocated(&HEAP)));
    }

    #[test]
    fn test_oversized_alignment_is_clamped() {
        let h = MemoryHandle::<u8>::from_raw_parts(7, &HEAP, 64, 1, false);
        assert_eq!(u32::from(h.log2_align()), usize::BITS - 1);
        assert_eq!(h.align(), 1 << (usize::BITS - 1));
        assert!(format!("{h:?}").contains("align"));

        let top = MemoryHandle::<u8>::from_raw_parts(7, &HEAP, u8::MAX, 1, false);
        assert_eq!(top.align(), h.align());
        assert_eq!(top, h);
    }

    #[test]
    fn test_allocated_alignment_round_trips() {
        let layout = Layout::from_size_align(32, 32).unwrap();
        let mut h = MemoryHandle::<u8>::allocate_layout(&HEAP, layout, false).unwrap();
        assert_eq!(h.log2_align(), 5);
        assert_eq!(h.align(), 32);
        // SAFETY: live allocation, no copies.
        unsafe { h.dealloc() };
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "impossible layout")]
    fn test_dealloc_of_impossible_layout_is_caught() {
        let mut h = MemoryHandle::<u8>::from_raw_parts(7, &HEAP, 0, usize::MAX, false);
        // SAFETY: the layout check fails before the allocator is reached.
        unsafe { h.dealloc() };
    }

    #[test]
    fn test_copy_to() {
        let layout = Layout::array::<u32>(4).unwrap();
        let mut src = MemoryHandle::<u32>::allocate_layout(&HEAP, layout, false).unwrap();
        let mut dst = MemoryHandle::<u32>::allocate_layout(&HEAP, layout, false).unwrap();

        // SAFETY: both allocations hold four u32s and do not overlap.
        unsafe {
            let p = src.resolve().unwrap().as_ptr();
            for i in 0..4 {
                p.add(i).write(i as u32 * 10);
            }
            src.copy_to(&dst, 4);
            let q = dst.resolve().unwrap().as_ptr();
            assert_eq!(*q.add(3), 30);
            src.dealloc();
            dst.dealloc();
        }
    }
}
