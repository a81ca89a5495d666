//! # Control Blocks
//!
//! The counters behind shared ownership. A control block tracks three
//! numbers:
//!
//! | counter  | meaning                                              |
//! |----------|------------------------------------------------------|
//! | `strong` | owners keeping the data alive                        |
//! | `weak`   | observers watching the data                          |
//! | `self`   | owners plus observers keeping the block itself alive |
//!
//! The data dies when `strong` reaches zero, the block when `self` does.
//! [`PlainControlBlock`] is for single-threaded use, [`AtomicControlBlock`]
//! may be shared between threads. Neither ever panics.

use std::cell::Cell;
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// Counter state machine shared by [`SharedOwner`](super::SharedOwner)
/// and [`WeakObserver`](super::WeakObserver).
pub trait ControlBlock: Sized {
    /// A fresh block for one owner: `(strong, weak, self) = (1, 0, 1)`.
    fn new() -> Self;

    /// Adds a strong reference. `strong` must already be non-zero.
    fn inc_strong(&self);

    /// Drops a strong reference.
    ///
    /// Returns `true` exactly when this call took `strong` to zero. Does
    /// nothing and returns `false` when it already was zero.
    fn dec_strong(&self) -> bool;

    /// Adds a weak reference.
    fn inc_weak(&self);

    /// Drops a weak reference. Never goes below zero.
    fn dec_weak(&self);

    /// Adds a reference to the block itself.
    fn acquire(&self);

    /// Drops a reference to the block itself.
    ///
    /// Returns `true` when this call took `self` to zero; the caller must
    /// then free the block. Does nothing and returns `false` when it already
    /// was zero.
    fn release(&self) -> bool;

    /// Gives up the data without destroying it.
    ///
    /// Moves `strong` from one to zero and returns `true`. If any other
    /// strong reference exists nothing changes and `false` is returned.
    fn release_data(&self) -> bool;

    /// Adds a strong reference unless the data is already gone.
    fn try_inc_strong(&self) -> bool;

    /// Current strong count.
    fn strong_count(&self) -> u32;

    /// Current weak count.
    fn weak_count(&self) -> u32;

    /// Current self count.
    fn self_count(&self) -> u32;

    /// Whether the data is still alive.
    #[inline]
    fn is_valid(&self) -> bool {
        self.strong_count() > 0
    }
}

/// Single-threaded counters.
#[derive(Debug)]
pub struct PlainControlBlock {
    strong: Cell<u32>,
    weak: Cell<u32>,
    refs: Cell<u32>,
}

fn increment(cell: &Cell<u32>) {
    match cell.get().checked_add(1) {
        Some(next) => cell.set(next),
        None => std::process::abort(),
    }
}

impl ControlBlock for PlainControlBlock {
    fn new() -> Self {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(0),
            refs: Cell::new(1),
        }
    }

    fn inc_strong(&self) {
        debug_assert!(self.strong.get() > 0);
        increment(&self.strong);
    }

    fn dec_strong(&self) -> bool {
        match self.strong.get() {
            0 => false,
            n => {
                self.strong.set(n - 1);
                n == 1
            }
        }
    }

    fn inc_weak(&self) {
        increment(&self.weak);
    }

    fn dec_weak(&self) {
        self.weak.set(self.weak.get().saturating_sub(1));
    }

    fn acquire(&self) {
        increment(&self.refs);
    }

    fn release(&self) -> bool {
        match self.refs.get() {
            0 => false,
            n => {
                self.refs.set(n - 1);
                n == 1
            }
        }
    }

    fn release_data(&self) -> bool {
        if self.strong.get() == 1 {
            self.strong.set(0);
            true
        } else {
            false
        }
    }

    fn try_inc_strong(&self) -> bool {
        if self.strong.get() == 0 {
            return false;
        }
        increment(&self.strong);
        true
    }

    fn strong_count(&self) -> u32 {
        self.strong.get()
    }

    fn weak_count(&self) -> u32 {
        self.weak.get()
    }

    fn self_count(&self) -> u32 {
        self.refs.get()
    }
}

/// Counters that may be touched from several threads at once.
#[derive(Debug)]
pub struct AtomicControlBlock {
    strong: AtomicU32,
    weak: AtomicU32,
    refs: AtomicU32,
}

/// Counts above this abort; the distance to `u32::MAX` absorbs increments
/// racing with the check.
const MAX_REFCOUNT: u32 = u32::MAX / 2;

fn increment_atomic(counter: &AtomicU32) {
    if counter.fetch_add(1, Ordering::Relaxed) > MAX_REFCOUNT {
        std::process::abort();
    }
}

impl ControlBlock for AtomicControlBlock {
    fn new() -> Self {
        Self {
            strong: AtomicU32::new(1),
            weak: AtomicU32::new(0),
            refs: AtomicU32::new(1),
        }
    }

    fn inc_strong(&self) {
        increment_atomic(&self.strong);
    }

    fn dec_strong(&self) -> bool {
        let previous = self
            .strong
            .fetch_update(Ordering::Release, Ordering::Relaxed, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                // Every write made under a strong reference happens before
                // the data is destroyed.
                fence(Ordering::Acquire);
                true
            }
            _ => false,
        }
    }

    fn inc_weak(&self) {
        increment_atomic(&self.weak);
    }

    fn dec_weak(&self) {
        let _ = self
            .weak
            .fetch_update(Ordering::Release, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn acquire(&self) {
        increment_atomic(&self.refs);
    }

    fn release(&self) -> bool {
        let previous = self
            .refs
            .fetch_update(Ordering::Release, Ordering::Relaxed, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                fence(Ordering::Acquire);
                true
            }
            _ => false,
        }
    }

    fn release_data(&self) -> bool {
        self.strong
            .compare_exchange(1, 0, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn try_inc_strong(&self) -> bool {
        self.strong
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |n| {
                if n == 0 {
                    None
                } else {
                    if n > MAX_REFCOUNT {
                        std::process::abort();
                    }
                    Some(n + 1)
                }
            })
            .is_ok()
    }

    fn strong_count(&self) -> u32 {
        self.strong.load(Ordering::Acquire)
    }

    fn weak_count(&self) -> u32 {
        self.weak.load(Ordering::Acquire)
    }

    fn self_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }
}
