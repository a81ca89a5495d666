//! # Allocation Statistics
//!
//! Current, peak and lifetime totals for one allocator.

use parking_lot::{const_mutex, Mutex};

/// Snapshot of an allocator's bookkeeping.
///
/// `cur_*` values describe live allocations, `max_*` the highest concurrent
/// value seen, `total_*` everything ever allocated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Bytes currently allocated.
    pub cur_memory: usize,
    /// Number of live allocations.
    pub cur_allocs: usize,
    /// Bytes of overhead held by live allocations.
    pub cur_overhead: usize,
    /// Bytes of live allocations that back another allocator.
    pub cur_backing: usize,

    /// Peak of `cur_memory`.
    pub max_memory: usize,
    /// Peak of `cur_allocs`.
    pub max_allocs: usize,
    /// Peak of `cur_overhead`.
    pub max_overhead: usize,
    /// Peak of `cur_backing`.
    pub max_backing: usize,

    /// Bytes allocated over the allocator's lifetime.
    pub total_memory: usize,
    /// Allocations made over the allocator's lifetime.
    pub total_allocs: usize,
    /// Overhead accumulated over the allocator's lifetime.
    pub total_overhead: usize,
    /// Backing memory handed out over the allocator's lifetime.
    pub total_backing: usize,
}

impl AllocStats {
    /// All-zero statistics.
    pub const ZERO: Self = Self {
        cur_memory: 0,
        cur_allocs: 0,
        cur_overhead: 0,
        cur_backing: 0,
        max_memory: 0,
        max_allocs: 0,
        max_overhead: 0,
        max_backing: 0,
        total_memory: 0,
        total_allocs: 0,
        total_overhead: 0,
        total_backing: 0,
    };
}

/// Thread-safe recorder behind [`AllocStats`].
///
/// Every allocator embeds one. The lock is held only for a handful of
/// integer updates.
pub struct StatsRecorder {
    inner: Mutex<AllocStats>,
}

impl StatsRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: const_mutex(AllocStats::ZERO),
        }
    }

    /// Records a new allocation.
    pub fn add_alloc(&self, memory: usize, overhead: usize, is_backing: bool) {
        let backing = if is_backing { memory } else { 0 };
        let mut s = self.inner.lock();

        s.cur_memory += memory;
        s.cur_allocs += 1;
        s.cur_overhead += overhead;
        s.cur_backing += backing;

        s.total_memory += memory;
        s.total_allocs += 1;
        s.total_overhead += overhead;
        s.total_backing += backing;

        s.max_memory = s.max_memory.max(s.cur_memory);
        s.max_allocs = s.max_allocs.max(s.cur_allocs);
        s.max_overhead = s.max_overhead.max(s.cur_overhead);
        s.max_backing = s.max_backing.max(s.cur_backing);
    }

    /// Records the end of an allocation.
    pub fn remove_alloc(&self, memory: usize, overhead: usize, is_backing: bool) {
        let backing = if is_backing { memory } else { 0 };
        let mut s = self.inner.lock();

        s.cur_memory = s.cur_memory.saturating_sub(memory);
        s.cur_allocs = s.cur_allocs.saturating_sub(1);
        s.cur_overhead = s.cur_overhead.saturating_sub(overhead);
        s.cur_backing = s.cur_backing.saturating_sub(backing);
    }

    /// Zeroes the current values, keeping peaks and totals.
    pub fn reset_current(&self) {
        let mut s = self.inner.lock();
        s.cur_memory = 0;
        s.cur_allocs = 0;
        s.cur_overhead = 0;
        s.cur_backing = 0;
    }

    /// Copies out the current statistics.
    #[must_use]
    pub fn snapshot(&self) -> AllocStats {
        *self.inner.lock()
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
