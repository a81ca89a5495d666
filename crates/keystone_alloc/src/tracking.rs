//! # Tracking Allocator
//!
//! Instrumented wrapper used to verify ownership code: it remembers every
//! live raw handle, counts frees per handle, and refuses to forward a free of
//! a handle it does not consider live.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::allocator::Allocator;
use crate::config::TrackingConfig;
use crate::error::{AllocError, AllocResult};
use crate::stats::AllocStats;

#[derive(Default)]
struct Ledger {
    /// Live raw handles and the layout they were allocated with.
    live: HashMap<usize, Layout>,
    /// Number of accepted frees per raw handle.
    freed: HashMap<usize, usize>,
}

/// Allocator wrapper that records what happens to every handle.
pub struct TrackingAllocator {
    inner: &'static dyn Allocator,
    /// Maximum number of simultaneously live allocations.
    live_limit: Option<usize>,
    ledger: Mutex<Ledger>,
    allocs: AtomicUsize,
    deallocs: AtomicUsize,
    failed: AtomicUsize,
    double_frees: AtomicUsize,
}

impl TrackingAllocator {
    /// Wraps `inner` without any limit.
    #[must_use]
    pub fn new(inner: &'static dyn Allocator) -> Self {
        Self {
            inner,
            live_limit: None,
            ledger: Mutex::new(Ledger::default()),
            allocs: AtomicUsize::new(0),
            deallocs: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            double_frees: AtomicUsize::new(0),
        }
    }

    /// Wraps `inner`, failing once `limit` allocations are live.
    #[must_use]
    pub fn with_live_limit(inner: &'static dyn Allocator, limit: usize) -> Self {
        Self {
            live_limit: Some(limit),
            ..Self::new(inner)
        }
    }

    /// Wraps `inner` as described by `config`.
    #[must_use]
    pub fn from_config(inner: &'static dyn Allocator, config: &TrackingConfig) -> Self {
        Self {
            live_limit: config.live_limit,
            ..Self::new(inner)
        }
    }

    /// Number of successful allocations.
    #[must_use]
    pub fn alloc_count(&self) -> usize {
        self.allocs.load(Ordering::Relaxed)
    }

    /// Number of accepted deallocations.
    #[must_use]
    pub fn dealloc_count(&self) -> usize {
        self.deallocs.load(Ordering::Relaxed)
    }

    /// Number of refused allocation requests.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Number of frees of handles that were not live.
    #[must_use]
    pub fn double_free_count(&self) -> usize {
        self.double_frees.load(Ordering::Relaxed)
    }

    /// Number of currently live allocations.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.ledger.lock().live.len()
    }

    /// Whether `raw` is currently live.
    #[must_use]
    pub fn is_live(&self, raw: usize) -> bool {
        self.ledger.lock().live.contains_key(&raw)
    }

    /// How many times `raw` has been freed.
    #[must_use]
    pub fn free_count_of(&self, raw: usize) -> usize {
        self.ledger.lock().freed.get(&raw).copied().unwrap_or(0)
    }
}

impl Allocator for TrackingAllocator {
    fn name(&self) -> &'static str {
        "tracking"
    }

    fn allocate_raw(&self, layout: Layout, is_backing: bool) -> AllocResult<usize> {
        let mut ledger = self.ledger.lock();
        if let Some(limit) = self.live_limit {
            if ledger.live.len() >= limit {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(limit, "tracking allocator limit reached");
                return Err(AllocError::LimitReached { limit });
            }
        }

        match self.inner.allocate_raw(layout, is_backing) {
            Ok(raw) => {
                ledger.live.insert(raw, layout);
                self.allocs.fetch_add(1, Ordering::Relaxed);
                Ok(raw)
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    unsafe fn deallocate_raw(&self, raw: usize, layout: Layout, is_backing: bool) {
        let mut ledger = self.ledger.lock();
        match ledger.live.remove(&raw) {
            Some(recorded) => {
                debug_assert_eq!(recorded, layout, "deallocated with a different layout");
                *ledger.freed.entry(raw).or_insert(0) += 1;
                self.deallocs.fetch_add(1, Ordering::Relaxed);
                // SAFETY: `raw` was live in `inner` with `recorded`, which the
                // caller promises matches `layout`.
                unsafe { self.inner.deallocate_raw(raw, recorded, is_backing) };
            }
            None => {
                self.double_frees.fetch_add(1, Ordering::Relaxed);
                tracing::error!(raw, "free of a handle that is not live");
            }
        }
    }

    fn resolve_raw(&self, raw: usize) -> Option<NonNull<u8>> {
        self.inner.resolve_raw(raw)
    }

    fn stats(&self) -> AllocStats {
        self.inner.stats()
    }
}
