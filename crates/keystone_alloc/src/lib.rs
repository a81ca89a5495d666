//! # Keystone Allocators
//!
//! The allocator capability every Keystone handle is resolved through.
//!
//! ## Architecture Rules
//!
//! 1. **Handles, not pointers** - An allocator hands out an opaque `usize`
//!    and turns it back into an address on demand
//! 2. **Fallible by value** - Exhaustion is an [`AllocError`], never a panic
//! 3. **Allocators outlive their handles** - Every allocator is referenced
//!    as `&'static dyn Allocator`
//!
//! ```text
//! Allocator (trait)
//! ├── HeapAllocator      raw value = address
//! ├── PoolAllocator      raw value = block index (backed by another allocator)
//! └── TrackingAllocator  instrumented wrapper over any allocator
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use keystone_alloc::{global_allocator, Allocator};
//! use std::alloc::Layout;
//!
//! let alloc = global_allocator();
//! let raw = alloc.allocate_raw(Layout::new::<u64>(), false)?;
//! let ptr = alloc.resolve_raw(raw);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod allocator;
pub mod config;
pub mod error;
pub mod global;
pub mod heap;
pub mod pool;
pub mod stats;
pub mod tracking;

pub use allocator::{Allocator, NULL_HANDLE};
pub use config::{AllocConfig, PoolConfig, TrackingConfig};
pub use error::{AllocError, AllocResult, ConfigError, ConfigResult};
pub use global::{global_allocator, reset_global_allocator, set_global_allocator};
pub use heap::HeapAllocator;
pub use pool::PoolAllocator;
pub use stats::{AllocStats, StatsRecorder};
pub use tracking::TrackingAllocator;
