//! # Allocation Error Types
//!
//! All errors that can occur while allocating or configuring allocators.

use thiserror::Error;

/// Errors that can occur when requesting memory from an allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The allocator has no room left for the request.
    #[error("out of memory: requested {size} bytes aligned to {align}")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// Size and alignment do not form a valid layout.
    #[error("invalid layout: size {size}, align {align}")]
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// The allocator cannot serve this shape of request at all.
    #[error("{allocator} cannot serve {size} bytes aligned to {align}")]
    UnsupportedLayout {
        /// Name of the refusing allocator.
        allocator: &'static str,
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A configured live-allocation limit was hit.
    #[error("allocation limit reached: {limit} live allocations")]
    LimitReached {
        /// The configured limit.
        limit: usize,
    },
}

/// Result type for allocation operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors that can occur while loading allocator configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML text could not be parsed.
    #[error("failed to parse allocator config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but describes an impossible allocator.
    #[error("invalid allocator config: {0}")]
    Invalid(String),

    /// Building an allocator from a valid config failed.
    #[error("failed to build allocator: {0}")]
    Build(#[from] AllocError),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
