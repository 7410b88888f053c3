//! Error types.

use core::fmt;

/// Failure to obtain storage from an [`ElementAllocator`](crate::ElementAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// `count * size` does not fit in `usize`.
    #[error("allocation of {count} elements of {size} bytes overflows the address space")]
    CapacityOverflow {
        /// Number of elements requested.
        count: usize,
        /// Size of one element in bytes.
        size: usize,
    },
    /// The size/alignment pair is not a valid `Layout`.
    #[error("invalid layout: {size} bytes aligned to {align}")]
    Layout {
        /// Total size in bytes.
        size: usize,
        /// Requested alignment.
        align: usize,
    },
    /// The global allocator returned null.
    #[error("out of memory allocating {size} bytes aligned to {align}")]
    OutOfMemory {
        /// Total size in bytes.
        size: usize,
        /// Requested alignment.
        align: usize,
    },
}

/// Error constructing a [`LowLatencyQueue`](crate::LowLatencyQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The slot array could not be allocated.
    #[error("slot allocation failed: {0}")]
    Alloc(#[from] AllocError),
    /// Rounding the capacity up to a power of two overflows `usize`.
    #[error("capacity {requested} cannot be rounded up to a power of two")]
    CapacityOverflow {
        /// The capacity passed to the constructor.
        requested: usize,
    },
    /// The rounded capacity leaves too little headroom in the index type.
    #[error("capacity {capacity} exceeds the maximum {max} for a {index_bits}-bit index")]
    CapacityExceedsIndex {
        /// Rounded capacity.
        capacity: usize,
        /// Largest capacity the index type supports.
        max: usize,
        /// Width of the index type.
        index_bits: u32,
    },
}

/// Returned by [`try_push`](crate::LowLatencyQueue::try_push) when the queue is full.
///
/// Contains the value that could not be pushed, allowing recovery.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(
    /// The value that could not be pushed.
    pub T,
);

impl<T> Full<T> {
    /// Returns the value that could not be pushed.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is full")
    }
}

impl<T> std::error::Error for Full<T> {}

/// Returned by [`try_pop`](crate::LowLatencyQueue::try_pop) when no element is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Empty;

impl fmt::Display for Empty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is empty")
    }
}

impl std::error::Error for Empty {}
