//! Bounded multi-producer multi-consumer queue for low-latency handoff.
//!
//! [`LowLatencyQueue`] is a fixed-capacity ring of slots, each guarded by a
//! sequence number. Producers and consumers claim tickets from two
//! cache-padded cursors and then only touch their own slot, so contention is
//! limited to a single atomic increment per operation.
//!
//! # Quick Start
//!
//! ```
//! use lowlat_queue::{ConditionedWait, LowLatencyQueue};
//! use std::sync::Arc;
//! use std::thread;
//!
//! // Spin 64 times, then sleep until the other side makes progress
//! let q = Arc::new(LowLatencyQueue::<u64, ConditionedWait>::new(1024));
//!
//! let producers: Vec<_> = (0..2)
//!     .map(|p| {
//!         let q = Arc::clone(&q);
//!         thread::spawn(move || {
//!             for i in 0..500 {
//!                 q.push(p * 1000 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! let mut sum = 0;
//! for _ in 0..1000 {
//!     sum += q.pop(|v| v);
//! }
//!
//! for p in producers {
//!     p.join().unwrap();
//! }
//! assert_eq!(sum, (0..500).sum::<u64>() * 2 + 1000 * 500);
//! ```
//!
//! # Configuration
//!
//! All tuning is by type parameter or constructor argument:
//!
//! | Concern        | Knob                                                   |
//! |----------------|--------------------------------------------------------|
//! | Waiting        | [`SpinWait`] (default) or [`ConditionedWait::new`]     |
//! | Cursor width   | any [`QueueIndex`]; `usize` by default                 |
//! | Slot storage   | any [`ElementAllocator`]; [`AlignedAllocator`] default |
//! | Diagnostics    | the `tracing` cargo feature plus [`trace::init_tracing`] |
//!
//! # Choosing an index type
//!
//! Capacity is limited to an eighth of the index range: 32 for `u8`, 8192
//! for `u16`. Producers and consumers blocked on the queue at the same time
//! must stay below [`LowLatencyQueue::max_blocked`], which equals the
//! capacity at the limit. Narrow indices wrap quickly; they exist mostly to
//! make wraparound cheap to test.

#![warn(missing_docs)]

mod alloc;
mod capacity;
mod error;
mod index;
mod queue;
pub mod trace;
mod wait;

pub use alloc::{AlignedAllocator, CACHE_LINE_SIZE, ElementAllocator};
pub use error::{AllocError, Empty, Full, QueueError};
pub use index::QueueIndex;
pub use queue::LowLatencyQueue;
pub use wait::{ConditionedWait, DEFAULT_SPIN_LIMIT, Side, SpinWait, WaitStrategy};
