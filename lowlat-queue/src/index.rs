//! Integer types usable as cursor and slot-sequence values.
//!
//! Cursors never reset: they advance with wrapping arithmetic and the slot is
//! found by masking. A narrow index type (`u8`, `u16`) wraps often, which is
//! what the wraparound tests exercise; `usize` is the default.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};

mod sealed {
    pub trait Sealed {}
}

/// Unsigned integer used for the queue's cursors and per-slot sequences.
///
/// Implemented for `u8`, `u16`, `u32`, `u64` and `usize`. Sealed.
///
/// A queue indexed by an `N`-bit type holds at most `2^(N-3)` elements, and
/// assumes fewer than `2^(N-2) - capacity` producers and consumers are
/// blocked on it at once (see
/// [`LowLatencyQueue::max_blocked`](crate::LowLatencyQueue::max_blocked)).
/// Beyond that, blocked tickets alias across laps. Only `u8` and `u16` make
/// the bound reachable.
pub trait QueueIndex: Copy + Eq + Debug + Send + Sync + 'static + sealed::Sealed {
    /// Atomic cell holding a value of this type.
    type Atomic: Send + Sync;

    /// Width in bits.
    const BITS: u32;

    /// Zero.
    const ZERO: Self;

    /// One.
    const ONE: Self;

    /// Creates an atomic cell.
    fn atomic(value: Self) -> Self::Atomic;

    /// Atomic load.
    fn load(cell: &Self::Atomic, order: Ordering) -> Self;

    /// Atomic store.
    fn store(cell: &Self::Atomic, value: Self, order: Ordering);

    /// Atomic wrapping add, returning the previous value.
    fn fetch_add(cell: &Self::Atomic, value: Self, order: Ordering) -> Self;

    /// Weak compare-and-exchange.
    fn compare_exchange_weak(
        cell: &Self::Atomic,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;

    /// Wrapping addition.
    fn wrapping_add(self, rhs: Self) -> Self;

    /// Truncating conversion from `usize` (keeps the low `BITS` bits).
    fn from_usize(value: usize) -> Self;

    /// Zero-extending conversion to `usize`.
    ///
    /// `u64` on 32-bit targets truncates; only the masked slot offset and
    /// small differences are ever converted.
    fn to_usize(self) -> usize;

    /// `self - other` reinterpreted as a signed value of the same width.
    ///
    /// Orders two cursor values that are less than half the index space apart,
    /// regardless of wraparound.
    fn signed_diff(self, other: Self) -> isize;
}

macro_rules! impl_queue_index {
    ($($ty:ty => $atomic:ty, $signed:ty);* $(;)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl QueueIndex for $ty {
                type Atomic = $atomic;

                const BITS: u32 = <$ty>::BITS;
                const ZERO: Self = 0;
                const ONE: Self = 1;

                #[inline]
                fn atomic(value: Self) -> $atomic {
                    <$atomic>::new(value)
                }

                #[inline]
                fn load(cell: &$atomic, order: Ordering) -> Self {
                    cell.load(order)
                }

                #[inline]
                fn store(cell: &$atomic, value: Self, order: Ordering) {
                    cell.store(value, order);
                }

                #[inline]
                fn fetch_add(cell: &$atomic, value: Self, order: Ordering) -> Self {
                    cell.fetch_add(value, order)
                }

                #[inline]
                fn compare_exchange_weak(
                    cell: &$atomic,
                    current: Self,
                    new: Self,
                    success: Ordering,
                    failure: Ordering,
                ) -> Result<Self, Self> {
                    cell.compare_exchange_weak(current, new, success, failure)
                }

                #[inline]
                fn wrapping_add(self, rhs: Self) -> Self {
                    <$ty>::wrapping_add(self, rhs)
                }

                #[inline]
                #[allow(clippy::cast_possible_truncation)]
                fn from_usize(value: usize) -> Self {
                    value as $ty
                }

                #[inline]
                #[allow(clippy::cast_possible_truncation)]
                fn to_usize(self) -> usize {
                    self as usize
                }

                #[inline]
                #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
                fn signed_diff(self, other: Self) -> isize {
                    self.wrapping_sub(other) as $signed as isize
                }
            }
        )*
    };
}

impl_queue_index! {
    u8 => AtomicU8, i8;
    u16 => AtomicU16, i16;
    u32 => AtomicU32, i32;
    u64 => AtomicU64, i64;
    usize => AtomicUsize, isize;
}
