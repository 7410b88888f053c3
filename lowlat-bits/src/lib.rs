//! Power-of-two rounding and bit-width helpers for unsigned integers.
//!
//! `lowlat-bits` sizes ring buffers: a requested capacity is rounded up to
//! the next power of two so a claimed index maps to its slot with a mask
//! instead of a division.
//!
//! # Example
//!
//! ```
//! use lowlat_bits::{bit_width, next_pow_of_2};
//!
//! assert_eq!(next_pow_of_2(123usize), 128);
//! assert_eq!(next_pow_of_2(64u16), 64);
//! assert_eq!(bit_width(127u8), 7);
//! assert_eq!(bit_width(128u8), 8);
//!
//! // Degenerate inputs
//! assert_eq!(next_pow_of_2(0u32), 0);
//! assert_eq!(bit_width(0u32), 0);
//! ```
//!
//! # Overflow
//!
//! When the next power of two does not fit in the integer type the result
//! wraps to zero, the way an unsigned `1 << BITS` would. Use
//! [`checked_next_pow_of_2`] to detect it instead:
//!
//! ```
//! use lowlat_bits::{checked_next_pow_of_2, next_pow_of_2};
//!
//! assert_eq!(next_pow_of_2(32_769u16), 0);
//! assert_eq!(checked_next_pow_of_2(32_769u16), None);
//! assert_eq!(checked_next_pow_of_2(32_768u16), Some(32_768));
//! ```

#![no_std]
#![warn(missing_docs)]

mod width;

pub use width::Bits;

/// Smallest power of two greater than or equal to `n`.
///
/// `0` maps to `0` and `1` maps to `1`. Wraps to `0` if the result is not
/// representable in `T`.
#[inline]
pub fn next_pow_of_2<T: Bits>(n: T) -> T {
    n.next_pow_of_2()
}

/// Like [`next_pow_of_2`], but returns `None` instead of wrapping.
#[inline]
pub fn checked_next_pow_of_2<T: Bits>(n: T) -> Option<T> {
    n.checked_next_pow_of_2()
}

/// Number of bits needed to represent `n`: `floor(log2(n)) + 1`, or `0` for `0`.
#[inline]
pub fn bit_width<T: Bits>(n: T) -> u32 {
    n.bit_width()
}
