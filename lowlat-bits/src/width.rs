//! Per-type implementations.

/// Unsigned integers that support power-of-two rounding and width queries.
///
/// Implemented for `u8`, `u16`, `u32`, `u64`, `u128` and `usize`.
pub trait Bits: Copy + Eq {
    /// Width of the type in bits.
    const BITS: u32;

    /// Number of bits needed to represent `self` (`0` for `0`).
    fn bit_width(self) -> u32;

    /// Smallest power of two `>= self`, wrapping to `0` on overflow.
    fn next_pow_of_2(self) -> Self;

    /// Smallest power of two `>= self`, or `None` on overflow.
    fn checked_next_pow_of_2(self) -> Option<Self>;

    /// Returns `true` if `self` is a power of two. `0` is not.
    fn is_pow_of_2(self) -> bool;
}

macro_rules! impl_bits {
    ($($ty:ty),*) => {
        $(
            impl Bits for $ty {
                const BITS: u32 = <$ty>::BITS;

                #[inline]
                fn bit_width(self) -> u32 {
                    <$ty>::BITS - self.leading_zeros()
                }

                #[inline]
                fn next_pow_of_2(self) -> Self {
                    Bits::checked_next_pow_of_2(self).unwrap_or(0)
                }

                #[inline]
                fn checked_next_pow_of_2(self) -> Option<Self> {
                    if self <= 1 {
                        return Some(self);
                    }
                    // Width of (n - 1) is the exponent of the result.
                    let shift = Bits::bit_width(self - 1);
                    if shift >= <$ty>::BITS {
                        None
                    } else {
                        Some(1 << shift)
                    }
                }

                #[inline]
                fn is_pow_of_2(self) -> bool {
                    self != 0 && (self & (self - 1)) == 0
                }
            }
        )*
    };
}

impl_bits!(u8, u16, u32, u64, u128, usize);
