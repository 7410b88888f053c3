//! Capacity rounding shared by the runtime and const-generic constructors.

use lowlat_bits::checked_next_pow_of_2;

use crate::error::QueueError;
use crate::index::QueueIndex;

/// Validated queue geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Capacity {
    /// Value passed by the caller.
    pub(crate) requested: usize,
    /// Power of two (or zero) actually allocated.
    pub(crate) slots: usize,
}

impl Capacity {
    /// Rounds `requested` up to a power of two and checks it against `I`.
    ///
    /// Slot sequences store twice the ticket, so tickets are only
    /// distinguishable within half the index space, and `try_*` orders them
    /// by signed difference within a quarter of it. The rounded capacity may
    /// take at most half of that window; the rest is left for
    /// claimed-but-blocked operations.
    pub(crate) fn new<I: QueueIndex>(requested: usize) -> Result<Self, QueueError> {
        let slots =
            checked_next_pow_of_2(requested).ok_or(QueueError::CapacityOverflow { requested })?;

        let max = Self::max_for::<I>();
        if slots > max {
            return Err(QueueError::CapacityExceedsIndex {
                capacity: slots,
                max,
                index_bits: I::BITS,
            });
        }

        Ok(Self { requested, slots })
    }

    /// Largest capacity supported by index type `I`.
    pub(crate) fn max_for<I: QueueIndex>() -> usize {
        Self::window_for::<I>() >> 1
    }

    /// Largest number of tickets that may be outstanding at once:
    /// `2^(bits - 2)`, saturating at `usize::MAX` for wide indices.
    pub(crate) fn window_for<I: QueueIndex>() -> usize {
        let exp = I::BITS - 2;
        if exp >= usize::BITS {
            usize::MAX
        } else {
            1usize << exp
        }
    }

    /// Mask mapping a cursor to its slot offset.
    #[inline]
    pub(crate) fn mask(self) -> usize {
        self.slots.wrapping_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up() {
        let cap = Capacity::new::<usize>(123).unwrap();
        assert_eq!(cap.requested, 123);
        assert_eq!(cap.slots, 128);
        assert_eq!(cap.mask(), 127);
    }

    #[test]
    fn zero_is_allowed() {
        let cap = Capacity::new::<u8>(0).unwrap();
        assert_eq!(cap.slots, 0);
    }

    #[test]
    fn narrow_index_limits() {
        assert_eq!(Capacity::max_for::<u8>(), 32);
        assert_eq!(Capacity::max_for::<u16>(), 8_192);
        assert_eq!(Capacity::window_for::<u8>(), 64);
        assert!(Capacity::new::<u8>(32).is_ok());
        assert!(Capacity::new::<u8>(1).is_ok());
        assert_eq!(
            Capacity::new::<u8>(33),
            Err(QueueError::CapacityExceedsIndex {
                capacity: 64,
                max: 32,
                index_bits: 8
            })
        );
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(
            Capacity::new::<usize>(usize::MAX),
            Err(QueueError::CapacityOverflow {
                requested: usize::MAX
            })
        );
    }
}
