//! Cache-line aligned storage for the slot array.
//!
//! The queue's cursors live on their own cache lines (`CachePadded`); the
//! slot array is a separate allocation that starts on a cache-line boundary
//! so no slot shares a line with either cursor.

use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};

use crossbeam_utils::CachePadded;

use crate::error::AllocError;

/// Destructive interference size for the target.
///
/// Matches the alignment `crossbeam_utils::CachePadded` uses (128 bytes on
/// x86_64 and aarch64 to cover adjacent-line prefetch, 64 or less elsewhere).
pub const CACHE_LINE_SIZE: usize = align_of::<CachePadded<u8>>();

/// Allocates arrays of `Value` for a queue's slot storage.
///
/// The queue receives an allocator for its element type and [rebinds] it to
/// its internal slot type, so one allocation policy serves any element type.
///
/// # Safety
///
/// `allocate(n)` must return memory valid for reads and writes of `n`
/// consecutive `Value`s, aligned to at least `align_of::<Value>()`, that
/// stays valid until passed to `deallocate` with the same `n`.
///
/// [rebinds]: ElementAllocator::rebind
pub unsafe trait ElementAllocator: Send + Sync {
    /// Element type this allocator hands out storage for.
    type Value;

    /// The same allocator retargeted to element type `U`.
    type Rebind<U>: ElementAllocator<Value = U>;

    /// Returns an allocator for `U` that keeps this allocator's policy.
    fn rebind<U>(&self) -> Self::Rebind<U>;

    /// Allocates uninitialized storage for `n` values.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the byte size overflows, the layout is
    /// invalid, or the underlying allocator fails.
    fn allocate(&self, n: usize) -> Result<NonNull<Self::Value>, AllocError>;

    /// Releases storage obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate(n)` on this allocator (or one it was
    /// rebound from) with the same `n`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<Self::Value>, n: usize);
}

/// Allocator whose blocks start on an `ALIGN`-byte boundary.
///
/// `ALIGN` defaults to [`CACHE_LINE_SIZE`] and must be a power of two. The
/// effective alignment is `max(ALIGN, align_of::<T>())`.
///
/// # Example
///
/// ```
/// use lowlat_queue::{AlignedAllocator, ElementAllocator};
///
/// let alloc = AlignedAllocator::<u32, 256>::new();
/// let ptr = alloc.allocate(10).unwrap();
/// assert_eq!(ptr.as_ptr() as usize % 256, 0);
///
/// // Rebinding keeps the alignment
/// let wide = alloc.rebind::<u64>();
/// assert_eq!(AlignedAllocator::<u64, 256>::alignment(), 256);
/// # let p2 = wide.allocate(3).unwrap();
/// # unsafe { wide.deallocate(p2, 3) };
///
/// unsafe { alloc.deallocate(ptr, 10) };
/// ```
pub struct AlignedAllocator<T, const ALIGN: usize = { CACHE_LINE_SIZE }> {
    _marker: PhantomData<fn() -> T>,
}

impl<T, const ALIGN: usize> AlignedAllocator<T, ALIGN> {
    const VALID_ALIGN: () = assert!(ALIGN.is_power_of_two(), "ALIGN must be a power of two");

    /// Creates the allocator. Stateless; all instances are interchangeable.
    #[inline]
    pub const fn new() -> Self {
        let () = Self::VALID_ALIGN;
        Self {
            _marker: PhantomData,
        }
    }

    /// Effective alignment of every block handed out.
    #[inline]
    pub const fn alignment() -> usize {
        if ALIGN > align_of::<T>() {
            ALIGN
        } else {
            align_of::<T>()
        }
    }

    fn layout(n: usize) -> Result<Layout, AllocError> {
        let elem = size_of::<T>();
        let size = elem.checked_mul(n).ok_or(AllocError::CapacityOverflow {
            count: n,
            size: elem,
        })?;
        let align = Self::alignment();
        Layout::from_size_align(size, align).map_err(|_| AllocError::Layout { size, align })
    }
}

unsafe impl<T, const ALIGN: usize> ElementAllocator for AlignedAllocator<T, ALIGN> {
    type Value = T;
    type Rebind<U> = AlignedAllocator<U, ALIGN>;

    #[inline]
    fn rebind<U>(&self) -> AlignedAllocator<U, ALIGN> {
        AlignedAllocator::new()
    }

    fn allocate(&self, n: usize) -> Result<NonNull<T>, AllocError> {
        let layout = Self::layout(n)?;

        if layout.size() == 0 {
            // Zero-sized blocks never reach the global allocator.
            let dangling = ptr::without_provenance_mut::<T>(layout.align());
            // Safety: alignment is a non-zero power of two.
            return Ok(unsafe { NonNull::new_unchecked(dangling) });
        }

        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        NonNull::new(raw.cast::<T>()).ok_or(AllocError::OutOfMemory {
            size: layout.size(),
            align: layout.align(),
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        // allocate(n) already validated this layout
        let Ok(layout) = Self::layout(n) else {
            return;
        };
        if layout.size() == 0 {
            return;
        }
        unsafe {
            alloc::dealloc(ptr.as_ptr().cast::<u8>(), layout);
        }
    }
}

impl<T, const ALIGN: usize> Default for AlignedAllocator<T, ALIGN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const ALIGN: usize> Clone for AlignedAllocator<T, ALIGN> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, const ALIGN: usize> Copy for AlignedAllocator<T, ALIGN> {}

impl<T, const ALIGN: usize> PartialEq for AlignedAllocator<T, ALIGN> {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl<T, const ALIGN: usize> Eq for AlignedAllocator<T, ALIGN> {}

impl<T, const ALIGN: usize> fmt::Debug for AlignedAllocator<T, ALIGN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedAllocator")
            .field("alignment", &Self::alignment())
            .finish()
    }
}
