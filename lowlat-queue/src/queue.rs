//! The bounded multi-producer multi-consumer ring buffer.
//!
//! Every slot carries a sequence number of the index type. With `t` the
//! ticket a thread claimed from a cursor and `cap` the capacity:
//!
//! - `sequence == 2t`: empty, writable by the producer holding ticket `t`
//! - `sequence == 2t + 1`: published, readable by the consumer holding ticket `t`
//! - `sequence == 2(t + cap)`: released, writable by the producer one lap later
//!
//! Empty states are even and published states odd, so the states stay
//! distinct for every capacity including 1.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ head (cache-line padded) - consume cursor   │
//! ├─────────────────────────────────────────────┤
//! │ tail (cache-line padded) - produce cursor   │
//! ├─────────────────────────────────────────────┤
//! │ slots ──► separate cache-line aligned block │
//! │           Slot[0]: { sequence, value }      │
//! │           Slot[1]: { sequence, value }      │
//! │           ...                               │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Blocking operations claim a ticket with `fetch_add` and then wait on
//! their own slot, so claimers never retry against each other. The `try_*`
//! operations only claim (by CAS) a ticket whose slot is already ready.
//! All arithmetic wraps in the index type; ticket `t` maps to slot
//! `t & (cap - 1)`.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{MaybeUninit, needs_drop};
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

use crossbeam_utils::{Backoff, CachePadded};

use crate::alloc::{AlignedAllocator, ElementAllocator};
use crate::capacity::Capacity;
use crate::error::{Empty, Full, QueueError};
use crate::index::QueueIndex;
use crate::trace::{debug, error};
use crate::wait::{Side, SpinWait, WaitStrategy};

/// One cell of the ring.
#[repr(C)]
pub(crate) struct Slot<T, I: QueueIndex> {
    sequence: I::Atomic,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC queue with blocking `push`/`pop`.
///
/// Type parameters:
/// - `T`: element type
/// - `W`: [`WaitStrategy`] used while a slot is not ready (default [`SpinWait`])
/// - `I`: [`QueueIndex`] width of cursors and sequences (default `usize`)
/// - `A`: [`ElementAllocator`] for the slot array (default [`AlignedAllocator`])
///
/// The capacity is rounded up to the next power of two. Share the queue
/// between threads with `Arc`.
///
/// # Example
///
/// ```
/// use lowlat_queue::LowLatencyQueue;
/// use std::sync::Arc;
/// use std::thread;
///
/// let q = Arc::new(LowLatencyQueue::<String>::new(100));
/// assert_eq!(q.capacity(), 128);
///
/// let producer = {
///     let q = Arc::clone(&q);
///     thread::spawn(move || {
///         for i in 0..1000 {
///             q.push(format!("msg {i}"));
///         }
///     })
/// };
///
/// let mut received = 0;
/// while received < 1000 {
///     q.pop(|msg| assert!(msg.starts_with("msg ")));
///     received += 1;
/// }
///
/// producer.join().unwrap();
/// assert!(q.is_empty());
/// ```
pub struct LowLatencyQueue<T, W = SpinWait, I = usize, A = AlignedAllocator<T>>
where
    W: WaitStrategy,
    I: QueueIndex,
    A: ElementAllocator<Value = T>,
{
    // === Hot path - cache-line padded cursors ===
    /// Next ticket handed to a consumer.
    head: CachePadded<I::Atomic>,
    /// Next ticket handed to a producer.
    tail: CachePadded<I::Atomic>,

    // === Immutable after construction ===
    slots: NonNull<Slot<T, I>>,
    mask: usize,
    /// Ticket distance between two uses of a slot (`capacity` in the index type).
    lap: I,
    capacity: Capacity,
    wait: W,
    alloc: A::Rebind<Slot<T, I>>,

    _marker: PhantomData<T>,
}

// Safety: values move between threads through the slots, which are guarded
// by their sequence numbers. Nothing is handed out by reference.
unsafe impl<T, W, I, A> Send for LowLatencyQueue<T, W, I, A>
where
    T: Send,
    W: WaitStrategy,
    I: QueueIndex,
    A: ElementAllocator<Value = T>,
{
}

// Safety: see above; all shared mutation is through atomics.
unsafe impl<T, W, I, A> Sync for LowLatencyQueue<T, W, I, A>
where
    T: Send,
    W: WaitStrategy,
    I: QueueIndex,
    A: ElementAllocator<Value = T>,
{
}

impl<T, W, I, A> LowLatencyQueue<T, W, I, A>
where
    W: WaitStrategy + Default,
    I: QueueIndex,
    A: ElementAllocator<Value = T> + Default,
{
    /// Creates a queue holding at least `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if the queue cannot be constructed; see [`try_new`](Self::try_new).
    pub fn new(capacity: usize) -> Self {
        match Self::try_new(capacity) {
            Ok(queue) => queue,
            Err(e) => panic!("failed to create queue: {e}"),
        }
    }

    /// Creates a queue holding at least `capacity` elements.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the rounded capacity overflows, exceeds what
    /// the index type `I` supports, or cannot be allocated.
    pub fn try_new(capacity: usize) -> Result<Self, QueueError> {
        Self::try_new_in(capacity, W::default(), A::default())
    }

    /// Creates a queue whose capacity is the compile-time constant `N`.
    ///
    /// ```
    /// use lowlat_queue::LowLatencyQueue;
    ///
    /// let q = LowLatencyQueue::<u32>::fixed::<123>();
    /// assert_eq!(q.capacity(), 128);
    /// assert_eq!(q.requested_capacity(), 123);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the queue cannot be constructed.
    pub fn fixed<const N: usize>() -> Self {
        const { assert!(N <= (usize::MAX >> 1) + 1, "N cannot be rounded to a power of two") };
        Self::new(N)
    }

    /// Fallible form of [`fixed`](Self::fixed).
    ///
    /// # Errors
    ///
    /// As [`try_new`](Self::try_new).
    pub fn try_fixed<const N: usize>() -> Result<Self, QueueError> {
        Self::try_new(N)
    }
}

impl<T, W, I, A> LowLatencyQueue<T, W, I, A>
where
    W: WaitStrategy,
    I: QueueIndex,
    A: ElementAllocator<Value = T>,
{
    /// Creates a queue with an explicit wait strategy and allocator.
    ///
    /// `alloc` is rebound to the internal slot type; its alignment policy
    /// applies to the slot array.
    ///
    /// # Errors
    ///
    /// As [`try_new`](Self::try_new).
    pub fn try_new_in(capacity: usize, wait: W, alloc: A) -> Result<Self, QueueError> {
        let capacity = Capacity::new::<I>(capacity)?;
        let alloc = alloc.rebind::<Slot<T, I>>();

        let slots = match alloc.allocate(capacity.slots) {
            Ok(ptr) => ptr,
            Err(e) => {
                error!(requested = capacity.requested, error = %e, "slot allocation failed");
                return Err(e.into());
            }
        };

        // slot[i] is empty for ticket i
        for i in 0..capacity.slots {
            // Safety: allocate(n) returned room for n slots.
            unsafe {
                slots.as_ptr().add(i).write(Slot {
                    sequence: I::atomic(vacant(I::from_usize(i))),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                });
            }
        }

        debug!(
            requested = capacity.requested,
            capacity = capacity.slots,
            index_bits = I::BITS,
            slot_bytes = size_of::<Slot<T, I>>(),
            "queue allocated"
        );

        Ok(Self {
            head: CachePadded::new(I::atomic(I::ZERO)),
            tail: CachePadded::new(I::atomic(I::ZERO)),
            slots,
            mask: capacity.mask(),
            lap: I::from_usize(capacity.slots),
            capacity,
            wait,
            alloc,
            _marker: PhantomData,
        })
    }

    // === Producer ===

    /// Pushes `value`, waiting while the queue is full.
    ///
    /// On a zero-capacity queue this never returns.
    pub fn push(&self, value: T) {
        if self.capacity.slots == 0 {
            self.wait_forever(Side::Producer);
        }

        let ticket = I::fetch_add(&self.tail, I::ONE, Ordering::Relaxed);
        self.write(ticket, value);
    }

    /// Pushes `value` only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`Full`] with the value if every slot is occupied or still
    /// being released.
    pub fn try_push(&self, value: T) -> Result<(), Full<T>> {
        if self.capacity.slots == 0 {
            return Err(Full(value));
        }

        let backoff = Backoff::new();
        let mut tail = I::load(&self.tail, Ordering::Relaxed);

        loop {
            let seq = I::load(&self.slot(tail).sequence, Ordering::Acquire);
            let diff = seq.signed_diff(vacant(tail));

            if diff == 0 {
                match I::compare_exchange_weak(
                    &self.tail,
                    tail,
                    tail.wrapping_add(I::ONE),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        self.write(tail, value);
                        return Ok(());
                    }
                    Err(current) => {
                        tail = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                // Slot still holds the previous lap
                return Err(Full(value));
            } else {
                tail = I::load(&self.tail, Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Writes `value` into the slot owned by `ticket` and publishes it.
    #[inline]
    fn write(&self, ticket: I, value: T) {
        let slot = self.slot(ticket);

        let empty = vacant(ticket);

        self.wait.wait_until(Side::Producer, || {
            I::load(&slot.sequence, Ordering::Acquire) == empty
        });

        // Safety: the slot is empty for this ticket, and only the holder of
        // `ticket` may write it.
        unsafe {
            slot.value.get().cast::<T>().write(value);
        }
        I::store(&slot.sequence, published(ticket), Ordering::Release);

        self.wait.notify(Side::Consumer);
    }

    // === Consumer ===

    /// Pops the oldest claimable element and passes it to `f`.
    ///
    /// Waits while the queue is empty. The slot is released before `f` runs,
    /// so a panicking callback does not hold up producers; the panic
    /// propagates to the caller. On a zero-capacity queue this never returns.
    pub fn pop<F, R>(&self, f: F) -> R
    where
        F: FnOnce(T) -> R,
    {
        if self.capacity.slots == 0 {
            self.wait_forever(Side::Consumer);
        }

        let ticket = I::fetch_add(&self.head, I::ONE, Ordering::Relaxed);
        f(self.read(ticket))
    }

    /// Pops an element only if one is published right now.
    ///
    /// # Errors
    ///
    /// Returns [`Empty`] if no element is ready. This includes a producer that
    /// has claimed a slot but not yet published it.
    pub fn try_pop<F, R>(&self, f: F) -> Result<R, Empty>
    where
        F: FnOnce(T) -> R,
    {
        if self.capacity.slots == 0 {
            return Err(Empty);
        }

        let backoff = Backoff::new();
        let mut head = I::load(&self.head, Ordering::Relaxed);

        loop {
            let seq = I::load(&self.slot(head).sequence, Ordering::Acquire);
            let diff = seq.signed_diff(published(head));

            if diff == 0 {
                match I::compare_exchange_weak(
                    &self.head,
                    head,
                    head.wrapping_add(I::ONE),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Ok(f(self.read(head))),
                    Err(current) => {
                        head = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                return Err(Empty);
            } else {
                head = I::load(&self.head, Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Moves the value out of the slot owned by `ticket` and releases it.
    #[inline]
    fn read(&self, ticket: I) -> T {
        let slot = self.slot(ticket);
        let full = published(ticket);

        self.wait.wait_until(Side::Consumer, || {
            I::load(&slot.sequence, Ordering::Acquire) == full
        });

        // Safety: the producer of this ticket has written the value, and only
        // the holder of `ticket` may take it.
        let value = unsafe { slot.value.get().cast::<T>().read() };
        I::store(&slot.sequence, vacant(ticket.wrapping_add(self.lap)), Ordering::Release);

        self.wait.notify(Side::Producer);
        value
    }

    // === Accessors ===

    /// Snapshot of the number of elements in the queue.
    ///
    /// Computed from the cursors, so it counts producers that have claimed a
    /// slot but are still waiting for it; the result is clamped to
    /// `[0, capacity]`. Exact once all threads are quiescent.
    pub fn len(&self) -> usize {
        let head = I::load(&self.head, Ordering::Relaxed);
        let tail = I::load(&self.tail, Ordering::Relaxed);
        usize::try_from(tail.signed_diff(head)).map_or(0, |n| n.min(self.capacity.slots))
    }

    /// Returns `true` if [`len`](Self::len) is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of elements: the requested capacity rounded up to a
    /// power of two.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.slots
    }

    /// Capacity as passed to the constructor, before rounding.
    #[inline]
    pub fn requested_capacity(&self) -> usize {
        self.capacity.requested
    }

    /// The wait strategy in use.
    #[inline]
    pub fn wait_strategy(&self) -> &W {
        &self.wait
    }

    /// Claimed-but-unfinished operations the index type tolerates beyond a
    /// full queue.
    ///
    /// Tickets are compared through sequences that carry one bit less than
    /// `I`, so producers and consumers blocked on this queue together must
    /// stay below this count. Only narrow indices make it small: 32 for a
    /// `u8` queue of capacity 32.
    pub fn max_blocked(&self) -> usize {
        Capacity::window_for::<I>().saturating_sub(self.capacity.slots)
    }

    #[inline]
    fn slot(&self, ticket: I) -> &Slot<T, I> {
        // Safety: the masked offset is inside the array, which lives as long
        // as `self`. Only called when capacity > 0.
        unsafe { &*self.slots.as_ptr().add(ticket.to_usize() & self.mask) }
    }

    #[cold]
    fn wait_forever(&self, side: Side) -> ! {
        loop {
            self.wait.wait_until(side, || false);
        }
    }
}

/// Sequence value of a slot that is empty and writable by `ticket`.
#[inline]
fn vacant<I: QueueIndex>(ticket: I) -> I {
    ticket.wrapping_add(ticket)
}

/// Sequence value of a slot that holds the value pushed by `ticket`.
#[inline]
fn published<I: QueueIndex>(ticket: I) -> I {
    vacant(ticket).wrapping_add(I::ONE)
}

impl<T, W, I, A> Drop for LowLatencyQueue<T, W, I, A>
where
    W: WaitStrategy,
    I: QueueIndex,
    A: ElementAllocator<Value = T>,
{
    fn drop(&mut self) {
        let head = I::load(&self.head, Ordering::Relaxed);
        let tail = I::load(&self.tail, Ordering::Relaxed);

        if needs_drop::<T>() && tail.signed_diff(head) > 0 {
            let mut pos = head;
            while pos != tail {
                let slot = self.slot(pos);
                if I::load(&slot.sequence, Ordering::Relaxed) == published(pos) {
                    // Safety: published and never consumed.
                    unsafe {
                        ptr::drop_in_place(slot.value.get().cast::<T>());
                    }
                }
                pos = pos.wrapping_add(I::ONE);
            }
        }

        // Slots hold no drop glue of their own beyond the values above.
        unsafe {
            self.alloc.deallocate(self.slots, self.capacity.slots);
        }
    }
}

impl<T, W, I, A> fmt::Debug for LowLatencyQueue<T, W, I, A>
where
    W: WaitStrategy + fmt::Debug,
    I: QueueIndex,
    A: ElementAllocator<Value = T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LowLatencyQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("requested_capacity", &self.requested_capacity())
            .field("index_bits", &I::BITS)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}
