use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use lowlat_queue::{
    AlignedAllocator, AllocError, ConditionedWait, ElementAllocator, Empty, LowLatencyQueue,
    QueueError, Side, SpinWait,
};

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Waits until a thread is asleep on `side`, failing after a few seconds.
fn await_sleeper(wait: &ConditionedWait, side: Side) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while wait.sleeping(side) == 0 {
        assert!(Instant::now() < deadline, "no thread went to sleep on {side:?}");
        thread::yield_now();
    }
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn capacity_rounds_to_power_of_two() {
    for cap in [256, 128, 64, 32, 16, 8, 4, 2] {
        let q = LowLatencyQueue::<u64>::new(cap);
        assert_eq!(q.capacity(), cap);
        assert_eq!(q.requested_capacity(), cap);
    }

    let q = LowLatencyQueue::<u64>::new(123);
    assert_eq!(q.capacity(), 128);
    assert_eq!(q.requested_capacity(), 123);

    let q = LowLatencyQueue::<u64>::new(1);
    assert_eq!(q.capacity(), 1);
}

#[test]
fn fixed_capacity() {
    let q = LowLatencyQueue::<u32, SpinWait, u16>::fixed::<100>();
    assert_eq!(q.capacity(), 128);

    let q = LowLatencyQueue::<u32>::try_fixed::<1000>().unwrap();
    assert_eq!(q.capacity(), 1024);
}

#[test]
fn capacity_beyond_index_range_is_rejected() {
    let err = LowLatencyQueue::<u32, SpinWait, u8>::try_new(100).unwrap_err();
    assert_eq!(
        err,
        QueueError::CapacityExceedsIndex {
            capacity: 128,
            max: 32,
            index_bits: 8
        }
    );

    let err = LowLatencyQueue::<u32, SpinWait, u16>::try_new(10_000).unwrap_err();
    assert!(matches!(err, QueueError::CapacityExceedsIndex { max: 8_192, .. }));

    assert!(LowLatencyQueue::<u32, SpinWait, u16>::try_new(8_192).is_ok());
    assert!(LowLatencyQueue::<u32, SpinWait, u8>::try_new(32).is_ok());
}

#[test]
fn unroundable_capacity_is_rejected() {
    let err = LowLatencyQueue::<u8>::try_new(usize::MAX).unwrap_err();
    assert_eq!(err, QueueError::CapacityOverflow { requested: usize::MAX });
    assert!(err.to_string().contains("power of two"));
}

#[test]
#[should_panic(expected = "failed to create queue")]
fn new_panics_on_bad_capacity() {
    let _ = LowLatencyQueue::<u8, SpinWait, u8>::new(33);
}

#[test]
fn oversized_allocation_is_an_error() {
    let err = LowLatencyQueue::<[u8; 1 << 20]>::try_new(1 << 60).unwrap_err();
    assert!(matches!(
        err,
        QueueError::Alloc(AllocError::CapacityOverflow { .. } | AllocError::Layout { .. })
    ));
}

// ============================================================================
// Basic operations
// ============================================================================

#[test]
fn fifo_single_thread() {
    let q = LowLatencyQueue::<u64>::new(16);

    for i in 0..16 {
        q.push(i);
    }
    assert_eq!(q.len(), 16);

    for i in 0..16 {
        assert_eq!(q.pop(|v| v), i);
    }
    assert!(q.is_empty());
}

#[test]
fn try_push_full_returns_value() {
    let q = LowLatencyQueue::<String>::new(2);

    q.try_push("a".to_string()).unwrap();
    q.try_push("b".to_string()).unwrap();

    let err = q.try_push("c".to_string()).unwrap_err();
    assert_eq!(err.to_string(), "queue is full");
    assert_eq!(err.into_inner(), "c");

    assert_eq!(q.try_pop(|s| s), Ok("a".to_string()));
    q.try_push("d".to_string()).unwrap();
    assert_eq!(q.pop(|s| s), "b");
    assert_eq!(q.pop(|s| s), "d");
}

#[test]
fn try_pop_empty() {
    let q = LowLatencyQueue::<u32>::new(4);
    assert_eq!(q.try_pop(|v| v), Err(Empty));

    q.push(9);
    assert_eq!(q.try_pop(|v| v * 2), Ok(18));
    assert_eq!(q.try_pop(|v| v), Err(Empty));
}

#[test]
fn len_tracks_operations() {
    let q = LowLatencyQueue::<u8>::new(8);
    assert_eq!(q.len(), 0);

    q.push(1);
    q.push(2);
    q.push(3);
    assert_eq!(q.len(), 3);

    q.pop(|_| ());
    assert_eq!(q.len(), 2);
}

#[test]
fn callback_result_is_returned() {
    let q = LowLatencyQueue::<Vec<u8>>::new(4);
    q.push(vec![1, 2, 3]);
    let len = q.pop(|v| v.len());
    assert_eq!(len, 3);
}

#[test]
fn single_slot_holds_one_element() {
    let q = LowLatencyQueue::<String>::new(1);
    assert_eq!(q.capacity(), 1);

    q.push("first".to_string());
    let rejected = q.try_push("second".to_string()).unwrap_err();
    assert_eq!(rejected.into_inner(), "second");
    assert_eq!(q.len(), 1);

    assert_eq!(q.try_pop(|s| s), Ok("first".to_string()));
    assert_eq!(q.try_pop(|s| s), Err(Empty));

    for i in 0..100 {
        q.push(i.to_string());
        assert!(q.try_push("extra".to_string()).is_err());
        assert_eq!(q.pop(|s| s), i.to_string());
    }
}

#[test]
fn push_blocks_when_full() {
    for cap in [1, 2, 4, 8, 123] {
        let q = Arc::new(LowLatencyQueue::<usize, ConditionedWait>::try_new_in(
            cap,
            ConditionedWait::new(0),
            AlignedAllocator::new(),
        )
        .unwrap());
        let slots = q.capacity();

        for i in 0..slots {
            q.push(i);
        }
        assert_eq!(q.len(), slots);
        assert!(q.try_push(usize::MAX).is_err(), "try_push accepted at capacity {slots}");

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(slots))
        };

        await_sleeper(q.wait_strategy(), Side::Producer);
        assert!(!producer.is_finished(), "push returned on a full queue of {slots}");
        assert_eq!(q.len(), slots);

        assert_eq!(q.pop(|v| v), 0);
        producer.join().unwrap();

        for i in 1..=slots {
            assert_eq!(q.pop(|v| v), i);
        }
        assert!(q.is_empty());
    }
}

#[test]
fn single_slot_keeps_every_value_under_contention() {
    let drops = Arc::new(AtomicUsize::new(0));
    let q = Arc::new(LowLatencyQueue::<DropCounter, ConditionedWait>::new(1));

    let producers: Vec<_> = (0..2)
        .map(|_| {
            let q = Arc::clone(&q);
            let drops = Arc::clone(&drops);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    q.push(DropCounter(Arc::clone(&drops)));
                }
            })
        })
        .collect();

    for _ in 0..2_000 {
        q.pop(drop);
    }
    for p in producers {
        p.join().unwrap();
    }

    assert!(q.is_empty());
    assert_eq!(drops.load(Ordering::SeqCst), 2_000);
}

#[test]
fn zero_sized_elements() {
    let q = LowLatencyQueue::<()>::new(4);
    for _ in 0..100 {
        q.push(());
        q.pop(|()| ());
    }
    assert!(q.is_empty());
}

// ============================================================================
// Drop and panic behaviour
// ============================================================================

#[test]
fn drop_releases_unconsumed_elements() {
    let drops = Arc::new(AtomicUsize::new(0));
    let q = LowLatencyQueue::<DropCounter>::new(8);

    for _ in 0..3 {
        q.push(DropCounter(Arc::clone(&drops)));
    }
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    q.pop(drop);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    drop(q);
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[test]
fn drop_after_wraparound() {
    let drops = Arc::new(AtomicUsize::new(0));
    let q = LowLatencyQueue::<DropCounter, SpinWait, u8>::new(4);

    // 300 tickets: both cursors wrap past 255
    for _ in 0..300 {
        q.push(DropCounter(Arc::clone(&drops)));
        q.pop(drop);
    }
    q.push(DropCounter(Arc::clone(&drops)));
    q.push(DropCounter(Arc::clone(&drops)));
    assert_eq!(drops.load(Ordering::SeqCst), 300);

    drop(q);
    assert_eq!(drops.load(Ordering::SeqCst), 302);
}

#[test]
fn panicking_callback_releases_slot() {
    let drops = Arc::new(AtomicUsize::new(0));
    let q = LowLatencyQueue::<DropCounter>::new(2);

    q.push(DropCounter(Arc::clone(&drops)));
    q.push(DropCounter(Arc::clone(&drops)));

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        q.pop::<_, ()>(|_value| panic!("callback failed"));
    }));
    assert!(result.is_err());
    // The value was moved into the callback and dropped while unwinding
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(q.len(), 1);

    // The slot is free again
    q.try_push(DropCounter(Arc::clone(&drops)))
        .unwrap_or_else(|_| panic!("slot not released"));
    assert_eq!(q.len(), 2);

    drop(q);
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Zero capacity
// ============================================================================

#[test]
fn zero_capacity_try_ops() {
    let q = LowLatencyQueue::<u64>::new(0);
    assert_eq!(q.capacity(), 0);
    assert_eq!(q.len(), 0);
    assert_eq!(q.try_push(1).unwrap_err().into_inner(), 1);
    assert_eq!(q.try_pop(|v| v), Err(Empty));
}

#[test]
fn zero_capacity_push_blocks() {
    let q = Arc::new(LowLatencyQueue::<u64, ConditionedWait>::try_new_in(
        0,
        ConditionedWait::new(0),
        AlignedAllocator::new(),
    )
    .unwrap());

    // Never returns; the thread is left parked when the test ends
    let producer = Arc::clone(&q);
    thread::spawn(move || producer.push(1));

    await_sleeper(q.wait_strategy(), Side::Producer);
    assert!(q.is_empty());
}

// ============================================================================
// Wraparound
// ============================================================================

#[test]
fn narrow_index_wraps_single_thread() {
    // 64 slots, 2048 rounds: 131072 tickets through a 16-bit index
    let q = LowLatencyQueue::<u32, SpinWait, u16>::new(64);

    let mut next = 0u32;
    for _ in 0..2048 {
        for i in 0..64 {
            q.push(next + i);
        }
        assert!(q.try_push(0).is_err());
        for i in 0..64 {
            assert_eq!(q.pop(|v| v), next + i);
        }
        next += 64;
    }
    assert!(q.is_empty());
}

#[test]
fn index_max_values_round_trip() {
    let q = LowLatencyQueue::<u16, SpinWait, u16>::new(64);
    for _ in 0..1000 {
        q.push(u16::MAX);
        q.push(0);
        assert_eq!(q.pop(|v| v), u16::MAX);
        assert_eq!(q.pop(|v| v), 0);
    }
}

// ============================================================================
// Allocator
// ============================================================================

#[derive(Default)]
struct Stats {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    bytes: AtomicUsize,
}

struct CountingAllocator<T> {
    inner: AlignedAllocator<T>,
    stats: Arc<Stats>,
}

unsafe impl<T> ElementAllocator for CountingAllocator<T> {
    type Value = T;
    type Rebind<U> = CountingAllocator<U>;

    fn rebind<U>(&self) -> CountingAllocator<U> {
        CountingAllocator {
            inner: self.inner.rebind(),
            stats: Arc::clone(&self.stats),
        }
    }

    fn allocate(&self, n: usize) -> Result<NonNull<T>, AllocError> {
        let ptr = self.inner.allocate(n)?;
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes.fetch_add(n * size_of::<T>(), Ordering::Relaxed);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        self.stats.deallocations.fetch_add(1, Ordering::Relaxed);
        unsafe { self.inner.deallocate(ptr, n) };
    }
}

#[test]
fn custom_allocator_is_rebound_and_balanced() {
    let stats = Arc::new(Stats::default());
    let alloc = CountingAllocator::<String> {
        inner: AlignedAllocator::new(),
        stats: Arc::clone(&stats),
    };

    let q = LowLatencyQueue::<String, SpinWait, usize, _>::try_new_in(10, SpinWait::new(), alloc)
        .unwrap();
    assert_eq!(stats.allocations.load(Ordering::Relaxed), 1);
    // Slots are larger than the element: a sequence number rides along
    assert!(stats.bytes.load(Ordering::Relaxed) > 16 * size_of::<String>());

    q.push("hello".to_string());
    assert_eq!(q.pop(|s| s), "hello");
    q.push("left behind".to_string());

    drop(q);
    assert_eq!(stats.allocations.load(Ordering::Relaxed), 1);
    assert_eq!(stats.deallocations.load(Ordering::Relaxed), 1);
}

#[test]
fn over_aligned_allocator() {
    let q = LowLatencyQueue::<u64, SpinWait, usize, AlignedAllocator<u64, 4096>>::new(32);
    for i in 0..100 {
        q.push(i);
        assert_eq!(q.pop(|v| v), i);
    }
}

// ============================================================================
// Wait strategies
// ============================================================================

#[test]
fn conditioned_consumer_wakes_on_push() {
    let q = Arc::new(LowLatencyQueue::<u64, ConditionedWait>::try_new_in(
        4,
        ConditionedWait::new(0),
        AlignedAllocator::new(),
    )
    .unwrap());

    let consumer = {
        let q = Arc::clone(&q);
        thread::spawn(move || q.pop(|v| v))
    };

    await_sleeper(q.wait_strategy(), Side::Consumer);

    q.push(77);
    assert_eq!(consumer.join().unwrap(), 77);
    assert_eq!(q.wait_strategy().sleeping(Side::Consumer), 0);
}

#[test]
fn conditioned_producer_wakes_on_pop() {
    let q = Arc::new(LowLatencyQueue::<u64, ConditionedWait>::try_new_in(
        1,
        ConditionedWait::new(0),
        AlignedAllocator::new(),
    )
    .unwrap());
    q.push(1);

    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || q.push(2))
    };

    await_sleeper(q.wait_strategy(), Side::Producer);

    assert_eq!(q.pop(|v| v), 1);
    producer.join().unwrap();
    assert_eq!(q.pop(|v| v), 2);
}

#[test]
fn debug_format() {
    let q = LowLatencyQueue::<u8, ConditionedWait>::new(3);
    let s = format!("{q:?}");
    assert!(s.contains("LowLatencyQueue"));
    assert!(s.contains("ConditionedWait"));
    assert!(s.contains("spins: 64"));
}
