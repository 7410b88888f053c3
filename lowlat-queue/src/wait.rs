//! How a producer or consumer waits for its slot.
//!
//! The queue decides *what* to wait for (a slot sequence reaching a value);
//! a [`WaitStrategy`] decides *how*: burn CPU, or spin briefly and then sleep.
//!
//! ```text
//! SpinWait:         check -> pause -> check -> pause -> ...   (never sleeps)
//!
//! ConditionedWait:  check -> pause x N -> sleep on condvar
//!                   push/pop completion -> if (sleepers > 0) notify_all
//! ```
//!
//! The conditioned strategy only touches its mutex when a thread on the
//! opposite side is actually asleep. On the fast path a notification is a
//! fence and one load.

use std::fmt;
use std::sync::atomic::{self, AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};

use crate::trace::trace;

/// Spin iterations [`ConditionedWait`] performs before sleeping by default.
pub const DEFAULT_SPIN_LIMIT: usize = 64;

/// Which end of the queue is waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// A producer waiting for its slot to be released.
    Producer,
    /// A consumer waiting for its slot to be published.
    Consumer,
}

/// Policy for waiting until a slot is ready.
pub trait WaitStrategy: Send + Sync {
    /// Returns once `ready` returns `true`.
    ///
    /// `ready` is checked before any waiting happens.
    fn wait_until<F: FnMut() -> bool>(&self, side: Side, ready: F);

    /// Signals threads waiting on `side` that their condition may have changed.
    fn notify(&self, side: Side);
}

// ============================================================================
// SpinWait
// ============================================================================

/// Busy-wait with CPU pause hints. Never sleeps.
///
/// Lowest wake latency; a waiting thread keeps its core busy. With
/// [`SpinWait::yielding`] the thread also yields its time slice once the
/// backoff is exhausted, which helps when threads outnumber cores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpinWait {
    yielding: bool,
}

impl SpinWait {
    /// Pure spinning.
    pub const fn new() -> Self {
        Self { yielding: false }
    }

    /// Spinning that yields to the scheduler after the backoff saturates.
    pub const fn yielding() -> Self {
        Self { yielding: true }
    }
}

impl WaitStrategy for SpinWait {
    #[inline]
    fn wait_until<F: FnMut() -> bool>(&self, _side: Side, mut ready: F) {
        let backoff = Backoff::new();
        while !ready() {
            if self.yielding {
                backoff.snooze();
            } else {
                backoff.spin();
            }
        }
    }

    #[inline]
    fn notify(&self, _side: Side) {}
}

// ============================================================================
// ConditionedWait
// ============================================================================

/// Spin up to `spins` times, then sleep on a condition variable.
///
/// A producer wakes sleeping consumers after publishing; a consumer wakes
/// sleeping producers after releasing a slot. `spins == 0` sleeps on the
/// first miss.
///
/// # Example
///
/// ```
/// use lowlat_queue::{ConditionedWait, LowLatencyQueue};
///
/// // Sleep immediately when the queue is full/empty
/// let q = LowLatencyQueue::<u64, ConditionedWait>::try_new_in(
///     16,
///     ConditionedWait::new(0),
///     Default::default(),
/// )
/// .unwrap();
///
/// q.push(1);
/// assert_eq!(q.pop(|v| v), 1);
/// ```
pub struct ConditionedWait {
    spins: usize,
    producers: Sleepers,
    consumers: Sleepers,
}

impl ConditionedWait {
    /// Creates the strategy with `spins` pause iterations before sleeping.
    pub fn new(spins: usize) -> Self {
        Self {
            spins,
            producers: Sleepers::new(),
            consumers: Sleepers::new(),
        }
    }

    /// Configured spin budget.
    pub fn spins(&self) -> usize {
        self.spins
    }

    /// Number of threads currently asleep on `side`.
    pub fn sleeping(&self, side: Side) -> usize {
        self.sleepers(side).count.load(Ordering::Relaxed)
    }

    #[inline]
    fn sleepers(&self, side: Side) -> &Sleepers {
        match side {
            Side::Producer => &self.producers,
            Side::Consumer => &self.consumers,
        }
    }
}

impl Default for ConditionedWait {
    fn default() -> Self {
        Self::new(DEFAULT_SPIN_LIMIT)
    }
}

impl WaitStrategy for ConditionedWait {
    fn wait_until<F: FnMut() -> bool>(&self, side: Side, mut ready: F) {
        if ready() {
            return;
        }

        let backoff = Backoff::new();
        for _ in 0..self.spins {
            backoff.spin();
            if ready() {
                return;
            }
        }

        trace!(?side, "sleeping");
        self.sleepers(side).sleep_until(&mut ready);
    }

    #[inline]
    fn notify(&self, side: Side) {
        self.sleepers(side).wake();
    }
}

impl fmt::Debug for ConditionedWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionedWait")
            .field("spins", &self.spins)
            .field("sleeping_producers", &self.sleeping(Side::Producer))
            .field("sleeping_consumers", &self.sleeping(Side::Consumer))
            .finish()
    }
}

/// Threads asleep on one side of the queue.
///
/// `count` is cache-padded so a notifier polling it does not contend with
/// the mutex word.
struct Sleepers {
    count: CachePadded<AtomicUsize>,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Sleepers {
    fn new() -> Self {
        Self {
            count: CachePadded::new(AtomicUsize::new(0)),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Sleeps until `ready` holds.
    ///
    /// ```text
    /// Sleeper:                          Notifier:
    /// ─────────────────────             ─────────────────────
    /// lock
    /// count += 1                        store(slot sequence)
    /// [SeqCst fence]                    [SeqCst fence]
    /// ready() -> false                  load(count) -> 1
    /// wait (unlocks)                    lock, notify_all
    /// ```
    ///
    /// The paired fences guarantee the notifier sees the sleeper or the
    /// sleeper sees the new sequence. The notifier can only take the lock
    /// once the sleeper is inside `wait`.
    fn sleep_until<F: FnMut() -> bool>(&self, ready: &mut F) {
        let mut guard = self.lock.lock();
        self.count.fetch_add(1, Ordering::SeqCst);
        atomic::fence(Ordering::SeqCst);

        while !ready() {
            self.cond.wait(&mut guard);
        }

        self.count.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    fn wake(&self) {
        atomic::fence(Ordering::SeqCst);
        if self.count.load(Ordering::Relaxed) > 0 {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
    }
}
