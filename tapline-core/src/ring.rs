//! Bounded single-producer single-consumer ring.
//!
//! Producer and consumer are separate endpoints over one shared slot buffer;
//! `head` (consumer index) and `tail` (producer index) live on their own
//! cache lines. Power-of-two capacities index with a mask, anything else
//! falls back to modulo.
//!
//! The ring itself is non-blocking. Blocking behaviour is layered on top
//! with an [`Epoch`] waitword: a side that fails to make progress waits on
//! the epoch it last observed, and the opposite side bumps the epoch after
//! every successful push or pop.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};

/// Creates a bounded SPSC ring with the given capacity.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "ring capacity must be non-zero");

    let mut slots = Vec::with_capacity(capacity);
    slots.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));

    let shared = Arc::new(Shared {
        head: CachePadded::new(AtomicU64::new(0)),
        tail: CachePadded::new(AtomicU64::new(0)),
        slots: slots.into_boxed_slice(),
        cap: capacity as u64,
        mask: if capacity.is_power_of_two() {
            Some(capacity as u64 - 1)
        } else {
            None
        },
    });

    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

struct Shared<T> {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    cap: u64,
    mask: Option<u64>,
}

unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn index(&self, i: u64) -> usize {
        match self.mask {
            Some(mask) => (i & mask) as usize,
            None => (i % self.cap) as usize,
        }
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let mut i = head;
        while i != tail {
            let idx = self.index(i);
            unsafe { (*self.slots[idx].get()).assume_init_drop() };
            i = i.wrapping_add(1);
        }
    }
}

/// The producing endpoint. Exactly one per ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Non-blocking push. Returns the value back when the ring is full.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let head = self.shared.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= self.shared.cap {
            return Err(value);
        }

        let idx = self.shared.index(tail);
        unsafe { (*self.shared.slots[idx].get()).write(value) };
        self.shared.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Current occupancy; may transiently overestimate.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.cap as usize
    }
}

/// The consuming endpoint. Exactly one per ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    /// Non-blocking pop.
    pub fn try_pop(&mut self) -> Option<T> {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let idx = self.shared.index(head);
        let value = unsafe { (*self.shared.slots[idx].get()).assume_init_read() };
        self.shared.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Current occupancy; may transiently overestimate.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.cap as usize
    }
}

/// Monotone waitword paired with a ring.
///
/// `wait` blocks until the counter moves past the value the caller last
/// observed; the bump takes the internal lock after incrementing so a waiter
/// between its check and the park cannot miss the wake.
pub struct Epoch {
    counter: AtomicU64,
    lock: Mutex<()>,
    cv: Condvar,
}

impl Epoch {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// The current epoch value, to be passed to a later [`Epoch::wait`].
    pub fn now(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Block until the counter differs from `seen`.
    pub fn wait(&self, seen: u64) {
        let mut guard = self.lock.lock();
        while self.counter.load(Ordering::Acquire) == seen {
            self.cv.wait(&mut guard);
        }
    }

    /// Advance the epoch and wake one waiter.
    pub fn bump_one(&self) {
        self.counter.fetch_add(1, Ordering::Release);
        drop(self.lock.lock());
        self.cv.notify_one();
    }

    /// Advance the epoch and wake every waiter.
    pub fn bump_all(&self) {
        self.counter.fetch_add(1, Ordering::Release);
        drop(self.lock.lock());
        self.cv.notify_all();
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::new()
    }
}
