//! HandoffQueue — single-slot, latest-value-wins 1P1C handoff.
//!
//! One `AtomicPtr` holds at most one boxed item. `push` swaps the new item in
//! and hands back whatever was there (head-drop); `pop` swaps null in and
//! hands back the current item. There is no buffering: the consumer always
//! sees the freshest item and anything it did not get to is returned to the
//! producer for disposal.
//!
//! Ownership is exclusive at every instant: an item is either owned by the
//! queue slot or by exactly one caller, never both.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Cache line padding to keep the slot away from the counters.
#[repr(C, align(64))]
struct CachePadded<T>(T);

/// Single-slot head-drop queue for handing one item between two stages.
pub struct HandoffQueue<T> {
    /// The slot. Null means empty.
    slot: CachePadded<AtomicPtr<T>>,
    /// Producer-side counters
    pushes: CachePadded<AtomicU64>,
    overwrites: AtomicU64,
    /// Consumer-side counter
    pops: CachePadded<AtomicU64>,
}

// SAFETY: the queue only moves `T` values between threads, it never shares
// references to them, so `T: Send` is sufficient for both Send and Sync.
unsafe impl<T: Send> Send for HandoffQueue<T> {}
unsafe impl<T: Send> Sync for HandoffQueue<T> {}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            slot: CachePadded(AtomicPtr::new(ptr::null_mut())),
            pushes: CachePadded(AtomicU64::new(0)),
            overwrites: AtomicU64::new(0),
            pops: CachePadded(AtomicU64::new(0)),
        }
    }

    /// Store `item`, returning the unconsumed previous item if there was one.
    ///
    /// The returned item belongs to the caller; dropping it disposes of it.
    #[inline]
    pub fn push(&self, item: T) -> Option<T> {
        self.push_boxed(Box::new(item)).map(|prev| *prev)
    }

    /// Store an already boxed item. Lets producers recycle allocations.
    #[inline(always)]
    pub fn push_boxed(&self, item: Box<T>) -> Option<Box<T>> {
        let new = Box::into_raw(item);
        // Release publishes every write made to the item before the push;
        // Acquire lets us take over the previous item's contents.
        let prev = self.slot.0.swap(new, Ordering::AcqRel);
        self.pushes.0.fetch_add(1, Ordering::Relaxed);
        if prev.is_null() {
            None
        } else {
            self.overwrites.fetch_add(1, Ordering::Relaxed);
            // SAFETY: non-null pointers in the slot always come from
            // Box::into_raw and the swap removed it from the slot, so we are
            // the only owner.
            Some(unsafe { Box::from_raw(prev) })
        }
    }

    /// Take the current item, if any. Never blocks.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.pop_boxed().map(|item| *item)
    }

    /// Take the current item without unboxing it.
    #[inline(always)]
    pub fn pop_boxed(&self) -> Option<Box<T>> {
        // Cheap empty check first so idle consumers do not bounce the line.
        if self.slot.0.load(Ordering::Relaxed).is_null() {
            return None;
        }
        let taken = self.slot.0.swap(ptr::null_mut(), Ordering::Acquire);
        if taken.is_null() {
            return None;
        }
        self.pops.0.fetch_add(1, Ordering::Relaxed);
        // SAFETY: see push_boxed; the swap transferred sole ownership to us.
        Some(unsafe { Box::from_raw(taken) })
    }

    /// True when no item is waiting. Advisory only under concurrency.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.0.load(Ordering::Acquire).is_null()
    }

    /// Total number of pushes.
    pub fn pushes(&self) -> u64 {
        self.pushes.0.load(Ordering::Relaxed)
    }

    /// Number of successful pops.
    pub fn pops(&self) -> u64 {
        self.pops.0.load(Ordering::Relaxed)
    }

    /// Number of items discarded because a newer item replaced them.
    pub fn overwrites(&self) -> u64 {
        self.overwrites.load(Ordering::Relaxed)
    }
}

impl<T> Drop for HandoffQueue<T> {
    fn drop(&mut self) {
        let residual = *self.slot.0.get_mut();
        if !residual.is_null() {
            // SAFETY: &mut self guarantees no concurrent access; the pointer
            // came from Box::into_raw and is dropped exactly once here.
            drop(unsafe { Box::from_raw(residual) });
        }
    }
}

impl<T> std::fmt::Debug for HandoffQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffQueue")
            .field("empty", &self.is_empty())
            .field("pushes", &self.pushes())
            .field("pops", &self.pops())
            .field("overwrites", &self.overwrites())
            .finish()
    }
}
