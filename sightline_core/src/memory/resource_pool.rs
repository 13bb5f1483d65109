//! Fixed-size pool of reusable buffers with RAII checkout.
//!
//! The pool is created once with all of its buffers and never allocates
//! again. A buffer is either free (owned by the pool) or checked out by
//! exactly one [`PooledBuffer`]. Dropping the handle, on any exit path,
//! returns the slot exactly once.
//!
//! ```text
//! ┌──────────────── ResourcePool<T> (Arc<PoolInner>) ───────────────┐
//! │ pool_id: u32                                                    │
//! │ slots:   [UnsafeCell<T>; N]          N <= 64                    │
//! │ table:   Mutex<SlotTable>                                       │
//! │          ├── busy: u64 bitmap                                   │
//! │          └── generation[N]   bumped on every checkout           │
//! │ counters: checkouts, starvations, double_releases               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The bitmap is mutated under a short `parking_lot` critical section. That
//! happens once per checkout and once per return, never per byte.
//!
//! Running out of slots is backpressure, not an error:
//! [`ResourcePool::acquire_for_write`] returns `None` and the caller drops its
//! current unit of work.
//!
//! # Example
//!
//! ```rust
//! use sightline_core::memory::ResourcePool;
//!
//! let pool = ResourcePool::with_capacity(3, |_| vec![0u8; 1024]).unwrap();
//! {
//!     let mut buf = pool.acquire_for_write().expect("free slot");
//!     buf[0] = 42;
//! } // returned to the pool here
//! assert_eq!(pool.stats().in_use, 0);
//! ```

use crate::error::{SightlineError, SightlineResult};
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Maximum number of slots (one bit each in the busy bitmap).
pub const MAX_POOL_SLOTS: usize = 64;

/// Default pool size: one slot being written, one being read, one free.
pub const DEFAULT_POOL_SLOTS: usize = 3;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

struct SlotTable {
    busy: u64,
    generation: Vec<u64>,
}

struct PoolInner<T> {
    pool_id: u32,
    slots: Box<[UnsafeCell<T>]>,
    table: Mutex<SlotTable>,
    checkouts: AtomicU64,
    starvations: AtomicU64,
    double_releases: AtomicU64,
}

// SAFETY: a slot's `T` is only reachable through the single PooledBuffer that
// has it checked out, and checkout/return are serialized by `table`.
unsafe impl<T: Send> Send for PoolInner<T> {}
unsafe impl<T: Send> Sync for PoolInner<T> {}

/// Identifies one checkout of one slot. Obtained from
/// [`PooledBuffer::into_token`] and given back with
/// [`ResourcePool::release_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotToken {
    pub pool_id: u32,
    pub slot: usize,
    pub generation: u64,
}

/// Counters for a resource pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourcePoolStats {
    pub pool_id: u32,
    pub capacity: usize,
    pub in_use: usize,
    pub checkouts: u64,
    pub starvations: u64,
    pub double_releases: u64,
}

/// Fixed-size buffer pool. Cloning shares the same pool.
pub struct ResourcePool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send> ResourcePool<T> {
    /// Build a pool that owns `buffers`.
    pub fn new(buffers: Vec<T>) -> SightlineResult<Self> {
        if buffers.is_empty() || buffers.len() > MAX_POOL_SLOTS {
            return Err(SightlineError::InvalidInput(format!(
                "pool size must be in 1..={}, got {}",
                MAX_POOL_SLOTS,
                buffers.len()
            )));
        }
        let count = buffers.len();
        let slots: Box<[UnsafeCell<T>]> = buffers.into_iter().map(UnsafeCell::new).collect();
        let pool_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("resource pool {} created with {} slots", pool_id, count);

        Ok(Self {
            inner: Arc::new(PoolInner {
                pool_id,
                slots,
                table: Mutex::new(SlotTable {
                    busy: 0,
                    generation: vec![0; count],
                }),
                checkouts: AtomicU64::new(0),
                starvations: AtomicU64::new(0),
                double_releases: AtomicU64::new(0),
            }),
        })
    }

    /// Build a pool of `count` buffers produced by `init(slot_index)`.
    pub fn with_capacity(count: usize, init: impl FnMut(usize) -> T) -> SightlineResult<Self> {
        Self::new((0..count).map(init).collect())
    }

    /// Check out a free buffer.
    ///
    /// Returns `None` when every slot is busy; the starvation counter is
    /// incremented and the caller is expected to drop its current work.
    pub fn acquire_for_write(&self) -> Option<PooledBuffer<T>> {
        let capacity = self.inner.slots.len();
        let claimed = {
            let mut table = self.inner.table.lock();
            let free = (0..capacity).find(|&i| table.busy & (1u64 << i) == 0);
            free.map(|slot| {
                table.busy |= 1u64 << slot;
                table.generation[slot] += 1;
                (slot, table.generation[slot])
            })
        };

        match claimed {
            Some((slot, generation)) => {
                self.inner.checkouts.fetch_add(1, Ordering::Relaxed);
                Some(PooledBuffer {
                    pool: Arc::clone(&self.inner),
                    slot,
                    generation,
                    armed: true,
                    _marker: PhantomData,
                })
            }
            None => {
                let n = self.inner.starvations.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    log::debug!(
                        "resource pool {} starved ({} times so far)",
                        self.inner.pool_id,
                        n
                    );
                }
                None
            }
        }
    }
}

impl<T> ResourcePool<T> {
    /// Return a detached checkout. Reports double and foreign releases.
    pub fn release_token(&self, token: SlotToken) -> SightlineResult<()> {
        self.inner.release(token)
    }

    /// Unique id of this pool instance.
    pub fn pool_id(&self) -> u32 {
        self.inner.pool_id
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of starved acquisitions so far.
    pub fn starvation_count(&self) -> u64 {
        self.inner.starvations.load(Ordering::Relaxed)
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> ResourcePoolStats {
        let in_use = self.inner.table.lock().busy.count_ones() as usize;
        ResourcePoolStats {
            pool_id: self.inner.pool_id,
            capacity: self.inner.slots.len(),
            in_use,
            checkouts: self.inner.checkouts.load(Ordering::Relaxed),
            starvations: self.inner.starvations.load(Ordering::Relaxed),
            double_releases: self.inner.double_releases.load(Ordering::Relaxed),
        }
    }
}

impl<T> PoolInner<T> {
    fn release(&self, token: SlotToken) -> SightlineResult<()> {
        if token.pool_id != self.pool_id {
            self.double_releases.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "slot token from pool {} returned to pool {}",
                token.pool_id,
                self.pool_id
            );
            return Err(SightlineError::ForeignPool {
                pool_id: self.pool_id,
                token_pool: token.pool_id,
            });
        }

        let mut table = self.table.lock();
        let in_range = token.slot < self.slots.len();
        let bit = if in_range { 1u64 << token.slot } else { 0 };
        let live = in_range
            && table.busy & bit != 0
            && table.generation[token.slot] == token.generation;
        if !live {
            drop(table);
            self.double_releases.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "double release of pool {} slot {} (generation {})",
                self.pool_id,
                token.slot,
                token.generation
            );
            return Err(SightlineError::DoubleRelease {
                pool_id: self.pool_id,
                slot: token.slot,
                generation: token.generation,
            });
        }
        table.busy &= !bit;
        Ok(())
    }
}

/// Scoped checkout of one pool slot. Derefs to the buffer.
pub struct PooledBuffer<T> {
    pool: Arc<PoolInner<T>>,
    slot: usize,
    generation: u64,
    armed: bool,
    // Opt out of the auto Sync impl; see the manual impls below.
    _marker: PhantomData<*mut T>,
}

// SAFETY: the handle owns its slot exclusively; moving it moves that
// ownership. Sharing `&PooledBuffer` shares `&T`, which needs `T: Sync`.
unsafe impl<T: Send> Send for PooledBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for PooledBuffer<T> {}

impl<T> PooledBuffer<T> {
    /// Slot index inside the pool.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Id of the owning pool.
    pub fn pool_id(&self) -> u32 {
        self.pool.pool_id
    }

    /// Token describing this checkout.
    pub fn token(&self) -> SlotToken {
        SlotToken {
            pool_id: self.pool.pool_id,
            slot: self.slot,
            generation: self.generation,
        }
    }

    /// Detach the checkout from this handle. The slot stays busy until the
    /// token is passed to [`ResourcePool::release_token`].
    pub fn into_token(mut self) -> SlotToken {
        self.armed = false;
        self.token()
    }

    /// Return the buffer now, surfacing release errors to the caller.
    pub fn release(mut self) -> SightlineResult<()> {
        self.armed = false;
        self.pool.release(self.token())
    }
}

impl<T> Deref for PooledBuffer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the slot is checked out to this handle alone.
        unsafe { &*self.pool.slots[self.slot].get() }
    }
}

impl<T> DerefMut for PooledBuffer<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, plus &mut self guarantees unique access.
        unsafe { &mut *self.pool.slots[self.slot].get() }
    }
}

impl<T> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            // Errors are logged and counted inside release.
            let _ = self.pool.release(self.token());
        }
    }
}

impl<T> std::fmt::Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pool_id", &self.pool.pool_id)
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_pool(n: usize) -> ResourcePool<Vec<u8>> {
        ResourcePool::with_capacity(n, |_| vec![0u8; 64]).expect("Failed to create pool")
    }

    #[test]
    fn test_pool_creation() {
        let pool = byte_pool(3);
        let stats = pool.stats();
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.starvations, 0);
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert!(ResourcePool::<u8>::new(vec![]).is_err());
        assert!(ResourcePool::with_capacity(MAX_POOL_SLOTS + 1, |_| 0u8).is_err());
        assert!(ResourcePool::with_capacity(MAX_POOL_SLOTS, |_| 0u8).is_ok());
    }

    #[test]
    fn test_over_acquire_counts_starvation() {
        let pool = byte_pool(3);
        let mut held = Vec::new();
        let mut starved = 0;
        for _ in 0..7 {
            match pool.acquire_for_write() {
                Some(buf) => held.push(buf),
                None => starved += 1,
            }
        }
        assert_eq!(held.len(), 3);
        assert_eq!(starved, 4);
        assert_eq!(pool.starvation_count(), 4);

        held.pop();
        assert_eq!(pool.stats().in_use, 2);
        assert!(pool.acquire_for_write().is_some());
    }

    #[test]
    fn test_drop_returns_slot_and_keeps_data() {
        let pool = byte_pool(1);
        {
            let mut buf = pool.acquire_for_write().unwrap();
            buf[0] = 9;
        }
        let buf = pool.acquire_for_write().unwrap();
        assert_eq!(buf[0], 9, "buffers are reused, not reallocated");
    }

    #[test]
    fn test_release_on_early_return_path() {
        fn work(pool: &ResourcePool<Vec<u8>>) -> SightlineResult<()> {
            let _buf = pool.acquire_for_write().ok_or_else(|| {
                SightlineError::Memory("starved".to_string())
            })?;
            Err(SightlineError::InvalidInput("bail out".to_string()))
        }
        let pool = byte_pool(1);
        assert!(work(&pool).is_err());
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_double_release_reported() {
        let pool = byte_pool(2);
        let token = pool.acquire_for_write().unwrap().into_token();
        assert_eq!(pool.stats().in_use, 1);

        pool.release_token(token).expect("first release");
        let err = pool.release_token(token).unwrap_err();
        assert!(matches!(err, SightlineError::DoubleRelease { .. }));
        assert_eq!(pool.stats().double_releases, 1);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_stale_token_does_not_free_new_checkout() {
        let pool = byte_pool(1);
        let token = pool.acquire_for_write().unwrap().into_token();
        pool.release_token(token).unwrap();

        let current = pool.acquire_for_write().unwrap();
        assert_eq!(current.slot(), token.slot);
        assert!(pool.release_token(token).is_err());
        assert_eq!(pool.stats().in_use, 1, "live checkout must stay busy");
        drop(current);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_foreign_token_rejected() {
        let a = byte_pool(1);
        let b = byte_pool(1);
        let token = a.acquire_for_write().unwrap().into_token();
        let err = b.release_token(token).unwrap_err();
        assert!(matches!(err, SightlineError::ForeignPool { .. }));
        a.release_token(token).unwrap();
    }

    #[test]
    fn test_concurrent_checkout_is_exclusive() {
        let pool = ResourcePool::with_capacity(3, |_| 0u64).unwrap();
        let threads: Vec<_> = (0..4u64)
            .map(|t| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let mut got = 0;
                    for _ in 0..5_000 {
                        if let Some(mut slot) = pool.acquire_for_write() {
                            *slot = t;
                            std::hint::spin_loop();
                            assert_eq!(*slot, t, "slot shared between borrowers");
                            got += 1;
                        }
                    }
                    got
                })
            })
            .collect();
        let total: u64 = threads.into_iter().map(|h| h.join().unwrap()).sum();
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.checkouts, total);
        assert_eq!(stats.checkouts + stats.starvations, 20_000);
        assert_eq!(stats.double_releases, 0);
    }
}
