//! SnapshotCell — last-write-wins cell for small `Pod` values.
//!
//! A single writer publishes whole values; any number of readers take
//! consistent copies without locking. The value is stored as a run of
//! `AtomicU64` words guarded by a sequence counter (seqlock). Readers retry
//! when they race a write, so they never block on the writer and never see a
//! torn value.
//!
//! The cell also records when it was last written, which is what the
//! deadman gate measures staleness against.

use bytemuck::Pod;
use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const WORD: usize = std::mem::size_of::<u64>();

/// Single-writer, multi-reader value cell.
pub struct SnapshotCell<T: Pod> {
    /// Even = stable, odd = write in progress.
    seq: AtomicU64,
    words: Box<[AtomicU64]>,
    /// Nanoseconds since `epoch` of the last write, `u64::MAX` before the first.
    written_at_ns: AtomicU64,
    epoch: Instant,
    _marker: PhantomData<T>,
}

/// A value read from a [`SnapshotCell`] together with its write metadata.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<T> {
    pub value: T,
    /// Number of writes the cell had seen when this value was read.
    pub version: u64,
    /// Time since the value was written, or since the cell was created if
    /// nothing has been written yet.
    pub age: Duration,
}

impl<T: Pod> SnapshotCell<T> {
    /// Create a cell holding `initial`. The initial value does not count as a
    /// write: its age grows from the moment of creation.
    pub fn new(initial: T) -> Self {
        let len = std::mem::size_of::<T>().div_ceil(WORD).max(1);
        let words: Box<[AtomicU64]> = (0..len).map(|_| AtomicU64::new(0)).collect();
        let cell = Self {
            seq: AtomicU64::new(0),
            words,
            written_at_ns: AtomicU64::new(u64::MAX),
            epoch: Instant::now(),
            _marker: PhantomData,
        };
        cell.store_words(&initial);
        cell
    }

    /// Publish a new value. Only one thread may call this.
    pub fn write(&self, value: T) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.store_words(&value);
        self.written_at_ns
            .store(self.epoch.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Read a consistent copy of the current value.
    pub fn read(&self) -> T {
        self.snapshot().value
    }

    /// Read the value with its version and age.
    pub fn snapshot(&self) -> Snapshot<T> {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let value = self.load_words();
            let written = self.written_at_ns.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            let after = self.seq.load(Ordering::Relaxed);
            if before == after {
                return Snapshot {
                    value,
                    version: before / 2,
                    age: self.age_from(written),
                };
            }
            std::hint::spin_loop();
        }
    }

    /// Time since the last write (or since creation if never written).
    pub fn staleness(&self) -> Duration {
        self.age_from(self.written_at_ns.load(Ordering::Acquire))
    }

    /// Number of completed writes.
    pub fn version(&self) -> u64 {
        self.seq.load(Ordering::Acquire) / 2
    }

    fn age_from(&self, written_ns: u64) -> Duration {
        let now = self.epoch.elapsed();
        if written_ns == u64::MAX {
            return now;
        }
        now.saturating_sub(Duration::from_nanos(written_ns))
    }

    fn store_words(&self, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        for (word, chunk) in self.words.iter().zip(bytes.chunks(WORD)) {
            let mut buf = [0u8; WORD];
            buf[..chunk.len()].copy_from_slice(chunk);
            word.store(u64::from_ne_bytes(buf), Ordering::Relaxed);
        }
    }

    fn load_words(&self) -> T {
        let mut out = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut out);
        for (word, chunk) in self.words.iter().zip(bytes.chunks_mut(WORD)) {
            let buf = word.load(Ordering::Relaxed).to_ne_bytes();
            let n = chunk.len();
            chunk.copy_from_slice(&buf[..n]);
        }
        out
    }
}

impl<T: Pod + std::fmt::Debug> std::fmt::Debug for SnapshotCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCell")
            .field("value", &self.read())
            .field("version", &self.version())
            .field("staleness", &self.staleness())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use std::sync::Arc;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct Triple {
        a: u32,
        b: u32,
        c: u32,
    }

    #[test]
    fn test_initial_value_is_not_a_write() {
        let cell = SnapshotCell::new(Triple { a: 1, b: 2, c: 3 });
        assert_eq!(cell.read(), Triple { a: 1, b: 2, c: 3 });
        assert_eq!(cell.version(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let cell = SnapshotCell::new(Triple::zeroed());
        cell.write(Triple { a: 4, b: 5, c: 6 });
        let snap = cell.snapshot();
        assert_eq!(snap.value, Triple { a: 4, b: 5, c: 6 });
        assert_eq!(snap.version, 1);
        assert!(snap.age < Duration::from_secs(1));
    }

    #[test]
    fn test_staleness_grows_without_writes() {
        let cell = SnapshotCell::new(0u64);
        cell.write(1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cell.staleness() >= Duration::from_millis(5));
        cell.write(2);
        assert!(cell.staleness() < Duration::from_millis(5));
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_values() {
        let cell = Arc::new(SnapshotCell::new(Triple::zeroed()));
        let writer = {
            let cell = cell.clone();
            std::thread::spawn(move || {
                for i in 1..=20_000u32 {
                    cell.write(Triple { a: i, b: i, c: i });
                }
            })
        };
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let cell = cell.clone();
                std::thread::spawn(move || {
                    for _ in 0..20_000 {
                        let v = cell.read();
                        assert!(v.a == v.b && v.b == v.c, "torn read: {:?}", v);
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cell.version(), 20_000);
    }
}
