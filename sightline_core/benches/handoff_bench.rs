/// Benchmarks for the cross-stage primitives
///
/// Targets:
/// - Handoff push+pop: <50ns
/// - Pool acquire+release: <100ns
/// - Snapshot read of a 64-byte value: <30ns
///
/// Run with: cargo bench --bench handoff_bench
use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sightline_core::{HandoffQueue, ResourcePool, SnapshotCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct Payload64 {
    words: [u64; 8],
}

fn bench_handoff_push_pop(c: &mut Criterion) {
    let queue = HandoffQueue::new();

    c.bench_function("handoff_push_pop", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            queue.push(black_box(counter));
            counter += 1;
            black_box(queue.pop());
        });
    });
}

fn bench_handoff_boxed_recycle(c: &mut Criterion) {
    let queue = HandoffQueue::new();
    let mut spare = Some(Box::new([0u8; 1024]));

    c.bench_function("handoff_boxed_recycle_1kb", |b| {
        b.iter(|| {
            let item = spare.take().unwrap_or_else(|| Box::new([0u8; 1024]));
            queue.push_boxed(item);
            spare = queue.pop_boxed();
            black_box(&spare);
        });
    });
}

fn bench_pool_checkout(c: &mut Criterion) {
    let pool = ResourcePool::with_capacity(3, |_| vec![0u8; 1920 * 1080 * 4]).unwrap();

    c.bench_function("pool_acquire_release", |b| {
        b.iter(|| {
            let buffer = pool.acquire_for_write();
            black_box(&buffer);
        });
    });
}

fn bench_snapshot_contended(c: &mut Criterion) {
    let cell = Arc::new(SnapshotCell::new(Payload64::zeroed()));
    let running = Arc::new(AtomicBool::new(true));

    let writer = {
        let cell = Arc::clone(&cell);
        let running = Arc::clone(&running);
        std::thread::spawn(move || {
            let mut n = 0u64;
            while running.load(Ordering::Relaxed) {
                cell.write(Payload64 { words: [n; 8] });
                n += 1;
            }
        })
    };

    c.bench_function("snapshot_read_contended_64b", |b| {
        b.iter(|| black_box(cell.read()));
    });

    running.store(false, Ordering::Relaxed);
    let _ = writer.join();
}

criterion_group!(
    benches,
    bench_handoff_push_pop,
    bench_handoff_boxed_recycle,
    bench_pool_checkout,
    bench_snapshot_contended
);
criterion_main!(benches);
