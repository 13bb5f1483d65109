/// Benchmarks for the per-batch tracking work
///
/// Targets (64 tracks × 64 detections):
/// - Greedy association: <50μs
/// - Full tracker cycle: <80μs
///
/// Run with: cargo bench --bench association_bench
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sightline_perception::tracking::DataAssociator;
use sightline_perception::{
    BoundingBox2D, Detection, DetectionBatch, SelectorConfig, Tracker, TrackerConfig,
};
use std::time::Instant;

fn grid(n: usize, jitter: f32) -> Vec<BoundingBox2D> {
    (0..n)
        .map(|i| {
            let col = (i % 8) as f32;
            let row = (i / 8) as f32;
            BoundingBox2D::new(col * 50.0 + jitter, row * 50.0 - jitter, 40.0, 40.0)
        })
        .collect()
}

fn bench_associate(c: &mut Criterion) {
    let mut group = c.benchmark_group("associate");
    for n in [8usize, 32, 64] {
        let tracks = grid(n, 0.0);
        let observations = grid(n, 3.0);
        let mut associator = DataAssociator::new();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let result = associator.associate(black_box(&tracks), black_box(&observations), 0.3);
                black_box(result.matches.len());
            });
        });
    }
    group.finish();
}

fn bench_tracker_cycle(c: &mut Criterion) {
    let mut tracker = Tracker::new(TrackerConfig::default(), SelectorConfig::default()).unwrap();
    let mut sequence = 0u64;

    c.bench_function("tracker_cycle_64", |b| {
        b.iter(|| {
            sequence += 1;
            let jitter = (sequence % 4) as f32;
            let detections = grid(64, jitter)
                .into_iter()
                .map(|bbox| Detection::new(bbox, 0.9, 0));
            let batch = DetectionBatch::from_detections(sequence, Instant::now(), (0.0, 0.0), detections);
            black_box(tracker.update(&batch, 0.016));
            black_box(tracker.aim_command());
        });
    });
}

criterion_group!(benches, bench_associate, bench_tracker_cycle);
criterion_main!(benches);
