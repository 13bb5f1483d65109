//! Multi-cycle tracker scenarios.

use sightline_perception::tracking::filter::{self, FilterNoise, FilterState};
use sightline_perception::{
    BoundingBox2D, Detection, DetectionBatch, HitboxClass, SelectorConfig, Tracker,
    TrackerConfig,
};
use std::time::Instant;

fn tracker(grace_period: f32) -> Tracker {
    Tracker::new(
        TrackerConfig {
            grace_period,
            ..Default::default()
        },
        SelectorConfig {
            reference: (125.0, 140.0),
            fov_radius: 500.0,
        },
    )
    .unwrap()
}

fn batch(sequence: u64, detections: Vec<Detection>) -> DetectionBatch {
    DetectionBatch::from_detections(sequence, Instant::now(), (0.0, 0.0), detections)
}

#[test]
fn test_single_head_is_evicted_by_third_empty_batch() {
    let mut tracker = tracker(0.032);
    let head = Detection::new(BoundingBox2D::new(100.0, 100.0, 50.0, 80.0), 0.9, 0)
        .with_hitbox(HitboxClass::Head);

    let report = tracker.update(&batch(1, vec![head]), 0.016);
    assert_eq!(report.created, 1);
    assert_eq!(tracker.track_count(), 1);
    assert!(tracker.aim_command().has_target());

    // 0.016 and 0.032 s of coasting do not exceed the grace period.
    for seq in 2..=3 {
        let report = tracker.update(&batch(seq, vec![]), 0.016);
        assert!(report.evicted.is_empty(), "evicted early at batch {}", seq);
        assert_eq!(tracker.track_count(), 1);
    }

    // 0.048 s does.
    let report = tracker.update(&batch(4, vec![]), 0.016);
    assert_eq!(report.evicted, vec![1]);
    assert_eq!(tracker.track_count(), 0);

    let aim = tracker.aim_command();
    assert!(!aim.has_target());
    assert_eq!(aim.position(), None);
}

#[test]
fn test_two_separate_objects_keep_their_ids() {
    let mut tracker = tracker(0.1);
    let mut ids_by_cycle = Vec::new();

    for cycle in 0..5 {
        let shift = cycle as f32 * 4.0;
        let left = Detection::new(BoundingBox2D::new(50.0 + shift, 100.0, 40.0, 60.0), 0.8, 1);
        let right =
            Detection::new(BoundingBox2D::new(400.0 - shift, 120.0, 40.0, 60.0), 0.85, 2);
        // Alternate detector output order; association must not care.
        let detections = if cycle % 2 == 0 {
            vec![left, right]
        } else {
            vec![right, left]
        };
        let report = tracker.update(&batch(cycle + 1, detections), 0.016);
        if cycle > 0 {
            assert_eq!(report.matched, 2);
            assert_eq!(report.created, 0);
        }

        let mut ids: Vec<(u64, HitboxClass)> =
            tracker.tracks().map(|t| (t.id, t.hitbox)).collect();
        ids.sort_by_key(|(id, _)| *id);
        ids_by_cycle.push(ids);
    }

    let first = &ids_by_cycle[0];
    assert_eq!(first.len(), 2);
    for ids in &ids_by_cycle {
        assert_eq!(ids, first);
    }
    assert_eq!(
        first,
        &vec![(1, HitboxClass::Chest), (2, HitboxClass::Body)]
    );
}

#[test]
fn test_head_preferred_over_closer_body() {
    let mut tracker = tracker(0.1);
    let body = Detection::new(BoundingBox2D::from_center(130.0, 140.0, 40.0, 60.0), 0.9, 2);
    let head = Detection::new(BoundingBox2D::from_center(300.0, 140.0, 20.0, 20.0), 0.6, 0);
    tracker.update(&batch(1, vec![body, head]), 0.016);

    let target = tracker.select_target().unwrap();
    assert_eq!(target.hitbox, HitboxClass::Head);
    assert_eq!(target.track_id, 2);
}

#[test]
fn test_batch_coast_matches_scalar_coast() {
    // Every track unmatched takes the batch path; compare it with the
    // scalar filter on the same states.
    let noise = FilterNoise::default();
    let mut tracker = tracker(10.0);
    let detections: Vec<Detection> = (0..20)
        .map(|i| {
            Detection::new(
                BoundingBox2D::new(i as f32 * 60.0, (i % 3) as f32 * 70.0, 30.0, 30.0),
                0.9,
                1,
            )
        })
        .collect();
    tracker.update(&batch(1, detections.clone()), 0.0);

    // Give the tracks some velocity.
    let moved: Vec<Detection> = detections
        .iter()
        .map(|d| {
            Detection::new(
                BoundingBox2D::new(d.bbox.x + 3.0, d.bbox.y - 2.0, 30.0, 30.0),
                0.9,
                1,
            )
        })
        .collect();
    tracker.update(&batch(2, moved), 0.016);

    let mut expected: Vec<FilterState> = (0..tracker.track_count())
        .map(|i| tracker.store().filter_state(i))
        .collect();
    for state in &mut expected {
        filter::predict_state(0.016, state, &noise);
    }

    let report = tracker.update(&batch(3, vec![]), 0.016);
    assert_eq!(report.coasted, 20);
    for (i, want) in expected.iter().enumerate() {
        assert_eq!(&tracker.store().filter_state(i), want, "track index {}", i);
    }
}
