//! Multi-object tracker
//!
//! One [`Tracker::update`] per detection batch:
//!
//! 1. drop observations with a non-finite box or below `min_confidence`
//! 2. greedy IoU association against the live tracks
//! 3. matched tracks: Kalman update, refresh box/confidence/hitbox, grace = 0
//! 4. unmatched tracks: coast, grace += dt
//! 5. unmatched observations: new track, or dropped if the store is full
//! 6. evict every track whose grace strictly exceeds `grace_period`
//!
//! Eviction runs after all updates, coasts and creations of the cycle.

use super::association::DataAssociator;
use super::filter::{self, FilterNoise};
use super::filter_simd;
use super::selector::{self, SelectorConfig, TargetCandidate};
use super::store::{NewTrack, Track, TrackStore, MAX_TRACKS};
use crate::types::{AimCommand, BoundingBox2D, Detection, DetectionBatch};
use serde::{Deserialize, Serialize};
use sightline_core::{SightlineError, SightlineResult};

/// Tracker settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum IoU (exclusive) for a detection to continue a track
    pub iou_threshold: f32,
    /// Coasting time (seconds) a track survives without a match
    pub grace_period: f32,
    /// Track store capacity
    pub max_tracks: usize,
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
    /// Aim-point extrapolation (seconds)
    pub prediction_horizon: f32,
    pub noise: FilterNoise,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            grace_period: 0.1,
            max_tracks: MAX_TRACKS,
            min_confidence: 0.25,
            prediction_horizon: 0.016,
            noise: FilterNoise::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> SightlineResult<()> {
        if !(0.0..1.0).contains(&self.iou_threshold) {
            return Err(SightlineError::Config(format!(
                "tracker.iou_threshold must be in [0, 1), got {}",
                self.iou_threshold
            )));
        }
        if !(self.grace_period.is_finite() && self.grace_period > 0.0) {
            return Err(SightlineError::Config(format!(
                "tracker.grace_period must be positive, got {}",
                self.grace_period
            )));
        }
        if self.max_tracks == 0 || self.max_tracks > MAX_TRACKS {
            return Err(SightlineError::Config(format!(
                "tracker.max_tracks must be in 1..={}, got {}",
                MAX_TRACKS, self.max_tracks
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(SightlineError::Config(format!(
                "tracker.min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(self.prediction_horizon.is_finite() && self.prediction_horizon >= 0.0) {
            return Err(SightlineError::Config(format!(
                "tracker.prediction_horizon must be non-negative, got {}",
                self.prediction_horizon
            )));
        }
        self.noise.validate()
    }
}

/// What one update did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Sequence number of the batch
    pub sequence: u64,
    pub matched: usize,
    pub coasted: usize,
    pub created: usize,
    /// Ids evicted this cycle
    pub evicted: Vec<u64>,
    /// Observations dropped because the store was full
    pub dropped_capacity: usize,
    /// Observations ignored for low confidence
    pub dropped_low_confidence: usize,
    /// Observations whose box had a NaN or infinite field
    pub dropped_non_finite: usize,
    /// Detections the batch itself had to drop
    pub dropped_batch_overflow: usize,
    /// Live tracks after the cycle
    pub live: usize,
}

/// Running totals over all cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub cycles: u64,
    pub tracks_created: u64,
    pub tracks_evicted: u64,
    pub dropped_capacity: u64,
    pub dropped_low_confidence: u64,
    pub dropped_non_finite: u64,
    pub dropped_batch_overflow: u64,
}

/// Multi-object tracker. Owned by the track stage; not shared.
#[derive(Debug)]
pub struct Tracker {
    config: TrackerConfig,
    selector: SelectorConfig,
    store: TrackStore,
    associator: DataAssociator,
    observations: Vec<Detection>,
    observation_boxes: Vec<BoundingBox2D>,
    last_sequence: u64,
    last_roi_offset: (f32, f32),
    stats: TrackerStats,
}

impl Tracker {
    pub fn new(config: TrackerConfig, selector: SelectorConfig) -> SightlineResult<Self> {
        config.validate()?;
        selector.validate()?;
        Ok(Self {
            store: TrackStore::with_capacity(config.max_tracks)?,
            config,
            selector,
            associator: DataAssociator::new(),
            observations: Vec::with_capacity(MAX_TRACKS),
            observation_boxes: Vec::with_capacity(MAX_TRACKS),
            last_sequence: 0,
            last_roi_offset: (0.0, 0.0),
            stats: TrackerStats::default(),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn track_count(&self) -> usize {
        self.store.len()
    }

    pub fn tracks(&self) -> impl Iterator<Item = Track> + '_ {
        self.store.iter()
    }

    /// Run one cycle for `batch`, `dt` seconds after the previous one.
    pub fn update(&mut self, batch: &DetectionBatch, dt: f32) -> CycleReport {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let Self {
            config,
            store,
            associator,
            observations,
            observation_boxes,
            stats,
            ..
        } = self;
        let noise = &config.noise;

        let mut report = CycleReport {
            sequence: batch.sequence,
            dropped_batch_overflow: batch.dropped() as usize,
            ..Default::default()
        };

        observations.clear();
        observation_boxes.clear();
        for detection in batch.detections() {
            if !detection.bbox.is_finite() {
                report.dropped_non_finite += 1;
            } else if detection.is_confident(config.min_confidence) {
                observations.push(*detection);
                observation_boxes.push(detection.bbox);
            } else {
                report.dropped_low_confidence += 1;
            }
        }

        let association =
            associator.associate(store.bboxes(), observation_boxes, config.iou_threshold);

        for m in &association.matches {
            let detection = &observations[m.observation];
            let mut state = store.filter_state(m.track);
            filter::update(detection.bbox.center(), dt, &mut state, noise);
            store.set_filter_state(m.track, &state);
            store.mark_matched(
                m.track,
                detection.bbox,
                detection.confidence,
                detection.hitbox,
                batch.captured_at,
            );
        }
        report.matched = association.matches.len();

        let unmatched = &association.unmatched_tracks;
        if !unmatched.is_empty() && unmatched.len() == store.len() {
            // Nothing matched: coast every track through the batch path.
            let (xs, ys, vxs, vys) = store.motion_columns_mut();
            filter_simd::coast_positions(xs, ys, vxs, vys, dt);
            for covariance in store.covariances_mut() {
                filter::predict_covariance(covariance, dt, noise);
            }
        } else {
            for &index in unmatched {
                let mut state = store.filter_state(index);
                filter::predict_state(dt, &mut state, noise);
                store.set_filter_state(index, &state);
            }
        }
        for &index in unmatched {
            store.mark_coasted(index, dt);
        }
        report.coasted = unmatched.len();

        store.age_all();

        for &o in &association.unmatched_observations {
            let detection = &observations[o];
            let seed = NewTrack {
                bbox: detection.bbox,
                confidence: detection.confidence,
                hitbox: detection.hitbox,
                seen_at: batch.captured_at,
            };
            match store.insert(seed, noise) {
                Some(_) => report.created += 1,
                None => report.dropped_capacity += 1,
            }
        }

        // Walk backwards so swap_remove only moves already-checked tracks.
        for index in (0..store.len()).rev() {
            if store.grace(index) > config.grace_period {
                report.evicted.push(store.swap_remove(index));
            }
        }
        report.live = store.len();

        stats.cycles += 1;
        stats.tracks_created += report.created as u64;
        stats.tracks_evicted += report.evicted.len() as u64;
        stats.dropped_capacity += report.dropped_capacity as u64;
        stats.dropped_low_confidence += report.dropped_low_confidence as u64;
        stats.dropped_non_finite += report.dropped_non_finite as u64;
        stats.dropped_batch_overflow += report.dropped_batch_overflow as u64;
        if report.dropped_non_finite > 0 {
            log::warn!(
                "Ignored {} detection(s) with a non-finite box in batch {}",
                report.dropped_non_finite,
                batch.sequence
            );
        }
        if report.dropped_capacity > 0 {
            log::debug!(
                "Track store full: dropped {} observation(s) in batch {}",
                report.dropped_capacity,
                batch.sequence
            );
        }
        if !report.evicted.is_empty() {
            log::debug!("Evicted tracks {:?}", report.evicted);
        }

        self.last_sequence = batch.sequence;
        self.last_roi_offset = batch.roi_offset;
        report
    }

    /// Current best target, in capture-region coordinates.
    pub fn select_target(&self) -> Option<TargetCandidate> {
        selector::select(&self.store, self.selector.reference, self.selector.fov_radius)
    }

    /// Aim command for the latest cycle: the selected track extrapolated by
    /// the prediction horizon and translated into screen coordinates.
    pub fn aim_command(&self) -> AimCommand {
        let Some(target) = self.select_target() else {
            return AimCommand::none_for_frame(self.last_sequence);
        };
        let state = self.store.filter_state(target.index);
        let (x, y) = filter::predict(self.config.prediction_horizon, &state);
        let confidence = self
            .store
            .get(target.index)
            .map(|t| t.confidence)
            .unwrap_or(0.0);
        AimCommand::target(
            x + self.last_roi_offset.0,
            y + self.last_roi_offset.1,
            confidence,
            target.hitbox,
            target.track_id,
            self.last_sequence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::store::TrackState;
    use crate::types::HitboxClass;
    use std::time::Instant;

    fn tracker(grace_period: f32) -> Tracker {
        Tracker::new(
            TrackerConfig {
                grace_period,
                ..Default::default()
            },
            SelectorConfig {
                reference: (0.0, 0.0),
                fov_radius: 10_000.0,
            },
        )
        .unwrap()
    }

    fn batch(sequence: u64, detections: Vec<Detection>) -> DetectionBatch {
        DetectionBatch::from_detections(sequence, Instant::now(), (0.0, 0.0), detections)
    }

    fn det(x: f32, y: f32, confidence: f32) -> Detection {
        Detection::new(BoundingBox2D::new(x, y, 40.0, 40.0), confidence, 2)
    }

    #[test]
    fn test_low_confidence_ignored() {
        let mut t = tracker(0.1);
        let report = t.update(&batch(1, vec![det(0.0, 0.0, 0.1), det(100.0, 0.0, 0.9)]), 0.016);
        assert_eq!(report.created, 1);
        assert_eq!(report.dropped_low_confidence, 1);
        assert_eq!(t.track_count(), 1);
    }

    #[test]
    fn test_non_finite_box_never_tracked_or_selected() {
        let mut t = Tracker::new(
            TrackerConfig::default(),
            SelectorConfig {
                reference: (160.0, 160.0),
                fov_radius: 50.0,
            },
        )
        .unwrap();
        let report = t.update(
            &batch(
                1,
                vec![
                    Detection::new(BoundingBox2D::new(f32::NAN, 100.0, 20.0, 20.0), 0.9, 0),
                    Detection::new(BoundingBox2D::new(0.0, 0.0, f32::INFINITY, 20.0), 0.9, 0),
                    Detection::new(BoundingBox2D::new(10.0, 10.0, 20.0, 20.0), 0.9, 0),
                ],
            ),
            0.016,
        );
        assert_eq!(report.dropped_non_finite, 2);
        assert_eq!(report.created, 1);
        assert_eq!(t.stats().dropped_non_finite, 2);
        assert!(t.tracks().all(|track| track.position.0.is_finite()));

        // The only live track is outside the FOV.
        assert!(t.select_target().is_none());
        assert!(!t.aim_command().has_target());
    }

    #[test]
    fn test_matched_track_never_evicted() {
        let mut t = tracker(0.05);
        t.update(&batch(1, vec![det(0.0, 0.0, 0.9)]), 0.0);
        for seq in 2..50 {
            // Long gaps, but always matched.
            let report = t.update(&batch(seq, vec![det(0.0, 0.0, 0.9)]), 1.0);
            assert_eq!(report.matched, 1);
            assert!(report.evicted.is_empty());
        }
        let track = t.tracks().next().unwrap();
        assert_eq!(track.id, 1);
        assert_eq!(track.state, TrackState::Active);
        assert_eq!(track.hits, 50);
    }

    #[test]
    fn test_coasting_then_rematch_resets_grace() {
        let mut t = tracker(0.05);
        t.update(&batch(1, vec![det(0.0, 0.0, 0.9)]), 0.0);
        t.update(&batch(2, vec![]), 0.03);
        assert_eq!(t.tracks().next().unwrap().state, TrackState::Coasting);

        t.update(&batch(3, vec![det(0.0, 0.0, 0.9)]), 0.03);
        let track = t.tracks().next().unwrap();
        assert_eq!(track.grace, 0.0);
        assert_eq!(track.state, TrackState::Active);

        // Another 0.03 s coast does not exceed 0.05 s.
        let report = t.update(&batch(4, vec![]), 0.03);
        assert!(report.evicted.is_empty());
    }

    #[test]
    fn test_capacity_drop_counted() {
        let mut t = Tracker::new(
            TrackerConfig {
                max_tracks: 2,
                ..Default::default()
            },
            SelectorConfig::default(),
        )
        .unwrap();
        let report = t.update(
            &batch(
                1,
                vec![
                    det(0.0, 0.0, 0.9),
                    det(100.0, 0.0, 0.9),
                    det(200.0, 0.0, 0.9),
                ],
            ),
            0.016,
        );
        assert_eq!(report.created, 2);
        assert_eq!(report.dropped_capacity, 1);
        assert_eq!(t.stats().dropped_capacity, 1);
    }

    #[test]
    fn test_ids_never_reused() {
        let mut t = tracker(0.01);
        t.update(&batch(1, vec![det(0.0, 0.0, 0.9)]), 0.0);
        let report = t.update(&batch(2, vec![]), 0.02);
        assert_eq!(report.evicted, vec![1]);

        t.update(&batch(3, vec![det(0.0, 0.0, 0.9)]), 0.016);
        assert_eq!(t.tracks().next().unwrap().id, 2);
    }

    #[test]
    fn test_aim_command_applies_roi_offset() {
        let mut t = Tracker::new(
            TrackerConfig {
                prediction_horizon: 0.0,
                ..Default::default()
            },
            SelectorConfig {
                reference: (120.0, 140.0),
                fov_radius: 50.0,
            },
        )
        .unwrap();
        let head = Detection::new(BoundingBox2D::new(100.0, 100.0, 50.0, 80.0), 0.9, 0);
        t.update(
            &DetectionBatch::from_detections(7, Instant::now(), (800.0, 400.0), vec![head]),
            0.016,
        );

        let cmd = t.aim_command();
        assert_eq!(cmd.position(), Some((925.0, 540.0)));
        assert_eq!(cmd.hitbox(), HitboxClass::Head);
        assert_eq!(cmd.frame_sequence, 7);
        assert_eq!(cmd.track_id, 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(TrackerConfig::default().validate().is_ok());
        for bad in [
            TrackerConfig {
                grace_period: 0.0,
                ..Default::default()
            },
            TrackerConfig {
                iou_threshold: 1.0,
                ..Default::default()
            },
            TrackerConfig {
                max_tracks: 65,
                ..Default::default()
            },
        ] {
            assert!(bad.validate().is_err());
        }
    }
}
