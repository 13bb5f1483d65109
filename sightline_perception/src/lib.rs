//! # Sightline Perception
//!
//! Everything between the detector and the actuator:
//!
//! - [`Detection`] / [`DetectionBatch`] - detector output, at most 64 per frame
//! - [`Frame`] - pooled capture buffer with sequence and ROI metadata
//! - [`Tracker`] - IoU association plus a Kalman filter per track
//! - [`AimCommand`] - the selected target in screen coordinates
//!
//! # Example
//!
//! ```rust
//! use sightline_perception::{
//!     BoundingBox2D, Detection, DetectionBatch, SelectorConfig, Tracker, TrackerConfig,
//! };
//! use std::time::Instant;
//!
//! let mut tracker = Tracker::new(TrackerConfig::default(), SelectorConfig::default()).unwrap();
//!
//! let head = Detection::new(BoundingBox2D::new(140.0, 130.0, 30.0, 30.0), 0.9, 0);
//! let batch = DetectionBatch::from_detections(1, Instant::now(), (0.0, 0.0), [head]);
//! tracker.update(&batch, 0.016);
//!
//! let aim = tracker.aim_command();
//! assert!(aim.has_target());
//! ```

pub mod tracking;
pub mod types;

pub use tracking::{
    associate, Association, CycleReport, FilterNoise, FilterState, SelectorConfig,
    TargetCandidate, Track, TrackState, TrackStore, Tracker, TrackerConfig, TrackerStats,
};
pub use types::{
    AimCommand, BoundingBox2D, CaptureInfo, Detection, DetectionBatch, Frame, HitboxClass,
    MAX_DETECTIONS,
};
