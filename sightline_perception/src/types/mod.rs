//! Perception data types

pub mod aim;
pub mod detection;
pub mod frame;

pub use aim::AimCommand;
pub use detection::{BoundingBox2D, Detection, DetectionBatch, HitboxClass, MAX_DETECTIONS};
pub use frame::{CaptureInfo, Frame};
