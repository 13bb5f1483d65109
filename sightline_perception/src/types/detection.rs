//! Detector output types
//!
//! Fixed-size 2D detections as produced by the external detector, plus the
//! bounded per-frame batch handed from the detect stage to the track stage.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Maximum detections carried by one [`DetectionBatch`].
pub const MAX_DETECTIONS: usize = 64;

/// 2D bounding box (x, y, width, height in pixels)
///
/// Size: 16 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct BoundingBox2D {
    /// X coordinate of top-left corner (pixels)
    pub x: f32,
    /// Y coordinate of top-left corner (pixels)
    pub y: f32,
    /// Width of bounding box (pixels)
    pub width: f32,
    /// Height of bounding box (pixels)
    pub height: f32,
}

impl BoundingBox2D {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create from center coordinates (cx, cy, w, h)
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn center(&self) -> (f32, f32) {
        (self.center_x(), self.center_y())
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Same size, centered on (cx, cy).
    pub fn recentered(&self, cx: f32, cy: f32) -> Self {
        Self::from_center(cx, cy, self.width, self.height)
    }

    /// Intersection over Union.
    ///
    /// Exactly 0 for boxes that share no area and exactly 1 for a box with
    /// itself. Degenerate (zero-area) pairs yield 0.
    pub fn iou(&self, other: &BoundingBox2D) -> f32 {
        if self == other && self.area() > 0.0 {
            return 1.0;
        }
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let iw = x2 - x1;
        let ih = y2 - y1;
        if iw <= 0.0 || ih <= 0.0 {
            return 0.0;
        }
        let intersection = iw * ih;
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Aim-point category of a detection, ordered by selection priority.
#[repr(u32)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HitboxClass {
    #[default]
    Unknown = 0,
    Body = 1,
    Chest = 2,
    Head = 3,
}

impl HitboxClass {
    /// Detector class ids: 0 head, 1 chest, 2 body, anything else unknown.
    pub fn from_class_id(class_id: u32) -> Self {
        match class_id {
            0 => HitboxClass::Head,
            1 => HitboxClass::Chest,
            2 => HitboxClass::Body,
            _ => HitboxClass::Unknown,
        }
    }

    /// Higher is preferred.
    pub fn priority(self) -> u32 {
        self as u32
    }

    /// Decode the wire value written by [`HitboxClass::as_u32`].
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => HitboxClass::Body,
            2 => HitboxClass::Chest,
            3 => HitboxClass::Head,
            _ => HitboxClass::Unknown,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// One detector observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox2D,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    pub class_id: u32,
    pub hitbox: HitboxClass,
}

impl Detection {
    /// Hitbox derived from `class_id`; confidence clamped to [0, 1].
    pub fn new(bbox: BoundingBox2D, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            class_id,
            hitbox: HitboxClass::from_class_id(class_id),
        }
    }

    /// Override the derived hitbox.
    pub fn with_hitbox(mut self, hitbox: HitboxClass) -> Self {
        self.hitbox = hitbox;
        self
    }

    pub fn is_confident(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

/// Detections of one frame, at most [`MAX_DETECTIONS`] of them.
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    /// Sequence number of the source frame
    pub sequence: u64,
    /// Capture time of the source frame
    pub captured_at: Instant,
    /// Offset of the capture region inside the screen (pixels)
    pub roi_offset: (f32, f32),
    detections: Vec<Detection>,
    dropped: u32,
}

impl DetectionBatch {
    pub fn new(sequence: u64, captured_at: Instant, roi_offset: (f32, f32)) -> Self {
        Self {
            sequence,
            captured_at,
            roi_offset,
            detections: Vec::with_capacity(MAX_DETECTIONS),
            dropped: 0,
        }
    }

    /// Build from detector output, keeping the first [`MAX_DETECTIONS`].
    pub fn from_detections(
        sequence: u64,
        captured_at: Instant,
        roi_offset: (f32, f32),
        detections: impl IntoIterator<Item = Detection>,
    ) -> Self {
        let mut batch = Self::new(sequence, captured_at, roi_offset);
        for detection in detections {
            batch.push(detection);
        }
        batch
    }

    /// Append; returns false and counts a drop when the batch is full.
    pub fn push(&mut self, detection: Detection) -> bool {
        if self.detections.len() >= MAX_DETECTIONS {
            self.dropped += 1;
            return false;
        }
        self.detections.push(detection);
        true
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Detections discarded because the batch was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
