//! Aim command handed from the track stage to actuation.

use super::detection::HitboxClass;
use bytemuck::{Pod, Zeroable};

/// Either "no target" or a fully populated target in screen coordinates.
///
/// Plain-old-data so it can live in a `SnapshotCell`.
///
/// Size: 40 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct AimCommand {
    has_target: u32,
    hitbox: u32,
    /// Target x (screen pixels)
    pub x: f32,
    /// Target y (screen pixels)
    pub y: f32,
    pub confidence: f32,
    _pad: u32,
    /// Id of the selected track
    pub track_id: u64,
    /// Sequence number of the frame the command was derived from
    pub frame_sequence: u64,
}

impl AimCommand {
    /// No target.
    pub fn none() -> Self {
        Self::default()
    }

    /// "No target" tagged with the frame it was derived from.
    pub fn none_for_frame(frame_sequence: u64) -> Self {
        Self {
            frame_sequence,
            ..Self::default()
        }
    }

    pub fn target(
        x: f32,
        y: f32,
        confidence: f32,
        hitbox: HitboxClass,
        track_id: u64,
        frame_sequence: u64,
    ) -> Self {
        Self {
            has_target: 1,
            hitbox: hitbox.as_u32(),
            x,
            y,
            confidence,
            _pad: 0,
            track_id,
            frame_sequence,
        }
    }

    pub fn has_target(&self) -> bool {
        self.has_target != 0
    }

    /// Target position, `None` for "no target".
    pub fn position(&self) -> Option<(f32, f32)> {
        self.has_target().then_some((self.x, self.y))
    }

    pub fn hitbox(&self) -> HitboxClass {
        HitboxClass::from_u32(self.hitbox)
    }
}
