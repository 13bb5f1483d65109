//! Target selection
//!
//! Stateless: picks at most one track from the current store. Tracks farther
//! than the FOV radius from the reference point are ignored; among the rest
//! the highest hitbox priority wins, then the smallest distance, then the
//! lowest store index.

use super::store::TrackStore;
use crate::types::HitboxClass;
use serde::{Deserialize, Serialize};
use sightline_core::{SightlineError, SightlineResult};

/// Selector settings, in capture-region coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Reference point ("crosshair")
    pub reference: (f32, f32),
    /// Tracks farther than this from the reference are never selected
    pub fov_radius: f32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            reference: (160.0, 160.0),
            fov_radius: 120.0,
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> SightlineResult<()> {
        if !(self.fov_radius.is_finite() && self.fov_radius > 0.0) {
            return Err(SightlineError::Config(format!(
                "selector.fov_radius must be positive, got {}",
                self.fov_radius
            )));
        }
        if !(self.reference.0.is_finite() && self.reference.1.is_finite()) {
            return Err(SightlineError::Config(
                "selector.reference must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// The chosen track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetCandidate {
    /// Index in the store at selection time
    pub index: usize,
    pub track_id: u64,
    pub position: (f32, f32),
    pub hitbox: HitboxClass,
    /// Distance from the reference point
    pub distance: f32,
}

/// Select the track to aim at, or `None` if nothing is in range.
pub fn select(
    tracks: &TrackStore,
    reference: (f32, f32),
    fov_radius: f32,
) -> Option<TargetCandidate> {
    let radius_sq = fov_radius * fov_radius;
    let mut best: Option<(TargetCandidate, f32)> = None;

    for index in 0..tracks.len() {
        let position = tracks.position(index);
        let dx = position.0 - reference.0;
        let dy = position.1 - reference.1;
        let distance_sq = dx * dx + dy * dy;
        if distance_sq.is_nan() || distance_sq > radius_sq {
            continue;
        }

        let hitbox = tracks.hitbox(index);
        let better = match &best {
            None => true,
            Some((current, current_sq)) => {
                hitbox.priority() > current.hitbox.priority()
                    || (hitbox == current.hitbox && distance_sq < *current_sq)
            }
        };
        if better {
            best = Some((
                TargetCandidate {
                    index,
                    track_id: tracks.ids()[index],
                    position,
                    hitbox,
                    distance: distance_sq.sqrt(),
                },
                distance_sq,
            ));
        }
    }

    best.map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::filter::FilterNoise;
    use crate::tracking::store::NewTrack;
    use crate::types::BoundingBox2D;
    use std::time::Instant;

    fn store_with(tracks: &[(f32, f32, HitboxClass)]) -> TrackStore {
        let noise = FilterNoise::default();
        let mut store = TrackStore::with_capacity(16).unwrap();
        for &(cx, cy, hitbox) in tracks {
            store.insert(
                NewTrack {
                    bbox: BoundingBox2D::from_center(cx, cy, 10.0, 10.0),
                    confidence: 0.9,
                    hitbox,
                    seen_at: Instant::now(),
                },
                &noise,
            );
        }
        store
    }

    #[test]
    fn test_empty_store() {
        let store = store_with(&[]);
        assert_eq!(select(&store, (0.0, 0.0), 100.0), None);
    }

    #[test]
    fn test_outside_fov_never_selected() {
        let store = store_with(&[(200.0, 0.0, HitboxClass::Head)]);
        assert_eq!(select(&store, (0.0, 0.0), 100.0), None);

        // Exactly on the boundary counts as inside.
        let store = store_with(&[(100.0, 0.0, HitboxClass::Body)]);
        assert!(select(&store, (0.0, 0.0), 100.0).is_some());
    }

    #[test]
    fn test_nan_position_never_selected() {
        let store = store_with(&[(f32::NAN, 0.0, HitboxClass::Head)]);
        assert_eq!(select(&store, (0.0, 0.0), 100.0), None);

        let store = store_with(&[
            (f32::NAN, f32::NAN, HitboxClass::Head),
            (30.0, 0.0, HitboxClass::Body),
        ]);
        let target = select(&store, (0.0, 0.0), 100.0).unwrap();
        assert_eq!(target.index, 1);
    }

    #[test]
    fn test_priority_beats_distance() {
        let store = store_with(&[
            (5.0, 0.0, HitboxClass::Body),
            (80.0, 0.0, HitboxClass::Head),
            (10.0, 0.0, HitboxClass::Chest),
        ]);
        let target = select(&store, (0.0, 0.0), 100.0).unwrap();
        assert_eq!(target.hitbox, HitboxClass::Head);
        assert_eq!(target.track_id, 2);
        assert_eq!(target.distance, 80.0);
    }

    #[test]
    fn test_distance_breaks_ties() {
        let store = store_with(&[
            (50.0, 0.0, HitboxClass::Chest),
            (0.0, 20.0, HitboxClass::Chest),
            (0.0, -30.0, HitboxClass::Chest),
        ]);
        let target = select(&store, (0.0, 0.0), 100.0).unwrap();
        assert_eq!(target.index, 1);
        assert_eq!(target.position, (0.0, 20.0));
    }

    #[test]
    fn test_config_validation() {
        assert!(SelectorConfig::default().validate().is_ok());
        let bad = SelectorConfig {
            fov_radius: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
