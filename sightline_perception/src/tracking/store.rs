//! Fixed-capacity structure-of-arrays track storage
//!
//! Every per-track field lives in its own column and all columns are
//! index-aligned. Indices `0..len()` are exactly the live tracks: removal
//! swaps the last track into the freed index, so there are never holes.
//! Track ids come from a monotonic counter and are never reused.

use super::filter::{FilterNoise, FilterState, Mat4};
use crate::types::{BoundingBox2D, HitboxClass};
use sightline_core::{SightlineError, SightlineResult};
use std::time::Instant;

/// Upper bound on tracks held by one store.
pub const MAX_TRACKS: usize = 64;

/// Lifecycle state of a live track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Matched in the latest cycle.
    Active,
    /// Unmatched, still within its grace period.
    Coasting,
}

/// Owned copy of one track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    pub id: u64,
    pub position: (f32, f32),
    pub velocity: (f32, f32),
    pub bbox: BoundingBox2D,
    pub confidence: f32,
    pub hitbox: HitboxClass,
    pub last_seen: Instant,
    /// Seconds spent coasting since the last match
    pub grace: f32,
    /// Cycles since creation
    pub age: u32,
    /// Cycles with a matched observation
    pub hits: u32,
    pub state: TrackState,
}

/// Seed of a new track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewTrack {
    pub bbox: BoundingBox2D,
    pub confidence: f32,
    pub hitbox: HitboxClass,
    pub seen_at: Instant,
}

/// Structure-of-arrays track store.
#[derive(Debug)]
pub struct TrackStore {
    capacity: usize,
    next_id: u64,

    ids: Vec<u64>,
    pos_x: Vec<f32>,
    pos_y: Vec<f32>,
    vel_x: Vec<f32>,
    vel_y: Vec<f32>,
    covariance: Vec<Mat4>,
    bboxes: Vec<BoundingBox2D>,
    confidence: Vec<f32>,
    hitbox: Vec<HitboxClass>,
    last_seen: Vec<Instant>,
    grace: Vec<f32>,
    age: Vec<u32>,
    hits: Vec<u32>,
    state: Vec<TrackState>,
}

impl TrackStore {
    /// Store for at most `capacity` tracks (1..=[`MAX_TRACKS`]).
    pub fn with_capacity(capacity: usize) -> SightlineResult<Self> {
        if capacity == 0 || capacity > MAX_TRACKS {
            return Err(SightlineError::Config(format!(
                "track capacity must be in 1..={}, got {}",
                MAX_TRACKS, capacity
            )));
        }
        Ok(Self {
            capacity,
            next_id: 1,
            ids: Vec::with_capacity(capacity),
            pos_x: Vec::with_capacity(capacity),
            pos_y: Vec::with_capacity(capacity),
            vel_x: Vec::with_capacity(capacity),
            vel_y: Vec::with_capacity(capacity),
            covariance: Vec::with_capacity(capacity),
            bboxes: Vec::with_capacity(capacity),
            confidence: Vec::with_capacity(capacity),
            hitbox: Vec::with_capacity(capacity),
            last_seen: Vec::with_capacity(capacity),
            grace: Vec::with_capacity(capacity),
            age: Vec::with_capacity(capacity),
            hits: Vec::with_capacity(capacity),
            state: Vec::with_capacity(capacity),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Id the next inserted track will get.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Create a stationary track centered on the seed box. `None` when full.
    pub fn insert(&mut self, seed: NewTrack, noise: &FilterNoise) -> Option<u64> {
        if self.is_full() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;

        let (cx, cy) = seed.bbox.center();
        let filter = FilterState::new(cx, cy, noise);
        self.ids.push(id);
        self.pos_x.push(filter.x);
        self.pos_y.push(filter.y);
        self.vel_x.push(filter.vx);
        self.vel_y.push(filter.vy);
        self.covariance.push(filter.covariance);
        self.bboxes.push(seed.bbox);
        self.confidence.push(seed.confidence);
        self.hitbox.push(seed.hitbox);
        self.last_seen.push(seed.seen_at);
        self.grace.push(0.0);
        self.age.push(0);
        self.hits.push(1);
        self.state.push(TrackState::Active);
        Some(id)
    }

    /// Remove the track at `index` by moving the last track into its place.
    /// Returns the removed id.
    pub fn swap_remove(&mut self, index: usize) -> u64 {
        let id = self.ids.swap_remove(index);
        self.pos_x.swap_remove(index);
        self.pos_y.swap_remove(index);
        self.vel_x.swap_remove(index);
        self.vel_y.swap_remove(index);
        self.covariance.swap_remove(index);
        self.bboxes.swap_remove(index);
        self.confidence.swap_remove(index);
        self.hitbox.swap_remove(index);
        self.last_seen.swap_remove(index);
        self.grace.swap_remove(index);
        self.age.swap_remove(index);
        self.hits.swap_remove(index);
        self.state.swap_remove(index);
        id
    }

    /// Drop every track. The id counter keeps running.
    pub fn clear(&mut self) {
        while !self.is_empty() {
            self.swap_remove(self.len() - 1);
        }
    }

    pub fn filter_state(&self, index: usize) -> FilterState {
        FilterState {
            x: self.pos_x[index],
            y: self.pos_y[index],
            vx: self.vel_x[index],
            vy: self.vel_y[index],
            covariance: self.covariance[index],
        }
    }

    pub fn set_filter_state(&mut self, index: usize, state: &FilterState) {
        self.pos_x[index] = state.x;
        self.pos_y[index] = state.y;
        self.vel_x[index] = state.vx;
        self.vel_y[index] = state.vy;
        self.covariance[index] = state.covariance;
    }

    /// Record a match: refresh the observed fields and reset the grace time.
    pub fn mark_matched(
        &mut self,
        index: usize,
        bbox: BoundingBox2D,
        confidence: f32,
        hitbox: HitboxClass,
        seen_at: Instant,
    ) {
        self.bboxes[index] = bbox;
        self.confidence[index] = confidence;
        self.hitbox[index] = hitbox;
        self.last_seen[index] = seen_at;
        self.grace[index] = 0.0;
        self.hits[index] = self.hits[index].saturating_add(1);
        self.state[index] = TrackState::Active;
    }

    /// Record a coast of `dt` seconds. The box follows the filter position.
    pub fn mark_coasted(&mut self, index: usize, dt: f32) {
        self.grace[index] += dt;
        self.bboxes[index] = self.bboxes[index].recentered(self.pos_x[index], self.pos_y[index]);
        self.state[index] = TrackState::Coasting;
    }

    /// Count one more cycle of life for every track.
    pub fn age_all(&mut self) {
        for age in &mut self.age {
            *age = age.saturating_add(1);
        }
    }

    /// Position and velocity columns for batch coasting.
    pub fn motion_columns_mut(&mut self) -> (&mut [f32], &mut [f32], &[f32], &[f32]) {
        (
            self.pos_x.as_mut_slice(),
            self.pos_y.as_mut_slice(),
            self.vel_x.as_slice(),
            self.vel_y.as_slice(),
        )
    }

    pub fn covariances_mut(&mut self) -> &mut [Mat4] {
        &mut self.covariance
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn bboxes(&self) -> &[BoundingBox2D] {
        &self.bboxes
    }

    pub fn grace(&self, index: usize) -> f32 {
        self.grace[index]
    }

    pub fn position(&self, index: usize) -> (f32, f32) {
        (self.pos_x[index], self.pos_y[index])
    }

    pub fn hitbox(&self, index: usize) -> HitboxClass {
        self.hitbox[index]
    }

    /// Owned copy of the track at `index`.
    pub fn get(&self, index: usize) -> Option<Track> {
        if index >= self.len() {
            return None;
        }
        Some(Track {
            id: self.ids[index],
            position: (self.pos_x[index], self.pos_y[index]),
            velocity: (self.vel_x[index], self.vel_y[index]),
            bbox: self.bboxes[index],
            confidence: self.confidence[index],
            hitbox: self.hitbox[index],
            last_seen: self.last_seen[index],
            grace: self.grace[index],
            age: self.age[index],
            hits: self.hits[index],
            state: self.state[index],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Track> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    #[cfg(test)]
    fn columns_aligned(&self) -> bool {
        let n = self.ids.len();
        [
            self.pos_x.len(),
            self.pos_y.len(),
            self.vel_x.len(),
            self.vel_y.len(),
            self.covariance.len(),
            self.bboxes.len(),
            self.confidence.len(),
            self.hitbox.len(),
            self.last_seen.len(),
            self.grace.len(),
            self.age.len(),
            self.hits.len(),
            self.state.len(),
        ]
        .iter()
        .all(|&len| len == n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(x: f32) -> NewTrack {
        NewTrack {
            bbox: BoundingBox2D::new(x, 0.0, 10.0, 10.0),
            confidence: 0.8,
            hitbox: HitboxClass::Body,
            seen_at: Instant::now(),
        }
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(TrackStore::with_capacity(0).is_err());
        assert!(TrackStore::with_capacity(MAX_TRACKS + 1).is_err());

        let noise = FilterNoise::default();
        let mut store = TrackStore::with_capacity(2).unwrap();
        assert_eq!(store.insert(seed(0.0), &noise), Some(1));
        assert_eq!(store.insert(seed(20.0), &noise), Some(2));
        assert!(store.is_full());
        assert_eq!(store.insert(seed(40.0), &noise), None);
        // A rejected insert does not consume an id.
        assert_eq!(store.next_id(), 3);
    }

    #[test]
    fn test_insert_seeds_from_box_center() {
        let noise = FilterNoise::default();
        let mut store = TrackStore::with_capacity(4).unwrap();
        store.insert(seed(100.0), &noise);
        let track = store.get(0).unwrap();
        assert_eq!(track.position, (105.0, 5.0));
        assert_eq!(track.velocity, (0.0, 0.0));
        assert_eq!(track.grace, 0.0);
        assert_eq!(track.state, TrackState::Active);
    }

    #[test]
    fn test_swap_remove_keeps_columns_dense() {
        let noise = FilterNoise::default();
        let mut store = TrackStore::with_capacity(8).unwrap();
        for i in 0..5 {
            store.insert(seed(i as f32 * 20.0), &noise);
        }
        assert_eq!(store.swap_remove(1), 2);
        assert_eq!(store.ids(), &[1, 5, 3, 4]);
        // The moved track carries all its fields with it.
        assert_eq!(store.position(1), (85.0, 5.0));
        assert!(store.columns_aligned());

        store.clear();
        assert!(store.is_empty());
        assert!(store.columns_aligned());
        assert_eq!(store.insert(seed(0.0), &noise), Some(6));
    }

    #[test]
    fn test_coast_moves_box() {
        let noise = FilterNoise::default();
        let mut store = TrackStore::with_capacity(1).unwrap();
        store.insert(seed(0.0), &noise);
        let mut state = store.filter_state(0);
        state.x += 30.0;
        store.set_filter_state(0, &state);
        store.mark_coasted(0, 0.016);

        let track = store.get(0).unwrap();
        assert_eq!(track.bbox.center(), (35.0, 5.0));
        assert_eq!(track.state, TrackState::Coasting);
        assert_eq!(track.grace, 0.016);
    }
}
