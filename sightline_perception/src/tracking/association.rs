//! Greedy IoU data association
//!
//! Every (track, observation) pair is scored by IoU. Pairs scoring strictly
//! above the threshold are committed highest-first; a pair is skipped when
//! either side is already taken. Equal scores keep encounter order
//! (track-major, then observation), so the result is deterministic for a
//! given input order. Not globally optimal.

use crate::types::BoundingBox2D;

/// One committed (observation, track) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub observation: usize,
    pub track: usize,
    pub iou: f32,
}

/// Result of one association pass. Index lists are ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    /// In commit order (highest IoU first).
    pub matches: Vec<Match>,
    pub unmatched_observations: Vec<usize>,
    pub unmatched_tracks: Vec<usize>,
}

impl Association {
    fn clear(&mut self) {
        self.matches.clear();
        self.unmatched_observations.clear();
        self.unmatched_tracks.clear();
    }

    /// Track index matched to `observation`, if any.
    pub fn track_for(&self, observation: usize) -> Option<usize> {
        self.matches
            .iter()
            .find(|m| m.observation == observation)
            .map(|m| m.track)
    }
}

/// Greedy associator with reusable scratch buffers.
#[derive(Debug, Default)]
pub struct DataAssociator {
    candidates: Vec<Match>,
    track_taken: Vec<bool>,
    observation_taken: Vec<bool>,
    result: Association,
}

impl DataAssociator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `observations` with `tracks`. The returned reference is
    /// valid until the next call.
    pub fn associate(
        &mut self,
        tracks: &[BoundingBox2D],
        observations: &[BoundingBox2D],
        iou_threshold: f32,
    ) -> &Association {
        self.result.clear();
        self.candidates.clear();

        for (t, track) in tracks.iter().enumerate() {
            for (o, observation) in observations.iter().enumerate() {
                let iou = track.iou(observation);
                if iou > iou_threshold {
                    self.candidates.push(Match {
                        observation: o,
                        track: t,
                        iou,
                    });
                }
            }
        }
        // Stable sort: ties keep track-major encounter order.
        self.candidates.sort_by(|a, b| b.iou.total_cmp(&a.iou));

        self.track_taken.clear();
        self.track_taken.resize(tracks.len(), false);
        self.observation_taken.clear();
        self.observation_taken.resize(observations.len(), false);

        for candidate in &self.candidates {
            if self.track_taken[candidate.track] || self.observation_taken[candidate.observation] {
                continue;
            }
            self.track_taken[candidate.track] = true;
            self.observation_taken[candidate.observation] = true;
            self.result.matches.push(*candidate);
        }

        self.result.unmatched_tracks.extend(
            self.track_taken
                .iter()
                .enumerate()
                .filter(|(_, taken)| !**taken)
                .map(|(i, _)| i),
        );
        self.result.unmatched_observations.extend(
            self.observation_taken
                .iter()
                .enumerate()
                .filter(|(_, taken)| !**taken)
                .map(|(i, _)| i),
        );

        &self.result
    }
}

/// One-shot association without buffer reuse.
pub fn associate(
    tracks: &[BoundingBox2D],
    observations: &[BoundingBox2D],
    iou_threshold: f32,
) -> Association {
    let mut associator = DataAssociator::new();
    associator.associate(tracks, observations, iou_threshold);
    associator.result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32) -> BoundingBox2D {
        BoundingBox2D::new(x, y, 10.0, 10.0)
    }

    #[test]
    fn test_empty_inputs() {
        let a = associate(&[], &[], 0.3);
        assert!(a.matches.is_empty());

        let a = associate(&[bbox(0.0, 0.0)], &[], 0.3);
        assert_eq!(a.unmatched_tracks, vec![0]);

        let a = associate(&[], &[bbox(0.0, 0.0)], 0.3);
        assert_eq!(a.unmatched_observations, vec![0]);
    }

    #[test]
    fn test_highest_iou_wins() {
        // Track 0 overlaps obs 0 slightly and obs 1 heavily.
        let tracks = [bbox(0.0, 0.0)];
        let observations = [bbox(6.0, 0.0), bbox(1.0, 0.0)];
        let a = associate(&tracks, &observations, 0.1);
        assert_eq!(a.matches.len(), 1);
        assert_eq!(a.matches[0].observation, 1);
        assert_eq!(a.unmatched_observations, vec![0]);
        assert!(a.unmatched_tracks.is_empty());
    }

    #[test]
    fn test_threshold_is_strict() {
        let tracks = [bbox(0.0, 0.0)];
        let observations = [bbox(5.0, 0.0)];
        let iou = tracks[0].iou(&observations[0]);

        let at = associate(&tracks, &observations, iou);
        assert!(at.matches.is_empty());

        let below = associate(&tracks, &observations, iou - 1e-4);
        assert_eq!(below.matches.len(), 1);
    }

    #[test]
    fn test_greedy_not_optimal() {
        // Greedy takes (t0, o0) first even though (t0, o1) + (t1, o0) would
        // match both tracks.
        let tracks = [bbox(0.0, 0.0), bbox(-4.0, 0.0)];
        let observations = [bbox(1.0, 0.0), bbox(4.0, 0.0)];
        let a = associate(&tracks, &observations, 0.3);
        assert_eq!(a.matches[0].track, 0);
        assert_eq!(a.matches[0].observation, 0);
        assert_eq!(a.track_for(0), Some(0));
    }

    #[test]
    fn test_ties_follow_encounter_order() {
        // Two tracks at the same position, one observation: track 0 wins.
        let tracks = [bbox(0.0, 0.0), bbox(0.0, 0.0)];
        let observations = [bbox(0.0, 0.0)];
        let a = associate(&tracks, &observations, 0.3);
        assert_eq!(a.matches[0].track, 0);
        assert_eq!(a.unmatched_tracks, vec![1]);
    }

    #[test]
    fn test_associator_reuse() {
        let mut associator = DataAssociator::new();
        let first = associator
            .associate(&[bbox(0.0, 0.0)], &[bbox(0.0, 0.0)], 0.3)
            .clone();
        let second = associator.associate(&[bbox(0.0, 0.0)], &[bbox(50.0, 0.0)], 0.3);
        assert_eq!(first.matches.len(), 1);
        assert!(second.matches.is_empty());
        assert_eq!(second.unmatched_tracks, vec![0]);
        assert_eq!(second.unmatched_observations, vec![0]);
    }
}
