//! Pipeline telemetry
//!
//! Stages bump [`PipelineCounters`] with relaxed atomics; [`PipelineStats`]
//! is the plain snapshot handed to callers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters written by the stage threads.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) frames_captured: AtomicU64,
    pub(crate) source_timeouts: AtomicU64,
    pub(crate) frames_detected: AtomicU64,
    pub(crate) detections_dropped: AtomicU64,
    pub(crate) track_cycles: AtomicU64,
    pub(crate) coast_cycles: AtomicU64,
    pub(crate) track_count: AtomicU64,
    pub(crate) tracks_created: AtomicU64,
    pub(crate) tracks_evicted: AtomicU64,
    pub(crate) actuations: AtomicU64,
    pub(crate) emergency_stops: AtomicU64,
}

impl PipelineCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn set(counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    #[inline]
    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time pipeline statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames filled by the source
    pub frames_captured: u64,
    /// Polls where the source had no frame
    pub source_timeouts: u64,
    /// Capture attempts that found every frame buffer checked out
    pub pool_starvation: u64,
    /// Frames discarded unprocessed by the capture→detect queue
    pub frame_overwrites: u64,
    /// Batches discarded unprocessed by the detect→track queue
    pub batch_overwrites: u64,
    /// Frames the detector ran on
    pub frames_detected: u64,
    /// Detections lost to batch overflow, low confidence or a full store
    pub detections_dropped: u64,
    /// Tracker cycles driven by a detection batch
    pub track_cycles: u64,
    /// Tracker cycles run because no batch arrived in time
    pub coast_cycles: u64,
    /// Live tracks after the latest cycle
    pub track_count: u64,
    pub tracks_created: u64,
    pub tracks_evicted: u64,
    /// Commands handed to the actuator
    pub actuations: u64,
    /// Actuation iterations overridden to "no target" by the deadman
    pub deadman_disables: u64,
    /// Fresh-to-stale transitions seen by the deadman
    pub deadman_episodes: u64,
    pub emergency_stops: u64,
}

impl PipelineStats {
    pub(crate) fn from_counters(counters: &PipelineCounters) -> Self {
        let get = PipelineCounters::get;
        Self {
            frames_captured: get(&counters.frames_captured),
            source_timeouts: get(&counters.source_timeouts),
            frames_detected: get(&counters.frames_detected),
            detections_dropped: get(&counters.detections_dropped),
            track_cycles: get(&counters.track_cycles),
            coast_cycles: get(&counters.coast_cycles),
            track_count: get(&counters.track_count),
            tracks_created: get(&counters.tracks_created),
            tracks_evicted: get(&counters.tracks_evicted),
            actuations: get(&counters.actuations),
            emergency_stops: get(&counters.emergency_stops),
            ..Default::default()
        }
    }

    /// Total items lost to head-drop queues.
    pub fn queue_overwrites(&self) -> u64 {
        self.frame_overwrites + self.batch_overwrites
    }
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames {} (timeouts {}, starved {}, overwritten {}) | detected {} (dropped {}, batches overwritten {}) | \
             cycles {} + {} coast, tracks {} (+{} -{}) | actuations {}, deadman disables {} in {} episode(s), emergency stops {}",
            self.frames_captured,
            self.source_timeouts,
            self.pool_starvation,
            self.frame_overwrites,
            self.frames_detected,
            self.detections_dropped,
            self.batch_overwrites,
            self.track_cycles,
            self.coast_cycles,
            self.track_count,
            self.tracks_created,
            self.tracks_evicted,
            self.actuations,
            self.deadman_disables,
            self.deadman_episodes,
            self.emergency_stops,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let counters = PipelineCounters::default();
        PipelineCounters::bump(&counters.frames_captured);
        PipelineCounters::bump(&counters.frames_captured);
        PipelineCounters::add(&counters.detections_dropped, 5);
        PipelineCounters::set(&counters.track_count, 3);
        PipelineCounters::set(&counters.track_count, 2);

        let stats = PipelineStats::from_counters(&counters);
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.detections_dropped, 5);
        assert_eq!(stats.track_count, 2);
        assert_eq!(stats.pool_starvation, 0);
    }

    #[test]
    fn test_queue_overwrites_sums_both_queues() {
        let stats = PipelineStats {
            frame_overwrites: 4,
            batch_overwrites: 1,
            ..Default::default()
        };
        assert_eq!(stats.queue_overwrites(), 5);
        assert!(stats.to_string().contains("overwritten 4"));
    }
}
