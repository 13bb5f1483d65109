//! The four pipeline stages
//!
//! capture → [frames] → detect → [batches] → track → (aim cell) → actuation
//!
//! Each stage is driven by its own worker thread. Stages never wait on each
//! other: an empty queue is an idle tick, a full queue drops its oldest item.

use crate::pipeline::{Actuator, Detector, FrameSource};
use crate::stats::PipelineCounters;
use sightline_core::{
    DeadmanGate, GateDecision, HandoffQueue, ResourcePool, SightlineResult, SnapshotCell, Stage,
    TickOutcome,
};
use sightline_perception::{AimCommand, DetectionBatch, Frame, Tracker};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) const CAPTURE_STAGE: &str = "capture";
pub(crate) const DETECT_STAGE: &str = "detect";
pub(crate) const TRACK_STAGE: &str = "track";
pub(crate) const ACTUATION_STAGE: &str = "actuation";

/// Fills pooled buffers from the frame source and hands them to detect.
pub(crate) struct CaptureStage<S> {
    source: S,
    pool: ResourcePool<Vec<u8>>,
    frames: Arc<HandoffQueue<Frame>>,
    counters: Arc<PipelineCounters>,
    sequence: u64,
}

impl<S: FrameSource> CaptureStage<S> {
    pub(crate) fn new(
        source: S,
        pool: ResourcePool<Vec<u8>>,
        frames: Arc<HandoffQueue<Frame>>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            source,
            pool,
            frames,
            counters,
            sequence: 0,
        }
    }
}

impl<S: FrameSource> Stage for CaptureStage<S> {
    fn name(&self) -> &str {
        CAPTURE_STAGE
    }

    fn tick(&mut self) -> TickOutcome {
        // Every buffer is in flight downstream; the pool counts the miss.
        let Some(mut buffer) = self.pool.acquire_for_write() else {
            return TickOutcome::Idle;
        };

        let Some(info) = self.source.next_frame(&mut buffer[..]) else {
            PipelineCounters::bump(&self.counters.source_timeouts);
            return TickOutcome::Idle;
        };

        self.sequence += 1;
        PipelineCounters::bump(&self.counters.frames_captured);
        // A replaced frame is dropped here, returning its buffer.
        drop(self.frames.push(Frame::new(buffer, self.sequence, info)));
        TickOutcome::Busy
    }
}

/// Runs the detector on the newest frame and forwards a bounded batch.
pub(crate) struct DetectStage<D> {
    detector: D,
    frames: Arc<HandoffQueue<Frame>>,
    batches: Arc<HandoffQueue<DetectionBatch>>,
    counters: Arc<PipelineCounters>,
}

impl<D: Detector> DetectStage<D> {
    pub(crate) fn new(
        detector: D,
        frames: Arc<HandoffQueue<Frame>>,
        batches: Arc<HandoffQueue<DetectionBatch>>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            detector,
            frames,
            batches,
            counters,
        }
    }
}

impl<D: Detector> Stage for DetectStage<D> {
    fn name(&self) -> &str {
        DETECT_STAGE
    }

    fn tick(&mut self) -> TickOutcome {
        let Some(frame) = self.frames.pop() else {
            return TickOutcome::Idle;
        };

        let detections = self.detector.detect(&frame);
        let batch = DetectionBatch::from_detections(
            frame.sequence(),
            frame.captured_at(),
            frame.roi_offset(),
            detections,
        );
        drop(frame);

        PipelineCounters::bump(&self.counters.frames_detected);
        PipelineCounters::add(&self.counters.detections_dropped, batch.dropped() as u64);
        if batch.dropped() > 0 {
            log::debug!(
                "Frame {}: {} detection(s) over batch capacity",
                batch.sequence,
                batch.dropped()
            );
        }
        drop(self.batches.push(batch));
        TickOutcome::Busy
    }
}

/// Owns the tracker; publishes one aim command per detection batch.
///
/// When no batch arrives for `coast_after`, the tracker is advanced with an
/// empty batch so lost targets age out. Those cycles do not publish, so the
/// aim cell's age keeps measuring how long the detector has been silent.
pub(crate) struct TrackStage {
    tracker: Tracker,
    batches: Arc<HandoffQueue<DetectionBatch>>,
    aim: Arc<SnapshotCell<AimCommand>>,
    counters: Arc<PipelineCounters>,
    coast_after: Duration,
    /// Time base of the previous tracker cycle
    last_cycle_at: Option<Instant>,
    last_sequence: u64,
    last_roi_offset: (f32, f32),
}

impl TrackStage {
    pub(crate) fn new(
        tracker: Tracker,
        batches: Arc<HandoffQueue<DetectionBatch>>,
        aim: Arc<SnapshotCell<AimCommand>>,
        counters: Arc<PipelineCounters>,
        coast_after: Duration,
    ) -> Self {
        Self {
            tracker,
            batches,
            aim,
            counters,
            coast_after,
            last_cycle_at: None,
            last_sequence: 0,
            last_roi_offset: (0.0, 0.0),
        }
    }

    fn elapsed_since_last(&self, at: Instant) -> f32 {
        self.last_cycle_at
            .map(|last| at.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0)
    }

    fn run_cycle(&mut self, batch: &DetectionBatch, at: Instant) {
        let dt = self.elapsed_since_last(at);
        let report = self.tracker.update(batch, dt);
        self.last_cycle_at = Some(at);

        let c = &self.counters;
        PipelineCounters::add(&c.tracks_created, report.created as u64);
        PipelineCounters::add(&c.tracks_evicted, report.evicted.len() as u64);
        let dropped =
            report.dropped_capacity + report.dropped_low_confidence + report.dropped_non_finite;
        PipelineCounters::add(&c.detections_dropped, dropped as u64);
        PipelineCounters::set(&c.track_count, report.live as u64);
    }
}

impl Stage for TrackStage {
    fn name(&self) -> &str {
        TRACK_STAGE
    }

    fn tick(&mut self) -> TickOutcome {
        if let Some(batch) = self.batches.pop() {
            self.run_cycle(&batch, batch.captured_at);
            self.last_sequence = batch.sequence;
            self.last_roi_offset = batch.roi_offset;
            PipelineCounters::bump(&self.counters.track_cycles);
            self.aim.write(self.tracker.aim_command());
            return TickOutcome::Busy;
        }

        let now = Instant::now();
        let overdue = self
            .last_cycle_at
            .is_some_and(|last| now.saturating_duration_since(last) > self.coast_after);
        if overdue && self.tracker.track_count() > 0 {
            let batch = DetectionBatch::new(self.last_sequence, now, self.last_roi_offset);
            self.run_cycle(&batch, now);
            PipelineCounters::bump(&self.counters.coast_cycles);
        }
        TickOutcome::Idle
    }
}

/// Deadman-gated actuation loop.
pub(crate) struct ActuationStage<A> {
    actuator: A,
    gate: DeadmanGate,
    aim: Arc<SnapshotCell<AimCommand>>,
    counters: Arc<PipelineCounters>,
}

impl<A: Actuator> ActuationStage<A> {
    pub(crate) fn new(
        actuator: A,
        gate: DeadmanGate,
        aim: Arc<SnapshotCell<AimCommand>>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            actuator,
            gate,
            aim,
            counters,
        }
    }
}

impl<A: Actuator> Stage for ActuationStage<A> {
    fn name(&self) -> &str {
        ACTUATION_STAGE
    }

    fn tick(&mut self) -> TickOutcome {
        let command = match self.gate.check(&self.aim) {
            GateDecision::Pass(command) => command,
            GateDecision::Disabled { .. } => AimCommand::none(),
            GateDecision::EmergencyStop { staleness } => {
                self.actuator.actuate(&AimCommand::none());
                PipelineCounters::bump(&self.counters.emergency_stops);
                return TickOutcome::Halt(self.gate.emergency_error(staleness));
            }
        };
        self.actuator.actuate(&command);
        PipelineCounters::bump(&self.counters.actuations);
        TickOutcome::Sleep(self.gate.next_sleep())
    }

    fn shutdown(&mut self) -> SightlineResult<()> {
        // Leave the actuator idle.
        self.actuator.actuate(&AimCommand::none());
        Ok(())
    }
}
