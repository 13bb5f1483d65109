//! Pipeline wiring
//!
//! [`PipelineBuilder`] takes the three external collaborators, allocates the
//! frame pool, the two handoff queues and the aim cell, then spawns one
//! worker per stage on a [`PipelineScheduler`].
//!
//! ```rust,ignore
//! let pipeline = PipelineBuilder::new(PipelineConfig::default())
//!     .source(my_capture)
//!     .detector(my_model)
//!     .actuator(my_mouse)
//!     .start()?;
//!
//! std::thread::sleep(Duration::from_secs(5));
//! let stats = pipeline.shutdown()?;
//! ```

use crate::config::PipelineConfig;
use crate::stages::{ActuationStage, CaptureStage, DetectStage, TrackStage, ACTUATION_STAGE};
use crate::stats::{PipelineCounters, PipelineStats};
use sightline_core::scheduling::DeadmanCounters;
use sightline_core::{
    DeadmanGate, HandoffQueue, PipelineScheduler, ResourcePool, SightlineError, SightlineResult,
    SnapshotCell,
};
use sightline_perception::{AimCommand, CaptureInfo, Detection, DetectionBatch, Frame, Tracker};
use std::sync::Arc;

/// Image capture backend.
pub trait FrameSource: Send + 'static {
    /// Fill `buffer` with the next image. `None` when no frame is ready.
    fn next_frame(&mut self, buffer: &mut [u8]) -> Option<CaptureInfo>;
}

/// Object detector. An empty result is valid.
pub trait Detector: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> Vec<Detection>;
}

/// Consumer of aim commands, called once per actuation cycle.
pub trait Actuator: Send + 'static {
    fn actuate(&mut self, command: &AimCommand);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self, buffer: &mut [u8]) -> Option<CaptureInfo> {
        (**self).next_frame(buffer)
    }
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        (**self).detect(frame)
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn actuate(&mut self, command: &AimCommand) {
        (**self).actuate(command)
    }
}

/// Builder for a running [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Box<dyn FrameSource>>,
    detector: Option<Box<dyn Detector>>,
    actuator: Option<Box<dyn Actuator>>,
    deadman_seed: Option<u64>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            source: None,
            detector: None,
            actuator: None,
            deadman_seed: None,
        }
    }

    pub fn source(mut self, source: impl FrameSource) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn detector(mut self, detector: impl Detector) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn actuator(mut self, actuator: impl Actuator) -> Self {
        self.actuator = Some(Box::new(actuator));
        self
    }

    /// Fix the deadman jitter seed.
    pub fn deadman_seed(mut self, seed: u64) -> Self {
        self.deadman_seed = Some(seed);
        self
    }

    /// Validate the configuration, allocate shared state and spawn workers.
    pub fn start(self) -> SightlineResult<Pipeline> {
        let config = self.config;
        config.validate()?;

        let source = self
            .source
            .ok_or_else(|| SightlineError::Config("pipeline has no frame source".to_string()))?;
        let detector = self
            .detector
            .ok_or_else(|| SightlineError::Config("pipeline has no detector".to_string()))?;
        let actuator = self
            .actuator
            .ok_or_else(|| SightlineError::Config("pipeline has no actuator".to_string()))?;

        let frame_bytes = config.capture.frame_bytes();
        let pool =
            ResourcePool::with_capacity(config.pool.frame_buffers, |_| vec![0u8; frame_bytes])?;
        let frames = Arc::new(HandoffQueue::<Frame>::new());
        let batches = Arc::new(HandoffQueue::<DetectionBatch>::new());
        let aim = Arc::new(SnapshotCell::new(AimCommand::none()));
        let counters = Arc::new(PipelineCounters::default());

        let tracker = Tracker::new(config.tracker, config.selector)?;
        let mut gate = DeadmanGate::new(config.deadman)?;
        if let Some(seed) = self.deadman_seed {
            gate = gate.with_seed(seed);
        }
        let deadman = gate.counters();

        let mut scheduler = PipelineScheduler::new().with_idle_sleep(config.idle_sleep());
        // Downstream first so nothing is produced into a queue without a consumer.
        scheduler.spawn(
            Box::new(ActuationStage::new(
                actuator,
                gate,
                Arc::clone(&aim),
                Arc::clone(&counters),
            )),
            &config.workers.actuation,
        )?;
        scheduler.spawn(
            Box::new(TrackStage::new(
                tracker,
                Arc::clone(&batches),
                Arc::clone(&aim),
                Arc::clone(&counters),
                config.coast_after(),
            )),
            &config.workers.track,
        )?;
        scheduler.spawn(
            Box::new(DetectStage::new(
                detector,
                Arc::clone(&frames),
                Arc::clone(&batches),
                Arc::clone(&counters),
            )),
            &config.workers.detect,
        )?;
        scheduler.spawn(
            Box::new(CaptureStage::new(
                source,
                pool.clone(),
                Arc::clone(&frames),
                Arc::clone(&counters),
            )),
            &config.workers.capture,
        )?;

        log::info!(
            "Pipeline started: {}x{} capture, {} frame buffers, deadman {} Hz",
            config.capture.width,
            config.capture.height,
            config.pool.frame_buffers,
            config.deadman.rate_hz
        );

        Ok(Pipeline {
            scheduler,
            pool,
            frames,
            batches,
            aim,
            counters,
            deadman,
            config,
        })
    }
}

/// A running pipeline. Dropping it stops the workers with the default
/// timeout; [`Pipeline::shutdown`] reports how they ended.
pub struct Pipeline {
    scheduler: PipelineScheduler,
    pool: ResourcePool<Vec<u8>>,
    frames: Arc<HandoffQueue<Frame>>,
    batches: Arc<HandoffQueue<DetectionBatch>>,
    aim: Arc<SnapshotCell<AimCommand>>,
    counters: Arc<PipelineCounters>,
    deadman: Arc<DeadmanCounters>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        collect_stats(
            &self.pool,
            &self.frames,
            &self.batches,
            &self.counters,
            &self.deadman,
        )
    }

    /// Latest published aim command, or "no target" once it is older than
    /// `deadman.disable_after_ms`. Coast cycles never publish, so a target
    /// whose track was evicted only disappears here through that age limit.
    pub fn aim_command(&self) -> AimCommand {
        let command = self.aim.read();
        if self.aim.staleness() > self.config.deadman.disable_after() {
            return AimCommand::none_for_frame(command.frame_sequence);
        }
        command
    }

    /// True once the actuation loop has stopped on its own (emergency stop).
    pub fn is_halted(&self) -> bool {
        self.scheduler
            .exited_workers()
            .iter()
            .any(|name| name == ACTUATION_STAGE)
    }

    /// Per-stage loop counters.
    pub fn worker_stats(&self) -> Vec<sightline_core::scheduling::WorkerSnapshot> {
        self.scheduler.worker_stats()
    }

    /// Raise the stop flag without waiting.
    pub fn request_stop(&self) {
        self.scheduler.request_stop();
    }

    /// Stop every stage and join them within the configured timeout.
    ///
    /// Returns the final statistics, or the first error a worker ended
    /// with (emergency stop, panic, join timeout).
    pub fn shutdown(self) -> SightlineResult<PipelineStats> {
        let Pipeline {
            scheduler,
            pool,
            frames,
            batches,
            aim: _,
            counters,
            deadman,
            config,
        } = self;

        let report = scheduler.shutdown(config.shutdown_timeout());
        // Residual queue items release their frame buffers here.
        drop(frames.pop());
        drop(batches.pop());

        let stats = collect_stats(&pool, &frames, &batches, &counters, &deadman);
        log::info!("Pipeline stopped: {}", stats);

        match report.into_result() {
            Ok(()) => Ok(stats),
            Err(e) => {
                log::error!("Pipeline stopped with error: {}", e);
                Err(e)
            }
        }
    }
}

fn collect_stats(
    pool: &ResourcePool<Vec<u8>>,
    frames: &HandoffQueue<Frame>,
    batches: &HandoffQueue<DetectionBatch>,
    counters: &PipelineCounters,
    deadman: &DeadmanCounters,
) -> PipelineStats {
    PipelineStats {
        pool_starvation: pool.starvation_count(),
        frame_overwrites: frames.overwrites(),
        batch_overwrites: batches.overwrites(),
        deadman_disables: deadman.disable_triggers(),
        deadman_episodes: deadman.disable_episodes(),
        ..PipelineStats::from_counters(counters)
    }
}
