//! # Sightline
//!
//! Real-time capture → detect → track → actuate pipeline.
//!
//! The engine lives in two crates re-exported here:
//!
//! - [`sightline_core`]: handoff queues, the aim snapshot cell, the frame
//!   buffer pool, worker scheduling and the deadman gate
//! - [`sightline_perception`]: detections, the multi-object tracker and
//!   target selection
//!
//! This crate wires them into a running [`Pipeline`] around three traits you
//! implement: [`FrameSource`], [`Detector`] and [`Actuator`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sightline::prelude::*;
//! use sightline::sim::{LoggingActuator, Scene, SimConfig, SyntheticDetector, SyntheticSource};
//! use rand::SeedableRng;
//!
//! let config = PipelineConfig::default();
//! let sim = SimConfig::default();
//! let mut rng = rand::rngs::SmallRng::seed_from_u64(sim.seed);
//! let scene = Scene::random(config.capture.width, config.capture.height, sim.targets, &mut rng);
//!
//! let pipeline = PipelineBuilder::new(config)
//!     .source(SyntheticSource::new(scene, sim.fps))
//!     .detector(SyntheticDetector::new(&sim))
//!     .actuator(LoggingActuator::new())
//!     .start()?;
//!
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! println!("{}", pipeline.shutdown()?);
//! # Ok::<(), sightline::SightlineError>(())
//! ```

pub mod config;
pub mod pipeline;
pub mod sim;
mod stages;
pub mod stats;

pub use sightline_core::{self, SightlineError, SightlineResult};
pub use sightline_perception;

pub use config::{CaptureConfig, PipelineConfig, PoolConfig, WorkersConfig};
pub use pipeline::{Actuator, Detector, FrameSource, Pipeline, PipelineBuilder};
pub use stats::PipelineStats;

/// Everything needed to implement the collaborator traits and run a
/// pipeline.
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::pipeline::{Actuator, Detector, FrameSource, Pipeline, PipelineBuilder};
    pub use crate::stats::PipelineStats;

    pub use sightline_core::scheduling::{DeadmanConfig, WorkerPriority, WorkerSpec};
    pub use sightline_core::{SightlineError, SightlineResult};

    pub use sightline_perception::{
        AimCommand, BoundingBox2D, CaptureInfo, Detection, DetectionBatch, Frame, HitboxClass,
        SelectorConfig, TrackerConfig,
    };
}
