//! Pipeline configuration
//!
//! Every section has defaults, so a YAML file only needs the keys it
//! changes.
//!
//! # Example sightline.yaml
//!
//! ```yaml
//! capture:
//!   width: 320
//!   height: 320
//!   roi_offset: [800.0, 380.0]
//!
//! tracker:
//!   iou_threshold: 0.3
//!   grace_period: 0.1
//!   min_confidence: 0.4
//!
//! selector:
//!   reference: [160.0, 160.0]
//!   fov_radius: 100.0
//!
//! deadman:
//!   rate_hz: 1000.0
//!   disable_after_ms: 50
//!   emergency_after_ms: 1000
//!
//! workers:
//!   capture: { priority: high, core: 2 }
//!   actuation: { priority: realtime, core: 3 }
//! ```

use serde::{Deserialize, Serialize};
use sightline_core::scheduling::{DeadmanConfig, WorkerPriority, WorkerSpec};
use sightline_core::{SightlineError, SightlineResult};
use sightline_perception::{SelectorConfig, TrackerConfig};
use std::path::Path;
use std::time::Duration;

/// Capture region geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel
    pub channels: u32,
    /// Offset of the capture region inside the screen (pixels)
    pub roi_offset: (f32, f32),
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 320,
            channels: 4,
            roi_offset: (0.0, 0.0),
        }
    }
}

impl CaptureConfig {
    /// Size of one frame buffer.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

/// Frame buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub frame_buffers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            frame_buffers: sightline_core::memory::DEFAULT_POOL_SLOTS,
        }
    }
}

/// Thread placement per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub capture: WorkerSpec,
    pub detect: WorkerSpec,
    pub track: WorkerSpec,
    pub actuation: WorkerSpec,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub pool: PoolConfig,
    pub tracker: TrackerConfig,
    pub selector: SelectorConfig,
    pub deadman: DeadmanConfig,
    pub workers: WorkersConfig,
    /// Sleep of a stage that found no work (microseconds)
    pub idle_sleep_us: u64,
    /// Coast all tracks when no batch arrived for this long (milliseconds)
    pub coast_after_ms: u64,
    /// Bound on joining all workers at shutdown (milliseconds)
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            pool: PoolConfig::default(),
            tracker: TrackerConfig::default(),
            selector: SelectorConfig::default(),
            deadman: DeadmanConfig::default(),
            workers: WorkersConfig::default(),
            idle_sleep_us: 200,
            coast_after_ms: 50,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl PipelineConfig {
    /// Pinned, elevated-priority workers and shorter timeouts.
    ///
    /// Cores 1-4 are used; RT settings degrade gracefully without
    /// permissions.
    pub fn low_latency() -> Self {
        Self {
            tracker: TrackerConfig {
                grace_period: 0.05,
                prediction_horizon: 0.008,
                ..Default::default()
            },
            deadman: DeadmanConfig {
                disable_after_ms: 25,
                emergency_after_ms: 500,
                ..Default::default()
            },
            workers: WorkersConfig {
                capture: WorkerSpec::new(WorkerPriority::High).pinned(1),
                detect: WorkerSpec::new(WorkerPriority::High).pinned(2),
                track: WorkerSpec::new(WorkerPriority::High).pinned(3),
                actuation: WorkerSpec {
                    priority: WorkerPriority::Realtime,
                    core: Some(4),
                    memory_locked: true,
                },
            },
            idle_sleep_us: 50,
            coast_after_ms: 20,
            ..Default::default()
        }
    }

    /// Parse and validate YAML.
    pub fn from_yaml_str(content: &str) -> SightlineResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> SightlineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SightlineError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> SightlineResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> SightlineResult<()> {
        if self.capture.width == 0 || self.capture.height == 0 || self.capture.channels == 0 {
            return Err(SightlineError::Config(format!(
                "capture size must be non-zero, got {}x{}x{}",
                self.capture.width, self.capture.height, self.capture.channels
            )));
        }
        let slots = self.pool.frame_buffers;
        if slots == 0 || slots > sightline_core::memory::MAX_POOL_SLOTS {
            return Err(SightlineError::Config(format!(
                "pool.frame_buffers must be in 1..={}, got {}",
                sightline_core::memory::MAX_POOL_SLOTS,
                slots
            )));
        }
        if self.coast_after_ms == 0 {
            return Err(SightlineError::Config(
                "coast_after_ms must be positive".to_string(),
            ));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(SightlineError::Config(
                "shutdown_timeout_ms must be positive".to_string(),
            ));
        }
        self.tracker.validate()?;
        self.selector.validate()?;
        self.deadman.validate()?;
        Ok(())
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_us)
    }

    pub fn coast_after(&self) -> Duration {
        Duration::from_millis(self.coast_after_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
