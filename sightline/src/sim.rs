//! Synthetic collaborators for running the pipeline without a screen, a
//! model or a mouse.
//!
//! [`SyntheticSource`] renders a [`Scene`] of bouncing targets into the frame
//! buffer using a tiny binary layout instead of pixels; [`SyntheticDetector`]
//! decodes that layout back into detections, with optional misses, position
//! noise and inference latency. [`LoggingActuator`] records what it is told.

use crate::pipeline::{Actuator, Detector, FrameSource};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sightline_perception::{AimCommand, BoundingBox2D, CaptureInfo, Detection, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bytes per encoded target: x, y, w, h, confidence (f32) + class id (u32).
const TARGET_RECORD: usize = 24;
/// Leading target count (u32).
const HEADER: usize = 4;

/// Longest a source poll waits for the next frame.
const SOURCE_POLL_TIMEOUT: Duration = Duration::from_millis(2);

/// Simulation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub targets: usize,
    /// Frames per second produced by the source
    pub fps: f32,
    /// Probability that the detector misses a visible target
    pub miss_rate: f64,
    /// Uniform position noise added by the detector (pixels)
    pub position_noise: f32,
    /// Simulated inference time per frame (microseconds)
    pub inference_latency_us: u64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            targets: 3,
            fps: 240.0,
            miss_rate: 0.05,
            position_noise: 1.0,
            inference_latency_us: 2000,
            seed: 0x5eed,
        }
    }
}

/// One moving object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTarget {
    pub center: (f32, f32),
    /// Pixels per second
    pub velocity: (f32, f32),
    pub size: (f32, f32),
    pub class_id: u32,
}

/// Targets bouncing inside the capture region.
#[derive(Debug, Clone)]
pub struct Scene {
    width: f32,
    height: f32,
    targets: Vec<SimTarget>,
}

impl Scene {
    pub fn new(width: u32, height: u32, targets: Vec<SimTarget>) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
            targets,
        }
    }

    /// `count` targets with random positions, velocities and classes.
    pub fn random(width: u32, height: u32, count: usize, rng: &mut impl Rng) -> Self {
        let (w, h) = (width as f32, height as f32);
        let targets = (0..count)
            .map(|i| {
                let size = (
                    rng.gen_range(16.0f32..48.0).min(w / 2.0),
                    rng.gen_range(24.0f32..72.0).min(h / 2.0),
                );
                let half = (size.0 / 2.0, size.1 / 2.0);
                SimTarget {
                    center: (
                        rng.gen_range(half.0..=w - half.0),
                        rng.gen_range(half.1..=h - half.1),
                    ),
                    velocity: (rng.gen_range(-180.0..180.0), rng.gen_range(-120.0..120.0)),
                    size,
                    class_id: (i % 3) as u32,
                }
            })
            .collect();
        Self::new(width, height, targets)
    }

    pub fn targets(&self) -> &[SimTarget] {
        &self.targets
    }

    /// Move every target by `dt` seconds, reflecting off the borders.
    pub fn step(&mut self, dt: f32) {
        for target in &mut self.targets {
            let half = (target.size.0 / 2.0, target.size.1 / 2.0);
            target.center.0 += target.velocity.0 * dt;
            target.center.1 += target.velocity.1 * dt;
            reflect(&mut target.center.0, &mut target.velocity.0, half.0, self.width - half.0);
            reflect(&mut target.center.1, &mut target.velocity.1, half.1, self.height - half.1);
        }
    }

    /// Write the scene into `buffer`. Returns the number of targets written.
    pub fn encode(&self, buffer: &mut [u8]) -> usize {
        if buffer.len() < HEADER {
            return 0;
        }
        let fit = (buffer.len() - HEADER) / TARGET_RECORD;
        let count = self.targets.len().min(fit);
        buffer[..HEADER].copy_from_slice(&(count as u32).to_le_bytes());
        for (i, target) in self.targets.iter().take(count).enumerate() {
            let record = &mut buffer[HEADER + i * TARGET_RECORD..HEADER + (i + 1) * TARGET_RECORD];
            let bbox = BoundingBox2D::from_center(
                target.center.0,
                target.center.1,
                target.size.0,
                target.size.1,
            );
            let fields = [bbox.x, bbox.y, bbox.width, bbox.height, 0.9];
            for (j, value) in fields.iter().enumerate() {
                record[j * 4..j * 4 + 4].copy_from_slice(&value.to_le_bytes());
            }
            record[20..24].copy_from_slice(&target.class_id.to_le_bytes());
        }
        count
    }
}

fn reflect(position: &mut f32, velocity: &mut f32, min: f32, max: f32) {
    if *position < min {
        *position = min + (min - *position);
        *velocity = velocity.abs();
    } else if *position > max {
        *position = max - (*position - max);
        *velocity = -velocity.abs();
    }
    *position = position.clamp(min, max.max(min));
}

/// Decode what [`Scene::encode`] wrote.
pub fn decode_targets(pixels: &[u8]) -> Vec<Detection> {
    let Some(header) = pixels.get(..HEADER) else {
        return Vec::new();
    };
    let mut count_bytes = [0u8; 4];
    count_bytes.copy_from_slice(header);
    let count = u32::from_le_bytes(count_bytes) as usize;

    let read_f32 = |bytes: &[u8]| {
        let mut b = [0u8; 4];
        b.copy_from_slice(bytes);
        f32::from_le_bytes(b)
    };

    pixels[HEADER..]
        .chunks_exact(TARGET_RECORD)
        .take(count)
        .map(|record| {
            let bbox = BoundingBox2D::new(
                read_f32(&record[0..4]),
                read_f32(&record[4..8]),
                read_f32(&record[8..12]),
                read_f32(&record[12..16]),
            );
            let mut class = [0u8; 4];
            class.copy_from_slice(&record[20..24]);
            Detection::new(bbox, read_f32(&record[16..20]), u32::from_le_bytes(class))
        })
        .collect()
}

/// Frame source producing the scene at a fixed rate.
pub struct SyntheticSource {
    scene: Scene,
    interval: Duration,
    next_due: Instant,
    last_frame: Option<Instant>,
    roi_offset: (f32, f32),
    channels: u32,
}

impl SyntheticSource {
    pub fn new(scene: Scene, fps: f32) -> Self {
        let interval = Duration::from_secs_f32(1.0 / fps.max(1.0));
        Self {
            scene,
            interval,
            next_due: Instant::now(),
            last_frame: None,
            roi_offset: (0.0, 0.0),
            channels: 4,
        }
    }

    pub fn with_roi_offset(mut self, x: f32, y: f32) -> Self {
        self.roi_offset = (x, y);
        self
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self, buffer: &mut [u8]) -> Option<CaptureInfo> {
        let now = Instant::now();
        if now < self.next_due {
            let wait = self.next_due - now;
            if wait > SOURCE_POLL_TIMEOUT {
                std::thread::sleep(SOURCE_POLL_TIMEOUT);
                return None;
            }
            std::thread::sleep(wait);
        }

        let now = Instant::now();
        let dt = self
            .last_frame
            .map(|last| now.duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.scene.step(dt);
        self.scene.encode(buffer);
        self.last_frame = Some(now);
        self.next_due = now + self.interval;

        let info = CaptureInfo::new(
            self.scene.width as u32,
            self.scene.height as u32,
            self.channels,
        );
        Some(info.with_roi_offset(self.roi_offset.0, self.roi_offset.1))
    }
}

/// Detector reading the synthetic frame layout.
pub struct SyntheticDetector {
    rng: SmallRng,
    miss_rate: f64,
    position_noise: f32,
    latency: Duration,
}

impl SyntheticDetector {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(config.seed),
            miss_rate: config.miss_rate.clamp(0.0, 1.0),
            position_noise: config.position_noise.max(0.0),
            latency: Duration::from_micros(config.inference_latency_us),
        }
    }

    /// Perfect detector: no misses, no noise, no latency.
    pub fn exact() -> Self {
        Self {
            rng: SmallRng::seed_from_u64(0),
            miss_rate: 0.0,
            position_noise: 0.0,
            latency: Duration::ZERO,
        }
    }
}

impl Detector for SyntheticDetector {
    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let mut detections = decode_targets(frame.pixels());
        if self.miss_rate > 0.0 {
            let miss_rate = self.miss_rate;
            let rng = &mut self.rng;
            detections.retain(|_| !rng.gen_bool(miss_rate));
        }
        if self.position_noise > 0.0 {
            let noise = self.position_noise;
            for detection in &mut detections {
                detection.bbox.x += self.rng.gen_range(-noise..=noise);
                detection.bbox.y += self.rng.gen_range(-noise..=noise);
            }
        }
        detections
    }
}

/// Actuator that logs targeted commands and counts them.
#[derive(Debug, Default, Clone)]
pub struct LoggingActuator {
    commands: Arc<AtomicU64>,
    targeted: Arc<AtomicU64>,
    last_track: Option<u64>,
}

impl LoggingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the command counters, readable after the actuator moved
    /// into the pipeline.
    pub fn counts(&self) -> ActuationCounts {
        ActuationCounts {
            commands: Arc::clone(&self.commands),
            targeted: Arc::clone(&self.targeted),
        }
    }
}

impl Actuator for LoggingActuator {
    fn actuate(&mut self, command: &AimCommand) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let track = command.has_target().then_some(command.track_id);
        if command.has_target() {
            self.targeted.fetch_add(1, Ordering::Relaxed);
            log::trace!(
                "aim ({:.1}, {:.1}) {:?} track {} frame {}",
                command.x,
                command.y,
                command.hitbox(),
                command.track_id,
                command.frame_sequence
            );
        }
        if track != self.last_track {
            match track {
                Some(id) => log::debug!("Actuator locked on track {}", id),
                None => log::debug!("Actuator released"),
            }
            self.last_track = track;
        }
    }
}

/// Shared view of a [`LoggingActuator`]'s counters.
#[derive(Debug, Clone)]
pub struct ActuationCounts {
    commands: Arc<AtomicU64>,
    targeted: Arc<AtomicU64>,
}

impl ActuationCounts {
    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Commands that carried a target.
    pub fn targeted(&self) -> u64 {
        self.targeted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_scene() {
        let scene = Scene::new(
            320,
            320,
            vec![
                SimTarget {
                    center: (100.0, 120.0),
                    velocity: (0.0, 0.0),
                    size: (20.0, 40.0),
                    class_id: 0,
                },
                SimTarget {
                    center: (250.0, 40.0),
                    velocity: (0.0, 0.0),
                    size: (30.0, 30.0),
                    class_id: 2,
                },
            ],
        );
        let mut buffer = vec![0u8; 256];
        assert_eq!(scene.encode(&mut buffer), 2);

        let detections = decode_targets(&buffer);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bbox, BoundingBox2D::new(90.0, 100.0, 20.0, 40.0));
        assert_eq!(detections[0].hitbox, sightline_perception::HitboxClass::Head);
        assert_eq!(detections[1].class_id, 2);
    }

    #[test]
    fn test_encode_truncates_to_buffer() {
        let mut rng = SmallRng::seed_from_u64(1);
        let scene = Scene::random(320, 320, 10, &mut rng);
        let mut buffer = vec![0u8; HEADER + 3 * TARGET_RECORD + 5];
        assert_eq!(scene.encode(&mut buffer), 3);
        assert_eq!(decode_targets(&buffer).len(), 3);
        assert!(decode_targets(&buffer[..2]).is_empty());
    }

    #[test]
    fn test_targets_stay_inside() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut scene = Scene::random(200, 100, 5, &mut rng);
        for _ in 0..1000 {
            scene.step(0.05);
        }
        for target in scene.targets() {
            assert!(target.center.0 >= target.size.0 / 2.0 - 1e-3);
            assert!(target.center.0 <= 200.0 - target.size.0 / 2.0 + 1e-3);
            assert!(target.center.1 >= target.size.1 / 2.0 - 1e-3);
            assert!(target.center.1 <= 100.0 - target.size.1 / 2.0 + 1e-3);
        }
    }

    #[test]
    fn test_logging_actuator_counts() {
        let mut actuator = LoggingActuator::new();
        let counts = actuator.counts();
        actuator.actuate(&AimCommand::none());
        actuator.actuate(&AimCommand::target(1.0, 1.0, 0.9, Default::default(), 4, 1));
        assert_eq!(counts.commands(), 2);
        assert_eq!(counts.targeted(), 1);
    }
}
