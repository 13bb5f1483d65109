//! Staleness gate for the actuation loop.
//!
//! The actuation loop runs at a fixed nominal rate and reads the latest aim
//! command from a [`SnapshotCell`]. The gate compares the age of that value
//! against two thresholds:
//!
//! - older than `disable_after_ms`: the command is replaced by "no target"
//!   for this iteration and a disable event is counted
//! - older than `emergency_after_ms`: the actuation loop must stop
//!
//! Sleep intervals are jittered by `period × (1 ± jitter_ratio)`.

use crate::communication::SnapshotCell;
use crate::error::{SightlineError, SightlineResult};
use bytemuck::Pod;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deadman gate settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadmanConfig {
    /// Nominal actuation rate.
    pub rate_hz: f64,
    /// Relative jitter applied to every sleep, in [0, 1).
    pub jitter_ratio: f64,
    /// Staleness beyond which the command is overridden to "no target".
    pub disable_after_ms: u64,
    /// Staleness beyond which actuation stops.
    pub emergency_after_ms: u64,
}

impl Default for DeadmanConfig {
    fn default() -> Self {
        Self {
            rate_hz: 1000.0,
            jitter_ratio: 0.1,
            disable_after_ms: 50,
            emergency_after_ms: 1000,
        }
    }
}

impl DeadmanConfig {
    pub fn disable_after(&self) -> Duration {
        Duration::from_millis(self.disable_after_ms)
    }

    pub fn emergency_after(&self) -> Duration {
        Duration::from_millis(self.emergency_after_ms)
    }

    /// Nominal sleep between iterations.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }

    pub fn validate(&self) -> SightlineResult<()> {
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            return Err(SightlineError::Config(format!(
                "deadman.rate_hz must be positive, got {}",
                self.rate_hz
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(SightlineError::Config(format!(
                "deadman.jitter_ratio must be in [0, 1), got {}",
                self.jitter_ratio
            )));
        }
        if self.disable_after_ms == 0 {
            return Err(SightlineError::Config(
                "deadman.disable_after_ms must be positive".to_string(),
            ));
        }
        if self.emergency_after_ms <= self.disable_after_ms {
            return Err(SightlineError::Config(format!(
                "deadman.emergency_after_ms ({}) must exceed disable_after_ms ({})",
                self.emergency_after_ms, self.disable_after_ms
            )));
        }
        Ok(())
    }
}

/// Verdict for one actuation iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision<T> {
    /// The value is fresh enough to act on.
    Pass(T),
    /// The value is stale; act on "no target" instead.
    Disabled { staleness: Duration },
    /// The value is critically stale; stop actuating.
    EmergencyStop { staleness: Duration },
}

impl<T> GateDecision<T> {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateDecision::Pass(_))
    }
}

/// Counters shared with telemetry readers.
#[derive(Debug, Default)]
pub struct DeadmanCounters {
    checks: AtomicU64,
    disable_triggers: AtomicU64,
    disable_episodes: AtomicU64,
}

impl DeadmanCounters {
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    /// Iterations whose command was overridden.
    pub fn disable_triggers(&self) -> u64 {
        self.disable_triggers.load(Ordering::Relaxed)
    }

    /// Transitions from fresh to stale.
    pub fn disable_episodes(&self) -> u64 {
        self.disable_episodes.load(Ordering::Relaxed)
    }
}

/// Deadman gate, owned by the actuation loop.
#[derive(Debug)]
pub struct DeadmanGate {
    config: DeadmanConfig,
    period: Duration,
    disable_after: Duration,
    emergency_after: Duration,
    disabled: bool,
    counters: Arc<DeadmanCounters>,
    rng: SmallRng,
}

impl DeadmanGate {
    pub fn new(config: DeadmanConfig) -> SightlineResult<Self> {
        config.validate()?;
        Ok(Self {
            period: config.period(),
            disable_after: config.disable_after(),
            emergency_after: config.emergency_after(),
            config,
            disabled: false,
            counters: Arc::new(DeadmanCounters::default()),
            rng: SmallRng::from_entropy(),
        })
    }

    /// Fixed jitter seed, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &DeadmanConfig {
        &self.config
    }

    pub fn counters(&self) -> Arc<DeadmanCounters> {
        Arc::clone(&self.counters)
    }

    /// Read `cell` and decide what the actuator may do with it.
    pub fn check<T: Pod>(&mut self, cell: &SnapshotCell<T>) -> GateDecision<T> {
        let snapshot = cell.snapshot();
        match self.evaluate(snapshot.age) {
            GateDecision::Pass(()) => GateDecision::Pass(snapshot.value),
            GateDecision::Disabled { staleness } => GateDecision::Disabled { staleness },
            GateDecision::EmergencyStop { staleness } => GateDecision::EmergencyStop { staleness },
        }
    }

    /// Classify a staleness value and update the counters.
    pub fn evaluate(&mut self, staleness: Duration) -> GateDecision<()> {
        self.counters.checks.fetch_add(1, Ordering::Relaxed);

        if staleness > self.emergency_after {
            log::error!(
                "Deadman: aim command stale for {:?} (emergency limit {:?})",
                staleness,
                self.emergency_after
            );
            return GateDecision::EmergencyStop { staleness };
        }

        if staleness > self.disable_after {
            self.counters
                .disable_triggers
                .fetch_add(1, Ordering::Relaxed);
            if !self.disabled {
                self.disabled = true;
                self.counters
                    .disable_episodes
                    .fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Deadman: aim command stale for {:?}, actuation disabled",
                    staleness
                );
            }
            return GateDecision::Disabled { staleness };
        }

        if self.disabled {
            self.disabled = false;
            log::info!("Deadman: aim command fresh again, actuation re-enabled");
        }
        GateDecision::Pass(())
    }

    /// Error describing an emergency stop at `staleness`.
    pub fn emergency_error(&self, staleness: Duration) -> SightlineError {
        SightlineError::EmergencyStop {
            staleness,
            limit: self.emergency_after,
        }
    }

    /// Next jittered sleep interval.
    pub fn next_sleep(&mut self) -> Duration {
        let ratio = self.config.jitter_ratio;
        if ratio == 0.0 {
            return self.period;
        }
        let factor = self.rng.gen_range((1.0 - ratio)..=(1.0 + ratio));
        self.period.mul_f64(factor)
    }
}
