//! # Stage scheduling
//!
//! - **Stage / worker**: one OS thread per pipeline stage, polling a shared
//!   stop flag every iteration
//! - **PipelineScheduler**: spawns workers with per-thread RT settings and
//!   joins them with a bounded timeout
//! - **DeadmanGate**: staleness gate run by the actuation loop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sightline_core::scheduling::{PipelineScheduler, WorkerPriority, WorkerSpec};
//!
//! let mut scheduler = PipelineScheduler::new();
//! scheduler.spawn(Box::new(capture_stage), &WorkerSpec::new(WorkerPriority::High).pinned(2))?;
//! scheduler.spawn(Box::new(track_stage), &WorkerSpec::default())?;
//!
//! let report = scheduler.shutdown(Duration::from_secs(1));
//! report.into_result()?;
//! ```

pub mod deadman;
pub mod scheduler;
pub mod worker;

pub use deadman::{DeadmanConfig, DeadmanCounters, DeadmanGate, GateDecision};
pub use scheduler::{
    PipelineScheduler, ShutdownReport, WorkerOutcome, WorkerSnapshot, DEFAULT_IDLE_SLEEP,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use worker::{
    Stage, StopSignal, TickOutcome, WorkerExit, WorkerPriority, WorkerSpec, WorkerStats,
    REALTIME_FIFO_PRIORITY,
};
