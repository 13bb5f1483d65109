//! # Sightline Core
//!
//! Runtime building blocks for the sightline perception-to-actuation
//! pipeline. Everything here is domain-agnostic:
//!
//! - **Communication**: single-slot head-drop handoff queues and a
//!   last-write-wins snapshot cell
//! - **Memory**: fixed-size pools of reusable buffers with RAII checkout
//! - **Core**: per-thread real-time configuration
//! - **Scheduling**: one worker thread per stage, bounded shutdown and the
//!   deadman staleness gate
//!
//! ## Quick Start
//!
//! ```rust
//! use sightline_core::{HandoffQueue, ResourcePool};
//!
//! let pool = ResourcePool::with_capacity(3, |_| vec![0u8; 64]).unwrap();
//! let queue = HandoffQueue::new();
//!
//! let mut buffer = pool.acquire_for_write().expect("pool is empty");
//! buffer[0] = 7;
//! assert!(queue.push(buffer).is_none());
//!
//! let frame = queue.pop().expect("queue is empty");
//! assert_eq!(frame[0], 7);
//! ```

pub mod communication;
pub mod core;
pub mod error;
pub mod memory;
pub mod scheduling;

pub use communication::{HandoffQueue, Snapshot, SnapshotCell};
pub use core::{RtApplyResult, RtConfig, RtConfigBuilder, RtDegradation, RtScheduler};
pub use error::{SightlineError, SightlineResult};
pub use memory::{PooledBuffer, ResourcePool, ResourcePoolStats, SlotToken};
pub use scheduling::{
    DeadmanConfig, DeadmanGate, GateDecision, PipelineScheduler, ShutdownReport, Stage,
    StopSignal, TickOutcome, WorkerPriority, WorkerSpec,
};
