//! Unified error handling for sightline
//!
//! Backpressure (pool starvation, queue overwrites) is never an error: it is
//! surfaced through counters. The variants below cover configuration
//! problems, the deadman's fatal path and programming invariant violations.

use std::time::Duration;
use thiserror::Error;

/// Main error type for sightline operations
#[derive(Debug, Error)]
pub enum SightlineError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Memory management errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// A pooled buffer was returned to its pool twice
    #[error("Double release of pool {pool_id} slot {slot} (generation {generation})")]
    DoubleRelease {
        pool_id: u32,
        slot: usize,
        generation: u64,
    },

    /// A slot token was returned to a pool that did not issue it
    #[error("Slot token from pool {token_pool} returned to pool {pool_id}")]
    ForeignPool { pool_id: u32, token_pool: u32 },

    /// Scheduling errors (thread spawn, duplicate stage names)
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// A worker did not exit within the shutdown timeout
    #[error("Worker '{worker}' did not stop within {timeout:?}")]
    JoinTimeout { worker: String, timeout: Duration },

    /// A worker thread panicked
    #[error("Worker '{worker}' panicked: {message}")]
    WorkerPanicked { worker: String, message: String },

    /// The deadman gate halted actuation
    #[error("Emergency stop: aim command stale for {staleness:?} (limit {limit:?})")]
    EmergencyStop { staleness: Duration, limit: Duration },

    /// Internal errors with source location for debugging.
    /// Use the `sightline_internal!()` macro to create these.
    #[error("Internal error: {message} (at {file}:{line})")]
    Internal {
        message: String,
        file: &'static str,
        line: u32,
    },
}

/// Create an internal error with automatic file/line capture.
///
/// ```rust,ignore
/// use sightline_core::sightline_internal;
/// return Err(sightline_internal!("Unexpected state: {:?}", state));
/// ```
#[macro_export]
macro_rules! sightline_internal {
    ($($arg:tt)*) => {
        $crate::error::SightlineError::Internal {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Convenience type alias for Results using SightlineError
pub type SightlineResult<T> = std::result::Result<T, SightlineError>;

/// Short alias — `Result<T>` is equivalent to `SightlineResult<T>`
pub type Result<T> = SightlineResult<T>;

impl From<serde_yaml::Error> for SightlineError {
    fn from(err: serde_yaml::Error) -> Self {
        SightlineError::Config(format!("YAML error: {}", err))
    }
}

impl SightlineError {
    /// True for the errors that indicate a bug rather than a runtime condition.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SightlineError::DoubleRelease { .. }
                | SightlineError::ForeignPool { .. }
                | SightlineError::JoinTimeout { .. }
                | SightlineError::WorkerPanicked { .. }
                | SightlineError::Internal { .. }
        )
    }
}
