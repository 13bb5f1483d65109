//! # Thread-level building blocks
//!
//! - **RtConfig**: scheduler policy, priority, niceness and CPU pinning for
//!   the calling thread, with graceful degradation on systems that do not
//!   allow them.

pub mod rt_config;

pub use rt_config::{
    current_affinity, RtApplyResult, RtConfig, RtConfigBuilder, RtDegradation, RtLimits,
    RtScheduler,
};
