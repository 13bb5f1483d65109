//! # Tracking
//!
//! - **association**: greedy IoU matching of detections to tracks
//! - **filter**: constant-velocity Kalman update / coast / predict
//! - **filter_simd**: batch position coasting over store columns
//! - **store**: fixed-capacity structure-of-arrays track storage
//! - **tracker**: the per-batch cycle tying the above together
//! - **selector**: picks the track to aim at

pub mod association;
pub mod filter;
pub mod filter_simd;
pub mod selector;
pub mod store;
pub mod tracker;

pub use association::{associate, Association, DataAssociator, Match};
pub use filter::{FilterNoise, FilterState};
pub use selector::{select, SelectorConfig, TargetCandidate};
pub use store::{NewTrack, Track, TrackState, TrackStore, MAX_TRACKS};
pub use tracker::{CycleReport, Tracker, TrackerConfig, TrackerStats};
