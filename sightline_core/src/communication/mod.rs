//! Cross-stage communication primitives.
//!
//! - [`HandoffQueue`]: single-slot head-drop queue moving one owned item
//!   from a producer stage to a consumer stage.
//! - [`SnapshotCell`]: last-write-wins cell for small `Pod` values, read by
//!   any number of threads without locking.

pub mod handoff;
pub mod snapshot;

pub use handoff::HandoffQueue;
pub use snapshot::{Snapshot, SnapshotCell};
