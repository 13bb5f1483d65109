//! # Pooled memory for the capture hot path
//!
//! Frame buffers are allocated once at pipeline start and then only checked
//! out and returned. See [`ResourcePool`] for the checkout discipline.

pub mod resource_pool;

pub use resource_pool::{
    PooledBuffer, ResourcePool, ResourcePoolStats, SlotToken, DEFAULT_POOL_SLOTS, MAX_POOL_SLOTS,
};
