//! Buffers and the pools they live in
//!
//! A pool hands out [`Buffer`] handles over a fixed or growing set of
//! containers. Each container tracks its owners, its payload block, its
//! metadata slots and the buffers linked to it.

pub(crate) mod block;
pub mod buffer;
pub mod config;
pub mod owners;
pub mod pool;
pub mod stats;

pub use buffer::{Buffer, DataReference, MetaDataReference};
pub use config::{
    Capacity, GetBufferRequest, MetaDataSpec, PoolConfig, PoolConfigBuilder, PoolMemory,
    PoolMetaDataSpec,
};
pub use owners::OwnerTable;
pub use pool::{BufferPool, PoolId};
pub use stats::{PoolCounters, PoolStats, PoolUsage};
