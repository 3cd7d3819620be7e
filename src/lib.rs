//! # Degas - Buffer Management Engine
//!
//! Degas is the buffer engine of a media streaming pipeline. Every stage of
//! the pipeline (collator, frame parser, codec, manifestor, output timer)
//! exchanges data through typed buffers drawn from pools owned by a single
//! manager.
//!
//! ## Features
//!
//! - **Type registry**: named buffer data and metadata types with immutable descriptors
//! - **Allocation sources**: none, OS heap, device partitions, caller supplied blocks
//! - **Multi-owner reference counting**: per-owner counts with an aggregate invariant
//! - **Blocking acquisition**: abortable, liveness-aware waits with timeouts
//! - **Metadata**: typed blocks attached per buffer or pool-wide
//! - **Partitioning**: split a buffer in place, optionally duplicating metadata
//! - **C API**: status-code interface behind the `c-api` feature
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                BufferManager                    │
//! ├─────────────────────────────────────────────────┤
//! │  TypeRegistry            │  PartitionTable      │
//! │  - buffer data types     │  - mapped regions    │
//! │  - metadata types        │  - range allocators  │
//! └─────────────────────────────────────────────────┘
//!           │                         │
//!           ▼                         ▼
//! ┌─────────────────┐    ┌─────────────────────────┐
//! │   BufferPool    │───▶│        Buffer           │
//! │  free list,     │    │  payload, metadata,     │
//! │  blocking get   │    │  links, owner counts    │
//! └─────────────────┘    └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use degas::{AllocationSource, BufferDataDescriptor, BufferManager, GetBufferRequest, OwnerId, PoolConfig};
//!
//! let manager = BufferManager::default();
//! let frame = manager
//!     .create_buffer_data_type(&BufferDataDescriptor::new("frame", AllocationSource::OsMemory))
//!     .unwrap();
//! let pool = manager
//!     .create_pool(PoolConfig::new(frame).with_buffer_count(4).with_size(4096))
//!     .unwrap();
//!
//! let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId::CODEC)).unwrap();
//! buffer.write_data(0, b"payload").unwrap();
//! buffer.drop_reference(OwnerId::CODEC).unwrap();
//! ```

// Core modules
pub mod error;
pub mod types;
pub mod allocators;
pub mod memory;
pub mod sync;

// Buffers, pools and their manager
pub mod buffers;
pub mod manager;
pub mod coordinator;

// Platform hooks and diagnostics
pub mod cache;
pub mod dump;

#[cfg(feature = "c-api")]
pub mod ffi;

// Main API re-exports
pub use error::{BufferError, BufferStatus, MemoryShortfall, Result};
pub use types::{
    AddressKind, AddressSet, AllocationSource, BufferDataDescriptor, OwnerId, SuppliedMemory,
    TypeId, TypeKind,
};
pub use buffers::{
    Buffer, BufferPool, Capacity, DataReference, GetBufferRequest, MetaDataReference,
    MetaDataSpec, PoolConfig, PoolConfigBuilder, PoolId, PoolMemory, PoolMetaDataSpec, PoolStats,
    PoolUsage,
};
pub use manager::{BufferManager, ManagerConfig};
pub use coordinator::AcquireAllCoordinator;
pub use memory::{BackingType, DevicePartition, PartitionConfig, PartitionStats};
pub use cache::{CacheMaintenance, NoCacheMaintenance};
pub use dump::{DumpFlags, MemoryRelaySink, RelayRecord, RelaySink};
pub use sync::{LivenessCheck, WaitTiming};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 4;
pub const VERSION_PATCH: u32 = 0;

/// Default configuration constants
pub mod config {
    use std::time::Duration;

    /// Slice of a blocking wait between re-checks of abort, liveness and timeout
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Period after which a blocked acquisition logs a stall warning
    pub const DEFAULT_STALL_WARNING: Duration = Duration::from_secs(5);

    /// Capacity of the type table (both kinds together)
    pub const MAX_BUFFER_DATA_TYPES: usize = 64;

    /// Links a single buffer may hold
    pub const MAX_ATTACHED_BUFFERS: usize = 4;

    /// "Not specified" sentinel for sizes and counts at the C boundary
    pub const NOT_SPECIFIED: u32 = 0xffff_ffff;
}
