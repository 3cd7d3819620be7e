//! Pool creation parameters and acquisition requests

use std::{fmt, time::Duration};

use crate::{
    error::{BufferError, Result},
    sync::LivenessCheck,
    types::{OwnerId, SuppliedMemory, TypeId},
};

/// Number of buffers a pool may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Exactly this many buffers, created with the pool
    Fixed(usize),
    /// Buffers are created on demand
    Unrestricted,
}

impl Capacity {
    /// The fixed count, if any
    pub fn count(&self) -> Option<usize> {
        match self {
            Capacity::Fixed(n) => Some(*n),
            Capacity::Unrestricted => None,
        }
    }
}

/// Caller-supplied memory for a pool or a pool-wide metadata slot
#[derive(Debug, Clone, Default)]
pub enum PoolMemory {
    /// The allocation source provides the memory
    #[default]
    None,
    /// One block shared by all buffers
    Supplied(SuppliedMemory),
    /// One block per buffer, indexed by buffer index
    PerBuffer(Vec<SuppliedMemory>),
}

impl PoolMemory {
    pub fn is_none(&self) -> bool {
        matches!(self, PoolMemory::None)
    }
}

/// Parameters for creating a buffer pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Buffer data type of every buffer in the pool
    pub type_id: TypeId,
    /// How many buffers the pool holds
    pub capacity: Capacity,
    /// Size of each buffer; defaults to the type's fixed size
    pub size: Option<usize>,
    /// Memory supplied by the caller
    pub memory: PoolMemory,
    /// Partition for partition-backed types
    pub partition_name: Option<String>,
}

impl PoolConfig {
    /// Unrestricted pool of `type_id` with no explicit size
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            capacity: Capacity::Unrestricted,
            size: None,
            memory: PoolMemory::None,
            partition_name: None,
        }
    }

    /// Fix the number of buffers
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.capacity = Capacity::Fixed(count);
        self
    }

    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the per-buffer size
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_memory(mut self, memory: PoolMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_partition(mut self, name: impl Into<String>) -> Self {
        self.partition_name = Some(name.into());
        self
    }

    /// Validate the parameters independently of the type
    pub fn validate(&self) -> Result<()> {
        if self.capacity == Capacity::Fixed(0) {
            return Err(BufferError::incompatible_parameters(
                "Buffer count cannot be zero",
            ));
        }

        if let PoolMemory::PerBuffer(blocks) = &self.memory {
            if blocks.is_empty() {
                return Err(BufferError::incompatible_parameters(
                    "Per-buffer memory list is empty",
                ));
            }
        }

        if matches!(&self.partition_name, Some(name) if name.is_empty()) {
            return Err(BufferError::incompatible_parameters(
                "Partition name cannot be empty",
            ));
        }

        Ok(())
    }
}

/// Builder pattern for pool configuration
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            config: PoolConfig::new(type_id),
        }
    }

    pub fn buffer_count(mut self, count: usize) -> Self {
        self.config.capacity = Capacity::Fixed(count);
        self
    }

    pub fn unrestricted(mut self) -> Self {
        self.config.capacity = Capacity::Unrestricted;
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.config.size = Some(size);
        self
    }

    pub fn supplied_block(mut self, memory: SuppliedMemory) -> Self {
        self.config.memory = PoolMemory::Supplied(memory);
        self
    }

    pub fn per_buffer_blocks(mut self, blocks: Vec<SuppliedMemory>) -> Self {
        self.config.memory = PoolMemory::PerBuffer(blocks);
        self
    }

    pub fn partition(mut self, name: impl Into<String>) -> Self {
        self.config.partition_name = Some(name.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Parameters of a single `get_buffer` call
#[derive(Clone, Default)]
pub struct GetBufferRequest {
    /// Owner the initial reference is recorded under
    pub owner: OwnerId,
    /// Requested payload size; defaults to the pool's buffer size
    pub required_size: Option<usize>,
    /// Fail instead of waiting when nothing is free
    pub non_blocking: bool,
    /// Treat `required_size` as a minimum
    pub size_is_lower_bound: bool,
    /// Give up waiting after this long
    pub timeout: Option<Duration>,
    /// Abandon the wait once this returns false
    pub still_running: Option<LivenessCheck>,
}

impl GetBufferRequest {
    /// Blocking request under `owner` with default size
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.required_size = Some(size);
        self
    }

    /// Request at least `size` bytes
    pub fn with_minimum_size(mut self, size: usize) -> Self {
        self.required_size = Some(size);
        self.size_is_lower_bound = true;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_liveness_check(mut self, still_running: LivenessCheck) -> Self {
        self.still_running = Some(still_running);
        self
    }
}

impl fmt::Debug for GetBufferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetBufferRequest")
            .field("owner", &self.owner)
            .field("required_size", &self.required_size)
            .field("non_blocking", &self.non_blocking)
            .field("size_is_lower_bound", &self.size_is_lower_bound)
            .field("timeout", &self.timeout)
            .field("has_liveness_check", &self.still_running.is_some())
            .finish()
    }
}

/// Parameters for attaching a metadata block to one buffer
#[derive(Debug, Clone, Default)]
pub struct MetaDataSpec {
    /// Block size; defaults to the type's fixed size or the supplied memory size
    pub size: Option<usize>,
    /// Caller memory for sources that do not allocate
    pub memory: Option<SuppliedMemory>,
    /// Partition for partition-backed metadata types
    pub partition_name: Option<String>,
}

impl MetaDataSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_memory(mut self, memory: SuppliedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_partition(mut self, name: impl Into<String>) -> Self {
        self.partition_name = Some(name.into());
        self
    }
}

/// Parameters for attaching a metadata slot to every buffer of a pool
#[derive(Debug, Clone, Default)]
pub struct PoolMetaDataSpec {
    /// Block size; defaults to the type's fixed size
    pub size: Option<usize>,
    /// Caller memory, carved per buffer; needs a fixed buffer count
    pub memory: PoolMemory,
    /// Partition for partition-backed metadata types
    pub partition_name: Option<String>,
}

impl PoolMetaDataSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_memory(mut self, memory: PoolMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_partition(mut self, name: impl Into<String>) -> Self {
        self.partition_name = Some(name.into());
        self
    }
}
