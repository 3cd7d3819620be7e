//! Named device partitions

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    allocators::{RangeAllocator, RangeLease},
    error::Result,
    types::AddressSet,
};

use super::{
    config::{BackingType, PartitionConfig},
    regions::MappedRegion,
};

/// A mapped region carved up by a range allocator
#[derive(Debug)]
pub struct DevicePartition {
    name: String,
    region: MappedRegion,
    allocator: Arc<RangeAllocator>,
    physical_base: usize,
}

impl DevicePartition {
    /// Map a new partition
    pub fn new(config: &PartitionConfig) -> Result<Self> {
        let region = MappedRegion::new(config)?;
        let allocator = Arc::new(RangeAllocator::new(region.base_address(), region.size()));
        let physical_base = config.physical_base.unwrap_or_else(|| region.base_address());

        Ok(Self {
            name: config.name.clone(),
            region,
            allocator,
            physical_base,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.region.size()
    }

    /// Allocate a block from this partition
    pub fn allocate(self: &Arc<Self>, size: usize, align: usize, largest: bool) -> Option<PartitionBlock> {
        let lease = RangeLease::allocate(&self.allocator, size, align, largest)?;
        Some(PartitionBlock {
            lease,
            partition: Arc::clone(self),
        })
    }

    pub fn largest_free_block(&self) -> usize {
        self.allocator.largest_free_block()
    }

    pub fn used_size(&self) -> usize {
        self.allocator.used_size()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            name: self.name.clone(),
            size: self.size(),
            used: self.used_size(),
            largest_free_block: self.largest_free_block(),
            backing_type: self.region.backing_type(),
            physical_base: self.physical_base,
        }
    }

    fn addresses_at(&self, offset: usize) -> AddressSet {
        let cached = self.region.base_address() + offset;
        // There is no separate uncached mapping; both CPU views alias
        AddressSet::triplet(Some(cached), Some(cached), Some(self.physical_base + offset))
    }
}

/// A block leased from a partition; keeps the mapping alive
#[derive(Debug)]
pub struct PartitionBlock {
    // Field order matters: the lease is returned before the mapping can go
    lease: RangeLease,
    partition: Arc<DevicePartition>,
}

impl PartitionBlock {
    pub fn addresses(&self) -> AddressSet {
        self.partition.addresses_at(self.lease.offset())
    }

    pub fn size(&self) -> usize {
        self.lease.size()
    }

    pub fn partition(&self) -> &Arc<DevicePartition> {
        &self.partition
    }

    /// Keep the first `new_size` bytes
    pub fn shrink(&mut self, new_size: usize) {
        self.lease.shrink(new_size);
    }
}

/// Statistics for one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub name: String,
    pub size: usize,
    pub used: usize,
    pub largest_free_block: usize,
    pub backing_type: BackingType,
    pub physical_base: usize,
}
