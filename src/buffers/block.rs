//! Memory blocks bound to buffers and metadata slots

use std::{fmt, ptr, sync::Arc};

use crate::{
    allocators::{HeapBlock, RangeLease},
    error::{BufferError, MemoryShortfall, Result},
    manager::context::ManagerContext,
    memory::PartitionBlock,
    types::{AddressKind, AddressSet, AllocationSource, BufferDataDescriptor, SuppliedMemory},
};

/// A single allocation shared by every buffer of an eagerly allocated pool
#[derive(Debug)]
pub(crate) enum PoolStorage {
    Heap(HeapBlock),
    Partition(PartitionBlock),
}

impl PoolStorage {
    fn addresses(&self) -> AddressSet {
        match self {
            PoolStorage::Heap(block) => AddressSet::cached(block.address()),
            PoolStorage::Partition(block) => block.addresses(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        match self {
            PoolStorage::Heap(block) => block.size(),
            PoolStorage::Partition(block) => block.size(),
        }
    }
}

/// What keeps the bytes of a block valid
pub(crate) enum Backing {
    None,
    /// Caller memory, optionally kept alive by an owned allocation
    External(Option<Arc<HeapBlock>>),
    Heap(HeapBlock),
    /// Range of a supplied block; `base` holds the views of offset 0
    Range { lease: RangeLease, base: AddressSet },
    Partition(PartitionBlock),
    /// Slice of an eager pool allocation
    Shared(Arc<PoolStorage>),
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backing::None => "none",
            Backing::External(_) => "external",
            Backing::Heap(_) => "heap",
            Backing::Range { .. } => "range",
            Backing::Partition(_) => "partition",
            Backing::Shared(_) => "shared",
        };
        f.write_str(name)
    }
}

/// Addresses and size of a payload or metadata block plus its backing
#[derive(Debug)]
pub(crate) struct MemoryBlock {
    size: usize,
    addresses: AddressSet,
    backing: Backing,
}

impl Default for MemoryBlock {
    fn default() -> Self {
        Self::empty()
    }
}

impl MemoryBlock {
    pub(crate) fn empty() -> Self {
        Self {
            size: 0,
            addresses: AddressSet::default(),
            backing: Backing::None,
        }
    }

    pub(crate) fn from_heap(block: HeapBlock) -> Self {
        Self {
            size: block.size(),
            addresses: AddressSet::cached(block.address()),
            backing: Backing::Heap(block),
        }
    }

    pub(crate) fn from_partition(block: PartitionBlock) -> Self {
        Self {
            size: block.size(),
            addresses: block.addresses(),
            backing: Backing::Partition(block),
        }
    }

    pub(crate) fn from_supplied(memory: &SuppliedMemory) -> Self {
        Self {
            size: memory.size(),
            addresses: memory.addresses(),
            backing: Backing::External(memory.keepalive()),
        }
    }

    pub(crate) fn from_range(lease: RangeLease, base: AddressSet) -> Self {
        Self {
            size: lease.size(),
            addresses: base.offset(lease.offset()),
            backing: Backing::Range { lease, base },
        }
    }

    pub(crate) fn shared(storage: &Arc<PoolStorage>, offset: usize, size: usize) -> Self {
        Self {
            size,
            addresses: storage.addresses().offset(offset),
            backing: Backing::Shared(Arc::clone(storage)),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn addresses(&self) -> AddressSet {
        self.addresses
    }

    pub(crate) fn backing(&self) -> &Backing {
        &self.backing
    }

    /// No bytes bound
    pub(crate) fn is_empty(&self) -> bool {
        self.size == 0 || self.addresses.is_empty()
    }

    pub(crate) fn is_range(&self) -> bool {
        matches!(self.backing, Backing::Range { .. })
    }

    fn cached_ptr(&self) -> Option<*mut u8> {
        self.addresses
            .get(AddressKind::Cached)
            .map(|address| address as *mut u8)
    }

    /// Zero every byte through the cached view
    pub(crate) fn zero(&mut self) {
        if let Some(ptr) = self.cached_ptr() {
            // SAFETY: every backing guarantees `size` valid bytes at the cached address
            unsafe { ptr::write_bytes(ptr, 0, self.size) };
        }
    }

    /// Copy `bytes` in at `offset`
    pub(crate) fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let ptr = self.checked_ptr(offset, bytes.len())?;
        // SAFETY: range checked against the block size, and the block is not aliased by `bytes`
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset), bytes.len()) };
        Ok(())
    }

    /// Copy `len` bytes out from `offset`
    pub(crate) fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let ptr = self.checked_ptr(offset, len)?;
        let mut out = vec![0u8; len];
        // SAFETY: range checked against the block size
        unsafe { ptr::copy_nonoverlapping(ptr.add(offset), out.as_mut_ptr(), len) };
        Ok(out)
    }

    fn checked_ptr(&self, offset: usize, len: usize) -> Result<*mut u8> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| BufferError::size_incompatible(usize::MAX, self.size))?;
        if end > self.size {
            return Err(BufferError::size_incompatible(end, self.size));
        }
        self.cached_ptr()
            .ok_or_else(|| BufferError::error("Block has no cached address"))
    }

    /// Split at `at`; this block keeps `[0, at)` and the tail is returned.
    ///
    /// Only range and caller-memory blocks can be split.
    pub(crate) fn split_off(&mut self, at: usize) -> Option<MemoryBlock> {
        let at = at.min(self.size);
        let tail_size = self.size - at;
        let tail_addresses = self.addresses.offset(at);

        let tail_backing = match &mut self.backing {
            Backing::Range { lease, base } => Backing::Range {
                lease: lease.split_off(at),
                base: *base,
            },
            Backing::External(keepalive) => Backing::External(keepalive.clone()),
            Backing::None => Backing::None,
            _ => return None,
        };

        self.size = at;
        Some(MemoryBlock {
            size: tail_size,
            addresses: tail_addresses,
            backing: tail_backing,
        })
    }

    /// Keep the first `new_size` bytes, returning the rest to the allocator
    /// where the backing allows it
    pub(crate) fn shrink(&mut self, new_size: usize) {
        match &mut self.backing {
            Backing::Range { lease, .. } => lease.shrink(new_size),
            Backing::Partition(block) => block.shrink(new_size),
            _ => {}
        }
        self.size = new_size.min(self.size);
    }

    /// Grow a range block into its free neighbour
    pub(crate) fn extend(&mut self, upwards: bool) -> bool {
        let Backing::Range { lease, base } = &mut self.backing else {
            return false;
        };
        if !lease.extend(upwards) {
            return false;
        }
        self.size = lease.size();
        self.addresses = base.offset(lease.offset());
        true
    }
}

/// Allocate a zeroed metadata block for `descriptor`
pub(crate) fn allocate_meta_block(
    context: &ManagerContext,
    descriptor: &BufferDataDescriptor,
    size: usize,
    memory: Option<&SuppliedMemory>,
    partition_name: Option<&str>,
) -> Result<MemoryBlock> {
    let source = descriptor.allocation_source;

    if partition_name.is_some() && !source.uses_partition() {
        return Err(BufferError::unsupported_source(
            source.name(),
            format!("metadata type '{}' does not use a partition", descriptor.name),
        ));
    }

    match source {
        AllocationSource::NoAllocation
        | AllocationSource::SuppliedBlock
        | AllocationSource::IndividualSuppliedBlocks => {
            let memory = memory.ok_or_else(|| {
                BufferError::incompatible_parameters(format!(
                    "Metadata type '{}' needs caller memory",
                    descriptor.name
                ))
            })?;
            if memory.size() < size {
                return Err(BufferError::size_incompatible(size, memory.size()));
            }
            let mut block = MemoryBlock::from_supplied(&memory.slice(0, size));
            if source != AllocationSource::NoAllocation {
                block.zero();
            }
            Ok(block)
        }
        AllocationSource::OsMemory => {
            reject_memory(descriptor, memory)?;
            let aligned = descriptor
                .aligned_size(size)
                .ok_or_else(|| BufferError::insufficient_memory(MemoryShortfall::MetaData, size))?;
            let heap = HeapBlock::allocate_for(MemoryShortfall::MetaData, aligned, descriptor.alignment())?;
            let mut block = MemoryBlock::from_heap(heap);
            block.size = size;
            Ok(block)
        }
        AllocationSource::DeviceMemory
        | AllocationSource::DeviceVideoMemory
        | AllocationSource::NamedDevicePartition => {
            reject_memory(descriptor, memory)?;
            let partition = context.resolve_partition(source, partition_name)?;
            let leased = descriptor
                .aligned_size(size)
                .and_then(|aligned| partition.allocate(aligned, descriptor.alignment(), false))
                .ok_or_else(|| BufferError::insufficient_memory(MemoryShortfall::MetaData, size))?;
            let mut block = MemoryBlock::from_partition(leased);
            block.size = size;
            block.zero();
            Ok(block)
        }
    }
}

fn reject_memory(descriptor: &BufferDataDescriptor, memory: Option<&SuppliedMemory>) -> Result<()> {
    if memory.is_some() {
        return Err(BufferError::incompatible_parameters(format!(
            "{} type '{}' does not take caller memory",
            descriptor.allocation_source.name(),
            descriptor.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::RangeAllocator;

    #[test]
    fn test_heap_block_read_write() {
        let mut block = MemoryBlock::from_heap(HeapBlock::allocate(64, 8).unwrap());
        assert!(!block.is_empty());

        block.write_at(8, b"degas").unwrap();
        assert_eq!(block.read_at(8, 5).unwrap(), b"degas");
        assert!(matches!(
            block.write_at(60, b"overflow"),
            Err(BufferError::SizeIncompatibleWithDescriptor { .. })
        ));

        block.zero();
        assert_eq!(block.read_at(8, 5).unwrap(), vec![0u8; 5]);
    }

    #[test]
    fn test_range_block_split_and_extend() {
        let memory = SuppliedMemory::owned(1024, 8).unwrap();
        let allocator = Arc::new(RangeAllocator::new(
            memory.addresses().get(AddressKind::Cached).unwrap(),
            memory.size(),
        ));

        let lease = RangeLease::allocate(&allocator, 256, 1, false).unwrap();
        let mut block = MemoryBlock::from_range(lease, memory.addresses());
        let start = block.addresses().get(AddressKind::Cached).unwrap();

        let tail = block.split_off(100).unwrap();
        assert_eq!(block.size(), 100);
        assert_eq!(tail.size(), 156);
        assert_eq!(tail.addresses().get(AddressKind::Cached), Some(start + 100));
        assert_eq!(allocator.used_size(), 256);

        drop(tail);
        assert_eq!(allocator.used_size(), 100);

        assert!(block.extend(true));
        assert_eq!(block.size(), 1024);
        assert!(!block.extend(true));
    }

    #[test]
    fn test_empty_block() {
        let block = MemoryBlock::empty();
        assert!(block.is_empty());
        assert!(block.read_at(0, 0).is_err());
    }
}
