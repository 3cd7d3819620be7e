//! Buffer pools: free list, blocking acquisition and accounting

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Condvar, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    allocators::{HeapBlock, RangeAllocator, RangeLease},
    dump::DumpFlags,
    error::{BufferError, MemoryShortfall, Result},
    manager::context::ManagerContext,
    memory::DevicePartition,
    sync::{lock, CooperativeWait, WaitOutcome},
    types::{
        round_up_to, AddressKind, AddressSet, AllocationSource, BufferDataDescriptor, OwnerId,
        SuppliedMemory, TypeId, TypeKind,
    },
};

use super::{
    block::{allocate_meta_block, MemoryBlock, PoolStorage},
    buffer::{dump_slot, meta_data_size, Buffer, BufferSlot, MetaDataEntry},
    config::{Capacity, GetBufferRequest, PoolConfig, PoolMemory, PoolMetaDataSpec},
    stats::{PoolCounters, PoolStats, PoolUsage},
};

/// Identifier of a pool within its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub u32);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// Where payload memory comes from at acquisition time
enum PoolBacking {
    /// Callers register memory per buffer
    Unbacked,
    Heap,
    Partition(Arc<DevicePartition>),
    /// Ranges of one supplied block
    Range {
        allocator: Arc<RangeAllocator>,
        base: AddressSet,
        _memory: SuppliedMemory,
    },
    /// Every buffer keeps the block it was created with
    Preallocated,
}

impl PoolBacking {
    fn name(&self) -> &'static str {
        match self {
            PoolBacking::Unbacked => "unbacked",
            PoolBacking::Heap => "heap",
            PoolBacking::Partition(_) => "partition",
            PoolBacking::Range { .. } => "supplied-range",
            PoolBacking::Preallocated => "preallocated",
        }
    }

    /// Whether a release elsewhere can make an exhausted allocation succeed
    fn shares_memory(&self) -> bool {
        matches!(self, PoolBacking::Partition(_) | PoolBacking::Range { .. })
    }
}

/// Metadata slot installed on every buffer of the pool
struct PoolMetaData {
    descriptor: Arc<BufferDataDescriptor>,
    size: usize,
    partition_name: Option<String>,
}

struct PoolState {
    slots: Vec<Arc<BufferSlot>>,
    free: VecDeque<usize>,
    in_use: usize,
    /// Bumped by every abort; waiters compare it with the value at entry
    abort_epoch: u64,
    meta_data: Vec<PoolMetaData>,
    destroyed: bool,
}

pub(crate) struct PoolShared {
    id: PoolId,
    descriptor: Arc<BufferDataDescriptor>,
    context: Arc<ManagerContext>,
    counters: Arc<PoolCounters>,
    capacity: Capacity,
    /// Default (lazy) or maximum (preallocated) payload size
    buffer_size: Option<usize>,
    backing: PoolBacking,
    memory_in_pool: Option<usize>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolShared {
    pub(crate) fn descriptor(&self) -> &Arc<BufferDataDescriptor> {
        &self.descriptor
    }

    pub(crate) fn context(&self) -> &Arc<ManagerContext> {
        &self.context
    }

    pub(crate) fn counters(&self) -> &Arc<PoolCounters> {
        &self.counters
    }

    fn no_free_buffer(&self) -> BufferError {
        BufferError::NoFreeBufferAvailable {
            type_name: self.descriptor.name.clone(),
        }
    }

    fn aborted(&self) -> BufferError {
        self.counters.record_abort();
        log::debug!("{}: blocking get_buffer aborted", self.id);
        BufferError::BlockingCallAborted {
            type_name: self.descriptor.name.clone(),
        }
    }

    /// Payload size for a request
    fn resolve_size(&self, request: &GetBufferRequest) -> Result<usize> {
        let descriptor = &self.descriptor;

        if matches!(self.backing, PoolBacking::Preallocated) || descriptor.has_fixed_size {
            let limit = self.buffer_size.unwrap_or(descriptor.fixed_size);
            return match request.required_size {
                Some(required) if required > limit => {
                    Err(BufferError::size_incompatible(required, limit))
                }
                _ => Ok(limit),
            };
        }

        match request.required_size.or(self.buffer_size) {
            Some(size) => Ok(size),
            None if descriptor.allocation_source == AllocationSource::NoAllocation => Ok(0),
            None => Err(BufferError::incompatible_parameters(format!(
                "no size given for variable size type '{}'",
                descriptor.name
            ))),
        }
    }

    /// Memory for a newly acquired buffer; `None` keeps the slot's block
    fn allocate_payload(&self, size: Option<usize>, lower_bound: bool) -> Result<Option<MemoryBlock>> {
        let descriptor = &self.descriptor;

        if matches!(self.backing, PoolBacking::Preallocated) {
            return Ok(None);
        }
        let Some(size) = size else {
            return Ok(Some(MemoryBlock::empty()));
        };

        let block = match &self.backing {
            PoolBacking::Unbacked | PoolBacking::Preallocated => MemoryBlock::empty(),
            PoolBacking::Heap => {
                let aligned = descriptor
                    .aligned_size(size)
                    .ok_or_else(|| BufferError::insufficient_memory(MemoryShortfall::Buffer, size))?;
                MemoryBlock::from_heap(HeapBlock::allocate_for(
                    MemoryShortfall::Buffer,
                    aligned,
                    descriptor.alignment(),
                )?)
            }
            PoolBacking::Partition(partition) => {
                let aligned = descriptor
                    .aligned_size(size)
                    .ok_or_else(|| BufferError::size_incompatible(size, partition.size()))?;
                if aligned > partition.size() {
                    return Err(BufferError::size_incompatible(aligned, partition.size()));
                }
                partition
                    .allocate(aligned, descriptor.alignment(), lower_bound)
                    .map(MemoryBlock::from_partition)
                    .ok_or_else(|| BufferError::insufficient_memory(MemoryShortfall::Buffer, size))?
            }
            PoolBacking::Range {
                allocator, base, ..
            } => {
                let rounded = round_up_to(size, descriptor.allocation_unit())
                    .ok_or_else(|| BufferError::size_incompatible(size, allocator.total_size()))?;
                if rounded > allocator.total_size() {
                    return Err(BufferError::size_incompatible(rounded, allocator.total_size()));
                }
                RangeLease::allocate(allocator, rounded, descriptor.alignment(), lower_bound)
                    .map(|lease| MemoryBlock::from_range(lease, *base))
                    .ok_or_else(|| BufferError::insufficient_memory(MemoryShortfall::Buffer, size))?
            }
        };

        Ok(Some(block))
    }

    /// Append a new container, carrying every pool-wide metadata slot
    fn create_slot(self: &Arc<Self>, state: &mut PoolState) -> Result<usize> {
        let index = state.slots.len();
        let slot = Arc::new(BufferSlot::new(index, self, MemoryBlock::empty(), false));

        {
            let mut slot_state = lock(&slot.state);
            for meta in &state.meta_data {
                let block = allocate_meta_block(
                    &self.context,
                    &meta.descriptor,
                    meta.size,
                    None,
                    meta.partition_name.as_deref(),
                )?;
                slot_state.meta_data.push(MetaDataEntry {
                    descriptor: Arc::clone(&meta.descriptor),
                    block,
                    attached_to_pool: true,
                });
            }
        }

        state.slots.push(slot);
        log::trace!("{}: created buffer {}", self.id, index);
        Ok(index)
    }

    fn acquire(self: &Arc<Self>, request: &GetBufferRequest, size: Option<usize>) -> Result<Buffer> {
        let mut wait: Option<CooperativeWait> = None;
        let mut state = lock(&self.state);
        let epoch = state.abort_epoch;

        loop {
            if state.destroyed {
                return Err(BufferError::pool_not_found(format!("{} was destroyed", self.id)));
            }
            if state.abort_epoch != epoch {
                return Err(self.aborted());
            }

            let index = match state.free.pop_front() {
                Some(index) => Some(index),
                None if self.capacity == Capacity::Unrestricted => Some(self.create_slot(&mut state)?),
                None => None,
            };

            let memory_exhausted = match index {
                Some(index) => match self.allocate_payload(size, request.size_is_lower_bound) {
                    Ok(block) => {
                        state.in_use += 1;
                        let in_use = state.in_use;
                        let slot = Arc::clone(&state.slots[index]);
                        drop(state);

                        self.counters.record_acquisition(in_use);
                        return Ok(Buffer::activate(slot, block, request.owner));
                    }
                    Err(e) => {
                        state.free.push_front(index);
                        let waitable = matches!(e, BufferError::InsufficientMemory { .. })
                            && self.backing.shares_memory();
                        if request.non_blocking || !waitable {
                            self.counters.record_failure();
                            return Err(e);
                        }
                        true
                    }
                },
                None if request.non_blocking => {
                    self.counters.record_failure();
                    return Err(self.no_free_buffer());
                }
                None => false,
            };

            let waiter = wait.get_or_insert_with(|| {
                CooperativeWait::new(
                    self.context.config.wait_timing,
                    request.timeout,
                    request.still_running.clone(),
                    format!(
                        "{} get_buffer on '{}' ({})",
                        self.id,
                        self.descriptor.name,
                        if memory_exhausted { "memory exhausted" } else { "no free buffer" }
                    ),
                )
            });

            let (guard, outcome) = waiter.wait(&self.available, state);
            state = guard;
            match outcome {
                WaitOutcome::Retry => {}
                WaitOutcome::Abandoned => return Err(self.aborted()),
                WaitOutcome::TimedOut => {
                    self.counters.record_failure();
                    log::debug!("{}: get_buffer timed out", self.id);
                    return Err(self.no_free_buffer());
                }
            }
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        // Links form cycles between slots, and handles outliving the pool
        // must not reach memory the pool kept alive
        let state = lock(&self.state);
        for slot in &state.slots {
            let mut slot_state = lock(&slot.state);
            slot_state.in_use = false;
            slot_state.links.clear();
            slot_state.meta_data.clear();
            slot_state.block = MemoryBlock::empty();
        }
    }
}

/// Handle to a pool of buffers sharing one type.
///
/// Handles are cheap to clone; the pool lives until its manager destroys it
/// and the last handle is dropped.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool; called by the manager after resolving the type
    pub(crate) fn create(
        id: PoolId,
        context: Arc<ManagerContext>,
        descriptor: Arc<BufferDataDescriptor>,
        config: PoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        let source = descriptor.allocation_source;

        if let (true, Some(size)) = (descriptor.has_fixed_size, config.size) {
            if size != descriptor.fixed_size {
                return Err(BufferError::size_incompatible(size, descriptor.fixed_size));
            }
        }

        if config.partition_name.is_some() && !source.uses_partition() {
            return Err(BufferError::unsupported_source(
                source.name(),
                format!("type '{}' does not allocate from a partition", descriptor.name),
            ));
        }

        check_pool_memory(&descriptor, &config)?;

        if descriptor.allocate_on_pool_creation && config.capacity == Capacity::Unrestricted {
            return Err(BufferError::incompatible_parameters(format!(
                "type '{}' allocates on pool creation and needs a fixed buffer count",
                descriptor.name
            )));
        }

        let partition = if source.uses_partition() {
            Some(context.resolve_partition(source, config.partition_name.as_deref())?)
        } else {
            None
        };

        let item_size = if descriptor.has_fixed_size {
            Some(descriptor.fixed_size)
        } else {
            config.size
        };

        let counters = Arc::new(PoolCounters::new());
        let preallocated = descriptor.allocate_on_pool_creation
            || source == AllocationSource::IndividualSuppliedBlocks;

        let (backing, mut blocks, memory_in_pool, buffer_size) = if preallocated {
            let count = config.capacity.count().unwrap_or(0);
            let blocks = preallocate(&descriptor, &config.memory, partition.as_ref(), item_size, count)?;
            let total: usize = blocks.iter().map(MemoryBlock::size).sum();
            let smallest = blocks.iter().map(MemoryBlock::size).min();
            counters.add_allocated(total);
            (PoolBacking::Preallocated, blocks, Some(total), smallest)
        } else {
            let backing = match (source, &config.memory, partition) {
                (AllocationSource::SuppliedBlock, PoolMemory::Supplied(memory), _) => {
                    let addresses = memory.addresses();
                    let base_address = addresses
                        .get(AddressKind::Cached)
                        .or_else(|| addresses.get(AddressKind::Physical))
                        .unwrap_or(0);
                    PoolBacking::Range {
                        allocator: Arc::new(RangeAllocator::new(base_address, memory.size())),
                        base: addresses,
                        _memory: memory.clone(),
                    }
                }
                (_, _, Some(partition)) => PoolBacking::Partition(partition),
                (AllocationSource::OsMemory, _, _) => PoolBacking::Heap,
                _ => PoolBacking::Unbacked,
            };
            let memory_in_pool = match &backing {
                PoolBacking::Range { allocator, .. } => Some(allocator.total_size()),
                PoolBacking::Partition(partition) => Some(partition.size()),
                _ => None,
            };
            (backing, Vec::new(), memory_in_pool, item_size)
        };

        let inner = Arc::new(PoolShared {
            id,
            descriptor,
            context,
            counters,
            capacity: config.capacity,
            buffer_size,
            backing,
            memory_in_pool,
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                free: VecDeque::new(),
                in_use: 0,
                abort_epoch: 0,
                meta_data: Vec::new(),
                destroyed: false,
            }),
            available: Condvar::new(),
        });

        if let Capacity::Fixed(count) = config.capacity {
            let mut state = lock(&inner.state);
            blocks.reverse();
            for index in 0..count {
                let block = blocks.pop().unwrap_or_default();
                state
                    .slots
                    .push(Arc::new(BufferSlot::new(index, &inner, block, preallocated)));
                state.free.push_back(index);
            }
        }

        log::debug!(
            "{}: created for '{}' ({}, {:?}, buffer size {:?})",
            inner.id,
            inner.descriptor.name,
            inner.backing.name(),
            inner.capacity,
            inner.buffer_size
        );

        Ok(Self { inner })
    }

    pub(crate) fn from_shared(inner: Arc<PoolShared>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    /// Buffer data type of every buffer in the pool
    pub fn type_id(&self) -> TypeId {
        self.inner.descriptor.type_id
    }

    pub fn descriptor(&self) -> &Arc<BufferDataDescriptor> {
        &self.inner.descriptor
    }

    pub fn capacity(&self) -> Capacity {
        self.inner.capacity
    }

    /// Both handles refer to the same pool
    pub fn same_pool(&self, other: &BufferPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn owns(&self, buffer: &Buffer) -> bool {
        std::ptr::eq(buffer.slot().pool.as_ptr(), Arc::as_ptr(&self.inner))
    }

    /// Acquire a buffer, waiting if the request allows it
    pub fn get_buffer(&self, request: GetBufferRequest) -> Result<Buffer> {
        let size = self.inner.resolve_size(&request)?;
        self.inner.acquire(&request, Some(size))
    }

    /// Acquire a container without payload memory
    pub(crate) fn acquire_container(&self, owner: OwnerId, non_blocking: bool) -> Result<Buffer> {
        let request = GetBufferRequest {
            owner,
            non_blocking,
            ..Default::default()
        };
        self.inner.acquire(&request, None)
    }

    /// Return an unreferenced buffer to the free list
    pub fn release_buffer(&self, buffer: &Buffer) -> Result<()> {
        if !self.owns(buffer) {
            return Err(BufferError::error(format!(
                "buffer {} of '{}' does not belong to {}",
                buffer.get_index(),
                buffer.descriptor().name,
                self.inner.id
            )));
        }

        let retired = buffer.retire()?;
        drop(retired);

        {
            let mut state = lock(&self.inner.state);
            state.free.push_back(buffer.get_index());
            state.in_use = state.in_use.saturating_sub(1);
        }
        self.inner.counters.record_release();
        self.notify_waiters();
        Ok(())
    }

    /// Wake every thread currently blocked in `get_buffer` with `BlockingCallAborted`
    pub fn abort_blocking_get_buffer(&self) {
        lock(&self.inner.state).abort_epoch += 1;
        self.inner.available.notify_all();
        log::debug!("{}: aborting blocked get_buffer calls", self.inner.id);
    }

    pub(crate) fn notify_waiters(&self) {
        self.inner.available.notify_all();
    }

    /// Install a metadata slot on every present and future buffer
    pub fn attach_meta_data(&self, type_id: TypeId, spec: PoolMetaDataSpec) -> Result<()> {
        let inner = &self.inner;
        let descriptor = inner.context.registry.get(type_id, TypeKind::MetaData)?;
        let hint = match &spec.memory {
            PoolMemory::PerBuffer(blocks) => blocks.first(),
            _ => None,
        };
        let size = meta_data_size(&descriptor, spec.size, hint)?;

        let caller_memory = descriptor.allocation_source.uses_supplied_memory()
            || descriptor.allocation_source == AllocationSource::NoAllocation;
        if caller_memory && spec.memory.is_none() {
            return Err(BufferError::incompatible_parameters(format!(
                "metadata type '{}' needs caller memory",
                descriptor.name
            )));
        }

        let mut state = lock(&inner.state);
        if state.destroyed {
            return Err(BufferError::pool_not_found(format!("{} was destroyed", inner.id)));
        }
        if state.meta_data.iter().any(|m| m.descriptor.type_id == type_id) {
            return Ok(());
        }

        let count = state.slots.len();
        let carved: Option<Vec<SuppliedMemory>> = match &spec.memory {
            PoolMemory::None => None,
            PoolMemory::Supplied(memory) => {
                let Capacity::Fixed(n) = inner.capacity else {
                    return Err(BufferError::incompatible_parameters(
                        "pool-wide metadata memory needs a fixed buffer count",
                    ));
                };
                let layout = descriptor
                    .aligned_size(size)
                    .and_then(|stride| Some((stride, stride.checked_mul(n)?)));
                let Some((stride, needed)) = layout else {
                    return Err(BufferError::size_incompatible(usize::MAX, memory.size()));
                };
                if needed > memory.size() {
                    return Err(BufferError::size_incompatible(needed, memory.size()));
                }
                Some((0..n).map(|i| memory.slice(i * stride, size)).collect())
            }
            PoolMemory::PerBuffer(blocks) => {
                if inner.capacity != Capacity::Fixed(blocks.len()) {
                    return Err(BufferError::incompatible_parameters(format!(
                        "{} metadata blocks supplied for {:?}",
                        blocks.len(),
                        inner.capacity
                    )));
                }
                Some(blocks.clone())
            }
        };

        // Allocate everything first so a failure leaves every buffer untouched
        let mut blocks = Vec::with_capacity(count);
        for index in 0..count {
            let memory = carved.as_ref().map(|m| &m[index]);
            blocks.push(allocate_meta_block(
                &inner.context,
                &descriptor,
                size,
                memory,
                spec.partition_name.as_deref(),
            )?);
        }

        let mut displaced = Vec::new();
        for (slot, block) in state.slots.iter().zip(blocks) {
            let mut slot_state = lock(&slot.state);
            if let Some(position) = slot_state.meta_data.iter().position(|e| e.type_id() == type_id) {
                displaced.push(slot_state.meta_data.remove(position));
            }
            slot_state.meta_data.push(MetaDataEntry {
                descriptor: Arc::clone(&descriptor),
                block,
                attached_to_pool: true,
            });
        }

        state.meta_data.push(PoolMetaData {
            descriptor,
            size,
            partition_name: spec.partition_name,
        });
        drop(state);
        drop(displaced);
        Ok(())
    }

    /// Remove a pool-wide metadata slot from every buffer
    pub fn detach_meta_data(&self, type_id: TypeId) -> Result<()> {
        let inner = &self.inner;
        let mut state = lock(&inner.state);

        let Some(position) = state.meta_data.iter().position(|m| m.descriptor.type_id == type_id) else {
            log::error!("{}: detach of metadata {:#x} which is not attached", inner.id, type_id);
            return Err(BufferError::attachment_not_found(format!(
                "metadata {:#x} is not attached to {}",
                type_id, inner.id
            )));
        };
        state.meta_data.remove(position);

        let mut removed = Vec::new();
        for slot in &state.slots {
            let mut slot_state = lock(&slot.state);
            if let Some(index) = slot_state
                .meta_data
                .iter()
                .position(|e| e.attached_to_pool && e.type_id() == type_id)
            {
                if slot_state.in_use {
                    log::warn!(
                        "{}: detaching metadata {:#x} from buffer {} while in use",
                        inner.id,
                        type_id,
                        slot.index
                    );
                }
                removed.push(slot_state.meta_data.remove(index));
            }
        }
        drop(state);
        drop(removed);
        Ok(())
    }

    /// Point-in-time usage figures
    pub fn get_pool_usage(&self) -> PoolUsage {
        let inner = &self.inner;
        let state = lock(&inner.state);

        let referenced = state
            .slots
            .iter()
            .filter(|slot| {
                let slot_state = lock(&slot.state);
                slot_state.in_use && slot_state.owners.total() > 0
            })
            .count();

        PoolUsage {
            buffers_in_pool: state.slots.len(),
            buffers_with_non_zero_reference_count: referenced,
            memory_in_pool: inner.memory_in_pool,
            memory_allocated: inner.counters.memory_allocated(),
            memory_in_use: inner.counters.memory_in_use(),
            largest_free_memory_block: match &inner.backing {
                PoolBacking::Range { allocator, .. } => Some(allocator.largest_free_block()),
                PoolBacking::Partition(partition) => Some(partition.largest_free_block()),
                _ => None,
            },
        }
    }

    /// Buffers referenced by `owner`, or by anyone if `owner` is unspecified
    pub fn count_buffers_referenced_by(&self, owner: OwnerId) -> usize {
        self.get_all_used_buffers(owner).len()
    }

    /// Handles to the buffers referenced by `owner`, or by anyone if
    /// unspecified. No references are taken.
    pub fn get_all_used_buffers(&self, owner: OwnerId) -> Vec<Buffer> {
        let slots: Vec<Arc<BufferSlot>> = lock(&self.inner.state).slots.clone();
        slots
            .iter()
            .filter_map(|slot| Buffer::held_by(slot, owner))
            .collect()
    }

    /// Acquisition counters
    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot()
    }

    /// Log the pool state at info level
    pub fn dump(&self, flags: DumpFlags) {
        let mut out = String::new();
        if self.dump_to(flags, &mut out).is_ok() {
            for line in out.lines() {
                log::info!("{}", line);
            }
        }
    }

    pub fn dump_to(&self, flags: DumpFlags, out: &mut impl fmt::Write) -> fmt::Result {
        let inner = &self.inner;

        if flags.intersects(DumpFlags::LIST_POOLS | DumpFlags::POOL_STATES) {
            writeln!(
                out,
                "{} '{}' ({:#x}) {} {:?}",
                inner.id,
                inner.descriptor.name,
                inner.descriptor.type_id,
                inner.backing.name(),
                inner.capacity
            )?;
        }

        if flags.contains(DumpFlags::POOL_STATES) {
            let usage = self.get_pool_usage();
            writeln!(
                out,
                "  buffers {} referenced {} memory pool {:?} allocated {} in-use {} largest-free {:?}",
                usage.buffers_in_pool,
                usage.buffers_with_non_zero_reference_count,
                usage.memory_in_pool,
                usage.memory_allocated,
                usage.memory_in_use,
                usage.largest_free_memory_block
            )?;
            writeln!(out, "  {}", self.stats().summary())?;
        }

        if flags.contains(DumpFlags::BUFFER_STATES) {
            let slots: Vec<Arc<BufferSlot>> = lock(&inner.state).slots.clone();
            for slot in &slots {
                dump_slot(slot, out)?;
            }
        }
        Ok(())
    }

    /// Tear the pool down; fails while any buffer is referenced
    pub(crate) fn tear_down(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = lock(&inner.state);

        if state.destroyed {
            return Err(BufferError::pool_not_found(format!("{} was destroyed", inner.id)));
        }

        for slot in &state.slots {
            let slot_state = lock(&slot.state);
            let count = slot_state.owners.total();
            if slot_state.in_use && count > 0 {
                log::error!(
                    "{}: destroy with buffer {} still referenced ({} references)",
                    inner.id,
                    slot.index,
                    count
                );
                return Err(BufferError::NonZeroReferenceCount {
                    index: slot.index,
                    count,
                });
            }
        }

        state.destroyed = true;
        state.abort_epoch += 1;
        state.free.clear();
        state.in_use = 0;
        state.meta_data.clear();
        let slots = std::mem::take(&mut state.slots);
        drop(state);
        inner.available.notify_all();

        for slot in slots {
            let mut slot_state = lock(&slot.state);
            slot_state.in_use = false;
            slot_state.owners.clear();
            inner.counters.adjust_in_use(slot_state.used_size, 0);
            slot_state.used_size = 0;
            slot_state.links.clear();
            slot_state.meta_data.clear();
            slot_state.block = MemoryBlock::empty();
        }

        log::debug!("{}: destroyed", inner.id);
        Ok(())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.inner.id)
            .field("type", &self.inner.descriptor.name)
            .field("capacity", &self.inner.capacity)
            .field("backing", &self.inner.backing.name())
            .finish()
    }
}

/// Check that the pool's memory parameters match the allocation source
fn check_pool_memory(descriptor: &BufferDataDescriptor, config: &PoolConfig) -> Result<()> {
    let source = descriptor.allocation_source;
    match (source, &config.memory) {
        (AllocationSource::SuppliedBlock, PoolMemory::Supplied(_)) => Ok(()),
        (AllocationSource::SuppliedBlock, _) => Err(BufferError::incompatible_parameters(format!(
            "type '{}' needs one supplied memory block",
            descriptor.name
        ))),
        (AllocationSource::IndividualSuppliedBlocks, PoolMemory::PerBuffer(blocks)) => {
            if config.capacity == Capacity::Fixed(blocks.len()) {
                Ok(())
            } else {
                Err(BufferError::incompatible_parameters(format!(
                    "{} per-buffer blocks supplied for {:?}",
                    blocks.len(),
                    config.capacity
                )))
            }
        }
        (AllocationSource::IndividualSuppliedBlocks, _) => {
            Err(BufferError::incompatible_parameters(format!(
                "type '{}' needs one supplied block per buffer",
                descriptor.name
            )))
        }
        (_, PoolMemory::None) => Ok(()),
        (_, _) => Err(BufferError::incompatible_parameters(format!(
            "{} type '{}' does not take supplied memory",
            source.name(),
            descriptor.name
        ))),
    }
}

/// Carve the permanent block of every buffer of a preallocated pool
fn preallocate(
    descriptor: &BufferDataDescriptor,
    memory: &PoolMemory,
    partition: Option<&Arc<DevicePartition>>,
    item_size: Option<usize>,
    count: usize,
) -> Result<Vec<MemoryBlock>> {
    if let PoolMemory::PerBuffer(blocks) = memory {
        return blocks
            .iter()
            .map(|block| {
                let size = item_size.unwrap_or(block.size());
                if block.size() < size {
                    return Err(BufferError::size_incompatible(size, block.size()));
                }
                Ok(MemoryBlock::from_supplied(&block.slice(0, size)))
            })
            .collect();
    }

    let alignment = descriptor.alignment();
    let item = match (item_size, memory) {
        (Some(size), _) => descriptor
            .aligned_size(size)
            .ok_or_else(|| BufferError::insufficient_memory(MemoryShortfall::Pool, size))?,
        (None, PoolMemory::Supplied(block)) if count > 0 => (block.size() / count) & !(alignment - 1),
        _ => {
            return Err(BufferError::incompatible_parameters(format!(
                "preallocated pool of '{}' needs a buffer size",
                descriptor.name
            )))
        }
    };
    let total = item
        .checked_mul(count)
        .ok_or_else(|| BufferError::size_incompatible(usize::MAX, item))?;

    let storage = match (descriptor.allocation_source, memory) {
        (AllocationSource::SuppliedBlock, PoolMemory::Supplied(block)) => {
            if total > block.size() {
                return Err(BufferError::size_incompatible(total, block.size()));
            }
            return Ok((0..count)
                .map(|i| MemoryBlock::from_supplied(&block.slice(i * item, item)))
                .collect());
        }
        (AllocationSource::OsMemory, _) => {
            PoolStorage::Heap(HeapBlock::allocate_for(MemoryShortfall::Pool, total, alignment)?)
        }
        (_, _) => {
            let partition = partition.ok_or_else(|| {
                BufferError::unsupported_source(
                    descriptor.allocation_source.name(),
                    "cannot preallocate from this source",
                )
            })?;
            PoolStorage::Partition(
                partition
                    .allocate(total, alignment, false)
                    .ok_or_else(|| BufferError::insufficient_memory(MemoryShortfall::Pool, total))?,
            )
        }
    };

    let storage = Arc::new(storage);
    log::trace!("preallocated {} bytes for {} buffers", storage.size(), count);
    Ok((0..count)
        .map(|i| MemoryBlock::shared(&storage, i * item, item))
        .collect())
}
