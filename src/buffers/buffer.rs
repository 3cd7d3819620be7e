//! Multi-owner reference-counted buffers

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use crate::{
    allocators::HeapBlock,
    config::MAX_ATTACHED_BUFFERS,
    error::{BufferError, MemoryShortfall, Result},
    manager::context::ManagerContext,
    sync::lock,
    types::{
        round_up_to, AddressKind, AddressSet, AllocationSource, BufferDataDescriptor, OwnerId,
        SuppliedMemory, TypeId, TypeKind,
    },
};

use super::{
    block::{allocate_meta_block, MemoryBlock},
    config::MetaDataSpec,
    owners::OwnerTable,
    pool::{BufferPool, PoolShared},
    stats::PoolCounters,
};

/// View of a buffer's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataReference {
    /// Size of the bound block
    pub block_size: usize,
    /// Bytes of valid data at the start of the block
    pub used_size: usize,
    /// Start of the block in the requested view
    pub address: usize,
    /// Which view `address` belongs to
    pub kind: AddressKind,
}

impl DataReference {
    /// Raw pointer for CPU views; meaningless for physical addresses
    pub fn as_ptr(&self) -> *mut u8 {
        self.address as *mut u8
    }
}

/// View of one metadata block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaDataReference {
    pub type_id: TypeId,
    pub size: usize,
    pub addresses: AddressSet,
}

impl MetaDataReference {
    /// Cached CPU pointer, if the block has one
    pub fn as_ptr(&self) -> Option<*mut u8> {
        self.addresses
            .get(AddressKind::Cached)
            .map(|address| address as *mut u8)
    }
}

pub(crate) struct MetaDataEntry {
    pub(crate) descriptor: Arc<BufferDataDescriptor>,
    pub(crate) block: MemoryBlock,
    /// Installed by the pool; survives release and is only removed pool-wide
    pub(crate) attached_to_pool: bool,
}

impl MetaDataEntry {
    pub(crate) fn type_id(&self) -> TypeId {
        self.descriptor.type_id
    }
}

/// Everything guarded by a buffer's lock
pub(crate) struct BufferState {
    pub(crate) generation: u64,
    pub(crate) in_use: bool,
    pub(crate) owners: OwnerTable,
    pub(crate) block: MemoryBlock,
    pub(crate) used_size: usize,
    pub(crate) meta_data: Vec<MetaDataEntry>,
    pub(crate) links: Vec<Buffer>,
}

/// A pool-owned buffer container, reused across acquisitions
pub(crate) struct BufferSlot {
    pub(crate) index: usize,
    pub(crate) descriptor: Arc<BufferDataDescriptor>,
    pub(crate) context: Arc<ManagerContext>,
    pub(crate) counters: Arc<PoolCounters>,
    pub(crate) pool: Weak<PoolShared>,
    /// The block is bound at creation and kept across releases
    pub(crate) permanent_block: bool,
    pub(crate) state: Mutex<BufferState>,
}

impl BufferSlot {
    pub(crate) fn new(
        index: usize,
        pool: &Arc<PoolShared>,
        block: MemoryBlock,
        permanent_block: bool,
    ) -> Self {
        Self {
            index,
            descriptor: Arc::clone(pool.descriptor()),
            context: Arc::clone(pool.context()),
            counters: Arc::clone(pool.counters()),
            pool: Arc::downgrade(pool),
            permanent_block,
            state: Mutex::new(BufferState {
                generation: 0,
                in_use: false,
                owners: OwnerTable::new(),
                block,
                used_size: 0,
                meta_data: Vec::new(),
                links: Vec::new(),
            }),
        }
    }
}

/// Parts of a released buffer to be dropped outside its lock
pub(crate) struct Retired {
    _block: Option<MemoryBlock>,
    _meta_data: Vec<MetaDataEntry>,
    _links: Vec<Buffer>,
}

/// Handle to an acquired buffer.
///
/// Handles are cheap to clone and carry the generation of the acquisition
/// they came from; once the buffer is released every handle of that
/// generation fails with `NotInUse`.
#[derive(Clone)]
pub struct Buffer {
    slot: Arc<BufferSlot>,
    generation: u64,
}

impl Buffer {
    /// Bind `slot` to a new generation with one reference for `owner`
    pub(crate) fn activate(slot: Arc<BufferSlot>, block: Option<MemoryBlock>, owner: OwnerId) -> Self {
        let generation = {
            let mut state = lock(&slot.state);
            state.generation += 1;
            state.in_use = true;
            state.owners.reset_to(owner);
            state.used_size = 0;
            state.links.clear();
            if let Some(block) = block {
                slot.counters.add_allocated(block.size());
                state.block = block;
            }
            state.generation
        };

        Self { slot, generation }
    }

    /// Handle for the current generation of `slot` if `owner` holds a
    /// reference to it; an unspecified owner matches any reference
    pub(crate) fn held_by(slot: &Arc<BufferSlot>, owner: OwnerId) -> Option<Self> {
        let state = lock(&slot.state);
        let held = if owner.is_unspecified() {
            state.owners.total() > 0
        } else {
            state.owners.count_for(owner) > 0
        };
        (state.in_use && held).then(|| Self {
            slot: Arc::clone(slot),
            generation: state.generation,
        })
    }

    pub(crate) fn slot(&self) -> &Arc<BufferSlot> {
        &self.slot
    }

    /// Lock the state of this generation, whatever its reference count
    fn acquired(&self) -> Result<MutexGuard<'_, BufferState>> {
        let state = lock(&self.slot.state);
        if !state.in_use || state.generation != self.generation {
            log::error!(
                "buffer {} of '{}' used after release",
                self.slot.index,
                self.slot.descriptor.name
            );
            return Err(BufferError::NotInUse {
                index: self.slot.index,
            });
        }
        Ok(state)
    }

    /// Lock the state of this generation while it is referenced
    fn live(&self) -> Result<MutexGuard<'_, BufferState>> {
        let state = self.acquired()?;
        if state.owners.total() == 0 {
            log::error!(
                "buffer {} of '{}' used with a zero reference count",
                self.slot.index,
                self.slot.descriptor.name
            );
            return Err(BufferError::NotInUse {
                index: self.slot.index,
            });
        }
        Ok(state)
    }

    fn pool(&self) -> Result<BufferPool> {
        self.slot
            .pool
            .upgrade()
            .map(BufferPool::from_shared)
            .ok_or_else(|| {
                BufferError::pool_not_found(format!(
                    "pool of buffer {} has been destroyed",
                    self.slot.index
                ))
            })
    }

    /// Type of the buffer's payload
    pub fn get_type(&self) -> TypeId {
        self.slot.descriptor.type_id
    }

    /// Index of the buffer within its pool
    pub fn get_index(&self) -> usize {
        self.slot.index
    }

    pub fn descriptor(&self) -> &Arc<BufferDataDescriptor> {
        &self.slot.descriptor
    }

    /// Whether this handle's generation is in use and referenced
    pub fn is_live(&self) -> bool {
        let state = lock(&self.slot.state);
        state.in_use && state.generation == self.generation && state.owners.total() > 0
    }

    /// Both handles name the same acquisition
    pub fn same_buffer(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot) && self.generation == other.generation
    }

    /// Whether the buffer was handed out by `pool`
    pub fn belongs_to(&self, pool: &BufferPool) -> bool {
        pool.owns(self)
    }

    // Payload

    /// Bind caller memory as the payload of a `NoAllocation` buffer
    pub fn register_data_reference(&self, memory: SuppliedMemory) -> Result<()> {
        if self.slot.descriptor.allocation_source != AllocationSource::NoAllocation {
            return Err(BufferError::not_supported(
                "RegisterDataReference",
                &self.slot.descriptor.name,
            ));
        }

        let previous = {
            let mut state = self.live()?;
            self.slot.counters.adjust_in_use(state.used_size, 0);
            self.slot.counters.sub_allocated(state.block.size());
            self.slot.counters.add_allocated(memory.size());
            state.used_size = 0;
            std::mem::replace(&mut state.block, MemoryBlock::from_supplied(&memory))
        };
        drop(previous);
        Ok(())
    }

    /// Payload view of the given kind
    pub fn obtain_data_reference(&self, kind: AddressKind) -> Result<DataReference> {
        let state = self.live()?;
        if state.block.is_empty() {
            return Err(BufferError::NoDataAttached {
                index: self.slot.index,
            });
        }

        let address = state.block.addresses().get(kind).ok_or_else(|| {
            BufferError::error(format!(
                "buffer {} has no {:?} address",
                self.slot.index, kind
            ))
        })?;

        Ok(DataReference {
            block_size: state.block.size(),
            used_size: state.used_size,
            address,
            kind,
        })
    }

    pub fn set_used_data_size(&self, size: usize) -> Result<()> {
        let mut state = self.live()?;
        if size > state.block.size() {
            return Err(BufferError::size_incompatible(size, state.block.size()));
        }
        self.slot.counters.adjust_in_use(state.used_size, size);
        state.used_size = size;
        Ok(())
    }

    pub fn used_data_size(&self) -> Result<usize> {
        Ok(self.acquired()?.used_size)
    }

    /// Size of the bound payload block
    pub fn buffer_size(&self) -> Result<usize> {
        Ok(self.acquired()?.block.size())
    }

    /// Copy `bytes` into the payload at `offset`
    pub fn write_data(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut state = self.live()?;
        if state.block.is_empty() {
            return Err(BufferError::NoDataAttached {
                index: self.slot.index,
            });
        }
        state.block.write_at(offset, bytes)
    }

    /// Copy `len` payload bytes out from `offset`
    pub fn read_data(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let state = self.live()?;
        if state.block.is_empty() {
            return Err(BufferError::NoDataAttached {
                index: self.slot.index,
            });
        }
        state.block.read_at(offset, len)
    }

    /// Give back the tail of the payload block beyond `new_size`
    pub fn shrink_buffer(&self, new_size: usize) -> Result<()> {
        let descriptor = &self.slot.descriptor;
        if self.slot.permanent_block || descriptor.allocation_source == AllocationSource::NoAllocation {
            return Err(BufferError::not_supported("ShrinkBuffer", &descriptor.name));
        }

        {
            let mut state = self.live()?;
            let block_size = state.block.size();
            if new_size < state.used_size || new_size > block_size {
                return Err(BufferError::size_incompatible(new_size, block_size));
            }

            let new_size = if state.block.is_range() {
                round_up_to(new_size, descriptor.allocation_unit())
                    .map_or(block_size, |rounded| rounded.min(block_size))
            } else {
                new_size
            };

            state.block.shrink(new_size);
            self.slot.counters.sub_allocated(block_size - state.block.size());
        }

        // Memory went back to an allocator someone may be waiting on
        if let Ok(pool) = self.pool() {
            pool.notify_waiters();
        }
        Ok(())
    }

    /// Grow a supplied-block payload into the free range above or below it.
    ///
    /// Extending downwards moves the start of the block; existing data then
    /// sits at the old start address. Returns the new block size.
    pub fn extend_buffer(&self, upwards: bool) -> Result<usize> {
        let descriptor = &self.slot.descriptor;
        if self.slot.permanent_block || descriptor.allocation_source != AllocationSource::SuppliedBlock {
            return Err(BufferError::not_supported("ExtendBuffer", &descriptor.name));
        }

        let mut state = self.live()?;
        let old_size = state.block.size();
        if !state.block.extend(upwards) {
            return Err(BufferError::size_incompatible(old_size + 1, old_size));
        }

        let new_size = state.block.size();
        self.slot.counters.add_allocated(new_size - old_size);
        Ok(new_size)
    }

    /// Split off everything from byte `k` into a new buffer of the same pool.
    ///
    /// This buffer keeps `[0, k)`; the returned buffer covers the rest and
    /// is referenced once by `second_owner`. Used data beyond `k` moves with
    /// the tail.
    pub fn partition_buffer(
        &self,
        k: usize,
        duplicate_meta_data: bool,
        second_owner: OwnerId,
        non_blocking: bool,
    ) -> Result<Buffer> {
        let descriptor = &self.slot.descriptor;
        let splittable = matches!(
            descriptor.allocation_source,
            AllocationSource::SuppliedBlock | AllocationSource::NoAllocation
        );
        if !splittable || self.slot.permanent_block {
            return Err(BufferError::not_supported("PartitionBuffer", &descriptor.name));
        }

        {
            let state = self.live()?;
            if k > state.block.size() {
                return Err(BufferError::size_incompatible(k, state.block.size()));
            }
        }

        let pool = self.pool()?;
        let second = pool.acquire_container(second_owner, non_blocking)?;

        match self.split_into(&second, k, duplicate_meta_data) {
            Ok(()) => Ok(second),
            Err(e) => {
                if let Err(release_error) = second.drop_reference(second_owner) {
                    log::warn!("failed to return partition container: {}", release_error);
                }
                Err(e)
            }
        }
    }

    fn split_into(&self, second: &Buffer, k: usize, duplicate_meta_data: bool) -> Result<()> {
        if duplicate_meta_data {
            let copies = {
                let state = self.live()?;
                state
                    .meta_data
                    .iter()
                    .map(|entry| {
                        let bytes = entry.block.read_at(0, entry.block.size()).unwrap_or_default();
                        (Arc::clone(&entry.descriptor), entry.block.size(), bytes)
                    })
                    .collect::<Vec<_>>()
            };

            for (descriptor, size, bytes) in copies {
                second.install_meta_data_copy(&descriptor, size, &bytes)?;
            }
        }

        let (tail, tail_used) = {
            let mut state = self.live()?;
            if k > state.block.size() {
                return Err(BufferError::size_incompatible(k, state.block.size()));
            }
            let tail = state.block.split_off(k).ok_or_else(|| {
                BufferError::not_supported("PartitionBuffer", &self.slot.descriptor.name)
            })?;
            let tail_used = state.used_size.saturating_sub(k);
            state.used_size = state.used_size.min(k);
            (tail, tail_used)
        };

        let mut state = lock(&second.slot.state);
        // Size accounting moves with the bytes; pool totals are unchanged
        state.block = tail;
        state.used_size = tail_used;
        Ok(())
    }

    fn install_meta_data_copy(
        &self,
        descriptor: &Arc<BufferDataDescriptor>,
        size: usize,
        bytes: &[u8],
    ) -> Result<()> {
        let mut state = self.live()?;

        if let Some(entry) = state
            .meta_data
            .iter_mut()
            .find(|e| e.type_id() == descriptor.type_id)
        {
            let len = bytes.len().min(entry.block.size());
            return entry.block.write_at(0, &bytes[..len]);
        }

        let mut block = match allocate_meta_block(&self.slot.context, descriptor, size, None, None) {
            Ok(block) => block,
            // Sources that need caller memory get a private heap copy
            Err(BufferError::ParametersIncompatibleWithAllocationSource { .. }) => {
                MemoryBlock::from_heap(HeapBlock::allocate_for(
                    MemoryShortfall::MetaData,
                    size,
                    descriptor.alignment(),
                )?)
            }
            Err(e) => return Err(e),
        };
        if !bytes.is_empty() {
            block.write_at(0, bytes)?;
        }

        state.meta_data.push(MetaDataEntry {
            descriptor: Arc::clone(descriptor),
            block,
            attached_to_pool: false,
        });
        Ok(())
    }

    // Metadata

    /// Attach a metadata block of `type_id` to this buffer only
    pub fn attach_meta_data(&self, type_id: TypeId, spec: MetaDataSpec) -> Result<()> {
        let descriptor = self.slot.context.registry.get(type_id, TypeKind::MetaData)?;
        let size = meta_data_size(&descriptor, spec.size, spec.memory.as_ref())?;

        {
            let state = self.live()?;
            if let Some(existing) = find_meta(&state, type_id) {
                return same_size(existing, size);
            }
        }

        let block = allocate_meta_block(
            &self.slot.context,
            &descriptor,
            size,
            spec.memory.as_ref(),
            spec.partition_name.as_deref(),
        )?;

        let mut state = self.live()?;
        if let Some(existing) = find_meta(&state, type_id) {
            return same_size(existing, size);
        }
        state.meta_data.push(MetaDataEntry {
            descriptor,
            block,
            attached_to_pool: false,
        });
        Ok(())
    }

    pub fn detach_meta_data(&self, type_id: TypeId) -> Result<()> {
        let removed = {
            let mut state = self.live()?;
            let Some(position) = state.meta_data.iter().position(|e| e.type_id() == type_id) else {
                log::error!("detach of unattached metadata {:#x} from buffer {}", type_id, self.slot.index);
                return Err(BufferError::attachment_not_found(format!(
                    "metadata {:#x} is not attached to buffer {}",
                    type_id, self.slot.index
                )));
            };
            if state.meta_data[position].attached_to_pool {
                return Err(BufferError::error(format!(
                    "metadata {:#x} is attached pool-wide; detach it from the pool",
                    type_id
                )));
            }
            state.meta_data.remove(position)
        };
        drop(removed);
        Ok(())
    }

    pub fn obtain_meta_data_reference(&self, type_id: TypeId) -> Result<MetaDataReference> {
        let state = self.live()?;
        let entry = find_meta(&state, type_id).ok_or_else(|| {
            BufferError::meta_data_type_not_found(format!(
                "{:#x} on buffer {}",
                type_id, self.slot.index
            ))
        })?;

        Ok(MetaDataReference {
            type_id,
            size: entry.block.size(),
            addresses: entry.block.addresses(),
        })
    }

    /// Copy `bytes` to the start of a metadata block
    pub fn write_meta_data(&self, type_id: TypeId, bytes: &[u8]) -> Result<()> {
        let mut state = self.live()?;
        let index = self.slot.index;
        let entry = state
            .meta_data
            .iter_mut()
            .find(|e| e.type_id() == type_id)
            .ok_or_else(|| {
                BufferError::meta_data_type_not_found(format!("{:#x} on buffer {}", type_id, index))
            })?;
        entry.block.write_at(0, bytes)
    }

    /// Copy a whole metadata block out
    pub fn read_meta_data(&self, type_id: TypeId) -> Result<Vec<u8>> {
        let state = self.live()?;
        let entry = find_meta(&state, type_id).ok_or_else(|| {
            BufferError::meta_data_type_not_found(format!(
                "{:#x} on buffer {}",
                type_id, self.slot.index
            ))
        })?;
        entry.block.read_at(0, entry.block.size())
    }

    pub fn get_meta_data_count(&self) -> Result<usize> {
        Ok(self.acquired()?.meta_data.len())
    }

    /// Attached metadata types in attach order
    pub fn get_meta_data_list(&self) -> Result<Vec<TypeId>> {
        Ok(self
            .acquired()?
            .meta_data
            .iter()
            .map(MetaDataEntry::type_id)
            .collect())
    }

    // Links

    /// Record a non-owning link to `other`
    pub fn attach_buffer(&self, other: &Buffer) -> Result<()> {
        if Arc::ptr_eq(&self.slot, &other.slot) {
            return Err(BufferError::error("a buffer cannot be attached to itself"));
        }
        if !other.is_live() {
            return Err(BufferError::NotInUse {
                index: other.slot.index,
            });
        }

        let mut state = self.live()?;
        if state.links.iter().any(|link| link.same_buffer(other)) {
            return Ok(());
        }
        if state.links.len() >= MAX_ATTACHED_BUFFERS {
            return Err(BufferError::TooManyAttachments {
                limit: MAX_ATTACHED_BUFFERS,
            });
        }
        state.links.push(other.clone());
        Ok(())
    }

    pub fn detach_buffer(&self, other: &Buffer) -> Result<()> {
        if self.detach_buffer_if_attached(other)? {
            return Ok(());
        }
        log::error!(
            "detach of buffer {} which is not attached to buffer {}",
            other.slot.index,
            self.slot.index
        );
        Err(BufferError::attachment_not_found(format!(
            "buffer {} is not attached to buffer {}",
            other.slot.index, self.slot.index
        )))
    }

    /// Remove a link if present; returns whether one was removed
    pub fn detach_buffer_if_attached(&self, other: &Buffer) -> Result<bool> {
        let mut state = self.live()?;
        match state.links.iter().position(|link| link.same_buffer(other)) {
            Some(position) => {
                state.links.remove(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// First live linked buffer of `type_id`
    pub fn obtain_attached_buffer_reference(&self, type_id: TypeId) -> Result<Buffer> {
        let links = self.attached_buffers()?;
        links
            .into_iter()
            .find(|link| link.get_type() == type_id && link.is_live())
            .ok_or_else(|| {
                BufferError::attachment_not_found(format!(
                    "no buffer of type {:#x} attached to buffer {}",
                    type_id, self.slot.index
                ))
            })
    }

    /// Snapshot of the link table
    pub fn attached_buffers(&self) -> Result<Vec<Buffer>> {
        Ok(self.live()?.links.clone())
    }

    // Reference counting

    pub fn increment_reference_count(&self, owner: OwnerId) -> Result<()> {
        self.live()?.owners.increment(owner);
        Ok(())
    }

    /// Drop one reference and return the remaining aggregate count.
    ///
    /// Reaching zero does not release the buffer; see [`Buffer::drop_reference`].
    pub fn decrement_reference_count(&self, owner: OwnerId) -> Result<u32> {
        let mut state = self.live()?;
        if let Some(charged) = state.owners.decrement(owner) {
            if charged != owner && !owner.is_unspecified() {
                log::warn!(
                    "buffer {}: {} held no reference, charged {} instead",
                    self.slot.index,
                    owner,
                    charged
                );
            }
        }
        Ok(state.owners.total())
    }

    /// Move one reference between owners
    pub fn transfer_ownership(&self, from: OwnerId, to: OwnerId) -> Result<()> {
        let mut state = self.live()?;
        if state.owners.transfer(from, to) {
            return Ok(());
        }
        log::error!(
            "buffer {}: transfer from {} to {} without a reference to move",
            self.slot.index,
            from,
            to
        );
        Err(BufferError::error(format!(
            "no reference to transfer from {} to {}",
            from, to
        )))
    }

    /// Decrement and, if that was the last reference, release to the pool
    pub fn drop_reference(&self, owner: OwnerId) -> Result<u32> {
        let remaining = self.decrement_reference_count(owner)?;
        if remaining == 0 {
            self.pool()?.release_buffer(self)?;
        }
        Ok(remaining)
    }

    /// Aggregate reference count
    pub fn get_owner_count(&self) -> Result<u32> {
        Ok(self.acquired()?.owners.total())
    }

    /// Owners and their counts, in order of first reference
    pub fn get_owner_list(&self) -> Result<Vec<(OwnerId, u32)>> {
        Ok(self.acquired()?.owners.entries().to_vec())
    }

    // Cache maintenance

    pub fn flush_cache(&self) -> Result<()> {
        let state = self.live()?;
        if state.block.is_empty() {
            return Ok(());
        }
        self.slot
            .context
            .config
            .cache
            .flush(state.block.addresses(), state.block.size())
    }

    pub fn purge_cache(&self) -> Result<()> {
        let state = self.live()?;
        if state.block.is_empty() {
            return Ok(());
        }
        self.slot
            .context
            .config
            .cache
            .purge(state.block.addresses(), state.block.size())
    }

    // Diagnostics

    /// Log the buffer state at info level
    pub fn dump(&self) {
        let mut out = String::new();
        if self.dump_to(&mut out).is_ok() {
            for line in out.lines() {
                log::info!("{}", line);
            }
        }
    }

    pub fn dump_to(&self, out: &mut impl fmt::Write) -> fmt::Result {
        dump_slot(&self.slot, out)
    }

    /// Export the used payload through the manager's relay sink
    pub fn dump_via_relay(&self, id: u32, type_tag: u32) -> Result<()> {
        let payload = {
            let state = self.live()?;
            if state.block.is_empty() {
                return Err(BufferError::NoDataAttached {
                    index: self.slot.index,
                });
            }
            state.block.read_at(0, state.used_size)?
        };
        self.slot.context.relay(id, type_tag, payload);
        Ok(())
    }

    /// Detach this generation for return to the free list.
    ///
    /// Fails, leaving everything untouched, if the handle is stale or the
    /// buffer is still referenced.
    pub(crate) fn retire(&self) -> Result<Retired> {
        let mut state = self.acquired()?;
        let count = state.owners.total();
        if count > 0 {
            log::error!(
                "release of buffer {} of '{}' with {} references",
                self.slot.index,
                self.slot.descriptor.name,
                count
            );
            return Err(BufferError::NonZeroReferenceCount {
                index: self.slot.index,
                count,
            });
        }

        state.in_use = false;
        self.slot.counters.adjust_in_use(state.used_size, 0);
        state.used_size = 0;
        state.owners.clear();

        let block = if self.slot.permanent_block {
            None
        } else {
            let block = std::mem::take(&mut state.block);
            self.slot.counters.sub_allocated(block.size());
            Some(block)
        };

        let (pool_meta, meta_data): (Vec<_>, Vec<_>) = std::mem::take(&mut state.meta_data)
            .into_iter()
            .partition(|entry| entry.attached_to_pool);
        state.meta_data = pool_meta;

        Ok(Retired {
            _block: block,
            _meta_data: meta_data,
            _links: std::mem::take(&mut state.links),
        })
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.same_buffer(other)
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("type", &self.slot.descriptor.name)
            .field("index", &self.slot.index)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Write one line per buffer state section
pub(crate) fn dump_slot(slot: &BufferSlot, out: &mut impl fmt::Write) -> fmt::Result {
    let state = lock(&slot.state);

    write!(
        out,
        "  buffer {:3} gen {} '{}' {}",
        slot.index,
        state.generation,
        slot.descriptor.name,
        if state.in_use { "in-use" } else { "free" }
    )?;
    if state.in_use {
        write!(out, " refs {} [", state.owners.total())?;
        for (i, (owner, count)) in state.owners.entries().iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "{}:{}", owner, count)?;
        }
        write!(out, "]")?;
    }
    writeln!(
        out,
        " data {}/{} ({:?})",
        state.used_size,
        state.block.size(),
        state.block.backing()
    )?;

    for entry in &state.meta_data {
        writeln!(
            out,
            "    meta {:#010x} '{}' {} bytes{}",
            entry.type_id(),
            entry.descriptor.name,
            entry.block.size(),
            if entry.attached_to_pool { " (pool)" } else { "" }
        )?;
    }
    for link in &state.links {
        writeln!(
            out,
            "    link -> '{}' buffer {}",
            link.slot.descriptor.name, link.slot.index
        )?;
    }
    Ok(())
}

fn find_meta(state: &BufferState, type_id: TypeId) -> Option<&MetaDataEntry> {
    state.meta_data.iter().find(|e| e.type_id() == type_id)
}

fn same_size(existing: &MetaDataEntry, size: usize) -> Result<()> {
    if existing.block.size() == size {
        Ok(())
    } else {
        Err(BufferError::error(format!(
            "metadata '{}' already attached with size {} (requested {})",
            existing.descriptor.name,
            existing.block.size(),
            size
        )))
    }
}

/// Size of a metadata block from the type and the caller's request
pub(crate) fn meta_data_size(
    descriptor: &BufferDataDescriptor,
    requested: Option<usize>,
    memory: Option<&SuppliedMemory>,
) -> Result<usize> {
    if descriptor.has_fixed_size {
        return match requested {
            Some(size) if size != descriptor.fixed_size => {
                Err(BufferError::size_incompatible(size, descriptor.fixed_size))
            }
            _ => Ok(descriptor.fixed_size),
        };
    }

    requested.or(memory.map(SuppliedMemory::size)).ok_or_else(|| {
        BufferError::incompatible_parameters(format!(
            "metadata type '{}' has no fixed size and none was given",
            descriptor.name
        ))
    })
}
