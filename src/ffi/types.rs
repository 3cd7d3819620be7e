//! FFI type definitions and handle types

use std::ffi::{c_char, c_void};

use crate::{
    buffers::PoolUsage,
    config::NOT_SPECIFIED,
    error::BufferStatus,
    types::{AddressKind, AllocationSource, BufferDataDescriptor, TypeKind},
};

/// Opaque handle types for C API
pub type DegasManagerHandle = *mut c_void;
pub type DegasPoolHandle = *mut c_void;
pub type DegasBufferHandle = *mut c_void;

/// Type identifier as seen from C
pub type DegasTypeId = u32;

/// Owner identifier as seen from C
pub type DegasOwnerId = u32;

/// Allocation source codes (C-compatible)
pub const DEGAS_SOURCE_NO_ALLOCATION: u32 = 0;
pub const DEGAS_SOURCE_OS_MEMORY: u32 = 1;
pub const DEGAS_SOURCE_DEVICE_MEMORY: u32 = 2;
pub const DEGAS_SOURCE_DEVICE_VIDEO_MEMORY: u32 = 3;
pub const DEGAS_SOURCE_SUPPLIED_BLOCK: u32 = 4;
pub const DEGAS_SOURCE_INDIVIDUAL_SUPPLIED_BLOCKS: u32 = 5;
pub const DEGAS_SOURCE_NAMED_DEVICE_PARTITION: u32 = 6;

/// Address kind codes (C-compatible)
pub const DEGAS_ADDRESS_CACHED: u32 = 0;
pub const DEGAS_ADDRESS_UNCACHED: u32 = 1;
pub const DEGAS_ADDRESS_PHYSICAL: u32 = 2;

/// Type descriptor (C-compatible)
#[repr(C)]
pub struct DegasDescriptor {
    pub name: *const c_char,
    pub is_meta_data: bool,
    pub allocation_source: u32,
    pub required_alignment: usize,
    pub allocation_unit_size: usize,
    pub has_fixed_size: bool,
    pub allocate_on_pool_creation: bool,
    pub fixed_size: usize,
}

/// Pool usage figures (C-compatible); absent values are `NOT_SPECIFIED`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DegasPoolUsage {
    pub buffers_in_pool: u32,
    pub buffers_with_non_zero_reference_count: u32,
    pub memory_in_pool: u32,
    pub memory_allocated: u32,
    pub memory_in_use: u32,
    pub largest_free_memory_block: u32,
}

/// Payload reference (C-compatible)
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DegasDataReference {
    pub block_size: usize,
    pub used_size: usize,
    pub address: usize,
}

/// Library version and engine limits (C-compatible)
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DegasVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub max_data_types: u32,
    pub max_attached_buffers: u32,
    pub not_specified: u32,
}

impl DegasVersion {
    pub(crate) fn current() -> Self {
        Self {
            major: crate::VERSION_MAJOR,
            minor: crate::VERSION_MINOR,
            patch: crate::VERSION_PATCH,
            max_data_types: to_c(Some(crate::config::MAX_BUFFER_DATA_TYPES)),
            max_attached_buffers: to_c(Some(crate::config::MAX_ATTACHED_BUFFERS)),
            not_specified: NOT_SPECIFIED,
        }
    }
}

/// Status code returned by every C entry point
pub type DegasStatus = BufferStatus;

pub(crate) fn allocation_source_from_code(code: u32) -> Option<AllocationSource> {
    Some(match code {
        DEGAS_SOURCE_NO_ALLOCATION => AllocationSource::NoAllocation,
        DEGAS_SOURCE_OS_MEMORY => AllocationSource::OsMemory,
        DEGAS_SOURCE_DEVICE_MEMORY => AllocationSource::DeviceMemory,
        DEGAS_SOURCE_DEVICE_VIDEO_MEMORY => AllocationSource::DeviceVideoMemory,
        DEGAS_SOURCE_SUPPLIED_BLOCK => AllocationSource::SuppliedBlock,
        DEGAS_SOURCE_INDIVIDUAL_SUPPLIED_BLOCKS => AllocationSource::IndividualSuppliedBlocks,
        DEGAS_SOURCE_NAMED_DEVICE_PARTITION => AllocationSource::NamedDevicePartition,
        _ => return None,
    })
}

pub(crate) fn address_kind_from_code(code: u32) -> Option<AddressKind> {
    match code {
        DEGAS_ADDRESS_CACHED => Some(AddressKind::Cached),
        DEGAS_ADDRESS_UNCACHED => Some(AddressKind::Uncached),
        DEGAS_ADDRESS_PHYSICAL => Some(AddressKind::Physical),
        _ => None,
    }
}

/// `NOT_SPECIFIED` maps to `None`
pub(crate) fn optional(value: u32) -> Option<usize> {
    (value != NOT_SPECIFIED).then_some(value as usize)
}

fn to_c(value: Option<usize>) -> u32 {
    value
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(NOT_SPECIFIED)
}

impl DegasDescriptor {
    /// Convert to a Rust descriptor; `name` must already be decoded
    pub(crate) fn to_descriptor(&self, name: String) -> Result<BufferDataDescriptor, DegasStatus> {
        let source = allocation_source_from_code(self.allocation_source)
            .ok_or(BufferStatus::UnsupportedAllocationSource)?;

        Ok(BufferDataDescriptor {
            name,
            type_id: 0,
            kind: if self.is_meta_data {
                TypeKind::MetaData
            } else {
                TypeKind::BufferData
            },
            allocation_source: source,
            required_alignment: self.required_alignment,
            allocation_unit_size: self.allocation_unit_size,
            has_fixed_size: self.has_fixed_size,
            allocate_on_pool_creation: self.allocate_on_pool_creation,
            fixed_size: self.fixed_size,
        })
    }
}

impl From<&PoolUsage> for DegasPoolUsage {
    fn from(usage: &PoolUsage) -> Self {
        Self {
            buffers_in_pool: to_c(Some(usage.buffers_in_pool)),
            buffers_with_non_zero_reference_count: to_c(Some(
                usage.buffers_with_non_zero_reference_count,
            )),
            memory_in_pool: to_c(usage.memory_in_pool),
            memory_allocated: to_c(Some(usage.memory_allocated)),
            memory_in_use: to_c(Some(usage.memory_in_use)),
            largest_free_memory_block: to_c(usage.largest_free_memory_block),
        }
    }
}
