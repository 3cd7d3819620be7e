//! FFI functions for individual buffers

use crate::{
    buffers::{Buffer, MetaDataSpec},
    error::BufferStatus,
    types::OwnerId,
};

use super::{
    types::{
        address_kind_from_code, optional, DegasBufferHandle, DegasDataReference, DegasOwnerId,
        DegasStatus, DegasTypeId,
    },
    utils::{handle_id, registry},
};

fn with_buffer(handle: DegasBufferHandle, f: impl FnOnce(&Buffer) -> DegasStatus) -> DegasStatus {
    // Cloned out so no buffer operation runs under the registry lock
    let buffer = registry().get_buffer(handle_id(handle));
    match buffer {
        Some(buffer) => f(&buffer),
        None => BufferStatus::NotInUse,
    }
}

/// Take one more reference for `owner`
#[no_mangle]
pub extern "C" fn degas_buffer_increment_reference_count(
    buffer: DegasBufferHandle,
    owner: DegasOwnerId,
) -> DegasStatus {
    with_buffer(buffer, |b| BufferStatus::from(&b.increment_reference_count(OwnerId(owner))))
}

/// Drop one reference of `owner`; `remaining` receives the aggregate count
#[no_mangle]
pub extern "C" fn degas_buffer_decrement_reference_count(
    buffer: DegasBufferHandle,
    owner: DegasOwnerId,
    remaining: *mut u32,
) -> DegasStatus {
    with_buffer(buffer, |b| match b.decrement_reference_count(OwnerId(owner)) {
        Ok(count) => {
            if !remaining.is_null() {
                unsafe {
                    *remaining = count;
                }
            }
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    })
}

/// Move one reference from `from` to `to`
#[no_mangle]
pub extern "C" fn degas_buffer_transfer_ownership(
    buffer: DegasBufferHandle,
    from: DegasOwnerId,
    to: DegasOwnerId,
) -> DegasStatus {
    with_buffer(buffer, |b| {
        BufferStatus::from(&b.transfer_ownership(OwnerId(from), OwnerId(to)))
    })
}

/// Record how many bytes of the payload are valid
#[no_mangle]
pub extern "C" fn degas_buffer_set_used_data_size(buffer: DegasBufferHandle, size: usize) -> DegasStatus {
    with_buffer(buffer, |b| BufferStatus::from(&b.set_used_data_size(size)))
}

/// Fill `reference` with the payload view of `address_kind`
#[no_mangle]
pub extern "C" fn degas_buffer_obtain_data_reference(
    buffer: DegasBufferHandle,
    address_kind: u32,
    reference: *mut DegasDataReference,
) -> DegasStatus {
    if reference.is_null() {
        return BufferStatus::Error;
    }
    let Some(kind) = address_kind_from_code(address_kind) else {
        return BufferStatus::Error;
    };

    with_buffer(buffer, |b| match b.obtain_data_reference(kind) {
        Ok(data) => {
            unsafe {
                *reference = DegasDataReference {
                    block_size: data.block_size,
                    used_size: data.used_size,
                    address: data.address,
                };
            }
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    })
}

/// Attach a heap or partition backed metadata block
#[no_mangle]
pub extern "C" fn degas_buffer_attach_meta_data(
    buffer: DegasBufferHandle,
    type_id: DegasTypeId,
    size: u32,
) -> DegasStatus {
    let mut spec = MetaDataSpec::new();
    if let Some(size) = optional(size) {
        spec = spec.with_size(size);
    }
    with_buffer(buffer, |b| BufferStatus::from(&b.attach_meta_data(type_id, spec)))
}

/// Cached address and size of an attached metadata block
#[no_mangle]
pub extern "C" fn degas_buffer_obtain_meta_data_reference(
    buffer: DegasBufferHandle,
    type_id: DegasTypeId,
    address: *mut usize,
    size: *mut usize,
) -> DegasStatus {
    if address.is_null() {
        return BufferStatus::Error;
    }

    with_buffer(buffer, |b| match b.obtain_meta_data_reference(type_id) {
        Ok(reference) => {
            let Some(pointer) = reference.as_ptr() else {
                return BufferStatus::Error;
            };
            unsafe {
                *address = pointer as usize;
                if !size.is_null() {
                    *size = reference.size;
                }
            }
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    })
}
