//! FFI functions for buffer pools

use crate::{
    buffers::{Capacity, GetBufferRequest, PoolConfig, PoolMetaDataSpec},
    error::BufferStatus,
    types::OwnerId,
};

use super::{
    types::{
        optional, DegasBufferHandle, DegasManagerHandle, DegasOwnerId, DegasPoolHandle,
        DegasPoolUsage, DegasStatus, DegasTypeId,
    },
    utils::{handle_id, registry, to_handle},
};

/// Create a pool; `buffer_count` of `NOT_SPECIFIED` makes it unrestricted
#[no_mangle]
pub extern "C" fn degas_pool_create(
    manager: DegasManagerHandle,
    type_id: DegasTypeId,
    buffer_count: u32,
    size: u32,
    pool_handle: *mut DegasPoolHandle,
) -> DegasStatus {
    if pool_handle.is_null() {
        return BufferStatus::Error;
    }

    let manager_id = handle_id(manager);
    let Some(manager) = registry().get_manager(manager_id) else {
        return BufferStatus::Error;
    };

    let mut config = PoolConfig::new(type_id).with_capacity(match optional(buffer_count) {
        Some(count) => Capacity::Fixed(count),
        None => Capacity::Unrestricted,
    });
    if let Some(size) = optional(size) {
        config = config.with_size(size);
    }

    match manager.create_pool(config) {
        Ok(pool) => {
            let id = registry().store_pool(manager_id, pool);
            unsafe {
                *pool_handle = to_handle(id);
            }
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    }
}

/// Destroy a pool; fails while any of its buffers is referenced
#[no_mangle]
pub extern "C" fn degas_pool_destroy(pool: DegasPoolHandle) -> DegasStatus {
    let pool_id = handle_id(pool);
    let (manager, pool) = {
        let registry = registry();
        let Some((manager_id, pool)) = registry.get_pool(pool_id) else {
            return BufferStatus::PoolNotFound;
        };
        let Some(manager) = registry.get_manager(manager_id) else {
            return BufferStatus::PoolNotFound;
        };
        (manager, pool)
    };

    match manager.destroy_pool(&pool) {
        Ok(()) => {
            let mut registry = registry();
            registry.pools.remove(&pool_id);
            registry.buffers.retain(|_, buffer| !buffer.belongs_to(&pool));
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    }
}

/// Acquire a buffer; `required_size` of `NOT_SPECIFIED` uses the pool default
#[no_mangle]
pub extern "C" fn degas_buffer_get(
    pool: DegasPoolHandle,
    owner: DegasOwnerId,
    required_size: u32,
    non_blocking: bool,
    buffer_handle: *mut DegasBufferHandle,
) -> DegasStatus {
    if buffer_handle.is_null() {
        return BufferStatus::Error;
    }

    let Some((_, pool)) = registry().get_pool(handle_id(pool)) else {
        return BufferStatus::PoolNotFound;
    };

    let mut request = GetBufferRequest::new(OwnerId(owner));
    if let Some(size) = optional(required_size) {
        request = request.with_size(size);
    }
    if non_blocking {
        request = request.non_blocking();
    }

    // The registry lock is not held while blocking
    match pool.get_buffer(request) {
        Ok(buffer) => {
            let id = registry().store_buffer(buffer);
            unsafe {
                *buffer_handle = to_handle(id);
            }
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    }
}

/// Return an unreferenced buffer to its pool and invalidate the handle
#[no_mangle]
pub extern "C" fn degas_buffer_release(pool: DegasPoolHandle, buffer: DegasBufferHandle) -> DegasStatus {
    let buffer_id = handle_id(buffer);
    let (pool, buffer) = {
        let registry = registry();
        let Some((_, pool)) = registry.get_pool(handle_id(pool)) else {
            return BufferStatus::PoolNotFound;
        };
        let Some(buffer) = registry.get_buffer(buffer_id) else {
            return BufferStatus::NotInUse;
        };
        (pool, buffer)
    };

    match pool.release_buffer(&buffer) {
        Ok(()) => {
            registry().buffers.remove(&buffer_id);
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    }
}

/// Abort every call currently blocked in `degas_buffer_get` on this pool
#[no_mangle]
pub extern "C" fn degas_pool_abort_blocking_get(pool: DegasPoolHandle) -> DegasStatus {
    match registry().get_pool(handle_id(pool)) {
        Some((_, pool)) => {
            pool.abort_blocking_get_buffer();
            BufferStatus::NoError
        }
        None => BufferStatus::PoolNotFound,
    }
}

/// Fill `usage` with the pool's usage figures
#[no_mangle]
pub extern "C" fn degas_pool_usage(pool: DegasPoolHandle, usage: *mut DegasPoolUsage) -> DegasStatus {
    if usage.is_null() {
        return BufferStatus::Error;
    }

    let Some((_, pool)) = registry().get_pool(handle_id(pool)) else {
        return BufferStatus::PoolNotFound;
    };

    let figures = DegasPoolUsage::from(&pool.get_pool_usage());
    unsafe {
        *usage = figures;
    }
    BufferStatus::NoError
}

/// Attach a heap or partition backed metadata type to every buffer of the pool
#[no_mangle]
pub extern "C" fn degas_pool_attach_meta_data(
    pool: DegasPoolHandle,
    type_id: DegasTypeId,
    size: u32,
) -> DegasStatus {
    let Some((_, pool)) = registry().get_pool(handle_id(pool)) else {
        return BufferStatus::PoolNotFound;
    };

    let mut spec = PoolMetaDataSpec::new();
    if let Some(size) = optional(size) {
        spec = spec.with_size(size);
    }

    BufferStatus::from(&pool.attach_meta_data(type_id, spec))
}
