//! FFI functions for the manager and the type registry

use std::{ffi::c_char, sync::Arc};

use crate::{error::BufferStatus, manager::BufferManager};

use super::{
    types::{DegasDescriptor, DegasManagerHandle, DegasStatus, DegasTypeId, DegasVersion},
    utils::{c_str_to_string, handle_id, registry, string_to_c_str, to_handle},
};

/// Fill in the library version and the engine's fixed limits
#[no_mangle]
pub extern "C" fn degas_version(version: *mut DegasVersion) -> DegasStatus {
    if version.is_null() {
        return BufferStatus::Error;
    }

    unsafe {
        *version = DegasVersion::current();
    }
    BufferStatus::NoError
}

/// Printable version, released with `degas_free_string`
#[no_mangle]
pub extern "C" fn degas_version_string() -> *mut c_char {
    string_to_c_str(format!("degas {}", crate::VERSION))
}

/// Create a buffer manager with default configuration
#[no_mangle]
pub extern "C" fn degas_manager_create(manager_handle: *mut DegasManagerHandle) -> DegasStatus {
    if manager_handle.is_null() {
        return BufferStatus::Error;
    }

    let id = registry().store_manager(Arc::new(BufferManager::default()));
    unsafe {
        *manager_handle = to_handle(id);
    }
    BufferStatus::NoError
}

/// Destroy a manager handle and the pool handles created through it
#[no_mangle]
pub extern "C" fn degas_manager_destroy(manager: DegasManagerHandle) -> DegasStatus {
    match registry().remove_manager(handle_id(manager)) {
        Some(_) => BufferStatus::NoError,
        None => BufferStatus::Error,
    }
}

/// Register a type and return its id
#[no_mangle]
pub extern "C" fn degas_type_create(
    manager: DegasManagerHandle,
    descriptor: *const DegasDescriptor,
    type_id: *mut DegasTypeId,
) -> DegasStatus {
    if descriptor.is_null() || type_id.is_null() {
        return BufferStatus::Error;
    }

    let Some(manager) = registry().get_manager(handle_id(manager)) else {
        return BufferStatus::Error;
    };

    let descriptor = unsafe { &*descriptor };
    let name = match c_str_to_string(descriptor.name) {
        Ok(name) => name,
        Err(_) => return BufferStatus::InvalidDescriptor,
    };
    let descriptor = match descriptor.to_descriptor(name) {
        Ok(descriptor) => descriptor,
        Err(status) => return status,
    };

    match manager.create_buffer_data_type(&descriptor) {
        Ok(id) => {
            unsafe {
                *type_id = id;
            }
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    }
}

fn find_type(
    manager: DegasManagerHandle,
    name: *const c_char,
    type_id: *mut DegasTypeId,
    meta_data: bool,
) -> DegasStatus {
    if name.is_null() || type_id.is_null() {
        return BufferStatus::Error;
    }

    let Some(manager) = registry().get_manager(handle_id(manager)) else {
        return BufferStatus::Error;
    };
    let Ok(name) = c_str_to_string(name) else {
        return BufferStatus::Error;
    };

    let found = if meta_data {
        manager.find_meta_data_type(&name)
    } else {
        manager.find_buffer_data_type(&name)
    };

    match found {
        Ok(id) => {
            unsafe {
                *type_id = id;
            }
            BufferStatus::NoError
        }
        Err(e) => e.status(),
    }
}

/// Find a buffer data type by name
#[no_mangle]
pub extern "C" fn degas_type_find(
    manager: DegasManagerHandle,
    name: *const c_char,
    type_id: *mut DegasTypeId,
) -> DegasStatus {
    find_type(manager, name, type_id, false)
}

/// Find a metadata type by name
#[no_mangle]
pub extern "C" fn degas_meta_data_type_find(
    manager: DegasManagerHandle,
    name: *const c_char,
    type_id: *mut DegasTypeId,
) -> DegasStatus {
    find_type(manager, name, type_id, true)
}
