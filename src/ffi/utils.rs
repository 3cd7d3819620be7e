//! FFI utilities and handle management

use std::{
    collections::HashMap,
    ffi::{c_char, c_void, CStr, CString},
    sync::{Arc, Mutex},
};

use crate::{
    buffers::{Buffer, BufferPool},
    manager::BufferManager,
};

// Global handle management
lazy_static::lazy_static! {
    pub static ref HANDLE_REGISTRY: Mutex<HandleRegistry> = Mutex::new(HandleRegistry::new());
}

/// Maps opaque C handles onto Rust objects.
///
/// Handles are small integers cast to pointers; zero is never issued.
pub struct HandleRegistry {
    pub managers: HashMap<usize, Arc<BufferManager>>,
    pub pools: HashMap<usize, (usize, BufferPool)>,
    pub buffers: HashMap<usize, Buffer>,
    pub next_id: usize,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            managers: HashMap::new(),
            pools: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn store_manager(&mut self, manager: Arc<BufferManager>) -> usize {
        let id = self.allocate_id();
        self.managers.insert(id, manager);
        id
    }

    pub fn get_manager(&self, id: usize) -> Option<Arc<BufferManager>> {
        self.managers.get(&id).cloned()
    }

    /// Remove a manager together with the pool handles created through it
    pub fn remove_manager(&mut self, id: usize) -> Option<Arc<BufferManager>> {
        let manager = self.managers.remove(&id)?;
        self.pools.retain(|_, (owner, _)| *owner != id);
        Some(manager)
    }

    pub fn store_pool(&mut self, manager_id: usize, pool: BufferPool) -> usize {
        let id = self.allocate_id();
        self.pools.insert(id, (manager_id, pool));
        id
    }

    pub fn get_pool(&self, id: usize) -> Option<(usize, BufferPool)> {
        self.pools.get(&id).cloned()
    }

    pub fn store_buffer(&mut self, buffer: Buffer) -> usize {
        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        id
    }

    pub fn get_buffer(&self, id: usize) -> Option<Buffer> {
        self.buffers.get(&id).cloned()
    }
}

/// Lock the global registry, recovering from poisoning
pub(crate) fn registry() -> std::sync::MutexGuard<'static, HandleRegistry> {
    crate::sync::lock(&HANDLE_REGISTRY)
}

pub(crate) fn handle_id(handle: *mut c_void) -> usize {
    handle as usize
}

pub(crate) fn to_handle(id: usize) -> *mut c_void {
    id as *mut c_void
}

/// Convert C string to Rust String
pub fn c_str_to_string(c_str: *const c_char) -> Result<String, std::str::Utf8Error> {
    if c_str.is_null() {
        return Ok(String::new());
    }

    unsafe { CStr::from_ptr(c_str).to_str().map(|s| s.to_owned()) }
}

/// Convert Rust String to C string (caller must free with degas_free_string)
pub fn string_to_c_str(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a C string allocated by this library
#[no_mangle]
pub extern "C" fn degas_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
