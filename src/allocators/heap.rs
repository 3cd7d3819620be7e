//! Aligned, zeroed heap blocks

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

use crate::error::{BufferError, MemoryShortfall, Result};

/// An owned, zero-initialised heap allocation freed on drop
#[derive(Debug)]
pub struct HeapBlock {
    ptr: NonNull<u8>,
    layout: Layout,
    size: usize,
}

impl HeapBlock {
    /// Allocate `size` zeroed bytes aligned to `align`
    pub fn allocate(size: usize, align: usize) -> Result<Self> {
        Self::allocate_for(MemoryShortfall::General, size, align)
    }

    /// Allocate, reporting exhaustion against the given allocation kind
    pub fn allocate_for(kind: MemoryShortfall, size: usize, align: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size.max(1), align.max(1))
            .map_err(|_| BufferError::insufficient_memory(kind, size))?;

        // SAFETY: layout has a non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| BufferError::insufficient_memory(kind, size))?;

        Ok(Self { ptr, layout, size })
    }

    /// Start address of the block
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Requested size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// The block is plain bytes owned exclusively by this value
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}
