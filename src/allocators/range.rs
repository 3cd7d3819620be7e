//! First-fit range allocator over a contiguous block
//!
//! Hands out byte ranges of a caller-supplied block or a mapped partition.
//! Free ranges are kept sorted by offset and coalesced on release, so
//! `largest_free_block` is always exact. Ranges are owned through
//! [`RangeLease`], which returns its extent when dropped.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{sync::lock, types::align_up};

/// A byte range inside an allocator's block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub offset: usize,
    pub size: usize,
}

impl Extent {
    pub fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Allocator managing ranges of a single block
#[derive(Debug)]
pub struct RangeAllocator {
    /// Address of offset 0, used to align absolute addresses
    base_address: usize,
    total_size: usize,
    free: Mutex<Vec<Extent>>,
    used: AtomicUsize,
}

impl RangeAllocator {
    /// Create an allocator over `total_size` bytes starting at `base_address`
    pub fn new(base_address: usize, total_size: usize) -> Self {
        let free = if total_size > 0 {
            vec![Extent::new(0, total_size)]
        } else {
            Vec::new()
        };

        Self {
            base_address,
            total_size,
            free: Mutex::new(free),
            used: AtomicUsize::new(0),
        }
    }

    /// Allocate `size` bytes whose absolute address is aligned to `align`.
    ///
    /// With `largest` set the request is a lower bound: the largest free
    /// range that can hold it is taken whole.
    pub fn allocate(&self, size: usize, align: usize, largest: bool) -> Option<Extent> {
        let align = align.max(1);
        let mut free = lock(&self.free);

        let fit = |extent: &Extent| -> Option<(usize, usize)> {
            let start = align_up(self.base_address + extent.offset, align)? - self.base_address;
            let padding = start - extent.offset;
            if padding >= extent.size {
                return None;
            }
            let available = extent.size - padding;
            (available >= size).then_some((start, available))
        };

        let candidates = free
            .iter()
            .enumerate()
            .filter_map(|(i, e)| fit(e).map(|(start, available)| (i, start, available)));

        let (index, start, available) = if largest {
            candidates.max_by_key(|&(_, _, available)| available)?
        } else {
            candidates.into_iter().next()?
        };

        let take = if largest { available } else { size };
        let region = free[index];
        let mut remainder = Vec::with_capacity(2);
        if start > region.offset {
            remainder.push(Extent::new(region.offset, start - region.offset));
        }
        if start + take < region.end() {
            remainder.push(Extent::new(start + take, region.end() - (start + take)));
        }
        free.splice(index..=index, remainder);

        self.used.fetch_add(take, Ordering::Relaxed);
        Some(Extent::new(start, take))
    }

    /// Return a range to the free list
    pub fn free(&self, extent: Extent) {
        if extent.size == 0 {
            return;
        }

        let mut free = lock(&self.free);
        let index = free.partition_point(|e| e.offset < extent.offset);
        free.insert(index, extent);

        // Coalesce with the following range, then the preceding one
        if index + 1 < free.len() && free[index].end() == free[index + 1].offset {
            free[index].size += free[index + 1].size;
            free.remove(index + 1);
        }
        if index > 0 && free[index - 1].end() == free[index].offset {
            free[index - 1].size += free[index].size;
            free.remove(index);
        }

        self.used.fetch_sub(extent.size, Ordering::Relaxed);
    }

    /// Grow `extent` into the free range touching it above or below
    pub fn extend(&self, extent: Extent, upwards: bool) -> Option<Extent> {
        let mut free = lock(&self.free);

        let index = if upwards {
            free.iter().position(|e| e.offset == extent.end())?
        } else {
            free.iter().position(|e| e.end() == extent.offset)?
        };

        let neighbour = free.remove(index);
        self.used.fetch_add(neighbour.size, Ordering::Relaxed);

        Some(if upwards {
            Extent::new(extent.offset, extent.size + neighbour.size)
        } else {
            Extent::new(neighbour.offset, extent.size + neighbour.size)
        })
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn used_size(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn available_size(&self) -> usize {
        self.total_size - self.used_size()
    }

    pub fn base_address(&self) -> usize {
        self.base_address
    }

    /// Size of the largest contiguous free range
    pub fn largest_free_block(&self) -> usize {
        lock(&self.free).iter().map(|e| e.size).max().unwrap_or(0)
    }

    /// Number of disjoint free ranges
    pub fn fragment_count(&self) -> usize {
        lock(&self.free).len()
    }
}

/// Ownership of one range; the range is freed when the lease drops
#[derive(Debug)]
pub struct RangeLease {
    allocator: Arc<RangeAllocator>,
    extent: Extent,
}

impl RangeLease {
    /// Allocate a new range from `allocator`
    pub fn allocate(
        allocator: &Arc<RangeAllocator>,
        size: usize,
        align: usize,
        largest: bool,
    ) -> Option<Self> {
        let extent = allocator.allocate(size, align, largest)?;
        Some(Self {
            allocator: Arc::clone(allocator),
            extent,
        })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn offset(&self) -> usize {
        self.extent.offset
    }

    pub fn size(&self) -> usize {
        self.extent.size
    }

    /// Keep the first `new_size` bytes and free the rest
    pub fn shrink(&mut self, new_size: usize) {
        if new_size >= self.extent.size {
            return;
        }
        let tail = Extent::new(self.extent.offset + new_size, self.extent.size - new_size);
        self.extent.size = new_size;
        self.allocator.free(tail);
    }

    /// Absorb the adjacent free range; false if there is none
    pub fn extend(&mut self, upwards: bool) -> bool {
        match self.allocator.extend(self.extent, upwards) {
            Some(extent) => {
                self.extent = extent;
                true
            }
            None => false,
        }
    }

    /// Split at `at`: this lease keeps `[0, at)` and the returned lease owns the rest
    pub fn split_off(&mut self, at: usize) -> RangeLease {
        let at = at.min(self.extent.size);
        let tail = Extent::new(self.extent.offset + at, self.extent.size - at);
        self.extent.size = at;
        RangeLease {
            allocator: Arc::clone(&self.allocator),
            extent: tail,
        }
    }

    pub fn allocator(&self) -> &Arc<RangeAllocator> {
        &self.allocator
    }
}

impl Drop for RangeLease {
    fn drop(&mut self) {
        self.allocator.free(self.extent);
    }
}
