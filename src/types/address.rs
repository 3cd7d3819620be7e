//! Address views and caller-supplied memory

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::allocators::HeapBlock;
use crate::error::Result;

/// Which view of a block an address refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    /// CPU view through the cache
    Cached,
    /// CPU view bypassing the cache
    Uncached,
    /// Bus address seen by devices
    Physical,
}

impl AddressKind {
    pub const ALL: [AddressKind; 3] = [AddressKind::Cached, AddressKind::Uncached, AddressKind::Physical];

    fn slot(&self) -> usize {
        match self {
            AddressKind::Cached => 0,
            AddressKind::Uncached => 1,
            AddressKind::Physical => 2,
        }
    }
}

/// Up to three views of the same block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSet([Option<usize>; 3]);

impl AddressSet {
    /// A set with only the cached view
    pub fn cached(address: usize) -> Self {
        Self([Some(address), None, None])
    }

    /// A full triplet
    pub fn triplet(cached: Option<usize>, uncached: Option<usize>, physical: Option<usize>) -> Self {
        Self([cached, uncached, physical])
    }

    /// A set with a single view of the given kind
    pub fn single(kind: AddressKind, address: usize) -> Self {
        let mut set = Self::default();
        set.0[kind.slot()] = Some(address);
        set
    }

    pub fn get(&self, kind: AddressKind) -> Option<usize> {
        self.0[kind.slot()]
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Every present view moved forward by `offset` bytes
    pub fn offset(&self, offset: usize) -> Self {
        Self(self.0.map(|a| a.map(|a| a + offset)))
    }
}

/// Memory handed to a pool or metadata slot by the caller
#[derive(Debug, Clone)]
pub struct SuppliedMemory {
    addresses: AddressSet,
    size: usize,
    keepalive: Option<Arc<HeapBlock>>,
}

impl SuppliedMemory {
    /// Wrap caller-owned memory.
    ///
    /// # Safety
    /// The cached (and uncached, if given) address must be valid for reads and
    /// writes of `size` bytes for as long as any pool or buffer uses it.
    pub unsafe fn from_raw(addresses: AddressSet, size: usize) -> Self {
        Self {
            addresses,
            size,
            keepalive: None,
        }
    }

    /// Allocate zeroed heap memory that lives as long as the last user
    pub fn owned(size: usize, alignment: usize) -> Result<Self> {
        let block = Arc::new(HeapBlock::allocate(size, alignment)?);
        Ok(Self {
            addresses: AddressSet::cached(block.address()),
            size,
            keepalive: Some(block),
        })
    }

    pub fn addresses(&self) -> AddressSet {
        self.addresses
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// A sub-range of this memory sharing its lifetime
    pub(crate) fn slice(&self, offset: usize, size: usize) -> Self {
        Self {
            addresses: self.addresses.offset(offset),
            size,
            keepalive: self.keepalive.clone(),
        }
    }

    pub(crate) fn keepalive(&self) -> Option<Arc<HeapBlock>> {
        self.keepalive.clone()
    }
}
