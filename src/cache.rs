//! Cache maintenance hook for payload blocks
//!
//! Buffers shared with devices may need their CPU cache lines written back
//! before a device reads them, or invalidated before the CPU reads what a
//! device wrote. The engine itself never touches caches; it forwards
//! `flush_cache`/`purge_cache` to the hook configured on the manager.

use std::fmt;

use crate::{error::Result, types::AddressSet};

/// Platform cache operations over a block
pub trait CacheMaintenance: Send + Sync + fmt::Debug {
    /// Write back dirty lines covering the block
    fn flush(&self, addresses: AddressSet, size: usize) -> Result<()> {
        let _ = (addresses, size);
        Ok(())
    }

    /// Invalidate lines covering the block
    fn purge(&self, addresses: AddressSet, size: usize) -> Result<()> {
        let _ = (addresses, size);
        Ok(())
    }
}

/// Coherent memory: nothing to do
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCacheMaintenance;

impl CacheMaintenance for NoCacheMaintenance {}
