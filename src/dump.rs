//! Diagnostic dumps and the relay export hook

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{error::Result, sync::lock};

bitflags! {
    /// Sections included in a manager dump
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DumpFlags: u32 {
        /// Registered buffer data types
        const TYPES = 1 << 0;
        /// Registered metadata types
        const META_DATA_TYPES = 1 << 1;
        /// One line per pool
        const LIST_POOLS = 1 << 2;
        /// Pool usage and counters
        const POOL_STATES = 1 << 3;
        /// Every buffer of every pool
        const BUFFER_STATES = 1 << 4;
    }
}

/// One exported diagnostic record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    /// Source identifier chosen by the caller
    pub id: u32,
    /// Tag describing the payload layout
    pub type_tag: u32,
    /// Microseconds since the Unix epoch
    pub timestamp_us: u64,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl RelayRecord {
    pub fn new(id: u32, type_tag: u32, payload: Vec<u8>) -> Self {
        let timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        Self {
            id,
            type_tag,
            timestamp_us,
            payload,
        }
    }

    /// Serialize with bincode
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Destination for encoded relay records.
///
/// Called from buffer and pool paths, so implementations must not block.
pub trait RelaySink: Send + Sync {
    fn write_record(&self, encoded: &[u8]) -> Result<()>;
}

/// Bounded in-memory sink that drops the oldest record when full
#[derive(Debug)]
pub struct MemoryRelaySink {
    records: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
}

impl MemoryRelaySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Decode every retained record, oldest first
    pub fn records(&self) -> Result<Vec<RelayRecord>> {
        lock(&self.records)
            .iter()
            .map(|bytes| RelayRecord::decode(bytes))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RelaySink for MemoryRelaySink {
    fn write_record(&self, encoded: &[u8]) -> Result<()> {
        let mut records = lock(&self.records);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(encoded.to_vec());
        Ok(())
    }
}

/// Encode and emit a record, logging rather than returning failures
pub(crate) fn emit(sink: &dyn RelaySink, id: u32, type_tag: u32, payload: Vec<u8>) {
    let record = RelayRecord::new(id, type_tag, payload);
    match record.encode() {
        Ok(encoded) => {
            if let Err(e) = sink.write_record(&encoded) {
                log::warn!("relay sink rejected record {}/{}: {}", id, type_tag, e);
            }
        }
        Err(e) => log::warn!("failed to encode relay record {}/{}: {}", id, type_tag, e),
    }
}
