//! State shared between a manager, its pools and their buffers

use std::sync::{Arc, RwLock};

use crate::{
    dump::{self, RelaySink},
    error::{BufferError, Result},
    memory::{DevicePartition, PartitionTable},
    sync::{read, write},
    types::AllocationSource,
};

use super::{config::ManagerConfig, registry::TypeRegistry};

pub(crate) struct ManagerContext {
    pub(crate) registry: TypeRegistry,
    pub(crate) partitions: PartitionTable,
    pub(crate) config: ManagerConfig,
    relay: RwLock<Option<Arc<dyn RelaySink>>>,
}

impl ManagerContext {
    pub(crate) fn new(config: ManagerConfig) -> Self {
        Self {
            registry: TypeRegistry::new(),
            partitions: PartitionTable::new(),
            config,
            relay: RwLock::new(None),
        }
    }

    /// Partition serving `source`, honouring an explicit name
    pub(crate) fn resolve_partition(
        &self,
        source: AllocationSource,
        name: Option<&str>,
    ) -> Result<Arc<DevicePartition>> {
        let default = match source {
            AllocationSource::DeviceMemory => self.config.device_partition.as_deref(),
            AllocationSource::DeviceVideoMemory => self.config.video_partition.as_deref(),
            _ => None,
        };

        let name = name.or(default).ok_or_else(|| {
            BufferError::incompatible_parameters(format!(
                "No partition configured for {}",
                source.name()
            ))
        })?;

        self.partitions.get(name)
    }

    pub(crate) fn set_relay_sink(&self, sink: Option<Arc<dyn RelaySink>>) {
        *write(&self.relay) = sink;
    }

    pub(crate) fn has_relay_sink(&self) -> bool {
        read(&self.relay).is_some()
    }

    /// Send a record to the sink, if one is installed
    pub(crate) fn relay(&self, id: u32, type_tag: u32, payload: Vec<u8>) {
        let sink = read(&self.relay).clone();
        match sink {
            Some(sink) => dump::emit(sink.as_ref(), id, type_tag, payload),
            None => log::trace!("no relay sink installed, dropping record {}/{}", id, type_tag),
        }
    }
}
