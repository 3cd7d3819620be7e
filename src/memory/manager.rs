//! Registry of named device partitions

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    error::{BufferError, Result},
    sync::{read, write},
};

use super::{
    config::PartitionConfig,
    partition::{DevicePartition, PartitionStats},
};

/// Table of named partitions owned by a buffer manager
#[derive(Debug, Default)]
pub struct PartitionTable {
    partitions: RwLock<HashMap<String, Arc<DevicePartition>>>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map and register a new partition
    pub fn create(&self, config: PartitionConfig) -> Result<Arc<DevicePartition>> {
        if self.contains(&config.name) {
            return Err(BufferError::incompatible_parameters(format!(
                "Partition '{}' already exists",
                config.name
            )));
        }

        let partition = Arc::new(DevicePartition::new(&config)?);

        let mut partitions = write(&self.partitions);
        partitions.insert(config.name.clone(), Arc::clone(&partition));
        log::debug!("created partition '{}' ({} bytes)", config.name, partition.size());

        Ok(partition)
    }

    /// Look up a partition by name
    pub fn get(&self, name: &str) -> Result<Arc<DevicePartition>> {
        let partitions = read(&self.partitions);
        partitions.get(name).cloned().ok_or_else(|| {
            BufferError::incompatible_parameters(format!("Partition '{}' not found", name))
        })
    }

    /// Unregister a partition; blocks already leased keep it mapped
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut partitions = write(&self.partitions);
        partitions.remove(name).map(|_| ()).ok_or_else(|| {
            BufferError::incompatible_parameters(format!("Partition '{}' not found", name))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        let partitions = read(&self.partitions);
        partitions.contains_key(name)
    }

    /// Names of all partitions, sorted
    pub fn names(&self) -> Vec<String> {
        let partitions = read(&self.partitions);
        let mut names: Vec<String> = partitions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> Vec<PartitionStats> {
        let partitions = read(&self.partitions);
        partitions.values().map(|p| p.stats()).collect()
    }
}
