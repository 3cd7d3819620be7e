//! Device partitions: named mapped regions with range allocation

pub mod config;
pub mod manager;
pub mod partition;
pub mod regions;

pub use config::{BackingType, PartitionConfig};
pub use manager::PartitionTable;
pub use partition::{DevicePartition, PartitionBlock, PartitionStats};
pub use regions::MappedRegion;
