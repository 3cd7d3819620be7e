//! Buffer manager: type registry, pool factory and partitions

pub mod config;
pub(crate) mod context;
#[allow(clippy::module_inception)]
pub mod manager;
pub mod registry;

pub use config::ManagerConfig;
pub use manager::BufferManager;
pub use registry::TypeRegistry;
