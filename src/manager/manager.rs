//! The buffer manager: owns the type registry, the partitions and every pool

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, RwLock,
    },
};

use serde::Serialize;

use crate::{
    buffers::{BufferPool, PoolConfig, PoolId},
    dump::{DumpFlags, RelaySink},
    error::{BufferError, Result},
    memory::{DevicePartition, PartitionConfig, PartitionStats},
    sync::{read, write},
    types::{BufferDataDescriptor, TypeId, TypeKind},
};

use super::{config::ManagerConfig, context::ManagerContext, registry::TypeRegistry};

/// Entry point of the engine.
///
/// Types are registered once and never removed. Pools are created and
/// destroyed through the manager, which keeps them alive until then.
pub struct BufferManager {
    context: Arc<ManagerContext>,
    pools: RwLock<HashMap<PoolId, BufferPool>>,
    next_pool_id: AtomicU32,
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::with_context(ManagerConfig::default())
    }
}

impl BufferManager {
    /// Create a manager with the given configuration
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_context(config))
    }

    fn with_context(config: ManagerConfig) -> Self {
        log::debug!("creating buffer manager '{}'", config.name);
        Self {
            context: Arc::new(ManagerContext::new(config)),
            pools: RwLock::new(HashMap::new()),
            next_pool_id: AtomicU32::new(1),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.context.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.context.registry
    }

    /// Register a buffer data or metadata type
    pub fn create_buffer_data_type(&self, descriptor: &BufferDataDescriptor) -> Result<TypeId> {
        self.context.registry.register(descriptor)
    }

    pub fn find_buffer_data_type(&self, name: &str) -> Result<TypeId> {
        self.context.registry.find(name, TypeKind::BufferData)
    }

    pub fn find_meta_data_type(&self, name: &str) -> Result<TypeId> {
        self.context.registry.find(name, TypeKind::MetaData)
    }

    /// Descriptor of a registered type, which must be of `kind`
    pub fn get_descriptor(&self, type_id: TypeId, kind: TypeKind) -> Result<Arc<BufferDataDescriptor>> {
        self.context.registry.get(type_id, kind)
    }

    /// Create a pool of buffers of `config.type_id`
    pub fn create_pool(&self, config: PoolConfig) -> Result<BufferPool> {
        let descriptor = self.context.registry.get(config.type_id, TypeKind::BufferData)?;
        let id = PoolId(self.next_pool_id.fetch_add(1, Ordering::SeqCst));

        let pool = BufferPool::create(id, Arc::clone(&self.context), descriptor, config)?;
        write(&self.pools).insert(id, pool.clone());

        Ok(pool)
    }

    /// Destroy a pool; all of its buffers must be unreferenced
    pub fn destroy_pool(&self, pool: &BufferPool) -> Result<()> {
        let mut pools = write(&self.pools);

        match pools.get(&pool.id()) {
            Some(owned) if owned.same_pool(pool) => {}
            _ => {
                return Err(BufferError::pool_not_found(format!(
                    "{} is not owned by manager '{}'",
                    pool.id(),
                    self.context.config.name
                )))
            }
        }

        pool.tear_down()?;
        pools.remove(&pool.id());
        Ok(())
    }

    /// Every live pool, ordered by id
    pub fn pools(&self) -> Vec<BufferPool> {
        let mut pools: Vec<BufferPool> = read(&self.pools).values().cloned().collect();
        pools.sort_by_key(BufferPool::id);
        pools
    }

    pub fn get_pool(&self, id: PoolId) -> Result<BufferPool> {
        read(&self.pools)
            .get(&id)
            .cloned()
            .ok_or_else(|| BufferError::pool_not_found(format!("{} does not exist", id)))
    }

    /// Map and register a named device partition
    pub fn create_partition(&self, config: PartitionConfig) -> Result<Arc<DevicePartition>> {
        self.context.partitions.create(config)
    }

    /// Unregister a partition; memory already handed out stays mapped
    pub fn remove_partition(&self, name: &str) -> Result<()> {
        self.context.partitions.remove(name)
    }

    pub fn partition_names(&self) -> Vec<String> {
        self.context.partitions.names()
    }

    pub fn partition_stats(&self) -> Vec<PartitionStats> {
        self.context.partitions.stats()
    }

    /// Install or remove the diagnostic relay sink
    pub fn set_relay_sink(&self, sink: Option<Arc<dyn RelaySink>>) {
        self.context.set_relay_sink(sink);
    }

    /// Export a structured record through the relay sink.
    ///
    /// Parameters that fail to encode are logged and dropped.
    pub fn dump_to_relay<T: Serialize>(&self, id: u32, type_tag: u32, params: &T) {
        match bincode::serialize(params) {
            Ok(payload) => self.context.relay(id, type_tag, payload),
            Err(e) => log::warn!("failed to encode relay parameters {}/{}: {}", id, type_tag, e),
        }
    }

    /// Log the selected sections at info level
    pub fn dump(&self, flags: DumpFlags) {
        let mut out = String::new();
        if self.dump_to(flags, &mut out).is_ok() {
            for line in out.lines() {
                log::info!("{}", line);
            }
        }
    }

    pub fn dump_to(&self, flags: DumpFlags, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(out, "buffer manager '{}'", self.context.config.name)?;

        for (flag, kind) in [
            (DumpFlags::TYPES, TypeKind::BufferData),
            (DumpFlags::META_DATA_TYPES, TypeKind::MetaData),
        ] {
            if !flags.contains(flag) {
                continue;
            }
            writeln!(out, "{} types:", kind.name())?;
            for descriptor in self.context.registry.descriptors() {
                if descriptor.kind != kind {
                    continue;
                }
                writeln!(
                    out,
                    "  {:#x} '{}' {} align {} unit {} fixed {} eager {}",
                    descriptor.type_id,
                    descriptor.name,
                    descriptor.allocation_source.name(),
                    descriptor.alignment(),
                    descriptor.allocation_unit(),
                    if descriptor.has_fixed_size {
                        descriptor.fixed_size.to_string()
                    } else {
                        "-".to_string()
                    },
                    descriptor.allocate_on_pool_creation
                )?;
            }
        }

        if flags.intersects(DumpFlags::LIST_POOLS | DumpFlags::POOL_STATES | DumpFlags::BUFFER_STATES) {
            for pool in self.pools() {
                pool.dump_to(flags, out)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManager")
            .field("name", &self.context.config.name)
            .field("types", &self.context.registry.len())
            .field("pools", &read(&self.pools).len())
            .finish()
    }
}
