//! Buffer payload, metadata, links and reference counting

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use degas::{
    AddressKind, AddressSet, AllocationSource, BufferDataDescriptor, BufferError, BufferManager,
    BufferPool, CacheMaintenance, DumpFlags, GetBufferRequest, ManagerConfig, MemoryRelaySink,
    MetaDataSpec, OwnerId, PoolConfig, Result, SuppliedMemory, TypeId,
};

fn frame_pool(manager: &BufferManager, count: usize, size: usize) -> BufferPool {
    let frame = manager
        .create_buffer_data_type(&BufferDataDescriptor::new("frame", AllocationSource::OsMemory))
        .unwrap();
    manager
        .create_pool(PoolConfig::new(frame).with_buffer_count(count).with_size(size))
        .unwrap()
}

fn meta_type(manager: &BufferManager, name: &str, size: usize) -> TypeId {
    manager
        .create_buffer_data_type(&BufferDataDescriptor::meta_data(name, size))
        .unwrap()
}

#[derive(Debug, Default)]
struct CountingCache {
    flushes: AtomicUsize,
    purges: AtomicUsize,
}

impl CacheMaintenance for CountingCache {
    fn flush(&self, _addresses: AddressSet, _size: usize) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn purge(&self, _addresses: AddressSet, _size: usize) -> Result<()> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod buffer_tests {
    use super::*;

    #[test]
    fn test_payload_read_write() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 2, 64);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        buffer.write_data(8, b"degas").unwrap();
        assert_eq!(buffer.read_data(8, 5).unwrap(), b"degas");
        assert_eq!(buffer.read_data(0, 8).unwrap(), vec![0u8; 8]);
        assert!(buffer.write_data(62, b"overrun").is_err());

        let reference = buffer.obtain_data_reference(AddressKind::Cached).unwrap();
        assert_eq!(reference.block_size, 64);
        assert_eq!(reference.used_size, 0);
        assert_ne!(reference.address, 0);
        assert!(buffer.obtain_data_reference(AddressKind::Physical).is_err());
    }

    #[test]
    fn test_used_data_size_bounds() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 100);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        buffer.set_used_data_size(100).unwrap();
        assert_eq!(buffer.used_data_size().unwrap(), 100);
        assert!(matches!(
            buffer.set_used_data_size(101),
            Err(BufferError::SizeIncompatibleWithDescriptor { .. })
        ));
        assert_eq!(
            buffer.obtain_data_reference(AddressKind::Cached).unwrap().used_size,
            100
        );
    }

    #[test]
    fn test_no_allocation_buffers() {
        let manager = BufferManager::default();
        let wrapper = manager
            .create_buffer_data_type(&BufferDataDescriptor::new(
                "wrapper",
                AllocationSource::NoAllocation,
            ))
            .unwrap();
        let pool = manager.create_pool(PoolConfig::new(wrapper).with_buffer_count(1)).unwrap();
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        assert!(matches!(
            buffer.obtain_data_reference(AddressKind::Cached),
            Err(BufferError::NoDataAttached { .. })
        ));

        let memory = SuppliedMemory::owned(128, 8).unwrap();
        let base = memory.addresses().get(AddressKind::Cached).unwrap();
        buffer.register_data_reference(memory).unwrap();

        let reference = buffer.obtain_data_reference(AddressKind::Cached).unwrap();
        assert_eq!(reference.address, base);
        assert_eq!(reference.block_size, 128);
        assert_eq!(pool.get_pool_usage().memory_allocated, 128);

        buffer.drop_reference(OwnerId(1)).unwrap();
        assert_eq!(pool.get_pool_usage().memory_allocated, 0);
    }

    #[test]
    fn test_register_data_reference_requires_no_allocation() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 16);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        assert!(matches!(
            buffer.register_data_reference(SuppliedMemory::owned(16, 8).unwrap()),
            Err(BufferError::OperationNotSupportedByThisDescriptor { .. })
        ));
    }

    #[test]
    fn test_meta_data_round_trip() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 64);
        let timing = meta_type(&manager, "timing", 16);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        buffer.attach_meta_data(timing, MetaDataSpec::new()).unwrap();
        buffer.write_meta_data(timing, &42u64.to_le_bytes()).unwrap();

        let bytes = buffer.read_meta_data(timing).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(u64::from_le_bytes(bytes[..8].try_into().unwrap()), 42);

        let reference = buffer.obtain_meta_data_reference(timing).unwrap();
        assert_eq!(reference.type_id, timing);
        assert_eq!(reference.size, 16);
        assert!(reference.as_ptr().is_some());
    }

    #[test]
    fn test_meta_data_attach_rules() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 64);
        let timing = meta_type(&manager, "timing", 16);
        let blob = manager
            .create_buffer_data_type(
                &BufferDataDescriptor::new("blob", AllocationSource::OsMemory)
                    .with_kind(degas::TypeKind::MetaData),
            )
            .unwrap();
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        // Fixed size types reject a different size
        assert!(matches!(
            buffer.attach_meta_data(timing, MetaDataSpec::new().with_size(8)),
            Err(BufferError::SizeIncompatibleWithDescriptor { .. })
        ));
        // Variable size types need one
        assert!(buffer.attach_meta_data(blob, MetaDataSpec::new()).is_err());

        buffer.attach_meta_data(blob, MetaDataSpec::new().with_size(40)).unwrap();
        buffer.attach_meta_data(blob, MetaDataSpec::new().with_size(40)).unwrap();
        assert!(matches!(
            buffer.attach_meta_data(blob, MetaDataSpec::new().with_size(80)),
            Err(BufferError::Error { .. })
        ));
        assert_eq!(buffer.get_meta_data_count().unwrap(), 1);

        // Buffer data types are not metadata types
        let frame = pool.type_id();
        assert!(matches!(
            buffer.attach_meta_data(frame, MetaDataSpec::new()),
            Err(BufferError::MetaDataTypeNotFound { .. })
        ));
    }

    #[test]
    fn test_meta_data_detach() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 64);
        let timing = meta_type(&manager, "timing", 16);
        let params = meta_type(&manager, "params", 8);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        buffer.attach_meta_data(timing, MetaDataSpec::new()).unwrap();
        buffer.attach_meta_data(params, MetaDataSpec::new()).unwrap();
        assert_eq!(buffer.get_meta_data_list().unwrap(), vec![timing, params]);

        buffer.detach_meta_data(timing).unwrap();
        assert_eq!(buffer.get_meta_data_list().unwrap(), vec![params]);
        assert!(matches!(
            buffer.detach_meta_data(timing),
            Err(BufferError::AttachmentNotFound { .. })
        ));
        assert!(matches!(
            buffer.obtain_meta_data_reference(timing),
            Err(BufferError::MetaDataTypeNotFound { .. })
        ));
    }

    #[test]
    fn test_meta_data_dropped_on_release() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 64);
        let timing = meta_type(&manager, "timing", 16);

        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        buffer.attach_meta_data(timing, MetaDataSpec::new()).unwrap();
        buffer.drop_reference(OwnerId(1)).unwrap();

        let again = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        assert_eq!(again.get_meta_data_count().unwrap(), 0);
    }

    #[test]
    fn test_meta_data_in_caller_memory() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 64);
        let header = manager
            .create_buffer_data_type(
                &BufferDataDescriptor::new("header", AllocationSource::NoAllocation)
                    .with_kind(degas::TypeKind::MetaData),
            )
            .unwrap();
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        assert!(matches!(
            buffer.attach_meta_data(header, MetaDataSpec::new().with_size(8)),
            Err(BufferError::ParametersIncompatibleWithAllocationSource { .. })
        ));

        let memory = SuppliedMemory::owned(24, 8).unwrap();
        let base = memory.addresses().get(AddressKind::Cached).unwrap();
        buffer
            .attach_meta_data(header, MetaDataSpec::new().with_memory(memory))
            .unwrap();

        let reference = buffer.obtain_meta_data_reference(header).unwrap();
        assert_eq!(reference.size, 24);
        assert_eq!(reference.addresses.get(AddressKind::Cached), Some(base));
    }

    #[test]
    fn test_reference_counting_per_owner() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 64);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId::COLLATOR)).unwrap();

        buffer.increment_reference_count(OwnerId::FRAME_PARSER).unwrap();
        buffer.increment_reference_count(OwnerId::FRAME_PARSER).unwrap();
        assert_eq!(buffer.get_owner_count().unwrap(), 3);
        assert_eq!(
            buffer.get_owner_list().unwrap(),
            vec![(OwnerId::COLLATOR, 1), (OwnerId::FRAME_PARSER, 2)]
        );

        buffer.transfer_ownership(OwnerId::COLLATOR, OwnerId::CODEC).unwrap();
        assert_eq!(
            buffer.get_owner_list().unwrap(),
            vec![(OwnerId::FRAME_PARSER, 2), (OwnerId::CODEC, 1)]
        );
        assert!(matches!(
            buffer.transfer_ownership(OwnerId::COLLATOR, OwnerId::CODEC),
            Err(BufferError::Error { .. })
        ));

        assert_eq!(buffer.drop_reference(OwnerId::FRAME_PARSER).unwrap(), 2);
        assert_eq!(buffer.drop_reference(OwnerId::FRAME_PARSER).unwrap(), 1);
        assert!(buffer.is_live());
        assert_eq!(buffer.drop_reference(OwnerId::CODEC).unwrap(), 0);
        assert!(!buffer.is_live());
        assert_eq!(pool.get_pool_usage().buffers_with_non_zero_reference_count, 0);
    }

    #[test]
    fn test_decrement_keeps_buffer_until_release() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 64);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        assert_eq!(buffer.decrement_reference_count(OwnerId(1)).unwrap(), 0);
        assert_eq!(buffer.get_owner_count().unwrap(), 0);
        assert!(matches!(
            buffer.increment_reference_count(OwnerId(1)),
            Err(BufferError::NotInUse { .. })
        ));
        assert!(pool
            .get_buffer(GetBufferRequest::new(OwnerId(2)).non_blocking())
            .is_err());

        pool.release_buffer(&buffer).unwrap();
        assert!(pool
            .get_buffer(GetBufferRequest::new(OwnerId(2)).non_blocking())
            .is_ok());
    }

    #[test]
    fn test_unknown_owner_charged_elsewhere() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 64);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId::CODEC)).unwrap();
        buffer.increment_reference_count(OwnerId::MANIFESTOR).unwrap();

        assert_eq!(buffer.decrement_reference_count(OwnerId::UNSPECIFIED).unwrap(), 1);
        assert_eq!(buffer.decrement_reference_count(OwnerId(77)).unwrap(), 0);
    }

    #[test]
    fn test_buffer_links() {
        let manager = BufferManager::default();
        let frames = frame_pool(&manager, 8, 16);
        let picture = manager
            .create_buffer_data_type(&BufferDataDescriptor::new("picture", AllocationSource::OsMemory))
            .unwrap();
        let pictures = manager
            .create_pool(PoolConfig::new(picture).with_buffer_count(1).with_size(16))
            .unwrap();

        let owner = OwnerId(1);
        let frame = frames.get_buffer(GetBufferRequest::new(owner)).unwrap();
        let decoded = pictures.get_buffer(GetBufferRequest::new(owner)).unwrap();

        assert!(matches!(frame.attach_buffer(&frame), Err(BufferError::Error { .. })));

        frame.attach_buffer(&decoded).unwrap();
        frame.attach_buffer(&decoded).unwrap();
        assert_eq!(frame.attached_buffers().unwrap().len(), 1);
        // Links do not take references
        assert_eq!(decoded.get_owner_count().unwrap(), 1);
        assert_eq!(frame.obtain_attached_buffer_reference(picture).unwrap(), decoded);
        assert!(matches!(
            frame.obtain_attached_buffer_reference(frames.type_id()),
            Err(BufferError::AttachmentNotFound { .. })
        ));

        let others: Vec<_> = (0..4)
            .map(|_| frames.get_buffer(GetBufferRequest::new(owner)).unwrap())
            .collect();
        for other in &others[..3] {
            frame.attach_buffer(other).unwrap();
        }
        assert!(matches!(
            frame.attach_buffer(&others[3]),
            Err(BufferError::TooManyAttachments { limit: 4 })
        ));

        frame.detach_buffer(&decoded).unwrap();
        assert!(matches!(
            frame.detach_buffer(&decoded),
            Err(BufferError::AttachmentNotFound { .. })
        ));
        assert!(!frame.detach_buffer_if_attached(&decoded).unwrap());
    }

    #[test]
    fn test_link_to_released_buffer() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 2, 16);
        let a = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        let b = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        a.attach_buffer(&b).unwrap();
        b.drop_reference(OwnerId(1)).unwrap();

        assert!(matches!(a.attach_buffer(&b), Err(BufferError::NotInUse { .. })));
        // A stale link is never handed out
        assert!(a.obtain_attached_buffer_reference(pool.type_id()).is_err());
    }

    #[test]
    fn test_cache_hooks() {
        let cache = Arc::new(CountingCache::default());
        let manager =
            BufferManager::new(ManagerConfig::new("cache").with_cache_maintenance(cache.clone()))
                .unwrap();
        let pool = frame_pool(&manager, 1, 32);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        buffer.flush_cache().unwrap();
        buffer.purge_cache().unwrap();
        buffer.purge_cache().unwrap();
        assert_eq!(cache.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.purges.load(Ordering::SeqCst), 2);

        // The default hook does nothing
        let plain = BufferManager::default();
        let plain_pool = frame_pool(&plain, 1, 32);
        let plain_buffer = plain_pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        assert!(plain_buffer.flush_cache().is_ok());
    }

    #[test]
    fn test_dump_and_relay() {
        let manager = BufferManager::default();
        let pool = frame_pool(&manager, 1, 32);
        let timing = meta_type(&manager, "timing", 8);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId::CODEC)).unwrap();
        buffer.attach_meta_data(timing, MetaDataSpec::new()).unwrap();
        buffer.write_data(0, b"frame").unwrap();
        buffer.set_used_data_size(5).unwrap();

        let mut out = String::new();
        buffer.dump_to(&mut out).unwrap();
        assert!(out.contains("frame"));

        let mut all = String::new();
        manager.dump_to(DumpFlags::all(), &mut all).unwrap();
        assert!(all.contains("timing"));

        // Without a sink the export is dropped quietly
        buffer.dump_via_relay(1, 2).unwrap();

        let sink = Arc::new(MemoryRelaySink::new(8));
        manager.set_relay_sink(Some(sink.clone()));
        buffer.dump_via_relay(7, 3).unwrap();

        let records = sink.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 7);
        assert_eq!(records[0].type_tag, 3);
        assert_eq!(records[0].payload, b"frame");
    }
}
