//! Supplied-block ranges, buffer partitioning and device partitions

use std::{
    thread,
    time::{Duration, Instant},
};

use degas::{
    AddressKind, AllocationSource, BackingType, Buffer, BufferDataDescriptor, BufferError,
    BufferManager, BufferPool, GetBufferRequest, ManagerConfig, MetaDataSpec, OwnerId,
    PartitionConfig, PoolConfig, PoolMemory, PoolMetaDataSpec, SuppliedMemory,
};

/// Pool of four buffers over one 1 KiB supplied block, plus the block's base
fn supplied_pool(manager: &BufferManager) -> (BufferPool, usize) {
    let packet = manager
        .create_buffer_data_type(&BufferDataDescriptor::new(
            "packet",
            AllocationSource::SuppliedBlock,
        ))
        .unwrap();
    let memory = SuppliedMemory::owned(1024, 64).unwrap();
    let base = memory.addresses().get(AddressKind::Cached).unwrap();
    let pool = manager
        .create_pool(
            PoolConfig::new(packet)
                .with_buffer_count(4)
                .with_memory(PoolMemory::Supplied(memory)),
        )
        .unwrap();
    (pool, base)
}

fn address_of(buffer: &Buffer) -> usize {
    buffer.obtain_data_reference(AddressKind::Cached).unwrap().address
}

#[cfg(test)]
mod supplied_block_tests {
    use super::*;

    #[test]
    fn test_ranges_carved_first_fit() {
        let manager = BufferManager::default();
        let (pool, base) = supplied_pool(&manager);

        let a = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(256)).unwrap();
        let b = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(256)).unwrap();
        assert_eq!(address_of(&a), base);
        assert_eq!(address_of(&b), base + 256);

        let usage = pool.get_pool_usage();
        assert_eq!(usage.memory_in_pool, Some(1024));
        assert_eq!(usage.memory_allocated, 512);
        assert_eq!(usage.largest_free_memory_block, Some(512));

        // The freed range is reused at the lowest offset
        a.drop_reference(OwnerId(1)).unwrap();
        let c = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(128)).unwrap();
        assert_eq!(address_of(&c), base);
    }

    #[test]
    fn test_request_beyond_block() {
        let manager = BufferManager::default();
        let (pool, _) = supplied_pool(&manager);

        assert!(matches!(
            pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(2048)),
            Err(BufferError::SizeIncompatibleWithDescriptor { .. })
        ));

        let _big = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(1000)).unwrap();
        assert!(matches!(
            pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(100).non_blocking()),
            Err(BufferError::InsufficientMemory { .. })
        ));
    }

    #[test]
    fn test_minimum_size_takes_largest_range() {
        let manager = BufferManager::default();
        let (pool, base) = supplied_pool(&manager);

        let head = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(128)).unwrap();
        let rest = pool
            .get_buffer(GetBufferRequest::new(OwnerId(1)).with_minimum_size(64))
            .unwrap();

        assert_eq!(address_of(&head), base);
        assert_eq!(address_of(&rest), base + 128);
        assert_eq!(rest.buffer_size().unwrap(), 896);
        assert_eq!(pool.get_pool_usage().largest_free_memory_block, Some(0));
    }

    #[test]
    fn test_shrink_and_extend() {
        let manager = BufferManager::default();
        let (pool, base) = supplied_pool(&manager);

        let a = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(256)).unwrap();
        let b = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(256)).unwrap();

        a.set_used_data_size(50).unwrap();
        assert!(matches!(
            a.shrink_buffer(40),
            Err(BufferError::SizeIncompatibleWithDescriptor { .. })
        ));
        a.shrink_buffer(100).unwrap();
        assert_eq!(a.buffer_size().unwrap(), 100);
        assert_eq!(pool.get_pool_usage().memory_allocated, 356);

        // Grow back into the gap left by the shrink
        assert_eq!(a.extend_buffer(true).unwrap(), 256);
        assert_eq!(address_of(&a), base);
        assert!(matches!(
            a.extend_buffer(true),
            Err(BufferError::SizeIncompatibleWithDescriptor { .. })
        ));

        assert_eq!(b.extend_buffer(true).unwrap(), 768);
        assert_eq!(pool.get_pool_usage().memory_allocated, 1024);
        assert_eq!(pool.get_pool_usage().largest_free_memory_block, Some(0));
    }

    #[test]
    fn test_extend_downwards() {
        let manager = BufferManager::default();
        let (pool, base) = supplied_pool(&manager);

        let a = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(256)).unwrap();
        let b = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(256)).unwrap();
        a.drop_reference(OwnerId(1)).unwrap();

        assert_eq!(b.extend_buffer(false).unwrap(), 512);
        assert_eq!(address_of(&b), base);
    }

    #[test]
    fn test_partition_buffer() {
        let manager = BufferManager::default();
        let (pool, base) = supplied_pool(&manager);
        let timing = manager
            .create_buffer_data_type(&BufferDataDescriptor::meta_data("timing", 8))
            .unwrap();

        // No size configured for the pool: every request is sized explicitly
        assert!(pool.get_buffer(GetBufferRequest::new(OwnerId::COLLATOR)).is_err());

        let first = pool
            .get_buffer(GetBufferRequest::new(OwnerId::COLLATOR).with_size(256))
            .unwrap();
        first.write_data(0, &[0xaa; 256]).unwrap();
        first.set_used_data_size(100).unwrap();
        first.attach_meta_data(timing, MetaDataSpec::new()).unwrap();
        first.write_meta_data(timing, &[7; 8]).unwrap();

        let second = first
            .partition_buffer(64, true, OwnerId::FRAME_PARSER, false)
            .unwrap();

        assert_eq!(first.buffer_size().unwrap(), 64);
        assert_eq!(first.used_data_size().unwrap(), 64);
        assert_eq!(second.buffer_size().unwrap(), 192);
        assert_eq!(second.used_data_size().unwrap(), 36);
        assert_eq!(address_of(&second), base + 64);
        assert_eq!(second.read_data(0, 4).unwrap(), vec![0xaa; 4]);

        assert_eq!(second.get_owner_list().unwrap(), vec![(OwnerId::FRAME_PARSER, 1)]);
        assert_eq!(second.read_meta_data(timing).unwrap(), vec![7; 8]);

        // Both halves return to the allocator independently
        let usage = pool.get_pool_usage();
        assert_eq!(usage.memory_allocated, 256);
        assert_eq!(usage.memory_in_use, 100);

        first.drop_reference(OwnerId::COLLATOR).unwrap();
        assert_eq!(pool.get_pool_usage().largest_free_memory_block, Some(768));
        second.drop_reference(OwnerId::FRAME_PARSER).unwrap();
        assert_eq!(pool.get_pool_usage().largest_free_memory_block, Some(1024));
        assert_eq!(pool.get_pool_usage().memory_allocated, 0);
    }

    #[test]
    fn test_partition_without_meta_data_copy() {
        let manager = BufferManager::default();
        let (pool, _) = supplied_pool(&manager);
        let timing = manager
            .create_buffer_data_type(&BufferDataDescriptor::meta_data("timing", 8))
            .unwrap();

        let first = pool
            .get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(128))
            .unwrap();
        first.attach_meta_data(timing, MetaDataSpec::new()).unwrap();

        let second = first.partition_buffer(32, false, OwnerId(2), false).unwrap();
        assert_eq!(second.get_meta_data_count().unwrap(), 0);
        assert!(matches!(
            first.partition_buffer(200, false, OwnerId(2), false),
            Err(BufferError::SizeIncompatibleWithDescriptor { .. })
        ));
    }

    #[test]
    fn test_partition_needs_a_container() {
        let manager = BufferManager::default();
        let (pool, _) = supplied_pool(&manager);

        let buffers: Vec<_> = (0..4)
            .map(|_| {
                pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(64))
                    .unwrap()
            })
            .collect();
        assert!(matches!(
            buffers[0].partition_buffer(32, false, OwnerId(2), true),
            Err(BufferError::NoFreeBufferAvailable { .. })
        ));
        assert_eq!(buffers[0].buffer_size().unwrap(), 64);
    }

    #[test]
    fn test_partition_unsupported_for_heap() {
        let manager = BufferManager::default();
        let frame = manager
            .create_buffer_data_type(&BufferDataDescriptor::new("frame", AllocationSource::OsMemory))
            .unwrap();
        let pool = manager
            .create_pool(PoolConfig::new(frame).with_buffer_count(2).with_size(64))
            .unwrap();
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        assert!(matches!(
            buffer.partition_buffer(16, false, OwnerId(1), true),
            Err(BufferError::OperationNotSupportedByThisDescriptor { .. })
        ));
        assert!(matches!(
            buffer.extend_buffer(true),
            Err(BufferError::OperationNotSupportedByThisDescriptor { .. })
        ));
        buffer.shrink_buffer(16).unwrap();
        assert_eq!(buffer.buffer_size().unwrap(), 16);
    }

    #[test]
    fn test_allocation_unit_rounding() {
        let manager = BufferManager::default();
        let slice = manager
            .create_buffer_data_type(
                &BufferDataDescriptor::new("slice", AllocationSource::SuppliedBlock)
                    .with_allocation_unit(100),
            )
            .unwrap();
        let memory = SuppliedMemory::owned(1000, 8).unwrap();
        let pool = manager
            .create_pool(
                PoolConfig::new(slice)
                    .with_buffer_count(2)
                    .with_memory(PoolMemory::Supplied(memory)),
            )
            .unwrap();

        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(150)).unwrap();
        assert_eq!(buffer.buffer_size().unwrap(), 200);
        buffer.shrink_buffer(101).unwrap();
        assert_eq!(buffer.buffer_size().unwrap(), 200);
        buffer.shrink_buffer(99).unwrap();
        assert_eq!(buffer.buffer_size().unwrap(), 100);
    }

    #[test]
    fn test_oversized_request_on_allocation_units() {
        let manager = BufferManager::default();
        let slice = manager
            .create_buffer_data_type(
                &BufferDataDescriptor::new("slice", AllocationSource::SuppliedBlock)
                    .with_allocation_unit(100),
            )
            .unwrap();
        let pool = manager
            .create_pool(
                PoolConfig::new(slice)
                    .with_buffer_count(2)
                    .with_memory(PoolMemory::Supplied(SuppliedMemory::owned(1000, 8).unwrap())),
            )
            .unwrap();

        for request in [
            GetBufferRequest::new(OwnerId(1)).with_size(usize::MAX - 4),
            GetBufferRequest::new(OwnerId(1)).with_minimum_size(usize::MAX - 4),
        ] {
            assert!(matches!(
                pool.get_buffer(request),
                Err(BufferError::SizeIncompatibleWithDescriptor { .. })
            ));
        }

        let usage = pool.get_pool_usage();
        assert_eq!(usage.buffers_with_non_zero_reference_count, 0);
        assert_eq!(usage.largest_free_memory_block, Some(1000));
    }

    #[test]
    fn test_duplicated_meta_data_is_independent() {
        let manager = BufferManager::default();
        let (pool, _) = supplied_pool(&manager);
        let timing = manager
            .create_buffer_data_type(&BufferDataDescriptor::meta_data("timing", 8))
            .unwrap();

        let first = pool
            .get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(256))
            .unwrap();
        first.attach_meta_data(timing, MetaDataSpec::new()).unwrap();
        first.write_meta_data(timing, &[7; 8]).unwrap();

        let second = first.partition_buffer(128, true, OwnerId(2), true).unwrap();
        second.write_meta_data(timing, &[9; 8]).unwrap();
        assert_eq!(first.read_meta_data(timing).unwrap(), vec![7; 8]);

        first.write_meta_data(timing, &[1; 8]).unwrap();
        assert_eq!(second.read_meta_data(timing).unwrap(), vec![9; 8]);

        let original = first.obtain_meta_data_reference(timing).unwrap();
        let copy = second.obtain_meta_data_reference(timing).unwrap();
        assert_ne!(original.addresses, copy.addresses);

        // The copy belongs to the tail alone
        second.detach_meta_data(timing).unwrap();
        assert_eq!(first.read_meta_data(timing).unwrap(), vec![1; 8]);
    }

    #[test]
    fn test_partition_copies_into_pool_meta_data() {
        let manager = BufferManager::default();
        let (pool, _) = supplied_pool(&manager);
        let timing = manager
            .create_buffer_data_type(&BufferDataDescriptor::meta_data("timing", 8))
            .unwrap();
        pool.attach_meta_data(timing, PoolMetaDataSpec::new()).unwrap();

        let first = pool
            .get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(256))
            .unwrap();
        first.write_meta_data(timing, &[5; 8]).unwrap();

        let second = first.partition_buffer(64, true, OwnerId(2), true).unwrap();

        // The tail's pool slot is overwritten, not doubled
        assert_eq!(second.get_meta_data_count().unwrap(), 1);
        assert_eq!(second.read_meta_data(timing).unwrap(), vec![5; 8]);

        second.write_meta_data(timing, &[6; 8]).unwrap();
        assert_eq!(first.read_meta_data(timing).unwrap(), vec![5; 8]);
    }

    #[test]
    fn test_partition_registered_reference() {
        let manager = BufferManager::default();
        let wrapper = manager
            .create_buffer_data_type(&BufferDataDescriptor::new(
                "wrapper",
                AllocationSource::NoAllocation,
            ))
            .unwrap();
        let pool = manager.create_pool(PoolConfig::new(wrapper).with_buffer_count(2)).unwrap();

        let memory = SuppliedMemory::owned(256, 16).unwrap();
        let base = memory.addresses().get(AddressKind::Cached).unwrap();
        let first = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        first.register_data_reference(memory).unwrap();

        let bytes: Vec<u8> = (0..=255).collect();
        first.write_data(0, &bytes).unwrap();
        first.set_used_data_size(200).unwrap();

        let second = first.partition_buffer(128, false, OwnerId(2), true).unwrap();
        assert_eq!(first.buffer_size().unwrap(), 128);
        assert_eq!(first.used_data_size().unwrap(), 128);
        assert_eq!(second.buffer_size().unwrap(), 128);
        assert_eq!(second.used_data_size().unwrap(), 72);
        assert_eq!(address_of(&second), base + 128);
        assert_eq!(second.read_data(0, 2).unwrap(), vec![128, 129]);
        assert_eq!(pool.get_pool_usage().memory_allocated, 256);

        first.drop_reference(OwnerId(1)).unwrap();
        second.drop_reference(OwnerId(2)).unwrap();
        let usage = pool.get_pool_usage();
        assert_eq!(usage.buffers_with_non_zero_reference_count, 0);
        assert_eq!(usage.memory_allocated, 0);
    }
}

#[cfg(test)]
mod device_partition_tests {
    use super::*;

    fn device_manager(size: usize) -> BufferManager {
        let manager =
            BufferManager::new(ManagerConfig::new("device").with_device_partition("lmi")).unwrap();
        manager.create_partition(PartitionConfig::new("lmi", size)).unwrap();
        manager
    }

    fn device_pool(manager: &BufferManager, count: usize, size: usize) -> BufferPool {
        let frame = manager
            .create_buffer_data_type(
                &BufferDataDescriptor::new("frame", AllocationSource::DeviceMemory)
                    .with_alignment(64),
            )
            .unwrap();
        manager
            .create_pool(PoolConfig::new(frame).with_buffer_count(count).with_size(size))
            .unwrap()
    }

    #[test]
    fn test_device_buffers_have_every_view() {
        let manager = device_manager(64 * 1024);
        let pool = device_pool(&manager, 2, 4096);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        for kind in AddressKind::ALL {
            let reference = buffer.obtain_data_reference(kind).unwrap();
            assert_eq!(reference.address % 64, 0);
            assert_eq!(reference.block_size, 4096);
        }

        buffer.write_data(0, b"device").unwrap();
        assert_eq!(buffer.read_data(0, 6).unwrap(), b"device");

        let stats = manager.partition_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name, "lmi");
        assert_eq!(stats[0].used, 4096);
    }

    #[test]
    fn test_partition_exhaustion() {
        let manager = device_manager(64 * 1024);
        let pool = device_pool(&manager, 4, 32 * 1024);

        let _a = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        let _b = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        assert!(matches!(
            pool.get_buffer(GetBufferRequest::new(OwnerId(1)).non_blocking()),
            Err(BufferError::InsufficientMemory { .. })
        ));
        assert!(matches!(
            pool.get_buffer(GetBufferRequest::new(OwnerId(1)).with_size(128 * 1024)),
            Err(BufferError::SizeIncompatibleWithDescriptor { .. })
        ));

        let start = Instant::now();
        assert!(matches!(
            pool.get_buffer(
                GetBufferRequest::new(OwnerId(1)).with_timeout(Duration::from_millis(120))
            ),
            Err(BufferError::NoFreeBufferAvailable { .. })
        ));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_blocked_get_resumes_when_memory_returns() {
        let manager = device_manager(64 * 1024);
        let pool = device_pool(&manager, 4, 32 * 1024);

        let a = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        let _b = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                pool.get_buffer(
                    GetBufferRequest::new(OwnerId(2)).with_timeout(Duration::from_secs(5)),
                )
                .map(|buffer| buffer.get_index())
            })
        };

        thread::sleep(Duration::from_millis(50));
        a.drop_reference(OwnerId(1)).unwrap();

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_meta_data_in_named_partition() {
        let manager = device_manager(64 * 1024);
        manager.create_partition(PartitionConfig::new("meta", 4096)).unwrap();
        let pool = device_pool(&manager, 1, 1024);
        let header = manager
            .create_buffer_data_type(
                &BufferDataDescriptor::new("header", AllocationSource::NamedDevicePartition)
                    .with_kind(degas::TypeKind::MetaData)
                    .with_fixed_size(32),
            )
            .unwrap();
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        assert!(buffer.attach_meta_data(header, MetaDataSpec::new()).is_err());
        buffer
            .attach_meta_data(header, MetaDataSpec::new().with_partition("meta"))
            .unwrap();

        let reference = buffer.obtain_meta_data_reference(header).unwrap();
        assert!(reference.addresses.get(AddressKind::Physical).is_some());
        assert_eq!(buffer.read_meta_data(header).unwrap(), vec![0; 32]);

        let meta = manager
            .partition_stats()
            .into_iter()
            .find(|s| s.name == "meta")
            .unwrap();
        assert_eq!(meta.used, 32);
    }

    #[test]
    fn test_physical_base() {
        let manager = BufferManager::default();
        manager
            .create_partition(PartitionConfig::new("bus", 8192).with_physical_base(0x4000_0000))
            .unwrap();
        let frame = manager
            .create_buffer_data_type(&BufferDataDescriptor::new(
                "frame",
                AllocationSource::NamedDevicePartition,
            ))
            .unwrap();
        let pool = manager
            .create_pool(
                PoolConfig::new(frame)
                    .with_buffer_count(2)
                    .with_size(1024)
                    .with_partition("bus"),
            )
            .unwrap();

        let a = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        let b = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        assert_eq!(
            a.obtain_data_reference(AddressKind::Physical).unwrap().address,
            0x4000_0000
        );
        assert_eq!(
            b.obtain_data_reference(AddressKind::Physical).unwrap().address,
            0x4000_0000 + 1024
        );
    }

    #[test]
    fn test_file_backed_partition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");

        let manager = BufferManager::new(ManagerConfig::new("file").with_device_partition("file"))
            .unwrap();
        let partition = manager
            .create_partition(
                PartitionConfig::new("file", 16 * 1024)
                    .with_backing_type(BackingType::FileBacked)
                    .with_file_path(&path),
            )
            .unwrap();
        assert_eq!(partition.size(), 16 * 1024);
        assert!(path.exists());

        let pool = device_pool(&manager, 2, 1024);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        buffer.write_data(0, b"persisted").unwrap();

        let stats = manager.partition_stats();
        assert_eq!(stats[0].backing_type, BackingType::FileBacked);
    }

    #[test]
    fn test_removed_partition_keeps_leases() {
        let manager = device_manager(16 * 1024);
        let pool = device_pool(&manager, 2, 1024);
        let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();

        manager.remove_partition("lmi").unwrap();
        assert!(manager.partition_names().is_empty());
        assert!(manager.remove_partition("lmi").is_err());

        // Existing pools and buffers still reach the mapping
        buffer.write_data(0, b"still mapped").unwrap();
        let other = pool.get_buffer(GetBufferRequest::new(OwnerId(1))).unwrap();
        assert!(other.write_data(0, b"ok").is_ok());

        // New pools cannot find it
        let frame = pool.type_id();
        assert!(manager
            .create_pool(PoolConfig::new(frame).with_buffer_count(1).with_size(64))
            .is_err());
    }
}
