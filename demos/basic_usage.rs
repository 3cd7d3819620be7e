//! Basic usage example of the Degas buffer engine

use degas::{
    AllocationSource, BufferDataDescriptor, BufferManager, DumpFlags, GetBufferRequest,
    ManagerConfig, MetaDataSpec, OwnerId, PartitionConfig, PoolConfig, Result,
};

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    println!("Degas Buffer Engine Example");
    println!("===========================");

    let manager = BufferManager::new(ManagerConfig::new("example").with_device_partition("lmi"))?;
    manager.create_partition(PartitionConfig::new("lmi", 1024 * 1024))?;

    // Coded frames live in device memory, timing metadata on the heap
    let frame = manager.create_buffer_data_type(
        &BufferDataDescriptor::new("coded-frame", AllocationSource::DeviceMemory).with_alignment(64),
    )?;
    let timing = manager.create_buffer_data_type(&BufferDataDescriptor::meta_data("timing", 32))?;

    let pool = manager.create_pool(PoolConfig::new(frame).with_buffer_count(8).with_size(16 * 1024))?;
    println!("Created {:?}", pool);

    // The collator fills a frame and hands it to the parser
    let buffer = pool.get_buffer(GetBufferRequest::new(OwnerId::COLLATOR))?;
    buffer.write_data(0, b"\x00\x00\x01\xb3 sequence header")?;
    buffer.set_used_data_size(20)?;
    buffer.attach_meta_data(timing, MetaDataSpec::new())?;
    buffer.write_meta_data(timing, &90_000u64.to_le_bytes())?;

    buffer.increment_reference_count(OwnerId::FRAME_PARSER)?;
    buffer.drop_reference(OwnerId::COLLATOR)?;
    println!("Owners after hand-off: {:?}", buffer.get_owner_list()?);

    // The parser splits the header from the rest of the payload
    let tail = buffer.partition_buffer(4, true, OwnerId::FRAME_PARSER, false);
    match tail {
        Ok(_) => println!("Partitioned buffer"),
        Err(e) => println!("Partitioning not supported for this source: {}", e),
    }

    let usage = pool.get_pool_usage();
    println!(
        "Pool usage: {}/{} buffers referenced, {} bytes in use",
        usage.buffers_with_non_zero_reference_count, usage.buffers_in_pool, usage.memory_in_use
    );

    manager.dump(DumpFlags::all());

    let remaining = buffer.drop_reference(OwnerId::FRAME_PARSER)?;
    println!("Released, {} references remain", remaining);

    manager.destroy_pool(&pool)?;
    println!("Example completed successfully!");

    Ok(())
}
