//! C Foreign Function Interface (FFI)
//!
//! Every entry point returns a [`BufferStatus`](crate::BufferStatus) code.
//! Managers, pools and buffers are passed as opaque handles; sizes and counts
//! use `NOT_SPECIFIED` for "absent".

pub mod types;
pub mod utils;
pub mod manager;
pub mod pools;
pub mod buffers;

// Re-export commonly used types and functions
pub use types::{
    DegasBufferHandle, DegasDataReference, DegasDescriptor, DegasManagerHandle, DegasOwnerId,
    DegasPoolHandle, DegasPoolUsage, DegasStatus, DegasTypeId, DegasVersion,
};

pub use utils::{degas_free_string, HANDLE_REGISTRY};

// Manager and type registry API
pub use manager::{
    degas_manager_create, degas_manager_destroy, degas_meta_data_type_find, degas_type_create,
    degas_type_find, degas_version, degas_version_string,
};

// Pool API
pub use pools::{
    degas_buffer_get, degas_buffer_release, degas_pool_abort_blocking_get,
    degas_pool_attach_meta_data, degas_pool_create, degas_pool_destroy, degas_pool_usage,
};

// Buffer API
pub use buffers::{
    degas_buffer_attach_meta_data, degas_buffer_decrement_reference_count,
    degas_buffer_increment_reference_count, degas_buffer_obtain_data_reference,
    degas_buffer_obtain_meta_data_reference, degas_buffer_set_used_data_size,
    degas_buffer_transfer_ownership,
};
