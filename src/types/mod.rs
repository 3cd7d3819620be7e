//! Core value types: descriptors, owners and address views

pub mod address;
pub mod descriptor;
pub mod owner;

pub use address::{AddressKind, AddressSet, SuppliedMemory};
pub use descriptor::{
    align_up, round_up_to, AllocationSource, BufferDataDescriptor, TypeId, TypeKind,
    BUFFER_DATA_TYPE_BASE, META_DATA_TYPE_BASE, TYPE_INDEX_MASK,
};
pub use owner::OwnerId;
