//! Buffer and metadata type descriptors

use serde::{Deserialize, Serialize};

use crate::error::{BufferError, Result};

/// Integer identifier for a registered buffer data or metadata type
pub type TypeId = u32;

/// Base of the buffer data type namespace
pub const BUFFER_DATA_TYPE_BASE: TypeId = 0x0000_0000;

/// Base of the metadata type namespace (reserved high bit)
pub const META_DATA_TYPE_BASE: TypeId = 0x8000_0000;

/// Mask extracting the registry table index from a type id
pub const TYPE_INDEX_MASK: TypeId = 0x0000_ffff;

/// Which namespace a type id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    /// Main payload types
    BufferData,
    /// Side-channel metadata types
    MetaData,
}

impl TypeKind {
    /// Namespace base OR-ed into every id of this kind
    pub fn base(&self) -> TypeId {
        match self {
            TypeKind::BufferData => BUFFER_DATA_TYPE_BASE,
            TypeKind::MetaData => META_DATA_TYPE_BASE,
        }
    }

    /// Decode the namespace of a type id
    pub fn of(type_id: TypeId) -> Self {
        if type_id & META_DATA_TYPE_BASE != 0 {
            TypeKind::MetaData
        } else {
            TypeKind::BufferData
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeKind::BufferData => "buffer-data",
            TypeKind::MetaData => "meta-data",
        }
    }
}

/// Backing memory strategy for a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationSource {
    /// No memory is allocated; callers register their own
    NoAllocation,
    /// Plain process heap
    OsMemory,
    /// Default device partition of the manager
    DeviceMemory,
    /// Default video partition of the manager
    DeviceVideoMemory,
    /// One caller-supplied block shared by the pool
    SuppliedBlock,
    /// One caller-supplied block per buffer
    IndividualSuppliedBlocks,
    /// A partition named at pool creation or metadata attach time
    NamedDevicePartition,
}

impl AllocationSource {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            AllocationSource::NoAllocation => "no-allocation",
            AllocationSource::OsMemory => "os-memory",
            AllocationSource::DeviceMemory => "device-memory",
            AllocationSource::DeviceVideoMemory => "device-video-memory",
            AllocationSource::SuppliedBlock => "supplied-block",
            AllocationSource::IndividualSuppliedBlocks => "individual-supplied-blocks",
            AllocationSource::NamedDevicePartition => "named-device-partition",
        }
    }

    /// Sources whose memory comes from a mapped partition
    pub fn uses_partition(&self) -> bool {
        matches!(
            self,
            AllocationSource::DeviceMemory
                | AllocationSource::DeviceVideoMemory
                | AllocationSource::NamedDevicePartition
        )
    }

    /// Sources whose memory is handed in by the caller
    pub fn uses_supplied_memory(&self) -> bool {
        matches!(
            self,
            AllocationSource::SuppliedBlock | AllocationSource::IndividualSuppliedBlocks
        )
    }
}

/// Immutable description of a registered type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDataDescriptor {
    /// Unique type name
    pub name: String,
    /// Assigned at registration; ignored on input
    pub type_id: TypeId,
    /// Namespace of the type
    pub kind: TypeKind,
    /// Where buffers of this type get their memory
    pub allocation_source: AllocationSource,
    /// Required alignment of each allocation (power of two, 0 means 1)
    pub required_alignment: usize,
    /// Granularity of supplied-block allocations
    pub allocation_unit_size: usize,
    /// Whether every buffer has the same size
    pub has_fixed_size: bool,
    /// Allocate every buffer when the pool is created
    pub allocate_on_pool_creation: bool,
    /// Size used when `has_fixed_size` is set
    pub fixed_size: usize,
}

impl BufferDataDescriptor {
    /// Descriptor for a payload type with no alignment or size constraints
    pub fn new(name: impl Into<String>, allocation_source: AllocationSource) -> Self {
        Self {
            name: name.into(),
            type_id: 0,
            kind: TypeKind::BufferData,
            allocation_source,
            required_alignment: 1,
            allocation_unit_size: 1,
            has_fixed_size: false,
            allocate_on_pool_creation: false,
            fixed_size: 0,
        }
    }

    /// Descriptor for a metadata type of fixed size on the OS heap
    pub fn meta_data(name: impl Into<String>, size: usize) -> Self {
        Self {
            kind: TypeKind::MetaData,
            required_alignment: 4,
            ..Self::new(name, AllocationSource::OsMemory)
        }
        .with_fixed_size(size)
    }

    pub fn with_kind(mut self, kind: TypeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.required_alignment = alignment;
        self
    }

    pub fn with_allocation_unit(mut self, unit: usize) -> Self {
        self.allocation_unit_size = unit;
        self
    }

    /// Make every buffer of this type exactly `size` bytes
    pub fn with_fixed_size(mut self, size: usize) -> Self {
        self.has_fixed_size = true;
        self.fixed_size = size;
        self
    }

    pub fn with_allocate_on_pool_creation(mut self, eager: bool) -> Self {
        self.allocate_on_pool_creation = eager;
        self
    }

    /// Alignment with the "0 means byte aligned" convention applied
    pub fn alignment(&self) -> usize {
        self.required_alignment.max(1)
    }

    /// Allocation unit with the "0 means byte granular" convention applied
    pub fn allocation_unit(&self) -> usize {
        self.allocation_unit_size.max(1)
    }

    /// Round a size up to the required alignment; `None` on overflow
    pub fn aligned_size(&self, size: usize) -> Option<usize> {
        align_up(size, self.alignment())
    }

    /// Check for self-contradictory settings
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BufferError::invalid_descriptor("", "Type name cannot be empty"));
        }

        if self.has_fixed_size && self.fixed_size == 0 {
            return Err(BufferError::invalid_descriptor(
                &self.name,
                "Fixed size flag set without a size",
            ));
        }

        if !self.alignment().is_power_of_two() {
            return Err(BufferError::invalid_descriptor(
                &self.name,
                format!("Alignment {} is not a power of two", self.required_alignment),
            ));
        }

        if self.allocate_on_pool_creation
            && self.allocation_source == AllocationSource::NoAllocation
        {
            return Err(BufferError::invalid_descriptor(
                &self.name,
                "Cannot allocate on pool creation without an allocation source",
            ));
        }

        if self.allocation_source == AllocationSource::SuppliedBlock
            && !self.allocate_on_pool_creation
            && self.allocation_unit_size == 0
        {
            return Err(BufferError::invalid_descriptor(
                &self.name,
                "Supplied block allocation requires an allocation unit size",
            ));
        }

        Ok(())
    }

    /// Same registration shape, ignoring the assigned id
    pub fn same_shape(&self, other: &Self) -> bool {
        Self {
            type_id: 0,
            ..self.clone()
        } == Self {
            type_id: 0,
            ..other.clone()
        }
    }
}

/// Round `value` up to a multiple of the power-of-two `align`
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// Round `value` up to a multiple of `unit` (any positive value)
pub fn round_up_to(value: usize, unit: usize) -> Option<usize> {
    value.div_ceil(unit).checked_mul(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_id() {
        assert_eq!(TypeKind::of(3), TypeKind::BufferData);
        assert_eq!(TypeKind::of(META_DATA_TYPE_BASE | 3), TypeKind::MetaData);
        assert_eq!((META_DATA_TYPE_BASE | 7) & TYPE_INDEX_MASK, 7);
    }

    #[test]
    fn test_descriptor_validation() {
        let ok = BufferDataDescriptor::new("frames", AllocationSource::OsMemory)
            .with_alignment(64)
            .with_fixed_size(4096);
        assert!(ok.validate().is_ok());

        let mut fixed_without_size = ok.clone();
        fixed_without_size.fixed_size = 0;
        assert!(matches!(
            fixed_without_size.validate(),
            Err(BufferError::InvalidDescriptor { .. })
        ));

        let bad_alignment = ok.clone().with_alignment(48);
        assert!(bad_alignment.validate().is_err());

        let eager_nothing = BufferDataDescriptor::new("refs", AllocationSource::NoAllocation)
            .with_allocate_on_pool_creation(true);
        assert!(eager_nothing.validate().is_err());

        let no_unit = BufferDataDescriptor::new("coded", AllocationSource::SuppliedBlock)
            .with_allocation_unit(0);
        assert!(no_unit.validate().is_err());

        assert!(BufferDataDescriptor::new("", AllocationSource::OsMemory).validate().is_err());
    }

    #[test]
    fn test_zero_alignment_means_byte_aligned() {
        let desc = BufferDataDescriptor::new("bytes", AllocationSource::OsMemory).with_alignment(0);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.aligned_size(13), Some(13));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(align_up(100, 64), Some(128));
        assert_eq!(align_up(128, 64), Some(128));
        assert_eq!(round_up_to(100, 48), Some(144));
        assert_eq!(round_up_to(0, 48), Some(0));
        assert_eq!(align_up(usize::MAX - 4, 16), None);
        assert_eq!(round_up_to(usize::MAX - 4, 100), None);
    }

    #[test]
    fn test_same_shape_ignores_id() {
        let a = BufferDataDescriptor::meta_data("pts", 8);
        let mut b = a.clone();
        b.type_id = META_DATA_TYPE_BASE | 4;
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&BufferDataDescriptor::meta_data("pts", 16)));
    }
}
