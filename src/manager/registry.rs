//! Type registry: name to id to descriptor

use std::sync::{Arc, RwLock};

use crate::{
    config::MAX_BUFFER_DATA_TYPES,
    error::{BufferError, Result},
    sync::{read, write},
    types::{BufferDataDescriptor, TypeId, TypeKind, TYPE_INDEX_MASK},
};

/// Fixed-size table of registered descriptors.
///
/// Both namespaces share one table; an id is its table index OR-ed with the
/// namespace base. Entries are never removed.
#[derive(Debug)]
pub struct TypeRegistry {
    table: RwLock<Vec<Arc<BufferDataDescriptor>>>,
    limit: usize,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_limit(MAX_BUFFER_DATA_TYPES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            table: RwLock::new(Vec::with_capacity(limit)),
            limit,
        }
    }

    /// Register a descriptor and return its assigned id.
    ///
    /// An identical descriptor under an existing name returns the existing id.
    pub fn register(&self, descriptor: &BufferDataDescriptor) -> Result<TypeId> {
        descriptor.validate()?;

        let mut table = write(&self.table);

        if let Some(existing) = table.iter().find(|d| d.name == descriptor.name) {
            if existing.same_shape(descriptor) {
                return Ok(existing.type_id);
            }
            return Err(BufferError::invalid_descriptor(
                &descriptor.name,
                "A different type is already registered under this name",
            ));
        }

        if table.len() >= self.limit {
            return Err(BufferError::TooManyDataTypes { limit: self.limit });
        }

        let type_id = descriptor.kind.base() | table.len() as TypeId;
        let registered = BufferDataDescriptor {
            type_id,
            ..descriptor.clone()
        };
        log::debug!(
            "registered {} type '{}' as {:#x}",
            descriptor.kind.name(),
            descriptor.name,
            type_id
        );
        table.push(Arc::new(registered));

        Ok(type_id)
    }

    /// Find a type of the given kind by name
    pub fn find(&self, name: &str, kind: TypeKind) -> Result<TypeId> {
        read(&self.table)
            .iter()
            .find(|d| d.kind == kind && d.name == name)
            .map(|d| d.type_id)
            .ok_or_else(|| not_found(kind, format!("no {} type named '{}'", kind.name(), name)))
    }

    /// Descriptor for `type_id`, which must belong to `kind`
    pub fn get(&self, type_id: TypeId, kind: TypeKind) -> Result<Arc<BufferDataDescriptor>> {
        let table = read(&self.table);
        let index = (type_id & TYPE_INDEX_MASK) as usize;

        table
            .get(index)
            .filter(|d| d.type_id == type_id && d.kind == kind)
            .cloned()
            .ok_or_else(|| not_found(kind, format!("{} type {:#x}", kind.name(), type_id)))
    }

    /// Every registered descriptor in id order
    pub fn descriptors(&self) -> Vec<Arc<BufferDataDescriptor>> {
        read(&self.table).clone()
    }

    /// Name of a type of either kind, for diagnostics
    pub fn name_of(&self, type_id: TypeId) -> Option<String> {
        self.get(type_id, TypeKind::of(type_id))
            .ok()
            .map(|d| d.name.clone())
    }

    pub fn len(&self) -> usize {
        read(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

fn not_found(kind: TypeKind, what: String) -> BufferError {
    match kind {
        TypeKind::BufferData => BufferError::data_type_not_found(what),
        TypeKind::MetaData => BufferError::meta_data_type_not_found(what),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AllocationSource, META_DATA_TYPE_BASE};

    #[test]
    fn test_register_and_find() {
        let registry = TypeRegistry::new();
        let frame = registry
            .register(&BufferDataDescriptor::new("frame", AllocationSource::OsMemory))
            .unwrap();
        let params = registry
            .register(&BufferDataDescriptor::meta_data("params", 32))
            .unwrap();

        assert_eq!(frame, 0);
        assert_eq!(params, META_DATA_TYPE_BASE | 1);
        assert_eq!(registry.find("frame", TypeKind::BufferData).unwrap(), frame);
        assert_eq!(registry.find("params", TypeKind::MetaData).unwrap(), params);
        assert!(matches!(
            registry.find("params", TypeKind::BufferData),
            Err(BufferError::DataTypeNotFound { .. })
        ));

        let descriptor = registry.get(params, TypeKind::MetaData).unwrap();
        assert_eq!(descriptor.type_id, params);
        assert!(matches!(
            registry.get(params, TypeKind::BufferData),
            Err(BufferError::DataTypeNotFound { .. })
        ));
        assert!(matches!(
            registry.get(frame, TypeKind::MetaData),
            Err(BufferError::MetaDataTypeNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = TypeRegistry::new();
        let descriptor = BufferDataDescriptor::new("frame", AllocationSource::OsMemory);
        let first = registry.register(&descriptor).unwrap();
        assert_eq!(registry.register(&descriptor).unwrap(), first);
        assert_eq!(registry.len(), 1);

        let conflicting = descriptor.with_alignment(64);
        assert!(matches!(
            registry.register(&conflicting),
            Err(BufferError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_table_limit() {
        let registry = TypeRegistry::with_limit(2);
        registry
            .register(&BufferDataDescriptor::new("a", AllocationSource::OsMemory))
            .unwrap();
        registry
            .register(&BufferDataDescriptor::new("b", AllocationSource::OsMemory))
            .unwrap();
        assert!(matches!(
            registry.register(&BufferDataDescriptor::new("c", AllocationSource::OsMemory)),
            Err(BufferError::TooManyDataTypes { limit: 2 })
        ));
    }
}
