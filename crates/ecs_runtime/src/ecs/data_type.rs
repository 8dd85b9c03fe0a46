//! Data type registry
//!
//! Every entity data type gets one small dense index. The index selects the
//! slot inside each entity's fixed slot array, so looking up a data instance
//! never searches.

use super::entity_data::EntityData;
use super::error::EcsError;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Dense index of a registered data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataTypeId(pub(crate) u32);

impl DataTypeId {
    /// Slot position inside an entity
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw value
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DataTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataType({})", self.0)
    }
}

/// Typed slot key, obtained once and reused on hot paths
pub struct DataKey<T> {
    id: DataTypeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DataKey<T> {
    pub(crate) fn new(id: DataTypeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Untyped slot id
    pub fn id(self) -> DataTypeId {
        self.id
    }
}

impl<T> Clone for DataKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DataKey<T> {}

impl<T> PartialEq for DataKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for DataKey<T> {}

impl<T> fmt::Debug for DataKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey<{}>({})", std::any::type_name::<T>(), self.id.0)
    }
}

/// Maps data types to slot indices
///
/// Indices are handed out in registration order. Building the registry in one
/// explicit step before creating a manager makes the mapping independent of
/// which system happens to touch a type first.
#[derive(Debug, Clone)]
pub struct DataTypeRegistry {
    by_type: HashMap<TypeId, DataTypeId>,
    names: Vec<&'static str>,
    max_slots: usize,
}

impl DataTypeRegistry {
    /// Create an empty registry with room for `max_slots` types
    pub fn new(max_slots: usize) -> Self {
        Self {
            by_type: HashMap::new(),
            names: Vec::new(),
            max_slots,
        }
    }

    /// Index of `T`, assigning the next free one on first use
    pub fn register<T: EntityData>(&mut self) -> Result<DataTypeId, EcsError> {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return Ok(id);
        }

        let type_name = std::any::type_name::<T>();
        if self.names.len() >= self.max_slots {
            log::error!(
                "Data type {} cannot be registered, all {} slots are used",
                type_name,
                self.max_slots
            );
            return Err(EcsError::DataSlotsExhausted {
                type_name,
                max_slots: self.max_slots,
            });
        }

        let id = DataTypeId(self.names.len() as u32);
        self.by_type.insert(TypeId::of::<T>(), id);
        self.names.push(type_name);
        log::debug!("Registered data type {} as {}", type_name, id);
        Ok(id)
    }

    /// Builder-style registration for the up-front schema step
    pub fn with<T: EntityData>(mut self) -> Result<Self, EcsError> {
        self.register::<T>()?;
        Ok(self)
    }

    /// Typed key for `T`, registering it if needed
    pub fn key<T: EntityData>(&mut self) -> Result<DataKey<T>, EcsError> {
        self.register::<T>().map(DataKey::new)
    }

    /// Index of `T` if it was registered
    pub fn index_of<T: EntityData>(&self) -> Option<DataTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Typed key for `T` if it was registered
    pub fn existing_key<T: EntityData>(&self) -> Option<DataKey<T>> {
        self.index_of::<T>().map(DataKey::new)
    }

    /// Check that `id` belongs to this registry
    pub fn check(&self, id: DataTypeId) -> Result<DataTypeId, EcsError> {
        if id.index() < self.names.len() {
            Ok(id)
        } else {
            Err(EcsError::UnknownDataType(id.0))
        }
    }

    /// Rust type name of a registered index
    pub fn type_name(&self, id: DataTypeId) -> Option<&'static str> {
        self.names.get(id.index()).copied()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing is registered yet
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Slot count every entity is created with
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Position;
    impl EntityData for Position {}

    #[derive(Default)]
    struct Velocity;
    impl EntityData for Velocity {}

    #[derive(Default)]
    struct Health;
    impl EntityData for Health {}

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = DataTypeRegistry::new(8);
        let a = registry.register::<Position>().unwrap();
        let b = registry.register::<Velocity>().unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.register::<Position>().unwrap(), a);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.index_of::<Velocity>(), Some(b));
    }

    #[test]
    fn test_indices_follow_registration_order() {
        let registry = DataTypeRegistry::new(8)
            .with::<Velocity>()
            .and_then(DataTypeRegistry::with::<Position>)
            .unwrap();
        assert_eq!(registry.index_of::<Velocity>().map(DataTypeId::raw), Some(0));
        assert_eq!(registry.index_of::<Position>().map(DataTypeId::raw), Some(1));
        assert!(registry.index_of::<Health>().is_none());
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut registry = DataTypeRegistry::new(2);
        registry.register::<Position>().unwrap();
        registry.register::<Velocity>().unwrap();
        let err = registry.register::<Health>().unwrap_err();
        assert!(matches!(err, EcsError::DataSlotsExhausted { max_slots: 2, .. }));
        // Already registered types still resolve.
        assert!(registry.register::<Position>().is_ok());
    }

    #[test]
    fn test_check_rejects_foreign_ids() {
        let mut registry = DataTypeRegistry::new(4);
        let id = registry.register::<Position>().unwrap();
        assert!(registry.check(id).is_ok());
        assert!(matches!(
            registry.check(DataTypeId(3)),
            Err(EcsError::UnknownDataType(3))
        ));
        assert!(registry.type_name(id).unwrap().ends_with("Position"));
    }
}
