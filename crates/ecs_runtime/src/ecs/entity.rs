//! Entity implementation
//!
//! An entity is a fixed array of data slots plus a little bookkeeping. The
//! slot for a data type is its [`DataTypeId`], so lookups are plain indexing.

use super::data_type::{DataKey, DataTypeId};
use super::entity_data::EntityData;
use std::fmt;

/// Generation-checked reference to an entity slot
///
/// The index is the entity's position in the manager's backing array and
/// stays valid across recycling. The generation changes every time the slot
/// is reused, which is how a stale reference gets detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle {
    index: u32,
    generation: u32,
}

impl EntityHandle {
    /// Create a handle from raw parts
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the manager
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Reuse count of the slot when the handle was issued
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}, gen: {})", self.index, self.generation)
    }
}

/// Entity storage slot
pub struct Entity {
    index: u32,
    generation: u32,
    alive: bool,
    visible: bool,
    id: Option<String>,
    data: Box<[Option<Box<dyn EntityData>>]>,
}

impl Entity {
    pub(crate) fn new(index: u32, slots: usize) -> Self {
        Self {
            index,
            generation: 0,
            alive: true,
            visible: true,
            id: None,
            data: (0..slots).map(|_| None).collect(),
        }
    }

    /// Position in the manager's entity array
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Current generation of this slot
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Handle naming this entity in its current generation
    pub fn handle(&self) -> EntityHandle {
        EntityHandle::new(self.index, self.generation)
    }

    /// Whether the slot currently holds a live entity
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Visibility flag; children are not affected at this layer
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Optional string id used for name lookup
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// O(1) slot lookup
    #[inline]
    pub fn get_data_by_index(&self, id: DataTypeId) -> Option<&dyn EntityData> {
        self.data.get(id.index())?.as_deref()
    }

    /// O(1) mutable slot lookup
    #[inline]
    pub fn get_data_by_index_mut(&mut self, id: DataTypeId) -> Option<&mut (dyn EntityData + 'static)> {
        self.data.get_mut(id.index())?.as_deref_mut()
    }

    /// Typed slot lookup
    #[inline]
    pub fn get_data<T: EntityData>(&self, key: DataKey<T>) -> Option<&T> {
        self.get_data_by_index(key.id())?.as_any().downcast_ref::<T>()
    }

    /// Typed mutable slot lookup
    #[inline]
    pub fn get_data_mut<T: EntityData>(&mut self, key: DataKey<T>) -> Option<&mut T> {
        self.get_data_by_index_mut(key.id())?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// Whether the slot for `id` is filled
    pub fn has_data(&self, id: DataTypeId) -> bool {
        self.get_data_by_index(id).is_some()
    }

    /// Number of filled slots
    pub fn data_count(&self) -> usize {
        self.data.iter().filter(|slot| slot.is_some()).count()
    }

    /// Ids of the filled slots, ascending
    pub fn data_types(&self) -> impl Iterator<Item = DataTypeId> + '_ {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| DataTypeId(i as u32))
    }

    /// Store `data` in slot `id`, dropping whatever was there
    pub(crate) fn set_data(
        &mut self,
        id: DataTypeId,
        mut data: Box<dyn EntityData>,
    ) -> &mut (dyn EntityData + 'static) {
        data.set_owner(self.handle());
        &mut **self.data[id.index()].insert(data)
    }

    /// Drop the data in slot `id`; returns whether there was any
    pub(crate) fn remove_data(&mut self, id: DataTypeId) -> bool {
        self.data
            .get_mut(id.index())
            .and_then(Option::take)
            .is_some()
    }

    /// Drop every data instance, returning the ids that were filled
    pub(crate) fn remove_all_data(&mut self) -> Vec<DataTypeId> {
        let removed: Vec<DataTypeId> = self.data_types().collect();
        for slot in self.data.iter_mut() {
            *slot = None;
        }
        removed
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub(crate) fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub(crate) fn kill(&mut self) {
        self.alive = false;
        self.id = None;
    }

    /// Bring a recycled slot back to life under a new generation
    pub(crate) fn revive(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.alive = true;
        self.visible = true;
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .field("alive", &self.alive)
            .field("visible", &self.visible)
            .field("id", &self.id)
            .field("data_count", &self.data_count())
            .finish()
    }
}
