//! Entity groups
//!
//! A group is a cached, filtered list of entity indices. It only rebuilds
//! when something it depends on changed: a tracked data slot, the visible
//! flag for visibility groups, or the parent group's own result.

use super::data_type::DataTypeId;
use super::entity::Entity;
use std::fmt;

/// Identifier of a group registered with an [`EntityManager`](super::EntityManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) usize);

impl GroupId {
    /// Position in the manager's group list
    pub fn index(self) -> usize {
        self.0
    }
}

/// Extra condition applied after the data type check
pub enum GroupFilter {
    /// Only the tracked data types matter
    Data,
    /// Entity must also be visible
    Visible,
    /// Entity must also pass a caller supplied predicate
    Custom(Box<dyn Fn(&Entity) -> bool>),
}

impl fmt::Debug for GroupFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("Data"),
            Self::Visible => f.write_str("Visible"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Cached filtered view over the alive entities or over a parent group
#[derive(Debug)]
pub struct EntityGroup {
    types: Vec<DataTypeId>,
    parent: Option<GroupId>,
    filter: GroupFilter,
    entities: Vec<u32>,
    need_query: bool,
    query_count: u64,
    parent_stamp: u64,
}

impl EntityGroup {
    /// Group selecting entities that own every type in `types`
    pub fn new(types: &[DataTypeId], parent: Option<GroupId>, filter: GroupFilter) -> Self {
        Self {
            types: normalize(types),
            parent,
            filter,
            entities: Vec::new(),
            need_query: true,
            query_count: 0,
            parent_stamp: 0,
        }
    }

    /// Rebuild the cached list from `candidates` and mark the group clean
    ///
    /// `entities` is the manager's backing array; `candidates` are indices
    /// into it, either the alive list or the parent group's result.
    pub fn on_query(&mut self, entities: &[Entity], candidates: &[u32]) {
        self.entities.clear();
        for &index in candidates {
            let Some(entity) = entities.get(index as usize) else {
                continue;
            };
            if entity.is_alive() && self.accepts(entity) {
                self.entities.push(index);
            }
        }
        self.need_query = false;
        self.query_count += 1;
    }

    /// Put the cached entities in the order given by `rank[index]`
    ///
    /// Used after the alive list was re-sorted; membership and the rebuild
    /// counter are untouched.
    pub(crate) fn reorder(&mut self, rank: &[u32]) {
        self.entities
            .sort_by_key(|&index| rank.get(index as usize).copied().unwrap_or(u32::MAX));
    }

    /// Whether `entity` passes the type check and the filter
    pub fn accepts(&self, entity: &Entity) -> bool {
        if !self.types.iter().all(|&id| entity.has_data(id)) {
            return false;
        }
        match &self.filter {
            GroupFilter::Data => true,
            GroupFilter::Visible => entity.is_visible(),
            GroupFilter::Custom(predicate) => predicate(entity),
        }
    }

    /// Force a rebuild on the next query pass
    pub fn notify_need_query(&mut self) {
        self.need_query = true;
    }

    /// Whether the cached list is out of date
    pub fn need_query(&self) -> bool {
        self.need_query
    }

    /// Cached entity indices from the last rebuild
    pub fn entities(&self) -> &[u32] {
        &self.entities
    }

    /// Number of cached entities
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Whether the group depends on data type `id`
    pub fn tracks(&self, id: DataTypeId) -> bool {
        self.types.binary_search(&id).is_ok()
    }

    /// Tracked data types, sorted
    pub fn types(&self) -> &[DataTypeId] {
        &self.types
    }

    /// Group this one filters, if chained
    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    /// Filter applied on top of the type check
    pub fn filter(&self) -> &GroupFilter {
        &self.filter
    }

    /// Number of rebuilds so far
    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    pub(crate) fn is_custom(&self) -> bool {
        matches!(self.filter, GroupFilter::Custom(_))
    }

    pub(crate) fn is_visible_filter(&self) -> bool {
        matches!(self.filter, GroupFilter::Visible)
    }

    pub(crate) fn same_shape(&self, types: &[DataTypeId], parent: Option<GroupId>, visible: bool) -> bool {
        !self.is_custom() && self.parent == parent && self.is_visible_filter() == visible && self.types == types
    }

    /// True when the parent rebuilt after this group last looked at it
    pub(crate) fn parent_changed(&self, parent_query_count: u64) -> bool {
        self.parent_stamp != parent_query_count
    }

    pub(crate) fn set_parent_stamp(&mut self, parent_query_count: u64) {
        self.parent_stamp = parent_query_count;
    }
}

/// Sorted, deduplicated copy of a type list
pub(crate) fn normalize(types: &[DataTypeId]) -> Vec<DataTypeId> {
    let mut types = types.to_vec();
    types.sort_unstable();
    types.dedup();
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::entity_data::EntityData;

    struct Marker;
    impl EntityData for Marker {}

    fn entity_with(index: u32, ids: &[u32]) -> Entity {
        let mut entity = Entity::new(index, 4);
        for &id in ids {
            entity.set_data(DataTypeId(id), Box::new(Marker));
        }
        entity
    }

    #[test]
    fn test_new_group_needs_query() {
        let group = EntityGroup::new(&[DataTypeId(1)], None, GroupFilter::Data);
        assert!(group.need_query());
        assert_eq!(group.query_count(), 0);
        assert_eq!(group.entity_count(), 0);
    }

    #[test]
    fn test_on_query_requires_every_type() {
        let entities = vec![
            entity_with(0, &[0, 1]),
            entity_with(1, &[0]),
            entity_with(2, &[1, 0, 3]),
        ];
        let mut group = EntityGroup::new(&[DataTypeId(1), DataTypeId(0)], None, GroupFilter::Data);
        group.on_query(&entities, &[0, 1, 2]);

        assert_eq!(group.entities(), &[0, 2]);
        assert!(!group.need_query());
        assert_eq!(group.query_count(), 1);
    }

    #[test]
    fn test_visible_filter_and_custom_predicate() {
        let mut entities = vec![entity_with(0, &[0]), entity_with(1, &[0])];
        entities[1].set_visible(false);

        let mut visible = EntityGroup::new(&[], None, GroupFilter::Visible);
        visible.on_query(&entities, &[0, 1]);
        assert_eq!(visible.entities(), &[0]);

        let mut odd = EntityGroup::new(
            &[DataTypeId(0)],
            None,
            GroupFilter::Custom(Box::new(|e: &Entity| e.index() % 2 == 1)),
        );
        odd.on_query(&entities, &[0, 1]);
        assert_eq!(odd.entities(), &[1]);
    }

    #[test]
    fn test_reorder_keeps_members_and_count() {
        let entities = vec![entity_with(0, &[0]), entity_with(1, &[0]), entity_with(2, &[0])];
        let mut group = EntityGroup::new(&[DataTypeId(0)], None, GroupFilter::Data);
        group.on_query(&entities, &[0, 1, 2]);

        // Entity 2 now sorts first, entity 0 last.
        group.reorder(&[2, 1, 0]);
        assert_eq!(group.entities(), &[2, 1, 0]);
        assert_eq!(group.query_count(), 1);
        assert!(!group.need_query());
    }

    #[test]
    fn test_types_are_normalized() {
        let group = EntityGroup::new(
            &[DataTypeId(3), DataTypeId(1), DataTypeId(3)],
            None,
            GroupFilter::Data,
        );
        assert_eq!(group.types(), &[DataTypeId(1), DataTypeId(3)]);
        assert!(group.tracks(DataTypeId(3)));
        assert!(!group.tracks(DataTypeId(2)));
    }
}
