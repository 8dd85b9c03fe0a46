//! World transform propagation
//!
//! Walks the depth-sorted alive list once per frame. An entity is recomputed
//! when its own local matrix changed or when its effective parent (attach
//! parent first, scene parent otherwise) was recomputed earlier in the same
//! pass, or when another system replaced its world matrix since the last
//! pass. A link to a removed entity is dropped the first time it is met and
//! the entity continues as a root.

use super::CachedGroup;
use crate::ecs::components::WorldTransformData;
use crate::ecs::data_type::DataKey;
use crate::ecs::entity_manager::EntityManager;
use crate::ecs::system::EntitySystem;
use crate::foundation::math::Mat4;

/// Where an entity's world matrix is based
pub(crate) enum ParentWorld {
    /// No parent, or the parent carries no transform
    Root,
    /// World matrix of a live parent and whether it changed this pass
    Parent(Mat4, bool),
    /// The link points at a removed or recycled entity
    Stale,
}

/// Resolve the effective parent of `transform`
pub(crate) fn parent_world(
    manager: &EntityManager,
    key: DataKey<WorldTransformData>,
    transform: &WorldTransformData,
) -> ParentWorld {
    let Some(link) = transform.effective_parent() else {
        return ParentWorld::Root;
    };
    if !manager.is_reference_valid(link) {
        return ParentWorld::Stale;
    }
    match manager.data_at(link.index, key) {
        Some(parent) => ParentWorld::Parent(*parent.world(), parent.has_changed()),
        None => ParentWorld::Root,
    }
}

/// Computes `World = parent.World * Relative` in parent-before-child order
#[derive(Debug, Default)]
pub struct WorldTransformSystem {
    group: CachedGroup,
    entities: Vec<u32>,
    changed: Vec<u32>,
    stale_references: usize,
}

impl WorldTransformSystem {
    /// Entities recomputed in the last update
    pub fn changed_entities(&self) -> &[u32] {
        &self.changed
    }

    /// Links to removed entities dropped in the last update
    pub fn stale_references(&self) -> usize {
        self.stale_references
    }

    fn bind_group(&mut self, manager: &mut EntityManager) {
        let bound = manager
            .data_key::<WorldTransformData>()
            .and_then(|key| self.group.bind(manager, &[key.id()], false));
        if let Err(e) = bound {
            log::error!("WorldTransformSystem cannot query transforms: {}", e);
        }
    }
}

impl EntitySystem for WorldTransformSystem {
    fn init(&mut self, manager: &mut EntityManager) {
        self.bind_group(manager);
    }

    fn begin_query(&mut self, manager: &mut EntityManager) {
        self.entities.clear();
        self.changed.clear();
        self.stale_references = 0;
        if !self.group.is_bound(manager) {
            self.bind_group(manager);
        }
    }

    fn on_query(&mut self, manager: &mut EntityManager, _entities: &[u32]) {
        self.entities.extend_from_slice(self.group.entities(manager));
    }

    fn update(&mut self, manager: &mut EntityManager) {
        let Some(key) = manager.existing_key::<WorldTransformData>() else {
            return;
        };

        for &index in &self.entities {
            let Some(mut link) = manager.data_at(index, key).map(|t| parent_world(manager, key, t)) else {
                continue;
            };
            if matches!(link, ParentWorld::Stale) && manager.detach_stale_links(index) {
                self.stale_references += 1;
                link = match manager.data_at(index, key).map(|t| parent_world(manager, key, t)) {
                    Some(ParentWorld::Parent(world, changed)) => ParentWorld::Parent(world, changed),
                    _ => ParentWorld::Root,
                };
            }
            let (base, parent_changed) = match link {
                ParentWorld::Parent(world, changed) => (Some(world), changed),
                ParentWorld::Root | ParentWorld::Stale => (None, false),
            };

            let Some(transform) = manager.data_at_mut(index, key) else {
                continue;
            };
            if transform.world_pending() {
                transform.accept_world();
                transform.set_changed(true);
                self.changed.push(index);
                continue;
            }

            let changed = transform.need_validate() || parent_changed;
            transform.set_changed(changed);
            if changed {
                let world = match base {
                    Some(parent) if !transform.is_world_transform() => parent * transform.relative(),
                    _ => *transform.relative(),
                };
                transform.validate(world);
                self.changed.push(index);
            }
        }
    }
}
