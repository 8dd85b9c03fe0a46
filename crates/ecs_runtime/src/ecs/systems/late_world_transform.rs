//! Late transform pass for attached entities
//!
//! Systems that run after the main transform pass (animation, physics
//! follow-ups) may move an attach target. This pass re-derives the world
//! matrix of every attached entity and of everything below it, without
//! looking at change flags.

use super::world_transform::{parent_world, ParentWorld};
use super::CachedGroup;
use crate::ecs::components::WorldTransformData;
use crate::ecs::entity_manager::EntityManager;
use crate::ecs::system::EntitySystem;

/// Recomputes attached subtrees late in the frame
///
/// Not registered by default; add it with an order after the systems that
/// move attach targets.
#[derive(Debug, Default)]
pub struct LateWorldTransformSystem {
    group: CachedGroup,
    entities: Vec<u32>,
}

impl LateWorldTransformSystem {
    /// Entities handled in the last frame, parent first
    pub fn entities(&self) -> &[u32] {
        &self.entities
    }

    fn bind_group(&mut self, manager: &mut EntityManager) {
        let bound = manager
            .data_key::<WorldTransformData>()
            .and_then(|key| self.group.bind(manager, &[key.id()], false));
        if let Err(e) = bound {
            log::error!("LateWorldTransformSystem cannot query transforms: {}", e);
        }
    }
}

impl EntitySystem for LateWorldTransformSystem {
    fn init(&mut self, manager: &mut EntityManager) {
        self.bind_group(manager);
    }

    fn begin_query(&mut self, manager: &mut EntityManager) {
        self.entities.clear();
        if !self.group.is_bound(manager) {
            self.bind_group(manager);
        }
    }

    fn on_query(&mut self, manager: &mut EntityManager, _entities: &[u32]) {
        let Some(key) = manager.existing_key::<WorldTransformData>() else {
            return;
        };

        // The group follows the depth sorted alive list, so a parent is
        // classified before its children.
        let mut late = vec![false; manager.num_entities()];
        for &index in self.group.entities(manager) {
            let Some(transform) = manager.data_at(index, key) else {
                continue;
            };
            let attached = transform.attach_parent().is_some();
            let below_late = transform
                .effective_parent()
                .filter(|&link| manager.is_reference_valid(link))
                .is_some_and(|link| late.get(link.index as usize).copied().unwrap_or(false));

            if attached || below_late {
                if let Some(flag) = late.get_mut(index as usize) {
                    *flag = true;
                }
                self.entities.push(index);
            }
        }
    }

    fn update(&mut self, manager: &mut EntityManager) {
        let Some(key) = manager.existing_key::<WorldTransformData>() else {
            return;
        };

        for &index in &self.entities {
            let Some(transform) = manager.data_at(index, key) else {
                continue;
            };
            let base = match parent_world(manager, key, transform) {
                ParentWorld::Parent(world, _) => Some(world),
                ParentWorld::Root | ParentWorld::Stale => None,
            };

            let Some(transform) = manager.data_at_mut(index, key) else {
                continue;
            };
            let world = match base {
                Some(parent) if !transform.is_world_transform() => parent * transform.relative(),
                _ => *transform.relative(),
            };
            if world != *transform.world() {
                transform.set_changed(true);
            }
            transform.validate(world);
        }
    }
}
