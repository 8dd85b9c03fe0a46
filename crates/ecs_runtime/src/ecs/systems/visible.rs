//! Visibility cascade
//!
//! An entity with [`VisibleData`] is visible only when its own flag is set
//! and its effective parent entity is visible. The result lands in the
//! entity's visible flag, which drives the visible group.

use super::CachedGroup;
use crate::ecs::components::{VisibleData, WorldTransformData};
use crate::ecs::entity_manager::EntityManager;
use crate::ecs::system::EntitySystem;

/// Pushes hierarchical visibility into the entity flags
#[derive(Debug, Default)]
pub struct VisibleSystem {
    group: CachedGroup,
    entities: Vec<u32>,
}

impl VisibleSystem {
    fn bind_group(&mut self, manager: &mut EntityManager) {
        let bound = manager
            .data_key::<VisibleData>()
            .and_then(|key| self.group.bind(manager, &[key.id()], false));
        if let Err(e) = bound {
            log::error!("VisibleSystem cannot query visibility data: {}", e);
        }
    }
}

impl EntitySystem for VisibleSystem {
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
        self.entities.extend_from_slice(self.group.entities(manager));
    }

    fn update(&mut self, manager: &mut EntityManager) {
        let Some(visible_key) = manager.existing_key::<VisibleData>() else {
            return;
        };
        let transform_key = manager.existing_key::<WorldTransformData>();

        for &index in &self.entities {
            let Some(entity) = manager.entity_at(index) else {
                continue;
            };
            let handle = entity.handle();
            let own = entity.get_data(visible_key).is_some_and(|v| v.visible);

            let parent_visible = transform_key
                .and_then(|key| entity.get_data(key))
                .and_then(WorldTransformData::effective_parent)
                .filter(|&link| manager.is_reference_valid(link))
                .and_then(|link| manager.entity_at(link.index))
                .map_or(true, |parent| parent.is_visible());

            if let Err(e) = manager.set_visible(handle, own && parent_visible) {
                log::warn!("Visibility update skipped: {}", e);
            }
        }
    }
}
