//! Inverse world transforms, recomputed only for changed entities

use super::CachedGroup;
use crate::ecs::components::{WorldInverseTransformData, WorldTransformData};
use crate::ecs::data_type::DataTypeId;
use crate::ecs::entity_manager::EntityManager;
use crate::ecs::error::EcsError;
use crate::ecs::system::EntitySystem;
use crate::foundation::math::inverse_or_identity;

/// Keeps [`WorldInverseTransformData`] in sync with the world matrix
///
/// Must run after [`WorldTransformSystem`](super::WorldTransformSystem);
/// it reads the change flags that pass leaves behind.
#[derive(Debug, Default)]
pub struct WorldInverseTransformSystem {
    group: CachedGroup,
    entities: Vec<u32>,
    inverted: usize,
}

impl WorldInverseTransformSystem {
    /// Number of matrices inverted in the last update
    pub fn inverted_last_frame(&self) -> usize {
        self.inverted
    }

    fn group_types(manager: &mut EntityManager) -> Result<[DataTypeId; 2], EcsError> {
        Ok([
            manager.data_key::<WorldTransformData>()?.id(),
            manager.data_key::<WorldInverseTransformData>()?.id(),
        ])
    }

    fn bind_group(&mut self, manager: &mut EntityManager) {
        let bound = Self::group_types(manager).and_then(|types| self.group.bind(manager, &types, false));
        if let Err(e) = bound {
            log::error!("WorldInverseTransformSystem cannot query transforms: {}", e);
        }
    }
}

impl EntitySystem for WorldInverseTransformSystem {
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
        self.inverted = 0;
        let (Some(transform_key), Some(inverse_key)) = (
            manager.existing_key::<WorldTransformData>(),
            manager.existing_key::<WorldInverseTransformData>(),
        ) else {
            return;
        };

        for &index in &self.entities {
            let Some(transform) = manager.data_at(index, transform_key) else {
                continue;
            };
            let has_changed = transform.has_changed();
            let world = *transform.world();

            let Some(inverse) = manager.data_at_mut(index, inverse_key) else {
                continue;
            };
            if has_changed || inverse.need_validate() {
                inverse.validate(inverse_or_identity(&world));
                self.inverted += 1;
            }
        }
    }
}
