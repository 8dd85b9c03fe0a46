//! Culling
//!
//! Refreshes world bounds when the transform changed and decides per entity
//! whether it is drawn: hidden entities are culled, shadow-map passes drop
//! entities that do not cast shadows, and the view box (when set) rejects
//! anything outside it.

use super::CachedGroup;
use crate::ecs::components::{CullingData, VisibleData, WorldTransformData};
use crate::ecs::data_type::DataTypeId;
use crate::ecs::entity_manager::EntityManager;
use crate::ecs::error::EcsError;
use crate::ecs::system::{EntitySystem, PipelineType, RenderPass, RenderSystem};

/// Culling render system; runs in every pipeline
#[derive(Debug, Default)]
pub struct CullingSystem {
    group: CachedGroup,
    entities: Vec<u32>,
    visible_count: usize,
}

impl CullingSystem {
    /// Entities that passed culling in the last update
    pub fn visible_count(&self) -> usize {
        self.visible_count
    }

    fn group_types(manager: &mut EntityManager) -> Result<[DataTypeId; 2], EcsError> {
        Ok([
            manager.data_key::<CullingData>()?.id(),
            manager.data_key::<WorldTransformData>()?.id(),
        ])
    }

    fn bind_group(&mut self, manager: &mut EntityManager) {
        // Hidden entities stay in the group so their result is reset.
        let bound = Self::group_types(manager).and_then(|types| self.group.bind(manager, &types, false));
        if let Err(e) = bound {
            log::error!("CullingSystem cannot query culling data: {}", e);
        }
    }
}

impl EntitySystem for CullingSystem {
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
        self.visible_count = 0;
        let (Some(culling_key), Some(transform_key)) = (
            manager.existing_key::<CullingData>(),
            manager.existing_key::<WorldTransformData>(),
        ) else {
            return;
        };
        let visible_key = manager.existing_key::<VisibleData>();
        let shadow_pass = manager.render_pipeline() == PipelineType::SHADOW_MAP;
        let view_box = manager.view_box();

        for &index in &self.entities {
            let Some(entity) = manager.entity_at(index) else {
                continue;
            };
            let Some(transform) = entity.get_data(transform_key) else {
                continue;
            };
            let transform_changed = transform.has_changed();
            let world = *transform.world();
            let shown = entity.is_visible();
            let casts_shadow = visible_key
                .and_then(|key| entity.get_data(key))
                .map_or(true, |v| v.shadow_casting);

            let Some(culling) = manager.data_at_mut(index, culling_key) else {
                continue;
            };
            if transform_changed || culling.need_validate {
                culling.world_box = culling.local_box.transformed(&world);
                culling.need_validate = false;
            }

            culling.camera_culled = view_box.is_some_and(|view| !culling.world_box.intersects(&view));
            culling.visible = shown && !culling.camera_culled && (!shadow_pass || casts_shadow);
            if culling.visible {
                self.visible_count += 1;
            }
        }
    }
}

impl RenderSystem for CullingSystem {
    fn render_pass(&self) -> RenderPass {
        RenderPass::Sky
    }

    fn sorting_priority(&self) -> i32 {
        i32::MIN
    }

    fn is_culling(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntityManagerConfig;
    use crate::ecs::systems::WorldTransformSystem;
    use crate::foundation::math::{translation, Aabb, Point3, Vec3};

    fn scene() -> (EntityManager, crate::ecs::EntityHandle, crate::ecs::EntityHandle) {
        let mut manager = EntityManager::with_config(EntityManagerConfig::bare()).unwrap();
        manager.add_system::<WorldTransformSystem>().unwrap();
        manager.add_render_system::<CullingSystem>().unwrap();

        let unit = Aabb::from_center_extents(Point3::origin(), Vec3::new(1.0, 1.0, 1.0));
        let near = manager.create_entity();
        manager.add_transform_data(near, None, translation(0.0, 0.0, 0.0)).unwrap();
        manager.insert_data(near, CullingData::new(unit)).unwrap();

        let far = manager.create_entity();
        manager.add_transform_data(far, None, translation(100.0, 0.0, 0.0)).unwrap();
        manager.insert_data(far, CullingData::new(unit)).unwrap();
        manager
            .insert_data(
                far,
                VisibleData {
                    shadow_casting: false,
                    ..VisibleData::default()
                },
            )
            .unwrap();
        (manager, near, far)
    }

    #[test]
    fn test_world_box_follows_transform() {
        let (mut manager, _, far) = scene();
        manager.update().unwrap();
        let culling = manager.get_data::<CullingData>(far).unwrap();
        assert_eq!(culling.world_box.min, Point3::new(99.0, -1.0, -1.0));
        assert!(culling.visible);
    }

    #[test]
    fn test_view_box_culls_outside_entities() {
        let (mut manager, near, far) = scene();
        manager.set_view_box(Some(Aabb::from_center_extents(Point3::origin(), Vec3::new(10.0, 10.0, 10.0))));
        manager.update().unwrap();

        assert!(manager.get_data::<CullingData>(near).unwrap().visible);
        let far_culling = manager.get_data::<CullingData>(far).unwrap();
        assert!(far_culling.camera_culled);
        assert!(!far_culling.visible);
        assert_eq!(manager.get_render_system::<CullingSystem>().unwrap().visible_count(), 1);
    }

    #[test]
    fn test_shadow_pipeline_drops_non_casters() {
        let (mut manager, near, far) = scene();
        manager.update().unwrap();

        manager.set_render_pipeline(PipelineType::SHADOW_MAP);
        manager.cull_and_render();
        assert!(manager.get_data::<CullingData>(near).unwrap().visible);
        assert!(!manager.get_data::<CullingData>(far).unwrap().visible);

        manager.set_render_pipeline(PipelineType::FORWARD);
        manager.cull_and_render();
        assert!(manager.get_data::<CullingData>(far).unwrap().visible);
    }
}
