//! Mesh renderer
//!
//! Collects visible meshes during update and replays them through the
//! video driver in the matching render sub-pass.

use super::CachedGroup;
use crate::ecs::components::{CullingData, RenderMeshData, WorldTransformData};
use crate::ecs::data_type::DataTypeId;
use crate::ecs::entity_manager::EntityManager;
use crate::ecs::error::EcsError;
use crate::ecs::render_driver::{TransformState, VideoDriver};
use crate::ecs::system::{EntitySystem, RenderPass, RenderSystem};
use crate::foundation::math::Mat4;

#[derive(Debug, Clone, Copy)]
struct DrawItem {
    world: Mat4,
    mesh: RenderMeshData,
}

impl DrawItem {
    fn submit(&self, driver: &mut dyn VideoDriver) {
        driver.set_transform(TransformState::World, &self.world);
        driver.set_material(self.mesh.material);
        driver.draw_mesh_buffer(self.mesh.mesh_buffer);
    }
}

/// Draws [`RenderMeshData`] entities
#[derive(Debug, Default)]
pub struct MeshRenderer {
    group: CachedGroup,
    entities: Vec<u32>,
    draws: Vec<DrawItem>,
}

impl MeshRenderer {
    /// Meshes that will be drawn this frame
    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    fn submit(&self, manager: &mut EntityManager, filter: impl Fn(&RenderMeshData) -> bool) {
        let submitted = manager.with_video_driver(|driver, _| {
            for item in self.draws.iter().filter(|item| filter(&item.mesh)) {
                item.submit(driver);
            }
        });
        if submitted.is_none() && !self.draws.is_empty() {
            log::trace!("MeshRenderer has {} draws but no video driver", self.draws.len());
        }
    }

    fn group_types(manager: &mut EntityManager) -> Result<[DataTypeId; 2], EcsError> {
        Ok([
            manager.data_key::<RenderMeshData>()?.id(),
            manager.data_key::<WorldTransformData>()?.id(),
        ])
    }

    fn bind_group(&mut self, manager: &mut EntityManager) {
        let bound = Self::group_types(manager).and_then(|types| self.group.bind(manager, &types, true));
        if let Err(e) = bound {
            log::error!("MeshRenderer cannot query meshes: {}", e);
        }
    }
}

impl EntitySystem for MeshRenderer {
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
        self.draws.clear();
        let (Some(mesh_key), Some(transform_key)) = (
            manager.existing_key::<RenderMeshData>(),
            manager.existing_key::<WorldTransformData>(),
        ) else {
            return;
        };
        let culling_key = manager.existing_key::<CullingData>();

        for &index in &self.entities {
            let Some(entity) = manager.entity_at(index) else {
                continue;
            };
            let visible = match culling_key.and_then(|key| entity.get_data(key)) {
                Some(culling) => culling.visible,
                None => entity.is_visible(),
            };
            if !visible {
                continue;
            }
            if let (Some(mesh), Some(transform)) = (entity.get_data(mesh_key), entity.get_data(transform_key)) {
                self.draws.push(DrawItem {
                    world: *transform.world(),
                    mesh: *mesh,
                });
            }
        }
    }
}

impl RenderSystem for MeshRenderer {
    fn render(&mut self, manager: &mut EntityManager) {
        self.submit(manager, |mesh| !mesh.transparent);
    }

    fn render_transparent(&mut self, manager: &mut EntityManager) {
        self.submit(manager, |mesh| mesh.transparent);
    }

    fn render_emission(&mut self, manager: &mut EntityManager) {
        self.submit(manager, |mesh| mesh.emissive);
    }

    fn render_pass(&self) -> RenderPass {
        RenderPass::Opaque
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntityManagerConfig;
    use crate::ecs::render_driver::{DriverCommand, MaterialId, MeshBufferId, RecordingDriver};
    use crate::ecs::systems::WorldTransformSystem;
    use crate::foundation::math::translation;

    fn recorded(manager: &EntityManager) -> Vec<DriverCommand> {
        manager
            .video_driver()
            .and_then(|driver| driver.as_any().downcast_ref::<RecordingDriver>())
            .map(|driver| driver.commands.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_opaque_before_transparent_and_hidden_skipped() {
        let mut manager = EntityManager::with_config(EntityManagerConfig::bare()).unwrap();
        manager.add_system::<WorldTransformSystem>().unwrap();
        manager.add_render_system::<MeshRenderer>().unwrap();
        manager.set_video_driver(Box::new(RecordingDriver::default()));

        let glass = manager.create_entity();
        manager.add_transform_data(glass, None, translation(1.0, 0.0, 0.0)).unwrap();
        manager
            .insert_data(glass, RenderMeshData::transparent(MeshBufferId(2), MaterialId(20)))
            .unwrap();

        let rock = manager.create_entity();
        manager.add_transform_data(rock, None, translation(2.0, 0.0, 0.0)).unwrap();
        manager
            .insert_data(rock, RenderMeshData::opaque(MeshBufferId(1), MaterialId(10)))
            .unwrap();

        let hidden = manager.create_entity();
        manager.add_transform_data(hidden, None, Mat4::identity()).unwrap();
        manager
            .insert_data(hidden, RenderMeshData::opaque(MeshBufferId(3), MaterialId(30)))
            .unwrap();
        manager.set_visible(hidden, false).unwrap();

        manager.update().unwrap();
        manager.render();

        let commands = recorded(&manager);
        assert_eq!(
            commands,
            vec![
                DriverCommand::SetTransform(TransformState::World, translation(2.0, 0.0, 0.0)),
                DriverCommand::SetMaterial(MaterialId(10)),
                DriverCommand::DrawMeshBuffer(MeshBufferId(1)),
                DriverCommand::SetTransform(TransformState::World, translation(1.0, 0.0, 0.0)),
                DriverCommand::SetMaterial(MaterialId(20)),
                DriverCommand::DrawMeshBuffer(MeshBufferId(2)),
            ]
        );
    }

    #[test]
    fn test_emission_pass_draws_emissive_only() {
        let mut manager = EntityManager::with_config(EntityManagerConfig::bare()).unwrap();
        manager.add_system::<WorldTransformSystem>().unwrap();
        manager.add_render_system::<MeshRenderer>().unwrap();
        manager.set_video_driver(Box::new(RecordingDriver::default()));

        let lamp = manager.create_entity();
        manager.add_transform_data(lamp, None, Mat4::identity()).unwrap();
        manager
            .insert_data(
                lamp,
                RenderMeshData {
                    emissive: true,
                    ..RenderMeshData::opaque(MeshBufferId(7), MaterialId(1))
                },
            )
            .unwrap();
        let plain = manager.create_entity();
        manager.add_transform_data(plain, None, Mat4::identity()).unwrap();
        manager
            .insert_data(plain, RenderMeshData::opaque(MeshBufferId(8), MaterialId(1)))
            .unwrap();

        manager.update().unwrap();
        manager.render_emission();

        let draws: Vec<_> = recorded(&manager)
            .into_iter()
            .filter_map(|c| match c {
                DriverCommand::DrawMeshBuffer(id) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![MeshBufferId(7)]);
    }
}
