//! Built-in systems
//!
//! Transform propagation, visibility, lighting, culling and mesh drawing.
//! [`register_defaults`] installs them in the order a frame needs them.

pub mod culling;
pub mod late_world_transform;
pub mod lighting;
pub mod mesh_renderer;
pub mod visible;
pub mod world_inverse_transform;
pub mod world_transform;

pub use culling::CullingSystem;
pub use late_world_transform::LateWorldTransformSystem;
pub use lighting::{LightSystem, ResolvedLight, MAX_DIRECTIONAL_LIGHTS, MAX_POINT_LIGHTS, MAX_SPOT_LIGHTS};
pub use mesh_renderer::MeshRenderer;
pub use visible::VisibleSystem;
pub use world_inverse_transform::WorldInverseTransformSystem;
pub use world_transform::WorldTransformSystem;

use crate::ecs::data_type::DataTypeId;
use crate::ecs::entity_manager::EntityManager;
use crate::ecs::error::EcsError;
use crate::ecs::group::GroupId;

/// Group a built-in system iterates, recreated if it was removed
#[derive(Debug, Default)]
pub(crate) struct CachedGroup {
    id: Option<GroupId>,
}

impl CachedGroup {
    /// Bind to the group over `types`, over the visible entities only when
    /// `visible_only` is set
    pub(crate) fn bind(
        &mut self,
        manager: &mut EntityManager,
        types: &[DataTypeId],
        visible_only: bool,
    ) -> Result<GroupId, EcsError> {
        if let Some(id) = self.id.filter(|&id| manager.group(id).is_some()) {
            return Ok(id);
        }
        let id = if visible_only {
            manager.create_group_from_visible(types)?
        } else {
            manager.create_group(types)?
        };
        self.id = Some(id);
        Ok(id)
    }

    /// Whether the bound group still exists
    pub(crate) fn is_bound(&self, manager: &EntityManager) -> bool {
        self.id.is_some_and(|id| manager.group(id).is_some())
    }

    /// Cached entities of the group; empty when unbound
    pub(crate) fn entities<'m>(&self, manager: &'m EntityManager) -> &'m [u32] {
        match self.id {
            Some(id) => manager.group_entities(id),
            None => &[],
        }
    }
}

/// Register the built-in systems
///
/// Update order: world transform, inverse transform, visibility, lights,
/// culling, then the mesh renderer. [`LateWorldTransformSystem`] is left out;
/// add it after whatever moves attach targets.
pub fn register_defaults(manager: &mut EntityManager) -> Result<(), EcsError> {
    manager.add_system::<WorldTransformSystem>()?;
    manager.add_system::<WorldInverseTransformSystem>()?;
    manager.add_system::<VisibleSystem>()?;
    manager.add_system::<LightSystem>()?;
    manager.add_render_system::<CullingSystem>()?;
    manager.add_render_system::<MeshRenderer>()?;
    log::debug!("Registered {} built-in systems", manager.system_count());
    Ok(())
}
