//! Culling data

use crate::ecs::entity_data::EntityData;
use crate::foundation::math::Aabb;

/// Bounds and culling result of a drawable entity
#[derive(Debug, Clone, PartialEq)]
pub struct CullingData {
    /// Bounds in the entity's local space
    pub local_box: Aabb,
    /// Bounds in world space, refreshed when the transform changes
    pub world_box: Aabb,
    /// Result of the last culling pass
    pub visible: bool,
    /// Whether the view box rejected the entity in the last pass
    pub camera_culled: bool,
    /// Recompute the world box even if the transform did not change
    pub need_validate: bool,
}

impl Default for CullingData {
    fn default() -> Self {
        Self {
            local_box: Aabb::default(),
            world_box: Aabb::default(),
            visible: true,
            camera_culled: false,
            need_validate: true,
        }
    }
}

impl CullingData {
    /// Culling data for the given local bounds
    pub fn new(local_box: Aabb) -> Self {
        Self {
            local_box,
            ..Self::default()
        }
    }

    /// Replace the local bounds
    pub fn set_local_box(&mut self, local_box: Aabb) {
        self.local_box = local_box;
        self.need_validate = true;
    }
}

impl EntityData for CullingData {}
