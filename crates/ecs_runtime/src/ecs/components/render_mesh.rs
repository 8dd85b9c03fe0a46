//! Mesh render data

use crate::ecs::entity_data::EntityData;
use crate::ecs::render_driver::{MaterialId, MeshBufferId};

/// Mesh buffer drawn by the mesh renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderMeshData {
    /// Geometry to draw
    pub mesh_buffer: MeshBufferId,
    /// Material bound before drawing
    pub material: MaterialId,
    /// Drawn in the transparent sub-pass instead of the opaque one
    pub transparent: bool,
    /// Also drawn in the emission sub-pass
    pub emissive: bool,
}

impl RenderMeshData {
    /// Opaque mesh
    pub fn opaque(mesh_buffer: MeshBufferId, material: MaterialId) -> Self {
        Self {
            mesh_buffer,
            material,
            ..Self::default()
        }
    }

    /// Alpha blended mesh
    pub fn transparent(mesh_buffer: MeshBufferId, material: MaterialId) -> Self {
        Self {
            transparent: true,
            ..Self::opaque(mesh_buffer, material)
        }
    }
}

impl EntityData for RenderMeshData {}
