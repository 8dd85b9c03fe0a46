//! Video driver boundary
//!
//! The ECS core never talks to a graphics API. Render systems push
//! transforms, materials and mesh buffers through this trait and the
//! application decides what that means.

use super::entity_data::AsAny;
use crate::foundation::math::Mat4;

/// Matrix slot targeted by [`VideoDriver::set_transform`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformState {
    /// Object to world
    World,
    /// World to camera
    View,
    /// Camera to clip space
    Projection,
}

/// Opaque material handle owned by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MaterialId(pub u32);

/// Opaque mesh buffer handle owned by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MeshBufferId(pub u32);

/// Sink for draw calls
pub trait VideoDriver: AsAny {
    /// Bind a matrix for the following draws
    fn set_transform(&mut self, state: TransformState, matrix: &Mat4);

    /// Bind a material for the following draws
    fn set_material(&mut self, material: MaterialId);

    /// Draw one mesh buffer with the current bindings
    fn draw_mesh_buffer(&mut self, mesh_buffer: MeshBufferId);
}

/// One recorded driver call
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    /// `set_transform`
    SetTransform(TransformState, Mat4),
    /// `set_material`
    SetMaterial(MaterialId),
    /// `draw_mesh_buffer`
    DrawMeshBuffer(MeshBufferId),
}

/// Driver that records every call, for tools and tests
#[derive(Debug, Default)]
pub struct RecordingDriver {
    /// Calls in issue order
    pub commands: Vec<DriverCommand>,
}

impl RecordingDriver {
    /// Mesh buffers drawn so far, in order
    pub fn draws(&self) -> Vec<MeshBufferId> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                DriverCommand::DrawMeshBuffer(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl VideoDriver for RecordingDriver {
    fn set_transform(&mut self, state: TransformState, matrix: &Mat4) {
        self.commands.push(DriverCommand::SetTransform(state, *matrix));
    }

    fn set_material(&mut self, material: MaterialId) {
        self.commands.push(DriverCommand::SetMaterial(material));
    }

    fn draw_mesh_buffer(&mut self, mesh_buffer: MeshBufferId) {
        self.commands.push(DriverCommand::DrawMeshBuffer(mesh_buffer));
    }
}
