//! Built-in entity data
//!
//! Plain data records consumed by the built-in systems. Logic lives in
//! [`systems`](crate::ecs::systems).

pub mod culling;
pub mod lighting;
pub mod render_mesh;
pub mod transform;
pub mod visible;

pub use culling::CullingData;
pub use lighting::{LightData, LightType};
pub use render_mesh::RenderMeshData;
pub use transform::{ParentRef, WorldInverseTransformData, WorldTransformData};
pub use visible::VisibleData;
