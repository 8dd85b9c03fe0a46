//! Entity-Component-System runtime
//!
//! Entities hold a fixed array of data slots indexed by registered data type.
//! The [`EntityManager`] owns entities, cached groups and systems and drives
//! the per-frame protocol: query and update for every system, then render,
//! transparent, post-render and emission passes for render systems.

pub mod components;
pub mod data_type;
pub mod entity;
pub mod entity_data;
pub mod entity_manager;
pub mod error;
pub mod group;
pub mod render_driver;
pub mod system;
pub mod systems;

#[cfg(test)]
mod tests;

pub use data_type::{DataKey, DataTypeId, DataTypeRegistry};
pub use entity::{Entity, EntityHandle};
pub use entity_data::{stream, AsAny, EntityData};
pub use entity_manager::{CallbackId, EntityManager, EntityManagerCallback};
pub use error::EcsError;
pub use group::{EntityGroup, GroupFilter, GroupId};
pub use render_driver::{MaterialId, MeshBufferId, RecordingDriver, TransformState, VideoDriver};
pub use system::{EntitySystem, PipelineType, RenderPass, RenderSystem};
