//! # ECS Runtime
//!
//! Entity-Component-System core with ordered render-system scheduling and
//! incrementally validated transform hierarchies.
//!
//! ## Features
//!
//! - **Indexed data slots**: every entity holds one slot per registered data type
//! - **Cached groups**: filtered entity lists that rebuild only when a tracked type changes
//! - **Frame protocol**: query and update for every system, then sorted render sub-passes
//! - **Transform hierarchy**: depth-sorted world matrix propagation with dirty tracking
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ecs_runtime::prelude::*;
//!
//! fn main() -> Result<(), EcsError> {
//!     let mut manager = EntityManager::new();
//!
//!     let root = manager.create_entity();
//!     let child = manager.create_entity();
//!     manager.add_transform_data(root, None, translation(1.0, 0.0, 0.0))?;
//!     manager.add_transform_data(child, Some(root), translation(0.0, 2.0, 0.0))?;
//!
//!     manager.update()?;
//!     manager.render();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod ecs;
pub mod foundation;

/// Common imports for runtime users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, EntityManagerConfig},
        ecs::{
            components::{
                CullingData, LightData, LightType, RenderMeshData, VisibleData, WorldInverseTransformData,
                WorldTransformData,
            },
            systems::{LightSystem, MeshRenderer, WorldTransformSystem},
            DataKey, DataTypeId, DataTypeRegistry, EcsError, Entity, EntityData, EntityHandle, EntityManager,
            EntitySystem, GroupId, MaterialId, MeshBufferId, PipelineType, RenderPass, RenderSystem,
            TransformState, VideoDriver,
        },
        foundation::math::{translation, Aabb, Mat4, Point3, Vec3},
    };
}
