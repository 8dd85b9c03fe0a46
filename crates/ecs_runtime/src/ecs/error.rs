//! Error type shared by the ECS core

use super::entity::EntityHandle;
use super::group::GroupId;
use crate::config::ConfigError;
use thiserror::Error;

/// Errors reported by entity, data, group and system operations
#[derive(Debug, Error)]
pub enum EcsError {
    /// Every per-entity data slot is already assigned to another type
    #[error("cannot register data type {type_name}: all {max_slots} entity data slots are in use")]
    DataSlotsExhausted {
        /// Type that failed to register
        type_name: &'static str,
        /// Configured slot count
        max_slots: usize,
    },

    /// A data type index outside the registry
    #[error("data type index {0} is not registered")]
    UnknownDataType(u32),

    /// Handle refers to a removed or recycled entity
    #[error("entity {0} is not alive")]
    StaleEntity(EntityHandle),

    /// Entity lacks data an operation depends on
    #[error("entity {entity} has no {type_name}")]
    MissingData {
        /// Entity that was addressed
        entity: EntityHandle,
        /// Data type that was expected
        type_name: &'static str,
    },

    /// Hierarchy deeper than the configured depth buckets
    #[error("entity {index} has depth {depth}, the limit is {max_depth}")]
    DepthOverflow {
        /// Entity index
        index: u32,
        /// Computed depth
        depth: usize,
        /// Configured bucket count
        max_depth: usize,
    },

    /// Parent or attach link that would make an entity its own ancestor
    #[error("linking {0} would create a transform cycle")]
    HierarchyCycle(EntityHandle),

    /// Group id that does not name a live group
    #[error("group {0:?} does not exist")]
    UnknownGroup(GroupId),

    /// The system is running and cannot be borrowed or replaced right now
    #[error("system {0} is currently running")]
    SystemBusy(&'static str),

    /// Data type has no persisted form
    #[error("data type {0} does not support serialization")]
    SerializationUnsupported(&'static str),

    /// Malformed string in a data stream
    #[error("invalid string in data stream: {0}")]
    InvalidString(String),

    /// Rejected manager configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Underlying stream failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
