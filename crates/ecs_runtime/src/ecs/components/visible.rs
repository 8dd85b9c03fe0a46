//! Visibility data

use crate::ecs::entity_data::EntityData;

/// Per-entity visibility switch, cascaded down the hierarchy by the visible system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleData {
    /// Local visibility; the entity is shown only if every ancestor is shown too
    pub visible: bool,
    /// Layer mask tested by culling consumers
    pub culling_layer: u32,
    /// Whether the entity is drawn into shadow maps
    pub shadow_casting: bool,
}

impl Default for VisibleData {
    fn default() -> Self {
        Self {
            visible: true,
            culling_layer: 1,
            shadow_casting: true,
        }
    }
}

impl VisibleData {
    /// Hidden entity
    pub fn hidden() -> Self {
        Self {
            visible: false,
            ..Self::default()
        }
    }
}

impl EntityData for VisibleData {}
