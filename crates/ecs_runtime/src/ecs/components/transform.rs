//! Hierarchical transform data
//!
//! `WorldTransformData` holds the local matrix, the computed world matrix
//! and the parent links. The world matrix is only valid after the transform
//! system visited the parent (or attach parent) before the entity itself.

use crate::ecs::entity::EntityHandle;
use crate::ecs::entity_data::{stream, EntityData};
use crate::ecs::error::EcsError;
use crate::foundation::math::{compose, Mat4, Quat, Vec3};
use std::io::{Read, Write};

/// Index reference to another entity
///
/// `generation` is `None` for links restored from persisted data, which
/// carry the bare index only and cannot be checked for recycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentRef {
    /// Entity index
    pub index: u32,
    /// Generation of the entity when the link was made
    pub generation: Option<u32>,
}

impl ParentRef {
    /// Link that also checks the generation
    pub const fn checked(handle: EntityHandle) -> Self {
        Self {
            index: handle.index(),
            generation: Some(handle.generation()),
        }
    }

    /// Index-only link
    pub const fn unchecked(index: u32) -> Self {
        Self {
            index,
            generation: None,
        }
    }
}

/// Local and world transform of one entity
#[derive(Debug, Clone)]
pub struct WorldTransformData {
    /// Node name, persisted with the record
    pub name: String,
    relative: Mat4,
    world: Mat4,
    parent: Option<ParentRef>,
    attach_parent: Option<ParentRef>,
    depth: u32,
    has_changed: bool,
    need_validate: bool,
    world_pending: bool,
    is_world_transform: bool,
    owner: Option<EntityHandle>,
}

impl Default for WorldTransformData {
    fn default() -> Self {
        Self {
            name: String::new(),
            relative: Mat4::identity(),
            world: Mat4::identity(),
            parent: None,
            attach_parent: None,
            depth: 0,
            has_changed: false,
            need_validate: true,
            world_pending: false,
            is_world_transform: false,
            owner: None,
        }
    }
}

impl WorldTransformData {
    /// Root transform with the given local matrix
    pub fn new(relative: Mat4) -> Self {
        Self {
            relative,
            ..Self::default()
        }
    }

    /// Local-to-parent matrix
    pub fn relative(&self) -> &Mat4 {
        &self.relative
    }

    /// Replace the local matrix; the world matrix is recomputed next pass
    pub fn set_relative(&mut self, relative: Mat4) {
        self.relative = relative;
        self.need_validate = true;
    }

    /// Set the local matrix from position, rotation and scale
    pub fn set_relative_trs(&mut self, position: &Vec3, rotation: &Quat, scale: &Vec3) {
        self.set_relative(compose(position, rotation, scale));
    }

    /// World matrix from the last transform pass
    pub fn world(&self) -> &Mat4 {
        &self.world
    }

    /// Overwrite the world matrix directly
    ///
    /// For systems that drive world space themselves (animation, physics).
    /// Attached entities below pick it up in the late transform pass. The
    /// next forward pass keeps this matrix instead of deriving one from the
    /// local matrix, and reports it as changed so children and inverse
    /// transforms follow.
    pub fn set_world(&mut self, world: Mat4) {
        self.world = world;
        self.has_changed = true;
        self.world_pending = true;
    }

    /// Whether a matrix from [`set_world`](Self::set_world) waits for the next pass
    pub fn world_pending(&self) -> bool {
        self.world_pending
    }

    /// Scene hierarchy parent
    pub fn parent(&self) -> Option<ParentRef> {
        self.parent
    }

    /// Parent index in the persisted form, `-1` for roots
    pub fn parent_index(&self) -> i32 {
        self.parent
            .and_then(|p| i32::try_from(p.index).ok())
            .unwrap_or(-1)
    }

    /// Attach override, when set
    pub fn attach_parent(&self) -> Option<ParentRef> {
        self.attach_parent
    }

    /// Attach parent index, `-1` when unset
    pub fn attach_parent_index(&self) -> i32 {
        self.attach_parent
            .and_then(|p| i32::try_from(p.index).ok())
            .unwrap_or(-1)
    }

    /// Link the world matrix is computed from: the attach parent when set,
    /// otherwise the scene parent
    pub fn effective_parent(&self) -> Option<ParentRef> {
        self.attach_parent.or(self.parent)
    }

    /// Hops from the root along scene parents
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether the world matrix was recomputed in the last pass
    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    /// Whether the world matrix is waiting for a recompute
    pub fn need_validate(&self) -> bool {
        self.need_validate
    }

    /// Force a recompute on the next pass
    pub fn invalidate(&mut self) {
        self.need_validate = true;
    }

    /// Whether the local matrix is already in world space
    pub fn is_world_transform(&self) -> bool {
        self.is_world_transform
    }

    /// Treat the local matrix as the world matrix and ignore parents
    pub fn set_world_transform(&mut self, enabled: bool) {
        self.is_world_transform = enabled;
        self.need_validate = true;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ParentRef>, depth: u32) {
        self.parent = parent;
        self.depth = depth;
        self.need_validate = true;
    }

    pub(crate) fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    pub(crate) fn set_attach_parent(&mut self, attach: Option<ParentRef>) {
        self.attach_parent = attach;
        self.need_validate = true;
    }

    /// Mark the outcome of a transform pass
    pub(crate) fn set_changed(&mut self, changed: bool) {
        self.has_changed = changed;
    }

    /// Store a freshly computed world matrix
    pub(crate) fn validate(&mut self, world: Mat4) {
        self.world = world;
        self.need_validate = false;
        self.world_pending = false;
    }

    /// Accept the externally set world matrix as this pass's result
    pub(crate) fn accept_world(&mut self) {
        self.need_validate = false;
        self.world_pending = false;
    }
}

impl EntityData for WorldTransformData {
    fn set_owner(&mut self, owner: EntityHandle) {
        self.owner = Some(owner);
    }

    fn owner(&self) -> Option<EntityHandle> {
        self.owner
    }

    fn is_serializable(&self) -> bool {
        true
    }

    /// Record layout: name, parent index (i32), depth (i32), relative (16 x f32)
    fn serialize(&self, out: &mut dyn Write) -> Result<(), EcsError> {
        stream::write_string(out, &self.name)?;
        stream::write_i32(out, self.parent_index())?;
        stream::write_i32(out, i32::try_from(self.depth).unwrap_or(i32::MAX))?;
        stream::write_matrix(out, &self.relative)
    }

    fn deserialize(&mut self, input: &mut dyn Read, _version: u32) -> Result<(), EcsError> {
        self.name = stream::read_string(input)?;
        let parent_index = stream::read_i32(input)?;
        let depth = stream::read_i32(input)?;
        let relative = stream::read_matrix(input)?;

        self.parent = u32::try_from(parent_index).ok().map(ParentRef::unchecked);
        self.depth = u32::try_from(depth).unwrap_or(0);
        self.set_relative(relative);
        Ok(())
    }
}

/// Cached inverse of the world matrix
#[derive(Debug, Clone)]
pub struct WorldInverseTransformData {
    world_inverse: Mat4,
    need_validate: bool,
}

impl Default for WorldInverseTransformData {
    fn default() -> Self {
        Self {
            world_inverse: Mat4::identity(),
            need_validate: true,
        }
    }
}

impl WorldInverseTransformData {
    /// Inverse world matrix from the last pass that saw a change
    pub fn world_inverse(&self) -> &Mat4 {
        &self.world_inverse
    }

    /// Whether the next pass recomputes regardless of the change flag
    pub fn need_validate(&self) -> bool {
        self.need_validate
    }

    pub(crate) fn validate(&mut self, world_inverse: Mat4) {
        self.world_inverse = world_inverse;
        self.need_validate = false;
    }
}

impl EntityData for WorldInverseTransformData {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::translation;
    use approx::relative_eq;
    use std::io::Cursor;

    #[test]
    fn test_new_transform_needs_validation() {
        let data = WorldTransformData::new(translation(1.0, 0.0, 0.0));
        assert!(data.need_validate());
        assert!(!data.has_changed());
        assert_eq!(data.parent_index(), -1);
        assert_eq!(data.attach_parent_index(), -1);
    }

    #[test]
    fn test_attach_overrides_parent() {
        let mut data = WorldTransformData::default();
        data.set_parent(Some(ParentRef::unchecked(1)), 1);
        assert_eq!(data.effective_parent(), Some(ParentRef::unchecked(1)));

        data.set_attach_parent(Some(ParentRef::unchecked(2)));
        assert_eq!(data.effective_parent(), Some(ParentRef::unchecked(2)));
        assert_eq!(data.parent_index(), 1);
        assert_eq!(data.attach_parent_index(), 2);
    }

    #[test]
    fn test_record_layout() {
        let mut data = WorldTransformData::new(translation(1.0, 2.0, 3.0));
        data.name = "Arm".to_string();
        data.set_parent(Some(ParentRef::unchecked(7)), 2);

        let mut out = Vec::new();
        data.serialize(&mut out).unwrap();

        // 4 (len) + 4 bytes "Arm\0" + parent + depth + 64 matrix bytes
        assert_eq!(out.len(), 4 + 4 + 4 + 4 + 64);
        assert_eq!(&out[8..12], &7i32.to_le_bytes());
        assert_eq!(&out[12..16], &2i32.to_le_bytes());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut data = WorldTransformData::new(translation(-4.0, 0.5, 9.0));
        data.name = "Spine".to_string();
        data.set_parent(Some(ParentRef::checked(EntityHandle::new(3, 5))), 4);

        let mut out = Vec::new();
        data.serialize(&mut out).unwrap();

        let mut restored = WorldTransformData::default();
        restored.deserialize(&mut Cursor::new(out), 1).unwrap();

        assert_eq!(restored.name, "Spine");
        assert_eq!(restored.parent_index(), 3);
        assert_eq!(restored.parent(), Some(ParentRef::unchecked(3)));
        assert_eq!(restored.depth(), 4);
        assert!(relative_eq!(*restored.relative(), *data.relative(), epsilon = 1e-6));
        assert!(restored.need_validate());
    }

    #[test]
    fn test_root_roundtrip_keeps_minus_one() {
        let data = WorldTransformData::default();
        let mut out = Vec::new();
        data.serialize(&mut out).unwrap();
        assert_eq!(&out[5..9], &(-1i32).to_le_bytes());

        let mut restored = WorldTransformData::new(translation(1.0, 1.0, 1.0));
        restored.deserialize(&mut Cursor::new(out), 1).unwrap();
        assert!(restored.parent().is_none());
        assert_eq!(*restored.relative(), Mat4::identity());
    }
}
