//! Transform hierarchy scenarios
//!
//! Depth ordering, attach overrides, persisted records, links to removed
//! entities and the late pass for attached subtrees.

use crate::config::EntityManagerConfig;
use crate::ecs::components::WorldTransformData;
use crate::ecs::systems::{LateWorldTransformSystem, WorldTransformSystem};
use crate::ecs::{EntityHandle, EntityManager, EntitySystem};
use crate::foundation::math::{translation, translation_of, Mat4, Vec3};
use approx::assert_relative_eq;
use std::io::Cursor;

fn manager() -> EntityManager {
    let mut manager = EntityManager::with_config(EntityManagerConfig::bare()).unwrap();
    manager.add_system::<WorldTransformSystem>().unwrap();
    manager
}

fn world_of(manager: &EntityManager, handle: EntityHandle) -> Vec3 {
    manager
        .get_data::<WorldTransformData>(handle)
        .map_or_else(Vec3::zeros, |t| translation_of(t.world()))
}

/// Moves one entity's world matrix directly, the way an animation system would
struct Animator {
    target: EntityHandle,
    world: Mat4,
}

impl EntitySystem for Animator {
    fn update(&mut self, manager: &mut EntityManager) {
        if let Some(transform) = manager.get_data_mut::<WorldTransformData>(self.target) {
            transform.set_world(self.world);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grandchild_world_composes_chain() {
        let mut manager = manager();
        // Created leaf first so index order disagrees with depth order.
        let [grandchild, child, root] = [manager.create_entity(), manager.create_entity(), manager.create_entity()];
        manager.add_transform_data(root, None, translation(1.0, 0.0, 0.0)).unwrap();
        manager
            .add_transform_data(child, Some(root), translation(0.0, 2.0, 0.0))
            .unwrap();
        manager
            .add_transform_data(grandchild, Some(child), translation(0.0, 0.0, 3.0))
            .unwrap();

        manager.update().unwrap();

        assert_eq!(
            manager.alive_entities(),
            &[root.index(), child.index(), grandchild.index()]
        );
        assert_relative_eq!(world_of(&manager, grandchild), Vec3::new(1.0, 2.0, 3.0), epsilon = 1e-6);
        let depths: Vec<u32> = [root, child, grandchild]
            .iter()
            .filter_map(|&e| manager.get_data::<WorldTransformData>(e).map(WorldTransformData::depth))
            .collect();
        assert_eq!(depths, vec![0, 1, 2]);
    }

    #[test]
    fn test_attach_parent_overrides_scene_parent() {
        let mut manager = manager();
        let [p1, p2, c] = [manager.create_entity(), manager.create_entity(), manager.create_entity()];
        manager.add_transform_data(p1, None, translation(5.0, 0.0, 0.0)).unwrap();
        manager.add_transform_data(p2, None, translation(10.0, 0.0, 0.0)).unwrap();
        manager.add_transform_data(c, Some(p1), translation(1.0, 0.0, 0.0)).unwrap();
        manager.update().unwrap();
        assert_relative_eq!(world_of(&manager, c), Vec3::new(6.0, 0.0, 0.0), epsilon = 1e-6);

        manager.attach_transform(c, Some(p2)).unwrap();
        manager.update().unwrap();
        assert_relative_eq!(world_of(&manager, c), Vec3::new(11.0, 0.0, 0.0), epsilon = 1e-6);

        manager.attach_transform(c, None).unwrap();
        manager.update().unwrap();
        assert_relative_eq!(world_of(&manager, c), Vec3::new(6.0, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_attached_entity_sorts_after_target() {
        let mut manager = manager();
        let [follower, target_root, target] =
            [manager.create_entity(), manager.create_entity(), manager.create_entity()];
        manager.add_transform_data(target_root, None, translation(0.0, 1.0, 0.0)).unwrap();
        manager
            .add_transform_data(target, Some(target_root), translation(0.0, 1.0, 0.0))
            .unwrap();
        manager.add_transform_data(follower, None, Mat4::identity()).unwrap();
        manager.attach_transform(follower, Some(target)).unwrap();

        manager.update().unwrap();
        let alive = manager.alive_entities();
        let position = |e: EntityHandle| alive.iter().position(|&i| i == e.index());
        assert!(position(target) < position(follower));
        assert_relative_eq!(world_of(&manager, follower), Vec3::new(0.0, 2.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_persisted_record_restores_hierarchy() {
        let mut source = manager();
        let [root, child] = [source.create_entity(), source.create_entity()];
        source.set_entity_id(child, Some("Arm")).unwrap();
        source.add_transform_data(root, None, translation(0.0, 0.0, 4.0)).unwrap();
        source
            .add_transform_data(child, Some(root), translation(2.0, 0.0, 0.0))
            .unwrap();

        let mut root_record = Vec::new();
        let mut child_record = Vec::new();
        source.save_data::<WorldTransformData>(root, &mut root_record).unwrap();
        source.save_data::<WorldTransformData>(child, &mut child_record).unwrap();

        let mut restored = manager();
        let [new_root, new_child] = [restored.create_entity(), restored.create_entity()];
        restored
            .load_data::<WorldTransformData>(new_root, &mut Cursor::new(root_record), 1)
            .unwrap();
        let transform = restored
            .load_data::<WorldTransformData>(new_child, &mut Cursor::new(child_record), 1)
            .unwrap();
        assert_eq!(transform.name, "Arm");
        assert_eq!(transform.parent_index(), 0);
        assert_eq!(transform.depth(), 1);

        restored.update().unwrap();
        assert_relative_eq!(world_of(&restored, new_child), Vec3::new(2.0, 0.0, 4.0), epsilon = 1e-6);
    }

    #[test]
    fn test_link_to_recycled_entity_is_stale() {
        let mut manager = manager();
        let [root, child] = [manager.create_entity(), manager.create_entity()];
        manager.add_transform_data(root, None, translation(3.0, 0.0, 0.0)).unwrap();
        manager
            .add_transform_data(child, Some(root), translation(0.0, 1.0, 0.0))
            .unwrap();
        manager.update().unwrap();

        manager.remove_entity(root).unwrap();
        let recycled = manager.create_entity();
        assert_eq!(recycled.index(), root.index());
        manager.add_transform_data(recycled, None, translation(50.0, 0.0, 0.0)).unwrap();

        assert_eq!(manager.stale_parent_references(), vec![child]);

        manager.update().unwrap();
        let system = manager.get_system::<WorldTransformSystem>().unwrap();
        assert_eq!(system.stale_references(), 1);
        assert_relative_eq!(world_of(&manager, child), Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_late_pass_follows_moved_attach_target() {
        let mut manager = manager();
        let [target, follower, tip] = [manager.create_entity(), manager.create_entity(), manager.create_entity()];
        manager.add_transform_data(target, None, Mat4::identity()).unwrap();
        manager.add_transform_data(follower, None, translation(1.0, 0.0, 0.0)).unwrap();
        manager
            .add_transform_data(tip, Some(follower), translation(0.0, 1.0, 0.0))
            .unwrap();
        manager.attach_transform(follower, Some(target)).unwrap();

        manager
            .add_system_with(Animator {
                target,
                world: translation(5.0, 0.0, 0.0),
            })
            .unwrap();
        manager.add_system::<LateWorldTransformSystem>().unwrap();

        manager.update().unwrap();

        let late = manager.get_system::<LateWorldTransformSystem>().unwrap();
        assert_eq!(late.entities(), &[follower.index(), tip.index()]);
        assert_relative_eq!(world_of(&manager, follower), Vec3::new(6.0, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(world_of(&manager, tip), Vec3::new(6.0, 1.0, 0.0), epsilon = 1e-6);
        assert!(manager.get_data::<WorldTransformData>(tip).unwrap().has_changed());
    }
}
