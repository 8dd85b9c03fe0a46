//! Frame protocol scenarios
//!
//! Entity index stability, slot ownership, group caching and the ordering
//! of update and render passes.

use crate::config::EntityManagerConfig;
use crate::ecs::{EcsError, EntityData, EntityManager, EntitySystem, PipelineType, RenderPass, RenderSystem};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

#[derive(Default)]
struct Health;
impl EntityData for Health {}

#[derive(Default)]
struct Armor;
impl EntityData for Armor {}

#[derive(Default)]
struct Tag;
impl EntityData for Tag {}

struct DropCounter(Rc<Cell<u32>>);
impl EntityData for DropCounter {}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

/// Render system recording every hook it receives
struct Recorder<const ID: u8> {
    log: Log,
    pass: RenderPass,
    priority: i32,
    pipeline: PipelineType,
}

impl<const ID: u8> Recorder<ID> {
    fn new(log: &Log, pass: RenderPass, priority: i32) -> Self {
        Self {
            log: Rc::clone(log),
            pass,
            priority,
            pipeline: PipelineType::MIX,
        }
    }

    fn record(&self, hook: &str) {
        self.log.borrow_mut().push(format!("{}{}", hook, ID));
    }
}

impl<const ID: u8> EntitySystem for Recorder<ID> {
    fn update(&mut self, _manager: &mut EntityManager) {
        self.record("update");
    }
}

impl<const ID: u8> RenderSystem for Recorder<ID> {
    fn render(&mut self, _manager: &mut EntityManager) {
        self.record("render");
    }

    fn render_transparent(&mut self, _manager: &mut EntityManager) {
        self.record("transparent");
    }

    fn post_render(&mut self, _manager: &mut EntityManager) {
        self.record("post");
    }

    fn pipeline_type(&self) -> PipelineType {
        self.pipeline
    }

    fn render_pass(&self) -> RenderPass {
        self.pass
    }

    fn sorting_priority(&self) -> i32 {
        self.priority
    }
}

fn bare() -> EntityManager {
    EntityManager::with_config(EntityManagerConfig::bare()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_stay_stable_across_removal() {
        let mut manager = bare();
        let [a, b, c] = [manager.create_entity(), manager.create_entity(), manager.create_entity()];
        manager.insert_data(c, Health).unwrap();

        manager.remove_entity(b).unwrap();
        assert_eq!(manager.entity(a).map(|e| e.index()), Some(0));
        assert_eq!(manager.entity(c).map(|e| e.index()), Some(2));
        assert!(manager.get_data::<Health>(c).is_some());

        let d = manager.create_entity();
        assert_eq!(d.index(), b.index());
        assert!(manager.entity(b).is_none());
        assert_eq!(manager.alive_count(), 3);
    }

    #[test]
    fn test_one_instance_per_slot() {
        let drops = Rc::new(Cell::new(0));
        let mut manager = bare();
        let e = manager.create_entity();

        manager.insert_data(e, DropCounter(Rc::clone(&drops))).unwrap();
        manager.insert_data(e, DropCounter(Rc::clone(&drops))).unwrap();
        assert_eq!(drops.get(), 1);
        assert_eq!(manager.entity(e).map(|e| e.data_count()), Some(1));

        manager.remove_entity(e).unwrap();
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn test_groups_match_exactly_and_rebuild_lazily() {
        let mut manager = bare();
        let [a, b] = [manager.create_entity(), manager.create_entity()];
        manager.add_data::<Health>(a).unwrap();
        manager.add_data::<Health>(b).unwrap();
        manager.add_data::<Armor>(b).unwrap();
        let health = manager.data_key::<Health>().unwrap().id();
        let armor = manager.data_key::<Armor>().unwrap().id();

        let both = manager.create_group(&[health, armor]).unwrap();
        let only_health = manager.create_group(&[health]).unwrap();
        manager.query_groups().unwrap();
        assert_eq!(manager.group_entities(both), &[b.index()]);
        assert_eq!(manager.group_entities(only_health), &[a.index(), b.index()]);

        let rebuilds = manager.group(only_health).map(|g| g.query_count());
        manager.add_data::<Tag>(a).unwrap();
        manager.query_groups().unwrap();
        assert_eq!(manager.group(only_health).map(|g| g.query_count()), rebuilds);

        manager.remove_data::<Armor>(b).unwrap();
        manager.query_groups().unwrap();
        assert!(manager.group_entities(both).is_empty());
        assert_eq!(manager.group(only_health).map(|g| g.query_count()), rebuilds);
    }

    #[test]
    fn test_visible_child_group_follows_parent() {
        let mut manager = bare();
        let [a, b] = [manager.create_entity(), manager.create_entity()];
        manager.add_data::<Health>(a).unwrap();
        manager.add_data::<Health>(b).unwrap();
        let health = manager.data_key::<Health>().unwrap().id();
        let shown = manager.create_group_from_visible(&[health]).unwrap();

        manager.query_groups().unwrap();
        assert_eq!(manager.group_entities(shown), &[a.index(), b.index()]);

        manager.set_visible(a, false).unwrap();
        manager.query_groups().unwrap();
        assert_eq!(manager.group_entities(shown), &[b.index()]);
    }

    #[test]
    fn test_custom_group_predicate() {
        let mut manager = bare();
        let [a, b] = [manager.create_entity(), manager.create_entity()];
        manager.set_entity_id(b, Some("boss")).unwrap();
        let named = manager.add_custom_group(&[], None, |e| e.id().is_some()).unwrap();

        manager.query_groups().unwrap();
        assert_eq!(manager.group_entities(named), &[b.index()]);
        assert!(!manager.group_entities(named).contains(&a.index()));
    }

    #[test]
    fn test_render_order_by_pass_then_priority() {
        let log = Log::default();
        let mut manager = bare();
        manager
            .add_render_system_with(Recorder::<1>::new(&log, RenderPass::Opaque, 5))
            .unwrap();
        manager
            .add_render_system_with(Recorder::<2>::new(&log, RenderPass::Transparent, 0))
            .unwrap();
        manager
            .add_render_system_with(Recorder::<3>::new(&log, RenderPass::Opaque, 1))
            .unwrap();

        manager.update().unwrap();
        assert_eq!(*log.borrow(), ["update1", "update2", "update3"]);

        log.borrow_mut().clear();
        manager.render();
        assert_eq!(
            *log.borrow(),
            [
                "render3",
                "render1",
                "render2",
                "transparent3",
                "transparent1",
                "transparent2",
                "post3",
                "post1",
                "post2",
            ]
        );
    }

    #[test]
    fn test_render_respects_pipeline() {
        let log = Log::default();
        let mut manager = bare();
        let mut shadow_only = Recorder::<1>::new(&log, RenderPass::Opaque, 0);
        shadow_only.pipeline = PipelineType::SHADOW_MAP;
        manager.add_render_system_with(shadow_only).unwrap();
        manager
            .add_render_system_with(Recorder::<2>::new(&log, RenderPass::Opaque, 1))
            .unwrap();

        manager.set_render_pipeline(PipelineType::FORWARD);
        manager.render();
        assert!(log.borrow().iter().all(|hook| hook.ends_with('2')));

        log.borrow_mut().clear();
        manager.set_render_pipeline(PipelineType::SHADOW_MAP);
        manager.render();
        assert!(log.borrow().contains(&"render1".to_string()));
        assert!(log.borrow().contains(&"render2".to_string()));
    }

    #[test]
    fn test_update_order_can_be_changed() {
        let log = Log::default();
        let mut manager = bare();
        manager
            .add_render_system_with(Recorder::<1>::new(&log, RenderPass::Opaque, 0))
            .unwrap();
        manager
            .add_render_system_with(Recorder::<2>::new(&log, RenderPass::Opaque, 0))
            .unwrap();
        assert!(manager.set_system_order::<Recorder<2>>(-1));

        manager.update().unwrap();
        assert_eq!(*log.borrow(), ["update2", "update1"]);
    }

    /// Creates one entity during its first update and records what it saw
    #[derive(Default)]
    struct Spawner {
        seen: Vec<usize>,
    }

    impl EntitySystem for Spawner {
        fn on_query(&mut self, _manager: &mut EntityManager, entities: &[u32]) {
            self.seen.push(entities.len());
        }

        fn update(&mut self, manager: &mut EntityManager) {
            if self.seen.len() == 1 {
                manager.create_entity();
            }
        }
    }

    #[test]
    fn test_entities_created_mid_frame_join_next_frame() {
        let mut manager = bare();
        manager.create_entities(2);
        manager.add_system::<Spawner>().unwrap();

        manager.update().unwrap();
        assert_eq!(manager.alive_count(), 3);
        manager.update().unwrap();

        assert_eq!(manager.get_system::<Spawner>().map(|s| s.seen.clone()), Some(vec![2, 3]));
    }

    /// Removes the [`Spawner`] when it runs
    #[derive(Default)]
    struct Remover;

    impl EntitySystem for Remover {
        fn update(&mut self, manager: &mut EntityManager) {
            let _ = manager.remove_system::<Spawner>();
            assert!(matches!(
                manager.remove_system::<Remover>(),
                Err(EcsError::SystemBusy(_))
            ));
        }
    }

    #[test]
    fn test_system_removed_mid_frame_does_not_run() {
        let mut manager = bare();
        manager.add_system::<Remover>().unwrap();
        manager.add_system::<Spawner>().unwrap();

        manager.update().unwrap();
        assert!(!manager.has_system::<Spawner>());
        assert!(manager.has_system::<Remover>());
        assert_eq!(manager.alive_count(), 0);
    }
}
