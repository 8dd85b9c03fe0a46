//! Entity manager
//!
//! Owns the entity pool, the registered systems and the groups, and drives
//! the frame: `update` runs every system's query and update in order, then
//! `render` / `cull_and_render` run the sorted render sub-passes.
//!
//! Entities are never removed from the backing array. A removed entity's
//! slot goes on a free list and is reused with a bumped generation, so
//! `entities[i].index() == i` always holds and index links stay meaningful.

use super::components::{ParentRef, WorldTransformData};
use super::data_type::{DataKey, DataTypeId, DataTypeRegistry};
use super::entity::{Entity, EntityHandle};
use super::entity_data::EntityData;
use super::error::EcsError;
use super::group::{normalize, EntityGroup, GroupFilter, GroupId};
use super::render_driver::VideoDriver;
use super::system::{EntitySystem, PipelineType, RenderPass, RenderSystem};
use super::systems;
use crate::config::EntityManagerConfig;
use crate::foundation::math::{Aabb, Mat4};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::rc::Rc;

/// Observer of entity lifecycle events
pub trait EntityManagerCallback {
    /// A new or recycled entity became alive
    fn on_entity_created(&mut self, _entity: EntityHandle) {}

    /// An entity was removed; its data is already gone
    fn on_entity_removed(&mut self, _entity: EntityHandle) {}
}

/// Registration token returned by [`EntityManager::add_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u32);

enum SystemBox {
    Update(Box<dyn EntitySystem>),
    Render(Box<dyn RenderSystem>),
}

impl SystemBox {
    fn init(&mut self, manager: &mut EntityManager) {
        match self {
            Self::Update(system) => system.init(manager),
            Self::Render(system) => system.init(manager),
        }
    }

    fn run_query_update(&mut self, manager: &mut EntityManager, alive: &[u32]) {
        match self {
            Self::Update(system) => run_query_update(&mut **system, manager, alive),
            Self::Render(system) => run_query_update(&mut **system, manager, alive),
        }
    }

    fn as_any(&self) -> &dyn Any {
        match self {
            Self::Update(system) => (**system).as_any(),
            Self::Render(system) => (**system).as_any(),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        match self {
            Self::Update(system) => (**system).as_any_mut(),
            Self::Render(system) => (**system).as_any_mut(),
        }
    }

    fn as_render(&self) -> Option<&(dyn RenderSystem + 'static)> {
        match self {
            Self::Update(_) => None,
            Self::Render(system) => Some(&**system),
        }
    }

    fn as_render_mut(&mut self) -> Option<&mut (dyn RenderSystem + 'static)> {
        match self {
            Self::Update(_) => None,
            Self::Render(system) => Some(&mut **system),
        }
    }
}

fn run_query_update<S: EntitySystem + ?Sized>(system: &mut S, manager: &mut EntityManager, alive: &[u32]) {
    system.begin_query(manager);
    manager.refresh_groups();
    system.on_query(manager, alive);
    system.update(manager);
}

struct SystemEntry {
    /// `None` while the system is running
    system: Option<SystemBox>,
    serial: u64,
    name: &'static str,
    order: i32,
    is_render: bool,
    render_key: (RenderPass, i32),
}

#[derive(Debug, Clone, Copy)]
enum SubPass {
    Opaque,
    Transparent,
    Emission,
    Post,
}

/// Owner of entities, systems and groups
pub struct EntityManager {
    config: EntityManagerConfig,
    registry: DataTypeRegistry,

    entities: Vec<Entity>,
    unused: Vec<u32>,
    delay_remove: Vec<EntityHandle>,
    alive: Rc<Vec<u32>>,
    alive_count: usize,
    /// Removed entries are still in `alive`; the next sort drops them
    alive_dirty: bool,
    /// Entities created while `alive_dirty` was set, not yet in `alive`
    deferred_created: bool,
    need_sort_entities: bool,

    systems: Vec<Option<SystemEntry>>,
    system_index: HashMap<TypeId, usize>,
    update_order: Vec<usize>,
    render_order: Vec<usize>,
    system_changed: bool,
    renderer_changed: bool,
    next_serial: u64,
    next_order: i32,

    groups: Vec<Option<EntityGroup>>,
    visible_group: Option<GroupId>,

    callbacks: Vec<(CallbackId, Box<dyn EntityManagerCallback>)>,
    next_callback: u32,

    render_pipeline: PipelineType,
    video_driver: Option<Box<dyn VideoDriver>>,
    view_box: Option<Aabb>,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityManager {
    /// Manager with the default limits and the built-in systems
    pub fn new() -> Self {
        let config = EntityManagerConfig::default();
        let registry = DataTypeRegistry::new(config.max_entity_data);
        Self::build(config, registry)
    }

    /// Manager with custom limits
    pub fn with_config(config: EntityManagerConfig) -> Result<Self, EcsError> {
        config.validate()?;
        let registry = DataTypeRegistry::new(config.max_entity_data);
        Ok(Self::build(config, registry))
    }

    /// Manager using a registry built up front
    ///
    /// Entities get one slot per `registry.max_slots()`, which takes
    /// precedence over `config.max_entity_data`.
    pub fn with_registry(config: EntityManagerConfig, registry: DataTypeRegistry) -> Result<Self, EcsError> {
        config.validate()?;
        if registry.max_slots() != config.max_entity_data {
            log::warn!(
                "Registry has {} slots but config asks for {}, using the registry",
                registry.max_slots(),
                config.max_entity_data
            );
        }
        Ok(Self::build(config, registry))
    }

    fn build(config: EntityManagerConfig, registry: DataTypeRegistry) -> Self {
        let mut manager = Self {
            entities: Vec::with_capacity(config.initial_entity_capacity),
            unused: Vec::new(),
            delay_remove: Vec::new(),
            alive: Rc::new(Vec::with_capacity(config.initial_entity_capacity)),
            alive_count: 0,
            alive_dirty: false,
            deferred_created: false,
            need_sort_entities: false,
            systems: Vec::new(),
            system_index: HashMap::new(),
            update_order: Vec::new(),
            render_order: Vec::new(),
            system_changed: false,
            renderer_changed: false,
            next_serial: 0,
            next_order: 0,
            groups: Vec::new(),
            visible_group: None,
            callbacks: Vec::new(),
            next_callback: 0,
            render_pipeline: PipelineType::FORWARD,
            video_driver: None,
            view_box: None,
            config,
            registry,
        };

        manager.visible_group = Some(manager.push_group(EntityGroup::new(&[], None, GroupFilter::Visible)));

        if manager.config.register_default_systems {
            if let Err(e) = systems::register_defaults(&mut manager) {
                log::error!("Failed to register built-in systems: {}", e);
            }
        }
        manager
    }

    /// Limits the manager was created with
    pub fn config(&self) -> &EntityManagerConfig {
        &self.config
    }

    /// Data type to slot mapping
    pub fn registry(&self) -> &DataTypeRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Frame

    /// Run one update frame
    ///
    /// Flushes delayed removals, re-sorts the alive list by hierarchy depth
    /// when needed, then runs each system's `begin_query`, group refresh,
    /// `on_query` and `update` before moving to the next system. Entities
    /// created during the frame are seen by queries from the next frame on.
    pub fn update(&mut self) -> Result<(), EcsError> {
        self.update_remove_entity();
        self.sort_alive_entities()?;
        self.sort_systems();

        let alive = Rc::clone(&self.alive);
        let order = self.update_order.clone();
        for slot in order {
            self.with_system(slot, |system, manager| system.run_query_update(manager, &alive));
        }
        Ok(())
    }

    /// Opaque, transparent and post-render sub-passes over every compatible render system
    pub fn render(&mut self) {
        self.sort_systems();
        self.run_render_pass(SubPass::Opaque);
        self.run_render_pass(SubPass::Transparent);
        self.run_render_pass(SubPass::Post);
    }

    /// Emission sub-pass
    pub fn render_emission(&mut self) {
        self.sort_systems();
        self.run_render_pass(SubPass::Emission);
    }

    /// Re-run the culling render systems for the active pipeline, then render
    ///
    /// Used when one frame renders several pipelines (e.g. a shadow map pass
    /// followed by the forward pass) and the culling result depends on it.
    pub fn cull_and_render(&mut self) {
        self.sort_systems();

        let alive = Rc::clone(&self.alive);
        let order = self.render_order.clone();
        for slot in order {
            self.with_system(slot, |system, manager| {
                let Some(system) = system.as_render_mut() else {
                    return;
                };
                if system.is_culling() && system.pipeline_type().runs_in(manager.render_pipeline) {
                    run_query_update(system, manager, &alive);
                }
            });
        }

        self.render();
    }

    fn run_render_pass(&mut self, pass: SubPass) {
        let order = self.render_order.clone();
        for slot in order {
            self.with_system(slot, |system, manager| {
                let Some(system) = system.as_render_mut() else {
                    return;
                };
                if !system.pipeline_type().runs_in(manager.render_pipeline) {
                    return;
                }
                match pass {
                    SubPass::Opaque => system.render(manager),
                    SubPass::Transparent => system.render_transparent(manager),
                    SubPass::Emission => system.render_emission(manager),
                    SubPass::Post => system.post_render(manager),
                }
            });
        }
    }

    /// Pipeline render systems are filtered against
    pub fn render_pipeline(&self) -> PipelineType {
        self.render_pipeline
    }

    /// Switch the active pipeline
    pub fn set_render_pipeline(&mut self, pipeline: PipelineType) {
        self.render_pipeline = pipeline;
    }

    /// Install the draw call sink, returning the previous one
    pub fn set_video_driver(&mut self, driver: Box<dyn VideoDriver>) -> Option<Box<dyn VideoDriver>> {
        self.video_driver.replace(driver)
    }

    /// Remove the draw call sink
    pub fn take_video_driver(&mut self) -> Option<Box<dyn VideoDriver>> {
        self.video_driver.take()
    }

    /// Current draw call sink
    pub fn video_driver(&self) -> Option<&(dyn VideoDriver + 'static)> {
        self.video_driver.as_deref()
    }

    /// Run `f` with the driver and read access to the manager
    ///
    /// Returns `None` when no driver is installed.
    pub fn with_video_driver<R>(&mut self, f: impl FnOnce(&mut dyn VideoDriver, &Self) -> R) -> Option<R> {
        let mut driver = self.video_driver.take()?;
        let result = f(&mut *driver, self);
        self.video_driver = Some(driver);
        Some(result)
    }

    /// Camera bounds used by culling; `None` disables view culling
    pub fn view_box(&self) -> Option<Aabb> {
        self.view_box
    }

    /// Set the camera bounds
    pub fn set_view_box(&mut self, view_box: Option<Aabb>) {
        self.view_box = view_box;
    }

    // ------------------------------------------------------------------
    // Entities

    /// Create an entity, reusing a removed slot when one is free
    pub fn create_entity(&mut self) -> EntityHandle {
        let handle = match self.unused.pop().and_then(|index| self.entities.get_mut(index as usize)) {
            Some(entity) => {
                entity.revive();
                entity.handle()
            }
            None => {
                let entity = Entity::new(self.entities.len() as u32, self.registry.max_slots());
                let handle = entity.handle();
                self.entities.push(entity);
                handle
            }
        };

        if self.alive_dirty {
            self.deferred_created = true;
        } else {
            Rc::make_mut(&mut self.alive).push(handle.index());
        }
        self.alive_count += 1;
        self.need_sort_entities = true;
        self.notify_groups(|group| group.types().is_empty() || group.is_custom());

        for (_, callback) in &mut self.callbacks {
            callback.on_entity_created(handle);
        }
        handle
    }

    /// Create `count` entities
    pub fn create_entities(&mut self, count: usize) -> Vec<EntityHandle> {
        (0..count).map(|_| self.create_entity()).collect()
    }

    /// Remove an entity now
    ///
    /// Its data is dropped and the slot is recycled. Links held by other
    /// entities are not cleared; they become stale and are detected by
    /// generation.
    pub fn remove_entity(&mut self, handle: EntityHandle) -> Result<(), EcsError> {
        if !self.is_alive(handle) {
            log::warn!("Cannot remove {}: not alive", handle);
            return Err(EcsError::StaleEntity(handle));
        }
        self.release_entity(handle.index());
        Ok(())
    }

    /// Remove the alive entity at `index`; returns whether there was one
    pub fn remove_entity_at(&mut self, index: u32) -> bool {
        if self.entity_at(index).is_none() {
            return false;
        }
        self.release_entity(index);
        true
    }

    /// Queue a removal for the start of the next `update`
    pub fn remove_entity_delay(&mut self, handle: EntityHandle) {
        self.delay_remove.push(handle);
    }

    /// Flush queued removals
    pub fn update_remove_entity(&mut self) {
        let pending = std::mem::take(&mut self.delay_remove);
        for handle in pending {
            if self.is_alive(handle) {
                self.release_entity(handle.index());
            }
        }
    }

    fn release_entity(&mut self, index: u32) {
        let Some(entity) = self.entities.get_mut(index as usize) else {
            return;
        };
        if !entity.is_alive() {
            return;
        }

        let handle = entity.handle();
        let removed = entity.remove_all_data();
        entity.kill();

        for id in removed {
            self.notify_data_changed(id);
        }
        self.notify_groups(|group| group.types().is_empty() || group.is_custom());

        self.unused.push(index);
        self.alive_count = self.alive_count.saturating_sub(1);
        self.alive_dirty = true;
        self.need_sort_entities = true;

        for (_, callback) in &mut self.callbacks {
            callback.on_entity_removed(handle);
        }
    }

    /// Remove every entity; slots are kept for recycling
    pub fn release_all_entities(&mut self) {
        for index in 0..self.entities.len() {
            self.release_entity(index as u32);
        }
        self.alive = Rc::new(Vec::new());
        self.alive_count = 0;
        self.alive_dirty = false;
        self.deferred_created = false;
        self.delay_remove.clear();
        log::debug!("Released all entities ({} slots kept)", self.entities.len());
    }

    /// Whether `handle` names a live entity in its current generation
    pub fn is_alive(&self, handle: EntityHandle) -> bool {
        self.entity(handle).is_some()
    }

    /// Entity named by `handle`, if still alive
    pub fn entity(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities
            .get(handle.index() as usize)
            .filter(|e| e.is_alive() && e.generation() == handle.generation())
    }

    /// Mutable entity named by `handle`, if still alive
    pub fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.entities
            .get_mut(handle.index() as usize)
            .filter(|e| e.is_alive() && e.generation() == handle.generation())
    }

    /// Alive entity at `index`
    pub fn entity_at(&self, index: u32) -> Option<&Entity> {
        self.entities.get(index as usize).filter(|e| e.is_alive())
    }

    /// Length of the backing array, including recycled slots
    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    /// Number of alive entities
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Alive entity indices, depth sorted as of the last sort
    ///
    /// Between a removal and the next `update` (or `query_groups`) the list
    /// may still hold the removed indices; check with [`entity_at`](Self::entity_at).
    pub fn alive_entities(&self) -> &[u32] {
        &self.alive
    }

    fn live_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.is_alive())
    }

    /// Alive entity with string id `id`, lowest index first
    pub fn entity_by_id(&self, id: &str) -> Option<EntityHandle> {
        self.live_entities().find(|e| e.id() == Some(id)).map(Entity::handle)
    }

    /// Set or clear the string id of an entity
    pub fn set_entity_id(&mut self, handle: EntityHandle, id: Option<&str>) -> Result<(), EcsError> {
        self.live_entity_mut(handle)?.set_id(id.map(str::to_owned));
        Ok(())
    }

    /// Change the visible flag; visibility groups requery on change
    pub fn set_visible(&mut self, handle: EntityHandle, visible: bool) -> Result<(), EcsError> {
        let entity = self.live_entity_mut(handle)?;
        if entity.is_visible() != visible {
            entity.set_visible(visible);
            self.notify_groups(|group| group.is_visible_filter() || group.is_custom());
        }
        Ok(())
    }

    fn live_entity_mut(&mut self, handle: EntityHandle) -> Result<&mut Entity, EcsError> {
        match self.entities.get_mut(handle.index() as usize) {
            Some(entity) if entity.is_alive() && entity.generation() == handle.generation() => Ok(entity),
            _ => {
                log::warn!("{} is not alive", handle);
                Err(EcsError::StaleEntity(handle))
            }
        }
    }

    // ------------------------------------------------------------------
    // Data

    /// Typed key for `T`, registering the type on first use
    pub fn data_key<T: EntityData>(&mut self) -> Result<DataKey<T>, EcsError> {
        self.registry.key::<T>()
    }

    /// Typed key for `T` if any entity could hold it
    pub fn existing_key<T: EntityData>(&self) -> Option<DataKey<T>> {
        self.registry.existing_key::<T>()
    }

    /// Attach a default `T`, replacing any previous instance
    pub fn add_data<T: EntityData + Default>(&mut self, handle: EntityHandle) -> Result<&mut T, EcsError> {
        self.insert_data(handle, T::default())
    }

    /// Attach `data`, replacing (and dropping) any previous instance of `T`
    pub fn insert_data<T: EntityData>(&mut self, handle: EntityHandle, data: T) -> Result<&mut T, EcsError> {
        let id = self.registry.register::<T>()?;
        self.live_entity_mut(handle)?;
        self.notify_data_changed(id);

        self.live_entity_mut(handle)?
            .set_data(id, Box::new(data))
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(EcsError::UnknownDataType(id.raw()))
    }

    /// Drop the `T` instance of an entity; returns whether there was one
    pub fn remove_data<T: EntityData>(&mut self, handle: EntityHandle) -> Result<bool, EcsError> {
        match self.registry.index_of::<T>() {
            Some(id) => self.remove_data_by_index(handle, id),
            None => Ok(false),
        }
    }

    /// Drop the data in slot `id`; returns whether there was any
    pub fn remove_data_by_index(&mut self, handle: EntityHandle, id: DataTypeId) -> Result<bool, EcsError> {
        self.registry.check(id)?;
        let removed = self.live_entity_mut(handle)?.remove_data(id);
        if removed {
            self.notify_data_changed(id);
        }
        Ok(removed)
    }

    /// The `T` instance of an entity
    pub fn get_data<T: EntityData>(&self, handle: EntityHandle) -> Option<&T> {
        let key = self.existing_key::<T>()?;
        self.entity(handle)?.get_data(key)
    }

    /// The mutable `T` instance of an entity
    pub fn get_data_mut<T: EntityData>(&mut self, handle: EntityHandle) -> Option<&mut T> {
        let key = self.existing_key::<T>()?;
        self.entity_mut(handle)?.get_data_mut(key)
    }

    /// Write the persisted record of an entity's `T`
    pub fn save_data<T: EntityData>(&self, handle: EntityHandle, out: &mut dyn Write) -> Result<(), EcsError> {
        let data = self.get_data::<T>(handle).ok_or(EcsError::MissingData {
            entity: handle,
            type_name: type_name::<T>(),
        })?;
        if !data.is_serializable() {
            return Err(EcsError::SerializationUnsupported(type_name::<T>()));
        }
        data.serialize(out)
    }

    /// Read a persisted `T` record and attach it, replacing any previous instance
    ///
    /// Parent links restored this way carry the index only.
    pub fn load_data<T: EntityData + Default>(
        &mut self,
        handle: EntityHandle,
        input: &mut dyn Read,
        version: u32,
    ) -> Result<&mut T, EcsError> {
        let mut data = T::default();
        data.deserialize(input, version)?;
        self.insert_data(handle, data)
    }

    /// Slot lookup by entity index, for system hot paths
    #[inline]
    pub fn data_at<T: EntityData>(&self, index: u32, key: DataKey<T>) -> Option<&T> {
        self.entity_at(index)?.get_data(key)
    }

    /// Mutable slot lookup by entity index
    #[inline]
    pub fn data_at_mut<T: EntityData>(&mut self, index: u32, key: DataKey<T>) -> Option<&mut T> {
        self.entities
            .get_mut(index as usize)
            .filter(|e| e.is_alive())?
            .get_data_mut(key)
    }

    fn notify_data_changed(&mut self, id: DataTypeId) {
        if self.registry.index_of::<WorldTransformData>() == Some(id) {
            self.need_sort_entities = true;
        }
        self.notify_groups(|group| group.tracks(id) || group.is_custom());
    }

    // ------------------------------------------------------------------
    // Transform hierarchy

    /// Attach a [`WorldTransformData`] below `parent`
    ///
    /// Depth is the parent's depth plus one.
    pub fn add_transform_data(
        &mut self,
        handle: EntityHandle,
        parent: Option<EntityHandle>,
        relative: Mat4,
    ) -> Result<&mut WorldTransformData, EcsError> {
        if parent == Some(handle) {
            return Err(EcsError::HierarchyCycle(handle));
        }
        let depth = match parent {
            Some(parent) => self.depth_below(parent)?,
            None => 0,
        };

        let mut data = WorldTransformData::new(relative);
        data.set_parent(parent.map(ParentRef::checked), depth);
        if let Some(id) = self.entity(handle).and_then(Entity::id) {
            data.name = id.to_owned();
        }
        self.insert_data(handle, data)
    }

    /// Move an entity under a new scene parent; depths of the subtree follow
    pub fn set_entity_parent(&mut self, handle: EntityHandle, parent: Option<EntityHandle>) -> Result<(), EcsError> {
        if let Some(parent) = parent {
            if parent == handle || self.is_ancestor(handle, parent) {
                log::error!("Parenting {} under {} would create a cycle", handle, parent);
                return Err(EcsError::HierarchyCycle(handle));
            }
        }
        let depth = match parent {
            Some(parent) => self.depth_below(parent)?,
            None => 0,
        };

        self.transform_mut(handle)?
            .set_parent(parent.map(ParentRef::checked), depth);
        self.recompute_depths()?;
        self.need_sort_entities = true;
        Ok(())
    }

    /// Compute the world matrix from `target` instead of the scene parent
    ///
    /// `None` restores the scene parent.
    pub fn attach_transform(&mut self, handle: EntityHandle, target: Option<EntityHandle>) -> Result<(), EcsError> {
        if let Some(target) = target {
            if !self.is_alive(target) {
                return Err(EcsError::StaleEntity(target));
            }
            if target == handle || self.effective_chain_contains(target, handle.index()) {
                log::error!("Attaching {} to {} would create a cycle", handle, target);
                return Err(EcsError::HierarchyCycle(handle));
            }
        }

        self.transform_mut(handle)?
            .set_attach_parent(target.map(ParentRef::checked));
        self.need_sort_entities = true;
        Ok(())
    }

    /// Whether `link` points at a live entity of the linked generation
    pub fn is_reference_valid(&self, link: ParentRef) -> bool {
        self.resolve(link).is_some()
    }

    /// Alive entities whose parent or attach link no longer points at the entity it was made for
    pub fn stale_parent_references(&self) -> Vec<EntityHandle> {
        let Some(key) = self.existing_key::<WorldTransformData>() else {
            return Vec::new();
        };
        self.live_entities()
            .filter(|entity| {
                entity.get_data(key).is_some_and(|t| {
                    [t.parent(), t.attach_parent()]
                        .into_iter()
                        .flatten()
                        .any(|link| !self.is_reference_valid(link))
                })
            })
            .map(Entity::handle)
            .collect()
    }

    fn resolve(&self, link: ParentRef) -> Option<u32> {
        let entity = self.entity_at(link.index)?;
        match link.generation {
            Some(generation) if generation != entity.generation() => None,
            _ => Some(link.index),
        }
    }

    /// Drop the parent and attach links of the transform at `index` that no
    /// longer resolve; returns whether any was dropped
    ///
    /// The entity becomes a root (or falls back to its scene parent when only
    /// the attach link was stale) and the alive list is re-sorted next frame.
    pub(crate) fn detach_stale_links(&mut self, index: u32) -> bool {
        let Some(key) = self.existing_key::<WorldTransformData>() else {
            return false;
        };
        let Some(transform) = self.data_at(index, key) else {
            return false;
        };
        let stale_parent = transform.parent().is_some_and(|link| !self.is_reference_valid(link));
        let stale_attach = transform.attach_parent().is_some_and(|link| !self.is_reference_valid(link));
        if !stale_parent && !stale_attach {
            return false;
        }

        if let Some(transform) = self.data_at_mut(index, key) {
            if stale_parent {
                transform.set_parent(None, 0);
            }
            if stale_attach {
                transform.set_attach_parent(None);
            }
        }
        if stale_parent {
            if let Err(e) = self.recompute_depths() {
                log::error!("Depths not updated after dropping a stale link: {}", e);
            }
        }
        self.need_sort_entities = true;
        log::warn!("Entity {} linked to a removed entity and was detached", index);
        true
    }

    fn transform_mut(&mut self, handle: EntityHandle) -> Result<&mut WorldTransformData, EcsError> {
        let missing = EcsError::MissingData {
            entity: handle,
            type_name: type_name::<WorldTransformData>(),
        };
        let Some(key) = self.existing_key::<WorldTransformData>() else {
            return Err(missing);
        };
        self.live_entity_mut(handle)?.get_data_mut(key).ok_or(missing)
    }

    fn depth_below(&self, parent: EntityHandle) -> Result<u32, EcsError> {
        let entity = self.entity(parent).ok_or(EcsError::StaleEntity(parent))?;
        let parent_depth = self
            .existing_key::<WorldTransformData>()
            .and_then(|key| entity.get_data(key))
            .map_or(0, WorldTransformData::depth);
        let depth = parent_depth + 1;
        if depth as usize >= self.config.max_entity_depth {
            log::error!(
                "Entity below {} would have depth {}, the limit is {}",
                parent,
                depth,
                self.config.max_entity_depth
            );
            return Err(EcsError::DepthOverflow {
                index: parent.index(),
                depth: depth as usize,
                max_depth: self.config.max_entity_depth,
            });
        }
        Ok(depth)
    }

    /// Whether `ancestor` is on the scene parent chain of `node`
    fn is_ancestor(&self, ancestor: EntityHandle, node: EntityHandle) -> bool {
        self.chain_contains(node.index(), ancestor.index(), WorldTransformData::parent)
    }

    fn effective_chain_contains(&self, start: EntityHandle, needle: u32) -> bool {
        self.chain_contains(start.index(), needle, WorldTransformData::effective_parent)
    }

    fn chain_contains(&self, start: u32, needle: u32, link: fn(&WorldTransformData) -> Option<ParentRef>) -> bool {
        let Some(key) = self.existing_key::<WorldTransformData>() else {
            return false;
        };
        let mut cursor = start;
        for _ in 0..=self.config.max_entity_depth {
            let next = self
                .data_at(cursor, key)
                .and_then(link)
                .and_then(|parent| self.resolve(parent));
            match next {
                Some(parent) if parent == needle => return true,
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
        false
    }

    /// Depth of every alive entity along `link`; dead slots are `None`
    fn hierarchy_depths(
        &self,
        key: DataKey<WorldTransformData>,
        link: fn(&WorldTransformData) -> Option<ParentRef>,
    ) -> Result<Vec<Option<usize>>, EcsError> {
        let max_depth = self.config.max_entity_depth;
        let parent_of = |index: usize| {
            self.entities
                .get(index)?
                .get_data(key)
                .and_then(link)
                .and_then(|parent| self.resolve(parent))
                .map(|parent| parent as usize)
        };
        let overflow = |index: usize, depth: usize| {
            log::error!(
                "Entity {} reaches hierarchy depth {}, the limit is {}",
                index,
                depth,
                max_depth
            );
            EcsError::DepthOverflow {
                index: index as u32,
                depth,
                max_depth,
            }
        };

        let mut depths: Vec<Option<usize>> = vec![None; self.entities.len()];
        let mut path: Vec<usize> = Vec::new();

        for start in self.live_entities().map(|e| e.index() as usize) {
            if depths.get(start).copied().flatten().is_some() {
                continue;
            }

            path.clear();
            let mut cursor = start;
            let mut depth = loop {
                path.push(cursor);
                if path.len() > max_depth {
                    return Err(overflow(start, path.len()));
                }
                match parent_of(cursor) {
                    None => break 0,
                    Some(parent) => match depths.get(parent).copied().flatten() {
                        Some(parent_depth) => break parent_depth + 1,
                        None => cursor = parent,
                    },
                }
            };

            for &node in path.iter().rev() {
                if depth >= max_depth {
                    return Err(overflow(node, depth));
                }
                if let Some(slot) = depths.get_mut(node) {
                    *slot = Some(depth);
                }
                depth += 1;
            }
        }
        Ok(depths)
    }

    fn recompute_depths(&mut self) -> Result<(), EcsError> {
        let Some(key) = self.existing_key::<WorldTransformData>() else {
            return Ok(());
        };
        let depths = self.hierarchy_depths(key, WorldTransformData::parent)?;
        for (index, depth) in depths.into_iter().enumerate() {
            let Some(depth) = depth else { continue };
            if let Some(transform) = self.data_at_mut(index as u32, key) {
                transform.set_depth(depth as u32);
            }
        }
        Ok(())
    }

    /// Rebuild the alive list bucketed by effective hierarchy depth
    ///
    /// Attached entities sort after their attach target, so a single
    /// ascending pass always sees a parent before its children.
    fn sort_alive_entities(&mut self) -> Result<(), EcsError> {
        if !self.need_sort_entities {
            return Ok(());
        }

        let max_depth = self.config.max_entity_depth;
        let depths = match self.existing_key::<WorldTransformData>() {
            Some(key) => self.hierarchy_depths(key, WorldTransformData::effective_parent)?,
            None => Vec::new(),
        };

        let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); max_depth];
        for entity in self.live_entities() {
            let index = entity.index();
            let depth = depths.get(index as usize).copied().flatten().unwrap_or(0);
            let bucket = buckets.get_mut(depth).ok_or(EcsError::DepthOverflow {
                index,
                depth,
                max_depth,
            })?;
            bucket.push(index);
        }

        self.alive = Rc::new(buckets.concat());
        self.alive_count = self.alive.len();
        self.alive_dirty = false;
        self.need_sort_entities = false;

        // Groups refreshed since then could not see the deferred entities.
        if std::mem::take(&mut self.deferred_created) {
            self.notify_groups(|group| group.parent().is_none());
        }

        // Membership is unchanged by a sort; clean groups only follow the new order.
        let mut rank = vec![u32::MAX; self.entities.len()];
        for (position, &index) in self.alive.iter().enumerate() {
            if let Some(slot) = rank.get_mut(index as usize) {
                *slot = position as u32;
            }
        }
        for group in self.groups.iter_mut().flatten() {
            if !group.need_query() {
                group.reorder(&rank);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Groups

    /// Group over all alive entities owning every type in `types`
    ///
    /// Returns the existing group when one already tracks exactly that set.
    pub fn create_group(&mut self, types: &[DataTypeId]) -> Result<GroupId, EcsError> {
        self.find_or_create_group(types, None)
    }

    /// Group over the visible entities owning every type in `types`
    pub fn create_group_from_visible(&mut self, types: &[DataTypeId]) -> Result<GroupId, EcsError> {
        let visible = self.visible_group();
        self.find_or_create_group(types, Some(visible))
    }

    /// Group filtering the result of `parent`
    pub fn create_group_with_parent(&mut self, types: &[DataTypeId], parent: GroupId) -> Result<GroupId, EcsError> {
        if self.group(parent).is_none() {
            return Err(EcsError::UnknownGroup(parent));
        }
        self.find_or_create_group(types, Some(parent))
    }

    /// Group with a caller supplied predicate; never shared
    pub fn add_custom_group(
        &mut self,
        types: &[DataTypeId],
        parent: Option<GroupId>,
        predicate: impl Fn(&Entity) -> bool + 'static,
    ) -> Result<GroupId, EcsError> {
        self.check_types(types)?;
        if let Some(parent) = parent {
            if self.group(parent).is_none() {
                return Err(EcsError::UnknownGroup(parent));
            }
        }
        let id = self.push_group(EntityGroup::new(types, parent, GroupFilter::Custom(Box::new(predicate))));
        log::debug!("Created custom group {:?}", id);
        Ok(id)
    }

    /// Existing plain group tracking exactly `types`
    pub fn find_group(&self, types: &[DataTypeId]) -> Option<GroupId> {
        let types = normalize(types);
        self.groups.iter().enumerate().find_map(|(index, group)| {
            group
                .as_ref()
                .filter(|g| !g.is_custom() && !g.is_visible_filter() && g.types() == types.as_slice())
                .map(|_| GroupId(index))
        })
    }

    /// Remove a group and every group chained below it
    pub fn remove_group(&mut self, id: GroupId) -> Result<(), EcsError> {
        if self.group(id).is_none() {
            return Err(EcsError::UnknownGroup(id));
        }

        let mut removed = vec![id];
        if let Some(slot) = self.groups.get_mut(id.0) {
            *slot = None;
        }
        // Children always sit after their parent.
        for index in id.0 + 1..self.groups.len() {
            let orphaned = self.groups[index]
                .as_ref()
                .and_then(EntityGroup::parent)
                .is_some_and(|parent| removed.contains(&parent));
            if orphaned {
                self.groups[index] = None;
                removed.push(GroupId(index));
            }
        }
        if self.visible_group.is_some_and(|visible| removed.contains(&visible)) {
            self.visible_group = None;
        }
        log::debug!("Removed {} group(s)", removed.len());
        Ok(())
    }

    /// Remove every group
    ///
    /// Ids are never reused, so old ids simply stop resolving.
    pub fn remove_all_groups(&mut self) {
        for slot in &mut self.groups {
            *slot = None;
        }
        self.visible_group = None;
    }

    /// Alias of [`remove_all_groups`](Self::remove_all_groups)
    pub fn release_all_groups(&mut self) {
        self.remove_all_groups();
    }

    /// Force every group tracking `id` to requery
    pub fn notify_update_group(&mut self, id: DataTypeId) {
        self.notify_groups(|group| group.tracks(id));
    }

    /// Group by id
    pub fn group(&self, id: GroupId) -> Option<&EntityGroup> {
        self.groups.get(id.0).and_then(Option::as_ref)
    }

    /// Cached entities of a group; empty for unknown ids
    pub fn group_entities(&self, id: GroupId) -> &[u32] {
        self.group(id).map(EntityGroup::entities).unwrap_or_default()
    }

    /// Root group of visible entities, recreated if it was removed
    pub fn visible_group(&mut self) -> GroupId {
        match self.visible_group {
            Some(id) => id,
            None => {
                let id = self.push_group(EntityGroup::new(&[], None, GroupFilter::Visible));
                self.visible_group = Some(id);
                id
            }
        }
    }

    /// Bring every dirty group up to date outside of `update`
    pub fn query_groups(&mut self) -> Result<(), EcsError> {
        self.sort_alive_entities()?;
        self.refresh_groups();
        Ok(())
    }

    /// Requery dirty groups, parents first
    pub(crate) fn refresh_groups(&mut self) {
        for index in 0..self.groups.len() {
            let (before, rest) = self.groups.split_at_mut(index);
            let Some(group) = rest.first_mut().and_then(Option::as_mut) else {
                continue;
            };

            match group.parent() {
                None => {
                    if group.need_query() {
                        group.on_query(&self.entities, &self.alive);
                    }
                }
                Some(parent) => {
                    let Some(parent) = before.get(parent.0).and_then(Option::as_ref) else {
                        continue;
                    };
                    if group.need_query() || group.parent_changed(parent.query_count()) {
                        group.on_query(&self.entities, parent.entities());
                        group.set_parent_stamp(parent.query_count());
                    }
                }
            }
        }
    }

    fn find_or_create_group(&mut self, types: &[DataTypeId], parent: Option<GroupId>) -> Result<GroupId, EcsError> {
        self.check_types(types)?;
        let normalized = normalize(types);
        let existing = self.groups.iter().position(|group| {
            group
                .as_ref()
                .is_some_and(|g| g.same_shape(&normalized, parent, false))
        });
        if let Some(index) = existing {
            return Ok(GroupId(index));
        }

        let id = self.push_group(EntityGroup::new(&normalized, parent, GroupFilter::Data));
        log::debug!("Created group {:?} for {} type(s)", id, normalized.len());
        Ok(id)
    }

    fn check_types(&self, types: &[DataTypeId]) -> Result<(), EcsError> {
        for &id in types {
            if let Err(e) = self.registry.check(id) {
                log::error!("Cannot create group: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn push_group(&mut self, group: EntityGroup) -> GroupId {
        self.groups.push(Some(group));
        GroupId(self.groups.len() - 1)
    }

    fn notify_groups(&mut self, affected: impl Fn(&EntityGroup) -> bool) {
        for group in self.groups.iter_mut().flatten() {
            if affected(group) {
                group.notify_need_query();
            }
        }
    }

    // ------------------------------------------------------------------
    // Systems

    /// Register a default-constructed system, or return the existing one
    pub fn add_system<T: EntitySystem + Default>(&mut self) -> Result<&mut T, EcsError> {
        self.add_system_with(T::default())
    }

    /// Register `system`, or return the existing instance of its type
    pub fn add_system_with<T: EntitySystem>(&mut self, system: T) -> Result<&mut T, EcsError> {
        let slot = self.register_system::<T>(SystemBox::Update(Box::new(system)))?;
        self.system_at_mut::<T>(slot)
    }

    /// Register a default-constructed render system, or return the existing one
    pub fn add_render_system<T: RenderSystem + Default>(&mut self) -> Result<&mut T, EcsError> {
        self.add_render_system_with(T::default())
    }

    /// Register `system` as a render system, or return the existing instance
    pub fn add_render_system_with<T: RenderSystem>(&mut self, system: T) -> Result<&mut T, EcsError> {
        let slot = self.register_system::<T>(SystemBox::Render(Box::new(system)))?;
        self.system_at_mut::<T>(slot)
    }

    /// Registered system of type `T`; `None` while it is running
    pub fn get_system<T: EntitySystem>(&self) -> Option<&T> {
        let slot = *self.system_index.get(&TypeId::of::<T>())?;
        self.systems
            .get(slot)?
            .as_ref()?
            .system
            .as_ref()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Mutable registered system of type `T`; `None` while it is running
    pub fn get_system_mut<T: EntitySystem>(&mut self) -> Option<&mut T> {
        let slot = *self.system_index.get(&TypeId::of::<T>())?;
        self.system_at_mut::<T>(slot).ok()
    }

    /// Registered render system of type `T`
    pub fn get_render_system<T: RenderSystem>(&self) -> Option<&T> {
        let slot = *self.system_index.get(&TypeId::of::<T>())?;
        self.systems
            .get(slot)?
            .as_ref()?
            .system
            .as_ref()?
            .as_render()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Whether a system of type `T` is registered
    pub fn has_system<T: EntitySystem>(&self) -> bool {
        self.system_index.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered systems, render systems included
    pub fn system_count(&self) -> usize {
        self.system_index.len()
    }

    /// Unregister the system of type `T`; returns whether one was registered
    ///
    /// A system cannot remove itself while it runs.
    pub fn remove_system<T: EntitySystem>(&mut self) -> Result<bool, EcsError> {
        let Some(&slot) = self.system_index.get(&TypeId::of::<T>()) else {
            return Ok(false);
        };
        let Some(slot_entry) = self.systems.get_mut(slot) else {
            return Ok(false);
        };
        if slot_entry.as_ref().is_some_and(|entry| entry.system.is_none()) {
            return Err(EcsError::SystemBusy(type_name::<T>()));
        }

        if let Some(entry) = slot_entry.take() {
            self.renderer_changed |= entry.is_render;
            log::debug!("Removed system {}", entry.name);
        }
        self.system_index.remove(&TypeId::of::<T>());
        self.system_changed = true;
        Ok(true)
    }

    /// Change the update position of `T`; lower runs first
    pub fn set_system_order<T: EntitySystem>(&mut self, order: i32) -> bool {
        let entry = self
            .system_index
            .get(&TypeId::of::<T>())
            .and_then(|&slot| self.systems.get_mut(slot))
            .and_then(Option::as_mut);
        match entry {
            Some(entry) => {
                entry.order = order;
                self.system_changed = true;
                true
            }
            None => false,
        }
    }

    /// Re-sort systems before the next frame, e.g. after a priority change
    pub fn notify_system_order_changed(&mut self) {
        self.system_changed = true;
        self.renderer_changed = true;
    }

    /// Unregister every system
    pub fn release_all_systems(&mut self) {
        for slot in &mut self.systems {
            *slot = None;
        }
        self.system_index.clear();
        self.update_order.clear();
        self.render_order.clear();
        self.system_changed = false;
        self.renderer_changed = false;
    }

    fn register_system<T: EntitySystem>(&mut self, system: SystemBox) -> Result<usize, EcsError> {
        let name = type_name::<T>();
        if let Some(&slot) = self.system_index.get(&TypeId::of::<T>()) {
            return match self.systems.get(slot).and_then(Option::as_ref) {
                Some(entry) if entry.system.is_some() => Ok(slot),
                _ => Err(EcsError::SystemBusy(name)),
            };
        }

        let is_render = matches!(system, SystemBox::Render(_));
        let render_key = system
            .as_render()
            .map_or((RenderPass::Opaque, 0), |s| (s.render_pass(), s.sorting_priority()));
        let order = self.next_order;
        self.next_order += 1;
        self.next_serial += 1;

        let slot = self.systems.len();
        self.systems.push(Some(SystemEntry {
            system: Some(system),
            serial: self.next_serial,
            name,
            order,
            is_render,
            render_key,
        }));
        self.system_index.insert(TypeId::of::<T>(), slot);
        self.system_changed = true;
        self.renderer_changed |= is_render;
        log::debug!("Registered {} {} (order {})", if is_render { "render system" } else { "system" }, name, order);

        self.with_system(slot, |system, manager| system.init(manager));
        Ok(slot)
    }

    fn system_at_mut<T: EntitySystem>(&mut self, slot: usize) -> Result<&mut T, EcsError> {
        self.systems
            .get_mut(slot)
            .and_then(Option::as_mut)
            .and_then(|entry| entry.system.as_mut())
            .and_then(|system| system.as_any_mut().downcast_mut::<T>())
            .ok_or(EcsError::SystemBusy(type_name::<T>()))
    }

    /// Detach the system in `slot`, run `f`, and put it back unless it was
    /// removed or replaced meanwhile
    fn with_system<R>(&mut self, slot: usize, f: impl FnOnce(&mut SystemBox, &mut Self) -> R) -> Option<R> {
        let entry = self.systems.get_mut(slot)?.as_mut()?;
        let serial = entry.serial;
        let mut system = entry.system.take()?;

        let result = f(&mut system, self);

        match self.systems.get_mut(slot).and_then(Option::as_mut) {
            Some(entry) if entry.serial == serial => entry.system = Some(system),
            _ => log::debug!("System in slot {} was removed while running", slot),
        }
        Some(result)
    }

    fn sort_systems(&mut self) {
        if self.system_changed {
            let mut order: Vec<usize> = self
                .systems
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.is_some())
                .map(|(slot, _)| slot)
                .collect();
            order.sort_by_key(|&slot| self.systems[slot].as_ref().map_or(i32::MAX, |e| e.order));
            self.update_order = order;
            self.system_changed = false;
        }

        if self.renderer_changed {
            for entry in self.systems.iter_mut().flatten() {
                if let Some(system) = entry.system.as_ref().and_then(SystemBox::as_render) {
                    entry.render_key = (system.render_pass(), system.sorting_priority());
                }
            }

            let mut order: Vec<usize> = self
                .systems
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.as_ref().is_some_and(|e| e.is_render))
                .map(|(slot, _)| slot)
                .collect();
            // Stable: equal keys keep registration order.
            order.sort_by_key(|&slot| {
                self.systems[slot]
                    .as_ref()
                    .map_or((RenderPass::Effect, i32::MAX), |e| e.render_key)
            });
            self.render_order = order;
            self.renderer_changed = false;
        }
    }

    // ------------------------------------------------------------------
    // Callbacks

    /// Register a lifecycle observer
    pub fn add_callback(&mut self, callback: Box<dyn EntityManagerCallback>) -> CallbackId {
        let id = CallbackId(self.next_callback);
        self.next_callback += 1;
        self.callbacks.push((id, callback));
        id
    }

    /// Unregister a lifecycle observer; returns whether it was registered
    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(registered, _)| *registered != id);
        self.callbacks.len() != before
    }
}
