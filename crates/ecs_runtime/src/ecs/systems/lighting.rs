//! Lighting system
//!
//! Resolves [`LightData`] entities into world-space lights once per frame and
//! owns the current directional light, which shadow and shading consumers
//! read from here instead of a shared global.

use super::CachedGroup;
use crate::ecs::components::{LightData, LightType, WorldTransformData};
use crate::ecs::entity::EntityHandle;
use crate::ecs::entity_manager::EntityManager;
use crate::ecs::system::EntitySystem;
use crate::foundation::math::{translation_of, Mat4, Vec3};

/// Maximum number of directional lights resolved per frame
pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;

/// Maximum number of point lights resolved per frame
pub const MAX_POINT_LIGHTS: usize = 8;

/// Maximum number of spot lights resolved per frame
pub const MAX_SPOT_LIGHTS: usize = 4;

/// A light in world space
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLight {
    /// Entity carrying the light
    pub entity: EntityHandle,
    /// Light kind
    pub light_type: LightType,
    /// World position (translation of the world matrix)
    pub position: Vec3,
    /// Normalized world direction
    pub direction: Vec3,
    /// RGB color
    pub color: Vec3,
    /// Intensity multiplier
    pub intensity: f32,
    /// Range for point and spot lights
    pub range: f32,
    /// Spot inner cone (radians)
    pub inner_cone: f32,
    /// Spot outer cone (radians)
    pub outer_cone: f32,
    /// Whether a shadow map is rendered for this light
    pub cast_shadows: bool,
}

impl ResolvedLight {
    fn new(entity: EntityHandle, light: &LightData, world: &Mat4) -> Self {
        let direction = world.transform_vector(&light.direction);
        let direction = direction.try_normalize(f32::EPSILON).unwrap_or(light.direction);
        Self {
            entity,
            light_type: light.light_type,
            position: translation_of(world),
            direction,
            color: light.color,
            intensity: light.intensity,
            range: light.range,
            inner_cone: light.inner_cone,
            outer_cone: light.outer_cone,
            cast_shadows: light.cast_shadows,
        }
    }
}

/// Collects the frame's lights and tracks the current directional light
#[derive(Debug, Default)]
pub struct LightSystem {
    group: CachedGroup,
    entities: Vec<u32>,
    lights: Vec<ResolvedLight>,
    preferred_directional: Option<EntityHandle>,
    current_directional: Option<usize>,
    dropped: usize,
}

impl LightSystem {
    /// Choose the directional light consumers should use
    ///
    /// `None` falls back to the first enabled directional light.
    pub fn set_directional_light(&mut self, entity: Option<EntityHandle>) {
        self.preferred_directional = entity;
    }

    /// The current directional light, if any was resolved this frame
    pub fn directional_light(&self) -> Option<&ResolvedLight> {
        self.current_directional.and_then(|i| self.lights.get(i))
    }

    /// Every light resolved in the last update
    pub fn lights(&self) -> &[ResolvedLight] {
        &self.lights
    }

    /// Resolved lights of one kind
    pub fn lights_of(&self, light_type: LightType) -> impl Iterator<Item = &ResolvedLight> {
        self.lights.iter().filter(move |l| l.light_type == light_type)
    }

    /// Lights skipped in the last update because a per-kind cap was reached
    pub fn dropped_lights(&self) -> usize {
        self.dropped
    }

    fn capacity(light_type: LightType) -> usize {
        match light_type {
            LightType::Directional => MAX_DIRECTIONAL_LIGHTS,
            LightType::Point => MAX_POINT_LIGHTS,
            LightType::Spot => MAX_SPOT_LIGHTS,
        }
    }

    fn bind_group(&mut self, manager: &mut EntityManager) {
        let bound = manager
            .data_key::<LightData>()
            .and_then(|key| self.group.bind(manager, &[key.id()], true));
        if let Err(e) = bound {
            log::error!("LightSystem cannot query lights: {}", e);
        }
    }
}

impl EntitySystem for LightSystem {
    fn init(&mut self, manager: &mut EntityManager) {
        self.bind_group(manager);
    }

    fn begin_query(&mut self, manager: &mut EntityManager) {
        self.entities.clear();
        if !self.group.is_bound(manager) {
            self.bind_group(manager);
        }
    }

    fn on_query(&mut self, manager: &mut EntityManager, _entities: &[u32]) {
        self.entities.extend_from_slice(self.group.entities(manager));
    }

    fn update(&mut self, manager: &mut EntityManager) {
        self.lights.clear();
        self.current_directional = None;
        let previously_dropped = self.dropped;
        self.dropped = 0;

        let Some(light_key) = manager.existing_key::<LightData>() else {
            return;
        };
        let transform_key = manager.existing_key::<WorldTransformData>();

        for &index in &self.entities {
            let Some(entity) = manager.entity_at(index) else {
                continue;
            };
            let Some(light) = entity.get_data(light_key) else {
                continue;
            };
            if !light.enabled {
                continue;
            }
            let used = self.lights_of(light.light_type).count();
            if used >= Self::capacity(light.light_type) {
                self.dropped += 1;
                continue;
            }
            let world = transform_key
                .and_then(|key| entity.get_data(key))
                .map_or_else(Mat4::identity, |t| *t.world());
            self.lights.push(ResolvedLight::new(entity.handle(), light, &world));
        }

        let directional = |l: &ResolvedLight| l.light_type == LightType::Directional;
        self.current_directional = self
            .preferred_directional
            .and_then(|handle| self.lights.iter().position(|l| directional(l) && l.entity == handle))
            .or_else(|| self.lights.iter().position(directional));

        if self.dropped > 0 && previously_dropped == 0 {
            log::warn!("{} light(s) exceed the per-kind limits and are ignored", self.dropped);
        }
    }
}
