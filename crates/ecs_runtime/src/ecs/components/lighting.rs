//! Light data
//!
//! Position and world direction come from the entity's transform; the
//! light system resolves them each frame.

use crate::ecs::entity_data::EntityData;
use crate::foundation::math::Vec3;

/// Kinds of light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    /// Parallel rays, like sunlight
    Directional,
    /// Radiates in all directions from a position
    Point,
    /// Cone of light from a position
    Spot,
}

/// Light source attached to an entity
#[derive(Debug, Clone, PartialEq)]
pub struct LightData {
    /// The type of light
    pub light_type: LightType,
    /// RGB color (0.0 to 1.0 range)
    pub color: Vec3,
    /// Intensity multiplier
    pub intensity: f32,
    /// Direction in the entity's local space, for directional and spot lights
    pub direction: Vec3,
    /// Maximum distance for point and spot lights
    pub range: f32,
    /// Inner cone angle for spot lights (radians)
    pub inner_cone: f32,
    /// Outer cone angle for spot lights (radians)
    pub outer_cone: f32,
    /// Whether the light contributes at all
    pub enabled: bool,
    /// Whether the light renders a shadow map
    pub cast_shadows: bool,
}

impl Default for LightData {
    fn default() -> Self {
        Self::point(Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0)
    }
}

impl LightData {
    /// Directional light shining along `direction`
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            color,
            intensity,
            direction: direction.normalize(),
            range: 0.0,
            inner_cone: 0.0,
            outer_cone: 0.0,
            enabled: true,
            cast_shadows: true,
        }
    }

    /// Point light at the entity position
    pub fn point(color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            light_type: LightType::Point,
            color,
            intensity,
            direction: Vec3::new(0.0, -1.0, 0.0),
            range,
            inner_cone: 0.0,
            outer_cone: 0.0,
            enabled: true,
            cast_shadows: false,
        }
    }

    /// Spot light at the entity position
    pub fn spot(
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        range: f32,
        inner_cone: f32,
        outer_cone: f32,
    ) -> Self {
        Self {
            light_type: LightType::Spot,
            color,
            intensity,
            direction: direction.normalize(),
            range,
            inner_cone,
            outer_cone,
            enabled: true,
            cast_shadows: true,
        }
    }
}

impl EntityData for LightData {}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_directional_direction_is_normalized() {
        let light = LightData::directional(Vec3::new(-0.7, -1.0, 0.3), Vec3::new(1.0, 0.95, 0.9), 1.5);
        assert_relative_eq!(light.direction.norm(), 1.0, epsilon = 1e-6);
        assert_eq!(light.light_type, LightType::Directional);
        assert!(light.enabled);
    }

    #[test]
    fn test_default_is_point_light() {
        let light = LightData::default();
        assert_eq!(light.light_type, LightType::Point);
        assert!(!light.cast_shadows);
    }
}
