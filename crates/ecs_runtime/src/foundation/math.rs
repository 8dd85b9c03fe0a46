//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the few helpers the transform and
//! culling systems need.

pub use nalgebra::{Matrix4, Quaternion, Unit, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Build a translation matrix
pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
    Mat4::new_translation(&Vec3::new(x, y, z))
}

/// Translation part of an affine matrix
pub fn translation_of(matrix: &Mat4) -> Vec3 {
    Vec3::new(matrix.m14, matrix.m24, matrix.m34)
}

/// Translation, then rotation, then scale, as one matrix
pub fn compose(position: &Vec3, rotation: &Quat, scale: &Vec3) -> Mat4 {
    Mat4::new_translation(position) * rotation.to_homogeneous() * Mat4::new_nonuniform_scaling(scale)
}

/// Inverse of `matrix`, or identity when the matrix is singular
pub fn inverse_or_identity(matrix: &Mat4) -> Mat4 {
    matrix.try_inverse().unwrap_or_else(Mat4::identity)
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Point3,
    /// Maximum corner
    pub max: Point3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Point3::origin(), Point3::origin())
    }
}

impl Aabb {
    /// Create a box from two corners; components are reordered as needed
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Box centered at `center` with half size `extents`
    pub fn from_center_extents(center: Point3, extents: Vec3) -> Self {
        Self::new(center - extents, center + extents)
    }

    /// The eight corners of the box
    pub fn corners(&self) -> [Point3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(a.x, b.y, b.z),
            Point3::new(b.x, b.y, b.z),
        ]
    }

    /// Bounding box of this box after transforming it by `matrix`
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let corners = self.corners();
        let first = matrix.transform_point(&corners[0]);
        let (mut min, mut max) = (first, first);
        for corner in &corners[1..] {
            let p = matrix.transform_point(corner);
            min = Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
            max = Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
        }
        Self { min, max }
    }

    /// Whether the two boxes overlap (touching counts)
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_roundtrip() {
        let m = translation(1.0, 2.0, 3.0);
        assert_eq!(translation_of(&m), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_compose_applies_scale_first() {
        let m = compose(&Vec3::new(5.0, 0.0, 0.0), &Quat::identity(), &Vec3::new(2.0, 2.0, 2.0));
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_eq!(p, Point3::new(7.0, 0.0, 0.0));
    }

    #[test]
    fn test_singular_inverse_falls_back_to_identity() {
        assert_eq!(inverse_or_identity(&Mat4::zeros()), Mat4::identity());
    }

    #[test]
    fn test_aabb_transform_and_intersection() {
        let unit = Aabb::from_center_extents(Point3::origin(), Vec3::new(1.0, 1.0, 1.0));
        let moved = unit.transformed(&translation(10.0, 0.0, 0.0));
        assert_eq!(moved.min, Point3::new(9.0, -1.0, -1.0));
        assert!(!unit.intersects(&moved));

        let near = unit.transformed(&translation(1.5, 0.0, 0.0));
        assert!(unit.intersects(&near));
    }
}
