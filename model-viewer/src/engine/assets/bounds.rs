use bevy::prelude::*;
use bevy::render::mesh::VertexAttributeValues;

/// Axis-aligned box enclosing loaded content in world coordinates.
/// Starts empty and grows as points or other boxes are merged in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for ModelBounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl ModelBounds {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut bounds = Self::EMPTY;
        for point in points {
            bounds.extend(point);
        }
        bounds
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend(&mut self, point: Vec3) {
        if point.is_finite() {
            self.min = self.min.min(point);
            self.max = self.max.max(point);
        }
    }

    pub fn union(&self, other: &ModelBounds) -> ModelBounds {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        ModelBounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Box center; the origin for empty bounds.
    pub fn center(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            (self.min + self.max) * 0.5
        }
    }

    /// Extent along each axis; zero for empty bounds.
    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    pub fn max_dimension(&self) -> f32 {
        self.size().max_element()
    }
}

/// Bounds of a mesh's position attribute after applying `transform`.
pub fn mesh_bounds(mesh: &Mesh, transform: &Transform) -> ModelBounds {
    let matrix = transform.compute_matrix();
    match mesh.attribute(Mesh::ATTRIBUTE_POSITION) {
        Some(VertexAttributeValues::Float32x3(positions)) => ModelBounds::from_points(
            positions
                .iter()
                .map(|p| matrix.transform_point3(Vec3::from_array(*p))),
        ),
        _ => ModelBounds::EMPTY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_ignores_empty_boxes() {
        let a = ModelBounds::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(a.union(&ModelBounds::EMPTY), a);
        assert_eq!(ModelBounds::EMPTY.union(&a), a);

        let b = ModelBounds::new(Vec3::splat(-2.0), Vec3::splat(-1.0));
        let merged = a.union(&b);
        assert_eq!(merged.min, Vec3::splat(-2.0));
        assert_eq!(merged.max, Vec3::ONE);
    }

    #[test]
    fn empty_bounds_report_zero_extent() {
        let bounds = ModelBounds::EMPTY;
        assert!(bounds.is_empty());
        assert_eq!(bounds.center(), Vec3::ZERO);
        assert_eq!(bounds.max_dimension(), 0.0);
    }

    #[test]
    fn mesh_bounds_apply_the_primitive_transform() {
        let mesh = Mesh::from(Cuboid::new(2.0, 2.0, 2.0));
        let transform = Transform::from_xyz(10.0, 0.0, 0.0).with_scale(Vec3::splat(2.0));
        let bounds = mesh_bounds(&mesh, &transform);
        assert_eq!(bounds.min, Vec3::new(8.0, -2.0, -2.0));
        assert_eq!(bounds.max, Vec3::new(12.0, 2.0, 2.0));
    }
}
