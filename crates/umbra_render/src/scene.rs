//! Hard-coded demo scene
//!
//! A non-indexed triangle list. Backends draw it in every pass that needs
//! the scene; the alias-free shadow test also reads it as a storage buffer
//! to fetch whole triangles per fragment.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Vertex layout shared with the shaders (`position.w = 1`, `normal.w = 0`)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneVertex {
    pub position: [f32; 4],
    pub normal: [f32; 4],
}

impl SceneVertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.extend(1.0).to_array(),
            normal: normal.extend(0.0).to_array(),
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.position[0], self.position[1], self.position[2])
    }

    #[inline]
    pub fn normal(&self) -> Vec3 {
        Vec3::new(self.normal[0], self.normal[1], self.normal[2])
    }
}

/// A triangle with its face normal
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub v: [Vec3; 3],
    pub normal: Vec3,
}

/// Scene geometry
#[derive(Clone, Debug, Default)]
pub struct SceneGeometry {
    vertices: Vec<SceneVertex>,
}

impl SceneGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ground plane plus a handful of boxes and a floating slab
    pub fn demo() -> Self {
        let mut scene = Self::new();
        scene.add_quad_y(0.0, 40.0, true);
        scene.add_box(Vec3::new(-6.0, 2.0, -4.0), Vec3::new(2.0, 2.0, 2.0));
        scene.add_box(Vec3::new(5.0, 1.5, 3.0), Vec3::new(1.5, 1.5, 1.5));
        scene.add_box(Vec3::new(0.0, 4.0, 0.0), Vec3::new(0.4, 4.0, 0.4));
        scene.add_box(Vec3::new(-2.0, 0.5, 7.0), Vec3::new(3.0, 0.5, 1.0));
        scene.add_box(Vec3::new(3.0, 7.0, -3.0), Vec3::new(2.5, 0.15, 2.5));
        scene
    }

    /// Horizontal square at height `y`, `half` wide, facing up or down
    pub fn add_quad_y(&mut self, y: f32, half: f32, facing_up: bool) {
        let a = Vec3::new(-half, y, -half);
        let b = Vec3::new(half, y, -half);
        let c = Vec3::new(half, y, half);
        let d = Vec3::new(-half, y, half);
        if facing_up {
            self.add_quad([d, c, b, a]);
        } else {
            self.add_quad([a, b, c, d]);
        }
    }

    /// Axis-aligned box
    pub fn add_box(&mut self, center: Vec3, half: Vec3) {
        let p = |x: f32, y: f32, z: f32| center + half * Vec3::new(x, y, z);
        // Counter-clockwise when seen from outside
        self.add_quad([p(-1.0, -1.0, 1.0), p(1.0, -1.0, 1.0), p(1.0, 1.0, 1.0), p(-1.0, 1.0, 1.0)]);
        self.add_quad([p(1.0, -1.0, -1.0), p(-1.0, -1.0, -1.0), p(-1.0, 1.0, -1.0), p(1.0, 1.0, -1.0)]);
        self.add_quad([p(1.0, -1.0, 1.0), p(1.0, -1.0, -1.0), p(1.0, 1.0, -1.0), p(1.0, 1.0, 1.0)]);
        self.add_quad([p(-1.0, -1.0, -1.0), p(-1.0, -1.0, 1.0), p(-1.0, 1.0, 1.0), p(-1.0, 1.0, -1.0)]);
        self.add_quad([p(-1.0, 1.0, 1.0), p(1.0, 1.0, 1.0), p(1.0, 1.0, -1.0), p(-1.0, 1.0, -1.0)]);
        self.add_quad([p(-1.0, -1.0, -1.0), p(1.0, -1.0, -1.0), p(1.0, -1.0, 1.0), p(-1.0, -1.0, 1.0)]);
    }

    /// Planar quad given counter-clockwise
    pub fn add_quad(&mut self, q: [Vec3; 4]) {
        self.add_triangle([q[0], q[1], q[2]]);
        self.add_triangle([q[0], q[2], q[3]]);
    }

    /// Triangle given counter-clockwise; the normal follows the winding
    pub fn add_triangle(&mut self, v: [Vec3; 3]) {
        let normal = (v[1] - v[0]).cross(v[2] - v[0]).normalize_or_zero();
        self.vertices.extend(v.iter().map(|p| SceneVertex::new(*p, normal)));
    }

    #[inline]
    pub fn vertices(&self) -> &[SceneVertex] {
        &self.vertices
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn triangle(&self, i: usize) -> Triangle {
        let v = &self.vertices[i * 3..i * 3 + 3];
        Triangle {
            v: [v[0].position(), v[1].position(), v[2].position()],
            normal: v[0].normal(),
        }
    }

    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        (0..self.triangle_count()).map(move |i| self.triangle(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_has_twelve_outward_triangles() {
        let mut scene = SceneGeometry::new();
        let center = Vec3::new(1.0, 2.0, 3.0);
        scene.add_box(center, Vec3::ONE);
        assert_eq!(scene.triangle_count(), 12);
        for tri in scene.triangles() {
            let centroid = (tri.v[0] + tri.v[1] + tri.v[2]) / 3.0;
            assert!(tri.normal.dot(centroid - center) > 0.0);
        }
    }

    #[test]
    fn test_ground_faces_up() {
        let mut scene = SceneGeometry::new();
        scene.add_quad_y(0.0, 10.0, true);
        assert!(scene.triangles().all(|t| t.normal == Vec3::Y));
    }

    #[test]
    fn test_demo_vertex_count() {
        let scene = SceneGeometry::demo();
        assert_eq!(scene.vertex_count() % 3, 0);
        assert_eq!(scene.triangle_count(), 2 + 5 * 12);
    }
}
