//! Rasterization helpers of the CPU backend
//!
//! Camera and light views are ray cast per pixel inside each triangle's
//! screen bounds, which gives exact, perspective-correct hits. The alias-free
//! shadow test instead needs every texel a triangle touches, so it uses a
//! separating-axis overlap test between the projected triangle and each
//! texel square.

use glam::{Mat4, Vec2, Vec3};
use umbra_core::Extent2d;

use crate::scene::Triangle;

/// Face culling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
}

/// Fixed-function raster state shared by the passes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterState {
    pub cull: CullMode,
    pub conservative: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull: CullMode::Back,
            conservative: false,
        }
    }
}

impl RasterState {
    /// Switch to the shadow-test state and return the state to restore
    pub fn enter_shadow_test(&mut self, conservative: bool) -> RasterState {
        let saved = *self;
        self.cull = CullMode::None;
        self.conservative = conservative;
        saved
    }

    pub fn restore(&mut self, saved: RasterState) {
        *self = saved;
    }
}

/// A ray with its hit distance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub triangle: u32,
}

impl Hit {
    pub const MISS: Hit = Hit {
        t: f32::INFINITY,
        triangle: u32::MAX,
    };

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.triangle != u32::MAX
    }
}

/// Möller-Trumbore intersection; returns the ray parameter `t`
pub fn intersect(origin: Vec3, dir: Vec3, tri: &Triangle, cull: CullMode) -> Option<f32> {
    const EPS: f32 = 1e-9;
    let e1 = tri.v[1] - tri.v[0];
    let e2 = tri.v[2] - tri.v[0];
    let p = dir.cross(e2);
    let det = e1.dot(p);
    match cull {
        CullMode::Back if det < EPS => return None,
        _ if det.abs() < EPS => return None,
        _ => {}
    }
    let inv = 1.0 / det;
    let s = origin - tri.v[0];
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    Some(e2.dot(q) * inv)
}

/// Whether `tri` blocks the open segment from `from` to `to`
///
/// The ends are excluded by `epsilon` (in segment parameter units) so a
/// surface never shadows itself.
pub fn segment_blocked(from: Vec3, to: Vec3, tri: &Triangle, epsilon: f32) -> bool {
    match intersect(from, to - from, tri, CullMode::None) {
        Some(t) => t > epsilon && t < 1.0 - epsilon,
        None => false,
    }
}

/// Pixel rays of a pinhole view
pub struct ViewRays {
    inv_view_proj: Mat4,
    extent: Extent2d,
}

impl ViewRays {
    pub fn new(view_projection: Mat4, extent: Extent2d) -> Self {
        Self {
            inv_view_proj: view_projection.inverse(),
            extent,
        }
    }

    #[inline]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Ray through the center of pixel `(x, y)`, starting on the near plane
    pub fn ray(&self, x: u32, y: u32) -> (Vec3, Vec3) {
        let ndc_x = (x as f32 + 0.5) / self.extent.width as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - (y as f32 + 0.5) / self.extent.height as f32 * 2.0;
        let near = self.inv_view_proj.project_point3(Vec3::new(ndc_x, ndc_y, 0.0));
        let far = self.inv_view_proj.project_point3(Vec3::new(ndc_x, ndc_y, 1.0));
        (near, (far - near).normalize_or_zero())
    }
}

/// Triangle projected to pixel space (`y` down)
#[derive(Clone, Copy, Debug)]
pub struct ScreenTriangle {
    pub p: [Vec2; 3],
    /// Whether every vertex lies in front of the eye
    pub in_front: bool,
}

impl ScreenTriangle {
    pub fn project(view_projection: &Mat4, tri: &Triangle, extent: Extent2d) -> Self {
        let mut p = [Vec2::ZERO; 3];
        let mut in_front = true;
        for (i, v) in tri.v.iter().enumerate() {
            let clip = *view_projection * v.extend(1.0);
            if clip.w <= 1e-6 {
                in_front = false;
                continue;
            }
            p[i] = Vec2::new(
                (clip.x / clip.w * 0.5 + 0.5) * extent.width as f32,
                (0.5 - clip.y / clip.w * 0.5) * extent.height as f32,
            );
        }
        Self { p, in_front }
    }

    /// Inclusive pixel bounds clamped to `extent`, `None` when off screen
    ///
    /// Triangles crossing the eye plane cover the whole extent.
    pub fn bounds(&self, extent: Extent2d) -> Option<(u32, u32, u32, u32)> {
        if extent.is_empty() {
            return None;
        }
        let (w, h) = (extent.width as f32, extent.height as f32);
        if !self.in_front {
            return Some((0, 0, extent.width - 1, extent.height - 1));
        }
        let min = self.p[0].min(self.p[1]).min(self.p[2]);
        let max = self.p[0].max(self.p[1]).max(self.p[2]);
        if max.x < 0.0 || max.y < 0.0 || min.x >= w || min.y >= h {
            return None;
        }
        Some((
            min.x.max(0.0).floor() as u32,
            min.y.max(0.0).floor() as u32,
            (max.x.floor() as u32).min(extent.width - 1),
            (max.y.floor() as u32).min(extent.height - 1),
        ))
    }

    fn signed_area(&self) -> f32 {
        let [a, b, c] = self.p;
        (b - a).perp_dot(c - a)
    }

    /// Whether the triangle touches any part of texel `(x, y)`
    pub fn overlaps_texel(&self, x: u32, y: u32) -> bool {
        if !self.in_front {
            return true;
        }
        let area = self.signed_area();
        if area.abs() < 1e-12 {
            return false;
        }
        let lo = Vec2::new(x as f32, y as f32);
        let corners = [lo, lo + Vec2::X, lo + Vec2::ONE, lo + Vec2::Y];

        // Texel axes
        let min = self.p[0].min(self.p[1]).min(self.p[2]);
        let max = self.p[0].max(self.p[1]).max(self.p[2]);
        if max.x < lo.x || max.y < lo.y || min.x > lo.x + 1.0 || min.y > lo.y + 1.0 {
            return false;
        }

        // Triangle edge normals, pointing inward
        for i in 0..3 {
            let a = self.p[i];
            let b = self.p[(i + 1) % 3];
            let inward = (b - a).perp() * area.signum();
            if corners.iter().all(|c| inward.dot(*c - a) < 0.0) {
                return false;
            }
        }
        true
    }

    /// Whether the center of texel `(x, y)` lies inside the triangle
    pub fn covers_center(&self, x: u32, y: u32) -> bool {
        if !self.in_front {
            return true;
        }
        let area = self.signed_area();
        if area.abs() < 1e-12 {
            return false;
        }
        let c = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
        (0..3).all(|i| {
            let a = self.p[i];
            let b = self.p[(i + 1) % 3];
            (b - a).perp_dot(c - a) * area.signum() >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(a: Vec3, b: Vec3, c: Vec3) -> Triangle {
        Triangle {
            v: [a, b, c],
            normal: (b - a).cross(c - a).normalize(),
        }
    }

    fn ground() -> Triangle {
        tri(Vec3::new(-1.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 1.0), Vec3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn test_intersect_from_above() {
        let t = intersect(Vec3::new(0.0, 5.0, 0.0), -Vec3::Y, &ground(), CullMode::Back);
        assert!((t.unwrap() - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_back_face_culled() {
        let from_below = intersect(Vec3::new(0.0, -5.0, 0.0), Vec3::Y, &ground(), CullMode::Back);
        assert!(from_below.is_none());
        let two_sided = intersect(Vec3::new(0.0, -5.0, 0.0), Vec3::Y, &ground(), CullMode::None);
        assert!(two_sided.is_some());
    }

    #[test]
    fn test_segment_excludes_endpoints() {
        let t = ground();
        assert!(segment_blocked(Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 1.0, 0.0), &t, 1e-3));
        assert!(!segment_blocked(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 10.0, 0.0), &t, 1e-3));
        assert!(!segment_blocked(Vec3::new(5.0, -1.0, 0.0), Vec3::new(5.0, 1.0, 0.0), &t, 1e-3));
    }

    #[test]
    fn test_view_ray_through_center() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, Vec3::NEG_Z);
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let rays = ViewRays::new(proj * view, Extent2d::square(3));
        let (origin, dir) = rays.ray(1, 1);
        assert!((dir - Vec3::NEG_Y).length() < 1e-4);
        assert!((origin.y - 9.9).abs() < 1e-3);
    }

    #[test]
    fn test_conservative_covers_thin_sliver() {
        // A sliver inside texel (0, 0) that misses its center
        let st = ScreenTriangle {
            p: [Vec2::new(0.1, 0.1), Vec2::new(0.3, 0.1), Vec2::new(0.1, 0.3)],
            in_front: true,
        };
        assert!(st.overlaps_texel(0, 0));
        assert!(!st.covers_center(0, 0));
        assert!(!st.overlaps_texel(1, 0));
    }

    #[test]
    fn test_overlap_rejects_by_edge_axis() {
        // Diagonal triangle whose box overlaps texel (1, 1) but whose hypotenuse does not
        let st = ScreenTriangle {
            p: [Vec2::new(0.0, 0.0), Vec2::new(1.9, 0.0), Vec2::new(0.0, 1.9)],
            in_front: true,
        };
        assert!(!st.overlaps_texel(1, 1));
        assert!(st.overlaps_texel(1, 0));
        assert!(st.overlaps_texel(0, 0));
    }

    #[test]
    fn test_bounds_clamped() {
        let st = ScreenTriangle {
            p: [Vec2::new(-5.0, 2.5), Vec2::new(3.5, 2.5), Vec2::new(1.0, 20.0)],
            in_front: true,
        };
        assert_eq!(st.bounds(Extent2d::square(8)), Some((0, 2, 3, 7)));
        let off = ScreenTriangle {
            p: [Vec2::new(-5.0, -5.0), Vec2::new(-1.0, -5.0), Vec2::new(-3.0, -1.0)],
            in_front: true,
        };
        assert_eq!(off.bounds(Extent2d::square(8)), None);
    }

    #[test]
    fn test_raster_state_restore() {
        let mut state = RasterState::default();
        let saved = state.enter_shadow_test(true);
        assert_eq!(state.cull, CullMode::None);
        assert!(state.conservative);
        state.restore(saved);
        assert_eq!(state, RasterState::default());
    }
}
