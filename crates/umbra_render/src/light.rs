//! Light rig: position, view and projection of the shadow-casting light

use glam::{Mat4, Vec3, Vec4};

use crate::config::{LightFrustum, ShadowConfig};

/// A light sample projected into the shadow map
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightTexel {
    pub x: u32,
    pub y: u32,
    /// Distance along the light's view direction
    pub linear_depth: f32,
}

/// Point light that always looks at the scene origin
#[derive(Clone, Debug)]
pub struct LightRig {
    position: Vec3,
    frustum: LightFrustum,
    view: Mat4,
    projection: Mat4,
}

impl LightRig {
    pub fn new(position: Vec3, frustum: LightFrustum) -> Self {
        let mut rig = Self {
            position: Vec3::ZERO,
            frustum,
            view: Mat4::IDENTITY,
            projection: off_center_perspective(&frustum),
        };
        rig.set_position(position);
        rig
    }

    pub fn from_config(config: &ShadowConfig) -> Self {
        Self::new(Vec3::from_array(config.light_position), config.light_frustum)
    }

    /// Move the light; each axis is clamped and the view is rebuilt
    pub fn set_position(&mut self, position: Vec3) {
        let limit = ShadowConfig::LIGHT_POSITION_LIMIT;
        self.position = position.clamp(Vec3::splat(-limit), Vec3::splat(limit));
        self.update_view();
    }

    /// Recompute the view from the current position
    pub fn update_view(&mut self) {
        let mut eye = self.position;
        if eye.length_squared() < 1e-8 {
            eye = Vec3::new(0.0, 1e-3, 0.0);
        }
        self.view = Mat4::look_at_rh(eye, Vec3::ZERO, light_up(eye));
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub fn frustum(&self) -> &LightFrustum {
        &self.frustum
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        self.view
    }

    #[inline]
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    #[inline]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// View-projection followed by the scale-bias into texture space
    /// (u right, v down, depth unchanged)
    pub fn shadow_transform(&self) -> Mat4 {
        shadow_transform(&self.view_projection())
    }

    /// Distance of `world` along the light's view direction
    pub fn linear_depth(&self, world: Vec3) -> f32 {
        -self.view.transform_point3(world).z
    }

    /// Project a world point onto a `resolution` x `resolution` shadow map
    ///
    /// The mapping matches the shaders exactly: `x` grows right, `y` grows
    /// down, samples outside the frustum or behind the light return `None`.
    pub fn texel(&self, world: Vec3, resolution: u32) -> Option<LightTexel> {
        light_texel(&self.view_projection(), world, resolution)
    }
}

impl Default for LightRig {
    fn default() -> Self {
        Self::from_config(&ShadowConfig::default())
    }
}

/// Scale-bias from light clip space into texture space; `w` is untouched
pub fn shadow_transform(view_projection: &Mat4) -> Mat4 {
    let bias = Mat4::from_cols(
        Vec4::new(0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(0.5, 0.5, 0.0, 1.0),
    );
    bias * *view_projection
}

/// Project `world` with a light view-projection onto a square map
///
/// `linear_depth` is the clip-space `w`, which equals the view-space
/// distance along the light direction for a perspective light.
pub fn light_texel(view_projection: &Mat4, world: Vec3, resolution: u32) -> Option<LightTexel> {
    let tex = shadow_transform(view_projection) * world.extend(1.0);
    if tex.w <= 1e-6 {
        return None;
    }
    let (u, v) = (tex.x / tex.w, tex.y / tex.w);
    if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
        return None;
    }
    let r = resolution as f32;
    let x = (u * r).floor().min(r - 1.0).max(0.0) as u32;
    let y = (v * r).floor().min(r - 1.0).max(0.0) as u32;
    Some(LightTexel {
        x,
        y,
        linear_depth: tex.w,
    })
}

/// Up vector perpendicular to the light direction in the xy plane,
/// +Y when the light sits on the z axis
fn light_up(eye: Vec3) -> Vec3 {
    let up = Vec3::new(-eye.y, eye.x, 0.0);
    if up.length_squared() < 1e-8 {
        Vec3::Y
    } else {
        up.normalize()
    }
}

/// Right-handed off-center perspective with a `[0, 1]` depth range
pub fn off_center_perspective(f: &LightFrustum) -> Mat4 {
    let (l, r, b, t, n, far) = (f.left, f.right, f.bottom, f.top, f.near, f.far);
    Mat4::from_cols(
        Vec4::new(2.0 * n / (r - l), 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * n / (t - b), 0.0, 0.0),
        Vec4::new((r + l) / (r - l), (t + b) / (t - b), far / (n - far), -1.0),
        Vec4::new(0.0, 0.0, n * far / (n - far), 0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_symmetric_frustum_matches_glam() {
        let f = LightFrustum::default();
        let ours = off_center_perspective(&f);
        let fov = 2.0 * (1.0f32).atan2(f.near);
        let glam = Mat4::perspective_rh(fov, 1.0, f.near, f.far);
        for (a, b) in ours.to_cols_array().iter().zip(glam.to_cols_array().iter()) {
            assert!(approx(*a, *b), "{} != {}", a, b);
        }
    }

    #[test]
    fn test_position_is_clamped() {
        let mut rig = LightRig::default();
        rig.set_position(Vec3::new(50.0, -40.0, 3.0));
        assert_eq!(rig.position(), Vec3::new(30.0, -30.0, 3.0));
    }

    #[test]
    fn test_origin_projects_to_center() {
        let rig = LightRig::default();
        let t = rig.texel(Vec3::ZERO, 1024).unwrap();
        assert_eq!((t.x, t.y), (512, 512));
        assert!(approx(t.linear_depth, 20.0));
        assert!(approx(rig.linear_depth(Vec3::ZERO), 20.0));
    }

    #[test]
    fn test_degenerate_up_vector() {
        let rig = LightRig::new(Vec3::new(0.0, 0.0, 10.0), LightFrustum::default());
        assert!(rig.view().is_finite());
        let t = rig.texel(Vec3::ZERO, 64).unwrap();
        assert_eq!((t.x, t.y), (32, 32));
    }

    #[test]
    fn test_points_behind_light_are_rejected() {
        let rig = LightRig::default();
        assert!(rig.texel(Vec3::new(0.0, 25.0, 0.0), 256).is_none());
        assert!(rig.texel(Vec3::new(100.0, 0.0, 0.0), 256).is_none());
    }

    #[test]
    fn test_shadow_transform_to_uv() {
        let rig = LightRig::default();
        let uv = rig.shadow_transform() * Vec3::ZERO.extend(1.0);
        assert!(approx(uv.x / uv.w, 0.5));
        assert!(approx(uv.y / uv.w, 0.5));
    }

    #[test]
    fn test_texel_follows_shadow_transform() {
        let rig = LightRig::default();
        let world = Vec3::new(3.0, 0.0, -2.0);
        let uv = rig.shadow_transform() * world.extend(1.0);
        let t = rig.texel(world, 256).unwrap();
        assert_eq!(t.x, (uv.x / uv.w * 256.0).floor() as u32);
        assert_eq!(t.y, (uv.y / uv.w * 256.0).floor() as u32);
        assert!(approx(t.linear_depth, uv.w));
    }
}
