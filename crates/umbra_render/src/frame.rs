//! Per-frame camera and uniform data

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use umbra_core::Extent2d;

use crate::config::ShadowMapResolution;
use crate::light::LightRig;

/// Camera transforms supplied by the host each frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
}

impl CameraMatrices {
    #[inline]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Eye position recovered from the view matrix
    pub fn position(&self) -> Vec3 {
        self.view.inverse().transform_point3(Vec3::ZERO)
    }
}

/// Look-at perspective camera
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 14.0, 24.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45f32.to_radians(),
            near: 0.1,
            far: 200.0,
        }
    }
}

impl Camera {
    /// Matrices for a viewport of `window`
    pub fn matrices(&self, window: Extent2d) -> CameraMatrices {
        let aspect = window.width.max(1) as f32 / window.height.max(1) as f32;
        CameraMatrices {
            view: Mat4::look_at_rh(self.eye, self.target, self.up),
            projection: Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far),
        }
    }
}

/// Everything the passes of one frame read
#[derive(Clone, Debug)]
pub struct FrameUniforms {
    pub camera: CameraMatrices,
    pub light_view: Mat4,
    pub light_view_projection: Mat4,
    pub light_position: Vec3,
    pub window: Extent2d,
    pub shadow_resolution: ShadowMapResolution,
    pub max_traversal: u32,
    pub node_capacity: u32,
    pub depth_bias: f32,
    pub ambient: f32,
}

impl FrameUniforms {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: CameraMatrices,
        light: &LightRig,
        window: Extent2d,
        shadow_resolution: ShadowMapResolution,
        max_traversal: u32,
        node_capacity: u32,
        depth_bias: f32,
        ambient: f32,
    ) -> Self {
        Self {
            camera,
            light_view: light.view(),
            light_view_projection: light.view_projection(),
            light_position: light.position(),
            window,
            shadow_resolution,
            max_traversal,
            node_capacity,
            depth_bias,
            ambient,
        }
    }

    /// Pack for upload; matches `struct Frame` in the shaders
    pub fn to_gpu(&self) -> GpuFrameUniforms {
        GpuFrameUniforms {
            camera_view_proj: self.camera.view_projection().to_cols_array_2d(),
            light_view: self.light_view.to_cols_array_2d(),
            light_view_proj: self.light_view_projection.to_cols_array_2d(),
            light_position: self.light_position.extend(1.0).to_array(),
            camera_position: self.camera.position().extend(1.0).to_array(),
            window_size: [self.window.width, self.window.height],
            shadow_resolution: self.shadow_resolution.get(),
            max_traversal: self.max_traversal,
            node_capacity: self.node_capacity,
            depth_bias: self.depth_bias,
            ambient: self.ambient,
            _pad: 0,
        }
    }
}

/// Frame uniform block (256 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuFrameUniforms {
    pub camera_view_proj: [[f32; 4]; 4],
    pub light_view: [[f32; 4]; 4],
    pub light_view_proj: [[f32; 4]; 4],
    pub light_position: [f32; 4],
    pub camera_position: [f32; 4],
    pub window_size: [u32; 2],
    pub shadow_resolution: u32,
    pub max_traversal: u32,
    pub node_capacity: u32,
    pub depth_bias: f32,
    pub ambient: f32,
    pub _pad: u32,
}
