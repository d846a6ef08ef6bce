//! Scene vertex buffer
//!
//! Bound as a vertex buffer by the camera and depth passes and as a
//! read-only storage buffer by the alias-free shadow test.

use umbra_render::{SceneGeometry, SceneVertex};
use wgpu::util::DeviceExt;

pub struct SceneBuffer {
    pub buffer: wgpu::Buffer,
    pub vertex_count: u32,
}

impl SceneBuffer {
    pub fn upload(device: &wgpu::Device, scene: &SceneGeometry) -> Self {
        // Storage bindings must not be empty
        let placeholder;
        let vertices = if scene.vertices().is_empty() {
            placeholder = [SceneVertex::new(glam::Vec3::ZERO, glam::Vec3::Y)];
            &placeholder[..]
        } else {
            scene.vertices()
        };
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("scene_vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE,
        });
        Self {
            buffer,
            vertex_count: scene.vertex_count(),
        }
    }

    /// Whole buffer as a vertex stream
    pub fn slice(&self) -> wgpu::BufferSlice<'_> {
        self.buffer.slice(..)
    }
}
