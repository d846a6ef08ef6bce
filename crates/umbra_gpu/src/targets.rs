//! Device allocations for a resource plan
//!
//! Every resource is checked against the device limits first and then
//! created inside validation and out-of-memory error scopes, so a failure is
//! reported as an incomplete target instead of a device loss.

use std::collections::HashMap;

use umbra_core::Extent2d;
use umbra_render::{
    BufferDesc, BufferUsage, PassId, ProvisionError, ResourceDesc, ResourceKind, ResourcePlan,
    TargetStatus, TextureDesc, TextureFormat, TextureUsage,
};

use crate::programs::PassLayouts;

pub fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn texture_usages(usage: TextureUsage) -> wgpu::TextureUsages {
    // Always copyable for debug readback
    let mut out = wgpu::TextureUsages::COPY_SRC;
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    out
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    out
}

fn extent3d(extent: Extent2d) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: extent.width,
        height: extent.height,
        depth_or_array_layers: 1,
    }
}

/// A texture with its default view
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub desc: TextureDesc,
}

/// A buffer with its descriptor
pub struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    pub desc: BufferDesc,
}

/// Live device resources of one plan
pub struct GpuResources {
    plan: ResourcePlan,
    textures: HashMap<ResourceKind, GpuTexture>,
    buffers: HashMap<ResourceKind, GpuBuffer>,
    pass_groups: [Option<wgpu::BindGroup>; PassId::COUNT],
    clear_heads_group: Option<wgpu::BindGroup>,
}

impl GpuResources {
    pub fn plan(&self) -> &ResourcePlan {
        &self.plan
    }

    pub fn texture(&self, kind: ResourceKind) -> Option<&GpuTexture> {
        self.textures.get(&kind)
    }

    pub fn buffer(&self, kind: ResourceKind) -> Option<&GpuBuffer> {
        self.buffers.get(&kind)
    }

    pub fn pass_group(&self, pass: PassId) -> Option<&wgpu::BindGroup> {
        self.pass_groups[pass.index()].as_ref()
    }

    pub fn clear_heads_group(&self) -> Option<&wgpu::BindGroup> {
        self.clear_heads_group.as_ref()
    }

    /// Explicitly free device memory
    pub fn destroy(self) {
        for t in self.textures.into_values() {
            t.texture.destroy();
        }
        for b in self.buffers.into_values() {
            b.buffer.destroy();
        }
    }
}

/// Reject descriptors the device cannot hold
fn check_limits(limits: &wgpu::Limits, kind: ResourceKind, desc: &ResourceDesc) -> Result<(), ProvisionError> {
    let exceeds = |detail: String| ProvisionError::Incomplete {
        resource: kind,
        status: TargetStatus::ExceedsLimits,
        detail,
    };
    match desc {
        ResourceDesc::Texture(t) => t
            .extent
            .check(limits.max_texture_dimension_2d)
            .map_err(|e| exceeds(e.to_string())),
        ResourceDesc::Buffer(b) => {
            let size = b.size();
            if size > limits.max_buffer_size {
                Err(exceeds(format!("{} bytes > max_buffer_size {}", size, limits.max_buffer_size)))
            } else if size > limits.max_storage_buffer_binding_size as u64 {
                Err(exceeds(format!(
                    "{} bytes > max_storage_buffer_binding_size {}",
                    size, limits.max_storage_buffer_binding_size
                )))
            } else {
                Ok(())
            }
        }
    }
}

/// Run `create` inside out-of-memory and validation error scopes
fn checked<T>(device: &wgpu::Device, kind: ResourceKind, create: impl FnOnce() -> T) -> Result<T, ProvisionError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    let fail = |status, err: wgpu::Error| ProvisionError::Incomplete {
        resource: kind,
        status,
        detail: err.to_string(),
    };
    if let Some(err) = oom {
        return Err(fail(TargetStatus::OutOfMemory, err));
    }
    if let Some(err) = validation {
        return Err(fail(TargetStatus::Invalid, err));
    }
    Ok(value)
}

fn texture_binding(t: &GpuTexture, binding: u32) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(&t.view),
    }
}

fn buffer_binding(b: &wgpu::Buffer, binding: u32) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: b.as_entire_binding(),
    }
}

/// Allocate and bind everything in `plan`
pub fn provision(
    device: &wgpu::Device,
    layouts: &PassLayouts,
    scene: &wgpu::Buffer,
    plan: &ResourcePlan,
) -> Result<GpuResources, ProvisionError> {
    let limits = device.limits();
    for r in &plan.resources {
        check_limits(&limits, r.kind, &r.desc)?;
    }

    let mut textures = HashMap::new();
    let mut buffers = HashMap::new();
    for r in &plan.resources {
        let label = r.kind.label();
        match &r.desc {
            ResourceDesc::Texture(desc) => {
                let texture = checked(device, r.kind, || {
                    device.create_texture(&wgpu::TextureDescriptor {
                        label: Some(label),
                        size: extent3d(desc.extent),
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: wgpu_format(desc.format),
                        usage: texture_usages(desc.usage),
                        view_formats: &[],
                    })
                })?;
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                textures.insert(r.kind, GpuTexture { texture, view, desc: desc.clone() });
            }
            ResourceDesc::Buffer(desc) => {
                let buffer = checked(device, r.kind, || {
                    device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(label),
                        size: desc.size(),
                        usage: buffer_usages(desc.usage),
                        mapped_at_creation: false,
                    })
                })?;
                buffers.insert(r.kind, GpuBuffer { buffer, desc: desc.clone() });
            }
        }
    }

    let tex = |k: ResourceKind| textures.get(&k);
    let buf = |k: ResourceKind| buffers.get(&k).map(|b: &GpuBuffer| &b.buffer);
    let group = |pass: PassId, layout: &wgpu::BindGroupLayout, kind: ResourceKind, entries: &[wgpu::BindGroupEntry<'_>]| {
        checked(device, kind, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(pass.label()),
                layout,
                entries,
            })
        })
    };

    let mut pass_groups: [Option<wgpu::BindGroup>; PassId::COUNT] = Default::default();
    let mut clear_heads_group = None;

    if let Some(depth) = tex(ResourceKind::DepthMap) {
        pass_groups[PassId::ShadowTest.index()] = Some(group(
            PassId::ShadowTest,
            &layouts.shadow_test,
            ResourceKind::DepthMap,
            &[texture_binding(depth, 0)],
        )?);
    }

    if let (Some(vis), Some(lit), Some(heads), Some(nodes), Some(counter), Some(acc)) = (
        tex(ResourceKind::VisibilityMap),
        tex(ResourceKind::LightingMap),
        buf(ResourceKind::HeadPointerImage),
        buf(ResourceKind::NodeBuffer),
        buf(ResourceKind::AllocationCounter),
        buf(ResourceKind::ShadowAccumulator),
    ) {
        pass_groups[PassId::ListBufferGeneration.index()] = Some(group(
            PassId::ListBufferGeneration,
            &layouts.list_build,
            ResourceKind::NodeBuffer,
            &[
                texture_binding(vis, 0),
                buffer_binding(heads, 1),
                buffer_binding(nodes, 2),
                buffer_binding(counter, 3),
            ],
        )?);
        pass_groups[PassId::ShadowTestAliasFree.index()] = Some(group(
            PassId::ShadowTestAliasFree,
            &layouts.shadow_test_af,
            ResourceKind::ShadowAccumulator,
            &[
                texture_binding(vis, 0),
                buffer_binding(heads, 1),
                buffer_binding(nodes, 2),
                buffer_binding(acc, 3),
                buffer_binding(scene, 4),
            ],
        )?);
        pass_groups[PassId::RenderScene.index()] = Some(group(
            PassId::RenderScene,
            &layouts.composite,
            ResourceKind::FrameColor,
            &[texture_binding(vis, 0), texture_binding(lit, 1), buffer_binding(acc, 2)],
        )?);
        clear_heads_group = Some(checked(device, ResourceKind::HeadPointerImage, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("clear_heads"),
                layout: &layouts.clear_heads,
                entries: &[buffer_binding(heads, 0)],
            })
        })?);
    }

    log::debug!("Provisioned {}", plan);
    Ok(GpuResources {
        plan: plan.clone(),
        textures,
        buffers,
        pass_groups,
        clear_heads_group,
    })
}

/// Rows of a texture copy padded to the copy alignment
pub fn padded_row_bytes(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (unpadded + align - 1) / align * align
}

/// Blocking copy of a whole buffer to the host
pub fn read_buffer(device: &wgpu::Device, queue: &wgpu::Queue, src: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, String> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));
    map_blocking(device, &staging)
}

/// Blocking copy of a whole texture to the host, rows tightly packed
pub fn read_texture(device: &wgpu::Device, queue: &wgpu::Queue, t: &GpuTexture) -> Result<Vec<u8>, String> {
    let extent = t.desc.extent;
    let bpp = t.desc.format.bytes_per_pixel() as u32;
    let row = padded_row_bytes(extent.width, bpp);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size: row as u64 * extent.height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let aspect = if t.desc.format.is_depth() {
        wgpu::TextureAspect::DepthOnly
    } else {
        wgpu::TextureAspect::All
    };

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: &t.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row),
                rows_per_image: Some(extent.height),
            },
        },
        extent3d(extent),
    );
    queue.submit(Some(encoder.finish()));

    let padded = map_blocking(device, &staging)?;
    let tight = (extent.width * bpp) as usize;
    Ok(padded.chunks(row as usize).flat_map(|r| r[..tight].iter().copied()).collect())
}

fn map_blocking(device: &wgpu::Device, staging: &wgpu::Buffer) -> Result<Vec<u8>, String> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    device.poll(wgpu::Maintain::Wait);
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.to_string()),
        Err(e) => return Err(e.to_string()),
    }
    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_rows() {
        assert_eq!(padded_row_bytes(1, 4), 256);
        assert_eq!(padded_row_bytes(64, 4), 256);
        assert_eq!(padded_row_bytes(65, 4), 512);
        assert_eq!(padded_row_bytes(64, 16), 1024);
    }

    #[test]
    fn test_limits_reject_large_targets() {
        let limits = wgpu::Limits {
            max_texture_dimension_2d: 1024,
            ..wgpu::Limits::downlevel_defaults()
        };
        let plan = ResourcePlan::new(
            umbra_render::ShadowAlgorithm::Standard,
            umbra_render::ShadowMapResolution::clamped(2048),
            Extent2d::new(64, 64),
        );
        let depth = plan.get(ResourceKind::DepthMap).unwrap();
        assert!(check_limits(&limits, depth.kind, &depth.desc).is_err());
        let color = plan.get(ResourceKind::FrameColor).unwrap();
        assert!(check_limits(&limits, color.kind, &color.desc).is_ok());
    }

    #[test]
    fn test_usage_mapping_adds_copy_src() {
        let u = texture_usages(TextureUsage::RENDER_ATTACHMENT);
        assert!(u.contains(wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::RENDER_ATTACHMENT));
        assert!(!u.contains(wgpu::TextureUsages::TEXTURE_BINDING));
    }
}
