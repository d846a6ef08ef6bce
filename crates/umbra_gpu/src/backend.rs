//! wgpu implementation of [`ShadowBackend`]
//!
//! A frame is recorded into one command encoder and submitted by
//! `end_frame`. Pass timings and the allocation counter come back through
//! non-blocking readbacks and are reported a frame or more later.

use umbra_core::Extent2d;
use umbra_render::software::passes::BACKGROUND;
use umbra_render::{
    FrameStats, FrameUniforms, PassError, PassId, ProvisionError, ResourceKind, ResourcePlan,
    SceneGeometry, ShadowBackend, ShadowConfig, TargetImage, TextureFormat, DEPTH_CLEAR,
};

use crate::context::GpuContext;
use crate::mesh::SceneBuffer;
use crate::programs::{PassLayouts, Program, ProgramOptions, ProgramSet, WORKGROUP};
use crate::shaders::ShaderSources;
use crate::targets::{self, GpuResources};
use crate::timer::{PassTimer, ReadbackSlot};

fn background() -> wgpu::Color {
    wgpu::Color {
        r: BACKGROUND[0] as f64,
        g: BACKGROUND[1] as f64,
        b: BACKGROUND[2] as f64,
        a: 1.0,
    }
}

fn missing(pass: PassId, resource: ResourceKind) -> PassError {
    PassError::MissingResource { pass, resource }
}

fn encoder<'a>(slot: &'a mut Option<wgpu::CommandEncoder>, device: &wgpu::Device) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("shadow_frame") })
    })
}

/// Render targets and bindings a render pass writes and reads
struct Attachments<'a> {
    colors: Vec<(&'a wgpu::TextureView, wgpu::Color)>,
    depth: Option<&'a wgpu::TextureView>,
    group: Option<&'a wgpu::BindGroup>,
}

fn view(res: &GpuResources, pass: PassId, kind: ResourceKind) -> Result<&wgpu::TextureView, PassError> {
    res.texture(kind).map(|t| &t.view).ok_or_else(|| missing(pass, kind))
}

fn attachments(res: &GpuResources, pass: PassId) -> Result<Attachments<'_>, PassError> {
    // Each pass group exists only when every resource it binds was provisioned
    let group = |kind: ResourceKind| res.pass_group(pass).ok_or_else(|| missing(pass, kind));
    let attachments = match pass {
        PassId::DepthTextureGeneration => {
            let far = DEPTH_CLEAR as f64;
            Attachments {
                colors: vec![(
                    view(res, pass, ResourceKind::DepthMap)?,
                    wgpu::Color { r: far, g: far, b: far, a: 1.0 },
                )],
                depth: Some(view(res, pass, ResourceKind::ZBuffer)?),
                group: None,
            }
        }
        PassId::ShadowTest => Attachments {
            colors: vec![(view(res, pass, ResourceKind::FrameColor)?, background())],
            depth: Some(view(res, pass, ResourceKind::FrameDepth)?),
            group: Some(group(ResourceKind::DepthMap)?),
        },
        PassId::VisibilityMapGeneration => Attachments {
            colors: vec![
                (view(res, pass, ResourceKind::VisibilityMap)?, wgpu::Color::TRANSPARENT),
                (view(res, pass, ResourceKind::LightingMap)?, background()),
            ],
            depth: Some(view(res, pass, ResourceKind::FrameDepth)?),
            group: None,
        },
        PassId::ShadowTestAliasFree => Attachments {
            colors: vec![(view(res, pass, ResourceKind::CoverageTarget)?, wgpu::Color::BLACK)],
            depth: None,
            group: Some(group(ResourceKind::ShadowAccumulator)?),
        },
        PassId::RenderScene => Attachments {
            colors: vec![(view(res, pass, ResourceKind::FrameColor)?, background())],
            depth: None,
            group: Some(group(ResourceKind::VisibilityMap)?),
        },
        PassId::ListBufferGeneration => Attachments {
            colors: Vec::new(),
            depth: None,
            group: Some(group(ResourceKind::NodeBuffer)?),
        },
    };
    Ok(attachments)
}

/// Shadow passes on a wgpu device
pub struct GpuBackend {
    ctx: GpuContext,
    layouts: PassLayouts,
    sources: ShaderSources,
    options: ProgramOptions,
    programs: ProgramSet,
    scene: SceneBuffer,
    uniforms: wgpu::Buffer,
    frame_group: wgpu::BindGroup,
    encoder: Option<wgpu::CommandEncoder>,
    timer: Option<PassTimer>,
    counter: ReadbackSlot,
}

impl GpuBackend {
    /// Upload the scene and compile the built-in programs
    pub fn new(ctx: GpuContext, scene: &SceneGeometry, config: &ShadowConfig) -> Self {
        let device = &ctx.device;
        let layouts = PassLayouts::new(device);

        let scene_buffer = SceneBuffer::upload(device, scene);

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame_uniforms"),
            size: std::mem::size_of::<umbra_render::GpuFrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame"),
            layout: &layouts.frame,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
        });

        let conservative = config.conservative_rasterization && ctx.supports_conservative();
        if config.conservative_rasterization && !conservative {
            log::warn!("Alias-free shadow test falls back to standard rasterization");
        }
        let options = ProgramOptions {
            polygon_offset: config.polygon_offset,
            conservative,
        };
        let sources = ShaderSources::builtin();
        let programs = ProgramSet::compile(device, &layouts, &sources, &options);
        let timer = ctx
            .supports_timestamps()
            .then(|| PassTimer::new(&ctx.device, &ctx.queue));
        let counter = ReadbackSlot::new(&ctx.device, "counter_readback", 4);

        log::info!(
            "GPU backend ready: {} triangles, {}/{} programs",
            scene.triangle_count(),
            programs.valid_count(),
            PassId::COUNT
        );

        Self {
            ctx,
            layouts,
            sources,
            options,
            programs,
            scene: scene_buffer,
            uniforms,
            frame_group,
            encoder: None,
            timer,
            counter,
        }
    }

    /// Use `sources` instead of the built-in shaders
    pub fn with_sources(mut self, sources: ShaderSources) -> Self {
        self.sources = sources;
        self.recompile();
        self
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn sources_mut(&mut self) -> &mut ShaderSources {
        &mut self.sources
    }

    pub fn options(&self) -> ProgramOptions {
        self.options
    }

    fn record_render(&mut self, pass: PassId, res: &GpuResources) -> Result<(), PassError> {
        let Some(Program::Render(pipeline)) = self.programs.get(pass) else {
            return Ok(());
        };
        let bound = attachments(res, pass)?;
        let pair = self.timer.as_mut().and_then(|t| t.next_pair(pass));
        let timestamp_writes = match (self.timer.as_ref(), pair) {
            (Some(timer), Some((begin, end))) => Some(wgpu::RenderPassTimestampWrites {
                query_set: timer.query_set(),
                beginning_of_pass_write_index: Some(begin),
                end_of_pass_write_index: Some(end),
            }),
            _ => None,
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = bound
            .colors
            .iter()
            .map(|&(view, clear)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment = bound.depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let encoder = encoder(&mut self.encoder, &self.ctx.device);
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(pass.label()),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, &self.frame_group, &[]);
        if let Some(group) = bound.group {
            rpass.set_bind_group(1, group, &[]);
        }
        match pass {
            PassId::RenderScene => rpass.draw(0..6, 0..1),
            // Vertices are pulled from the storage binding
            PassId::ShadowTestAliasFree => rpass.draw(0..self.scene.vertex_count, 0..1),
            _ => {
                rpass.set_vertex_buffer(0, self.scene.slice());
                rpass.draw(0..self.scene.vertex_count, 0..1);
            }
        }
        Ok(())
    }

    fn record_compute(&mut self, pass: PassId, res: &GpuResources) -> Result<(), PassError> {
        let Some(Program::Compute(pipeline)) = self.programs.get(pass) else {
            return Ok(());
        };
        let bound = attachments(res, pass)?;
        let pair = self.timer.as_mut().and_then(|t| t.next_pair(pass));
        let timestamp_writes = match (self.timer.as_ref(), pair) {
            (Some(timer), Some((begin, end))) => Some(wgpu::ComputePassTimestampWrites {
                query_set: timer.query_set(),
                beginning_of_pass_write_index: Some(begin),
                end_of_pass_write_index: Some(end),
            }),
            _ => None,
        };
        let window = res.plan().window;

        let encoder = encoder(&mut self.encoder, &self.ctx.device);
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(pass.label()),
            timestamp_writes,
        });
        cpass.set_pipeline(pipeline);
        cpass.set_bind_group(0, &self.frame_group, &[]);
        if let Some(group) = bound.group {
            cpass.set_bind_group(1, group, &[]);
        }
        let (gx, gy) = window.dispatch_size(WORKGROUP);
        cpass.dispatch_workgroups(gx, gy, 1);
        Ok(())
    }
}

impl ShadowBackend for GpuBackend {
    type Resources = GpuResources;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn provision(&mut self, plan: &ResourcePlan) -> Result<GpuResources, ProvisionError> {
        targets::provision(&self.ctx.device, &self.layouts, &self.scene.buffer, plan)
    }

    fn release(&mut self, resources: GpuResources) {
        log::debug!("Released {}", resources.plan());
        resources.destroy();
    }

    fn has_program(&self, pass: PassId) -> bool {
        self.programs.get(pass).is_some()
    }

    fn recompile(&mut self) -> usize {
        if let Err(e) = self.sources.reload() {
            log::error!("Shader reload failed, keeping previous sources: {}", e);
        }
        self.programs = ProgramSet::compile(&self.ctx.device, &self.layouts, &self.sources, &self.options);
        self.programs.valid_count()
    }

    fn begin_frame(&mut self, frame: &FrameUniforms) {
        self.ctx
            .queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&frame.to_gpu()));
        // A frame abandoned before end_frame is dropped unsubmitted
        self.encoder = None;
        encoder(&mut self.encoder, &self.ctx.device);
        if let Some(timer) = self.timer.as_mut() {
            timer.begin_frame();
        }
    }

    fn reset_lists(&mut self, res: &mut GpuResources) {
        let encoder = encoder(&mut self.encoder, &self.ctx.device);
        if let Some(heads) = res.buffer(ResourceKind::HeadPointerImage) {
            match (self.programs.clear_heads(), res.clear_heads_group()) {
                (Some(pipeline), Some(group)) => {
                    let (gx, gy) = res.plan().shadow_resolution.extent().dispatch_size(WORKGROUP);
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("clear_heads"),
                        timestamp_writes: None,
                    });
                    cpass.set_pipeline(pipeline);
                    cpass.set_bind_group(0, &self.frame_group, &[]);
                    cpass.set_bind_group(1, group, &[]);
                    cpass.dispatch_workgroups(gx, gy, 1);
                }
                _ => {
                    let sentinel = vec![0xFF; heads.desc.size() as usize];
                    self.ctx.queue.write_buffer(&heads.buffer, 0, &sentinel);
                }
            }
        }
        for kind in [ResourceKind::AllocationCounter, ResourceKind::ShadowAccumulator] {
            if let Some(b) = res.buffer(kind) {
                encoder.clear_buffer(&b.buffer, 0, None);
            }
        }
    }

    fn execute(
        &mut self,
        pass: PassId,
        res: &mut GpuResources,
        _frame: &FrameUniforms,
    ) -> Result<(), PassError> {
        if pass.algorithm() != res.plan().algorithm {
            return Err(PassError::WrongAlgorithm(pass));
        }
        match pass {
            PassId::ListBufferGeneration => self.record_compute(pass, res),
            _ => self.record_render(pass, res),
        }
    }

    fn end_frame(&mut self, res: &mut GpuResources) -> FrameStats {
        let mut encoder = match self.encoder.take() {
            Some(e) => e,
            None => self
                .ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("shadow_frame") }),
        };

        let resolved = self
            .timer
            .as_mut()
            .map(|t| t.resolve(&mut encoder))
            .unwrap_or(false);
        let counted = match res.buffer(ResourceKind::AllocationCounter) {
            Some(counter) if self.counter.is_idle() => {
                encoder.copy_buffer_to_buffer(&counter.buffer, 0, self.counter.buffer(), 0, self.counter.size());
                true
            }
            _ => false,
        };

        self.ctx.queue.submit(Some(encoder.finish()));
        if let Some(timer) = self.timer.as_mut() {
            timer.submitted(resolved);
        }
        if counted {
            self.counter.request();
        }
        self.ctx.device.poll(wgpu::Maintain::Poll);

        let has_lists = res.plan().contains(ResourceKind::NodeBuffer);
        let list_allocations = self
            .counter
            .take()
            .filter(|_| has_lists)
            .and_then(|b| b.get(..4).map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]])));
        let timings = self.timer.as_mut().and_then(PassTimer::collect).unwrap_or_default();

        FrameStats {
            pass_times: timings.passes,
            total: timings.total,
            list_allocations,
            node_capacity: res.plan().node_capacity(),
        }
    }

    fn read_target(&mut self, res: &GpuResources, kind: ResourceKind) -> Result<TargetImage, PassError> {
        let failed = |detail: String| PassError::Readback { resource: kind, detail };
        if kind == ResourceKind::NodeBuffer {
            return Err(failed("node buffer has no image layout".into()));
        }

        if let Some(t) = res.texture(kind) {
            let bytes = targets::read_texture(&self.ctx.device, &self.ctx.queue, t).map_err(failed)?;
            return Ok(TargetImage {
                kind,
                extent: t.desc.extent,
                format: t.desc.format,
                bytes,
            });
        }

        let b = res
            .buffer(kind)
            .ok_or_else(|| failed(format!("not part of the {} plan", res.plan().algorithm)))?;
        let bytes = targets::read_buffer(&self.ctx.device, &self.ctx.queue, &b.buffer, b.desc.size()).map_err(failed)?;
        Ok(TargetImage {
            kind,
            extent: b.desc.shape.unwrap_or(Extent2d::square(1)),
            format: TextureFormat::R32Uint,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_dispatch_covers_window() {
        let (gx, gy) = Extent2d::new(1280, 721).dispatch_size(WORKGROUP);
        assert_eq!((gx, gy), (160, 91));
    }

    #[test]
    fn test_background_matches_software() {
        let c = background();
        assert!((c.r - 0.08).abs() < 1e-6);
        assert!((c.b - 0.1).abs() < 1e-6);
        assert_eq!(c.a, 1.0);
    }
}
