//! Bind group layouts and pass pipelines
//!
//! Layouts are created once per device and outlive recompiles, so bind
//! groups built for a resource set stay valid when programs are rebuilt.
//! Group 0 is the frame uniform block, group 1 is per pass.

use umbra_render::{PassId, PolygonOffset, SceneVertex};

use crate::shaders::ShaderSources;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const POSITION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const COVERAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

/// Workgroup edge of the compute passes
pub const WORKGROUP: u32 = 8;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x4];

fn scene_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<SceneVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }
}

fn texture_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layouts of every pass
pub struct PassLayouts {
    pub frame: wgpu::BindGroupLayout,
    pub shadow_test: wgpu::BindGroupLayout,
    pub clear_heads: wgpu::BindGroupLayout,
    pub list_build: wgpu::BindGroupLayout,
    pub shadow_test_af: wgpu::BindGroupLayout,
    pub composite: wgpu::BindGroupLayout,
}

impl PassLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        use wgpu::ShaderStages as S;

        let layout = |label: &str, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        };

        let frame = layout(
            "frame_layout",
            &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: S::VERTEX | S::FRAGMENT | S::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<umbra_render::GpuFrameUniforms>() as u64,
                    ),
                },
                count: None,
            }],
        );

        Self {
            frame,
            shadow_test: layout("shadow_test_layout", &[texture_entry(0, S::FRAGMENT)]),
            clear_heads: layout("clear_heads_layout", &[storage_entry(0, S::COMPUTE, false)]),
            list_build: layout(
                "list_build_layout",
                &[
                    texture_entry(0, S::COMPUTE),
                    storage_entry(1, S::COMPUTE, false),
                    storage_entry(2, S::COMPUTE, false),
                    storage_entry(3, S::COMPUTE, false),
                ],
            ),
            shadow_test_af: layout(
                "shadow_test_af_layout",
                &[
                    texture_entry(0, S::FRAGMENT),
                    storage_entry(1, S::FRAGMENT, true),
                    storage_entry(2, S::FRAGMENT, true),
                    storage_entry(3, S::FRAGMENT, false),
                    storage_entry(4, S::VERTEX | S::FRAGMENT, true),
                ],
            ),
            composite: layout(
                "composite_layout",
                &[
                    texture_entry(0, S::FRAGMENT),
                    texture_entry(1, S::FRAGMENT),
                    storage_entry(2, S::FRAGMENT, true),
                ],
            ),
        }
    }

    /// Per-pass group 1 layout, if the pass has one
    pub fn pass_group(&self, pass: PassId) -> Option<&wgpu::BindGroupLayout> {
        match pass {
            PassId::DepthTextureGeneration | PassId::VisibilityMapGeneration => None,
            PassId::ShadowTest => Some(&self.shadow_test),
            PassId::ListBufferGeneration => Some(&self.list_build),
            PassId::ShadowTestAliasFree => Some(&self.shadow_test_af),
            PassId::RenderScene => Some(&self.composite),
        }
    }

    fn pipeline_layout(&self, device: &wgpu::Device, label: &str, group: Option<&wgpu::BindGroupLayout>) -> wgpu::PipelineLayout {
        let groups: Vec<&wgpu::BindGroupLayout> = std::iter::once(&self.frame).chain(group).collect();
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &groups,
            push_constant_ranges: &[],
        })
    }
}

/// Fixed-function choices made at compile time
#[derive(Debug, Clone, Copy)]
pub struct ProgramOptions {
    pub polygon_offset: PolygonOffset,
    /// Conservative rasterization for the alias-free shadow test
    pub conservative: bool,
}

/// A compiled pass program
pub enum Program {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

/// One program slot per pass; `None` when compilation failed
pub struct ProgramSet {
    programs: [Option<Program>; PassId::COUNT],
    clear_heads: Option<wgpu::ComputePipeline>,
}

impl ProgramSet {
    /// Compile every pass, logging failures instead of aborting
    pub fn compile(device: &wgpu::Device, layouts: &PassLayouts, sources: &ShaderSources, options: &ProgramOptions) -> Self {
        let programs = std::array::from_fn(|i| {
            let pass = PassId::ALL[i];
            let source = sources.pass(pass);
            scoped(device, pass.label(), || build_pass(device, layouts, pass, &source, options))
        });
        let clear_heads = scoped(device, "clear_heads", || {
            let layout = layouts.pipeline_layout(device, "clear_heads", Some(&layouts.clear_heads));
            let module = shader_module(device, "clear_heads", &sources.clear_heads());
            compute_pipeline(device, "clear_heads", &layout, &module)
        });
        Self { programs, clear_heads }
    }

    pub fn get(&self, pass: PassId) -> Option<&Program> {
        self.programs[pass.index()].as_ref()
    }

    pub fn clear_heads(&self) -> Option<&wgpu::ComputePipeline> {
        self.clear_heads.as_ref()
    }

    /// Passes with a valid program
    pub fn valid_count(&self) -> usize {
        self.programs.iter().filter(|p| p.is_some()).count()
    }
}

/// Run `build` inside a validation error scope
fn scoped<T>(device: &wgpu::Device, label: &str, build: impl FnOnce() -> T) -> Option<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => {
            log::error!("Program {} failed to compile: {}", label, err);
            None
        }
        None => Some(value),
    }
}

fn shader_module(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

fn compute_pipeline(device: &wgpu::Device, label: &str, layout: &wgpu::PipelineLayout, module: &wgpu::ShaderModule) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: "cs_main",
        compilation_options: Default::default(),
        cache: None,
    })
}

struct RenderSetup<'a> {
    targets: &'a [Option<wgpu::ColorTargetState>],
    vertex_buffers: &'a [wgpu::VertexBufferLayout<'a>],
    cull_mode: Option<wgpu::Face>,
    conservative: bool,
    depth: Option<wgpu::DepthStencilState>,
}

fn render_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    setup: RenderSetup<'_>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: "vs_main",
            buffers: setup.vertex_buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: "fs_main",
            targets: setup.targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: setup.cull_mode,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: setup.conservative,
        },
        depth_stencil: setup.depth,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn depth_state(bias: wgpu::DepthBiasState) -> Option<wgpu::DepthStencilState> {
    Some(wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::Less,
        stencil: wgpu::StencilState::default(),
        bias,
    })
}

fn opaque(format: wgpu::TextureFormat) -> Option<wgpu::ColorTargetState> {
    Some(wgpu::ColorTargetState {
        format,
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    })
}

fn build_pass(device: &wgpu::Device, layouts: &PassLayouts, pass: PassId, source: &str, options: &ProgramOptions) -> Program {
    let label = pass.label();
    let module = shader_module(device, label, source);
    let layout = layouts.pipeline_layout(device, label, layouts.pass_group(pass));
    let scene = [scene_vertex_layout()];

    match pass {
        PassId::ListBufferGeneration => Program::Compute(compute_pipeline(device, label, &layout, &module)),
        PassId::DepthTextureGeneration => Program::Render(render_pipeline(
            device,
            label,
            &layout,
            &module,
            RenderSetup {
                targets: &[opaque(POSITION_FORMAT)],
                vertex_buffers: &scene,
                cull_mode: Some(wgpu::Face::Back),
                conservative: false,
                depth: depth_state(wgpu::DepthBiasState {
                    constant: options.polygon_offset.constant,
                    slope_scale: options.polygon_offset.slope,
                    clamp: 0.0,
                }),
            },
        )),
        PassId::ShadowTest => Program::Render(render_pipeline(
            device,
            label,
            &layout,
            &module,
            RenderSetup {
                targets: &[opaque(COLOR_FORMAT)],
                vertex_buffers: &scene,
                cull_mode: Some(wgpu::Face::Back),
                conservative: false,
                depth: depth_state(wgpu::DepthBiasState::default()),
            },
        )),
        PassId::VisibilityMapGeneration => Program::Render(render_pipeline(
            device,
            label,
            &layout,
            &module,
            RenderSetup {
                targets: &[opaque(POSITION_FORMAT), opaque(COLOR_FORMAT)],
                vertex_buffers: &scene,
                cull_mode: Some(wgpu::Face::Back),
                conservative: false,
                depth: depth_state(wgpu::DepthBiasState::default()),
            },
        )),
        PassId::ShadowTestAliasFree => Program::Render(render_pipeline(
            device,
            label,
            &layout,
            &module,
            RenderSetup {
                targets: &[opaque(COVERAGE_FORMAT)],
                vertex_buffers: &[],
                cull_mode: None,
                conservative: options.conservative,
                depth: None,
            },
        )),
        PassId::RenderScene => Program::Render(render_pipeline(
            device,
            label,
            &layout,
            &module,
            RenderSetup {
                targets: &[opaque(COLOR_FORMAT)],
                vertex_buffers: &[],
                cull_mode: None,
                conservative: false,
                depth: None,
            },
        )),
    }
}
