//! CPU reference backend
//!
//! Implements every pass of both algorithms on the host with the same data
//! layout and the same atomic protocols as the GPU shaders. Used for
//! headless runs without an adapter and as the oracle in tests.

pub mod image;
pub mod passes;
pub mod raster;

use std::time::{Duration, Instant};

use umbra_core::Extent2d;

use crate::backend::{FrameStats, ShadowBackend, TargetImage};
use crate::error::{PassError, ProvisionError, TargetStatus};
use crate::frame::FrameUniforms;
use crate::list::ListBuffer;
use crate::pass::PassId;
use crate::resource::{ResourceKind, ResourcePlan, TextureFormat, DEPTH_CLEAR};
use crate::scene::SceneGeometry;

pub use self::image::{AtomicImage, Image};
pub use self::raster::{CullMode, RasterState};

/// Largest image edge the CPU backend accepts by default
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Host allocations for one [`ResourcePlan`]
pub struct SoftwareResources {
    plan: ResourcePlan,
    frame_color: Image<[u8; 4]>,
    frame_depth: Image<f32>,
    depth_map: Option<Image<f32>>,
    z_buffer: Option<Image<f32>>,
    visibility: Option<Image<[f32; 4]>>,
    lighting: Option<Image<[u8; 4]>>,
    lists: Option<ListBuffer>,
    accumulator: Option<AtomicImage>,
    coverage: Option<AtomicImage>,
}

impl SoftwareResources {
    pub fn plan(&self) -> &ResourcePlan {
        &self.plan
    }

    pub fn frame_color(&self) -> &Image<[u8; 4]> {
        &self.frame_color
    }

    pub fn depth_map(&self) -> Option<&Image<f32>> {
        self.depth_map.as_ref()
    }

    pub fn visibility(&self) -> Option<&Image<[f32; 4]>> {
        self.visibility.as_ref()
    }

    pub fn lists(&self) -> Option<&ListBuffer> {
        self.lists.as_ref()
    }

    pub fn accumulator(&self) -> Option<&AtomicImage> {
        self.accumulator.as_ref()
    }

    pub fn coverage(&self) -> Option<&AtomicImage> {
        self.coverage.as_ref()
    }
}

/// Shadow passes on worker threads
pub struct SoftwareBackend {
    scene: SceneGeometry,
    threads: usize,
    programs: [bool; PassId::COUNT],
    disabled: Vec<PassId>,
    raster: RasterState,
    conservative: bool,
    max_dimension: u32,
    frame_start: Option<Instant>,
    pass_times: Vec<(PassId, Duration)>,
}

impl SoftwareBackend {
    pub fn new(scene: SceneGeometry) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mut backend = Self {
            scene,
            threads,
            programs: [false; PassId::COUNT],
            disabled: Vec::new(),
            raster: RasterState::default(),
            conservative: true,
            max_dimension: DEFAULT_MAX_DIMENSION,
            frame_start: None,
            pass_times: Vec::new(),
        };
        backend.recompile();
        backend
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Treat the given passes as failing to compile
    pub fn with_disabled_programs(mut self, passes: &[PassId]) -> Self {
        self.disabled = passes.to_vec();
        self.recompile();
        self
    }

    /// Reject any resource with an edge above `max_dimension`
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Texel coverage of the alias-free shadow test
    pub fn set_conservative(&mut self, conservative: bool) {
        self.conservative = conservative;
    }

    pub fn raster_state(&self) -> RasterState {
        self.raster
    }

    pub fn scene(&self) -> &SceneGeometry {
        &self.scene
    }

    fn image_of<T: Copy>(extent: Option<Extent2d>, fill: T) -> Option<Image<T>> {
        extent.map(|e| Image::new(e, fill))
    }
}

fn missing(pass: PassId, resource: ResourceKind) -> PassError {
    PassError::MissingResource { pass, resource }
}

fn target(kind: ResourceKind, extent: Extent2d, format: TextureFormat, bytes: Vec<u8>) -> TargetImage {
    TargetImage {
        kind,
        extent,
        format,
        bytes,
    }
}

fn f32_bytes(values: impl Iterator<Item = f32>) -> Vec<u8> {
    values.flat_map(f32::to_le_bytes).collect()
}

fn u32_bytes(values: impl Iterator<Item = u32>) -> Vec<u8> {
    values.flat_map(u32::to_le_bytes).collect()
}

impl ShadowBackend for SoftwareBackend {
    type Resources = SoftwareResources;

    fn name(&self) -> &str {
        "software"
    }

    fn provision(&mut self, plan: &ResourcePlan) -> Result<SoftwareResources, ProvisionError> {
        for resource in &plan.resources {
            if let Some(extent) = resource.desc.extent() {
                extent.check(self.max_dimension).map_err(|e| ProvisionError::Incomplete {
                    resource: resource.kind,
                    status: TargetStatus::ExceedsLimits,
                    detail: e.to_string(),
                })?;
            }
        }

        let extent = |kind| plan.extent_of(kind);
        let lists = match (extent(ResourceKind::HeadPointerImage), plan.contains(ResourceKind::NodeBuffer)) {
            (Some(heads), true) => Some(ListBuffer::new(heads, plan.node_capacity())),
            _ => None,
        };
        let resources = SoftwareResources {
            plan: plan.clone(),
            frame_color: Image::new(plan.window, [0, 0, 0, 255]),
            frame_depth: Image::new(plan.window, 1.0),
            depth_map: Self::image_of(extent(ResourceKind::DepthMap), DEPTH_CLEAR),
            z_buffer: Self::image_of(extent(ResourceKind::ZBuffer), 1.0),
            visibility: Self::image_of(extent(ResourceKind::VisibilityMap), [0.0; 4]),
            lighting: Self::image_of(extent(ResourceKind::LightingMap), [0, 0, 0, 255]),
            lists,
            accumulator: extent(ResourceKind::ShadowAccumulator).map(AtomicImage::new),
            coverage: extent(ResourceKind::CoverageTarget).map(AtomicImage::new),
        };
        log::debug!("Provisioned {}", plan);
        Ok(resources)
    }

    fn release(&mut self, resources: SoftwareResources) {
        log::debug!("Released {}", resources.plan);
    }

    fn has_program(&self, pass: PassId) -> bool {
        self.programs[pass.index()]
    }

    fn recompile(&mut self) -> usize {
        for pass in PassId::ALL {
            self.programs[pass.index()] = !self.disabled.contains(&pass);
        }
        self.programs.iter().filter(|p| **p).count()
    }

    fn begin_frame(&mut self, _frame: &FrameUniforms) {
        self.frame_start = Some(Instant::now());
        self.pass_times.clear();
    }

    fn reset_lists(&mut self, resources: &mut SoftwareResources) {
        if let Some(lists) = resources.lists.as_mut() {
            lists.reset();
        }
        if let Some(acc) = resources.accumulator.as_mut() {
            acc.clear();
        }
        if let Some(cov) = resources.coverage.as_mut() {
            cov.clear();
        }
    }

    fn execute(
        &mut self,
        pass: PassId,
        res: &mut SoftwareResources,
        frame: &FrameUniforms,
    ) -> Result<(), PassError> {
        if pass.algorithm() != res.plan.algorithm {
            return Err(PassError::WrongAlgorithm(pass));
        }
        let start = Instant::now();
        let threads = self.threads;
        match pass {
            PassId::DepthTextureGeneration => {
                let depth = res
                    .depth_map
                    .as_mut()
                    .ok_or_else(|| missing(pass, ResourceKind::DepthMap))?;
                let z = res
                    .z_buffer
                    .as_mut()
                    .ok_or_else(|| missing(pass, ResourceKind::ZBuffer))?;
                depth.fill(DEPTH_CLEAR);
                z.fill(1.0);
                passes::depth_map(&self.scene, frame, self.raster.cull, threads, depth, z)?;
            }
            PassId::ShadowTest => {
                let depth = res
                    .depth_map
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::DepthMap))?;
                passes::standard_shadow_test(
                    &self.scene,
                    frame,
                    threads,
                    depth,
                    &mut res.frame_color,
                    &mut res.frame_depth,
                )?;
            }
            PassId::VisibilityMapGeneration => {
                let vis = res
                    .visibility
                    .as_mut()
                    .ok_or_else(|| missing(pass, ResourceKind::VisibilityMap))?;
                let lit = res
                    .lighting
                    .as_mut()
                    .ok_or_else(|| missing(pass, ResourceKind::LightingMap))?;
                passes::visibility_map(&self.scene, frame, threads, vis, lit, &mut res.frame_depth)?;
            }
            PassId::ListBufferGeneration => {
                let vis = res
                    .visibility
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::VisibilityMap))?;
                let lists = res
                    .lists
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::NodeBuffer))?;
                passes::build_lists(frame, threads, vis, lists)?;
            }
            PassId::ShadowTestAliasFree => {
                let vis = res
                    .visibility
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::VisibilityMap))?;
                let lists = res
                    .lists
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::NodeBuffer))?;
                let acc = res
                    .accumulator
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::ShadowAccumulator))?;
                let cov = res
                    .coverage
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::CoverageTarget))?;
                let saved = self.raster.enter_shadow_test(self.conservative);
                let result = passes::alias_free_shadow_test(
                    &self.scene,
                    frame,
                    threads,
                    self.raster.conservative,
                    vis,
                    lists,
                    acc,
                    cov,
                );
                self.raster.restore(saved);
                result?;
            }
            PassId::RenderScene => {
                let vis = res
                    .visibility
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::VisibilityMap))?;
                let lit = res
                    .lighting
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::LightingMap))?;
                let acc = res
                    .accumulator
                    .as_ref()
                    .ok_or_else(|| missing(pass, ResourceKind::ShadowAccumulator))?;
                passes::composite(frame, vis, lit, acc, &mut res.frame_color);
            }
        }
        self.pass_times.push((pass, start.elapsed()));
        Ok(())
    }

    fn end_frame(&mut self, resources: &mut SoftwareResources) -> FrameStats {
        FrameStats {
            pass_times: std::mem::take(&mut self.pass_times),
            total: self.frame_start.take().map(|t| t.elapsed()),
            list_allocations: resources.lists.as_ref().map(ListBuffer::allocated),
            node_capacity: resources.plan.node_capacity(),
        }
    }

    fn read_target(
        &mut self,
        res: &SoftwareResources,
        kind: ResourceKind,
    ) -> Result<TargetImage, PassError> {
        let absent = || PassError::Readback {
            resource: kind,
            detail: format!("not part of the {} plan", res.plan.algorithm),
        };
        let rgba8 = |img: &Image<[u8; 4]>| img.pixels().iter().flatten().copied().collect::<Vec<u8>>();

        let image = match kind {
            ResourceKind::FrameColor => target(kind, res.frame_color.extent(), TextureFormat::Rgba8Unorm, rgba8(&res.frame_color)),
            ResourceKind::LightingMap => {
                let img = res.lighting.as_ref().ok_or_else(absent)?;
                target(kind, img.extent(), TextureFormat::Rgba8Unorm, rgba8(img))
            }
            ResourceKind::VisibilityMap => {
                let img = res.visibility.as_ref().ok_or_else(absent)?;
                let bytes = f32_bytes(img.pixels().iter().flatten().copied());
                target(kind, img.extent(), TextureFormat::Rgba32Float, bytes)
            }
            ResourceKind::DepthMap => {
                let img = res.depth_map.as_ref().ok_or_else(absent)?;
                let bytes = f32_bytes(img.pixels().iter().flat_map(|d| [*d, *d, *d, 1.0]));
                target(kind, img.extent(), TextureFormat::Rgba32Float, bytes)
            }
            ResourceKind::ZBuffer | ResourceKind::FrameDepth => {
                let img = if kind == ResourceKind::ZBuffer {
                    res.z_buffer.as_ref().ok_or_else(absent)?
                } else {
                    &res.frame_depth
                };
                target(kind, img.extent(), TextureFormat::Depth32Float, f32_bytes(img.pixels().iter().copied()))
            }
            ResourceKind::HeadPointerImage => {
                let lists = res.lists.as_ref().ok_or_else(absent)?;
                let bytes = u32_bytes(lists.heads_snapshot().into_iter());
                target(kind, lists.head_extent(), TextureFormat::R32Uint, bytes)
            }
            ResourceKind::AllocationCounter => {
                let lists = res.lists.as_ref().ok_or_else(absent)?;
                let bytes = lists.allocated().to_le_bytes().to_vec();
                target(kind, Extent2d::square(1), TextureFormat::R32Uint, bytes)
            }
            ResourceKind::ShadowAccumulator => {
                let acc = res.accumulator.as_ref().ok_or_else(absent)?;
                target(kind, acc.extent(), TextureFormat::R32Uint, u32_bytes(acc.snapshot().into_iter()))
            }
            ResourceKind::CoverageTarget => {
                let cov = res.coverage.as_ref().ok_or_else(absent)?;
                let bytes = cov.snapshot().into_iter().map(|c| if c > 0 { 255 } else { 0 }).collect();
                target(kind, cov.extent(), TextureFormat::R8Unorm, bytes)
            }
            ResourceKind::NodeBuffer => {
                return Err(PassError::Readback {
                    resource: kind,
                    detail: "node buffer has no image layout".into(),
                })
            }
        };
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ShadowAlgorithm, ShadowMapResolution};

    fn plan(algorithm: ShadowAlgorithm) -> ResourcePlan {
        ResourcePlan::new(algorithm, ShadowMapResolution::clamped(64), Extent2d::new(32, 16))
    }

    #[test]
    fn test_provision_matches_plan() {
        let mut backend = SoftwareBackend::new(SceneGeometry::demo());
        let res = backend.provision(&plan(ShadowAlgorithm::AliasFree)).unwrap();
        assert_eq!(res.lists().unwrap().capacity(), 32 * 16);
        assert_eq!(res.lists().unwrap().head_extent(), Extent2d::square(64));
        assert!(res.depth_map().is_none());

        let res = backend.provision(&plan(ShadowAlgorithm::Standard)).unwrap();
        assert!(res.lists().is_none());
        assert_eq!(res.depth_map().unwrap().get(0, 0), Some(DEPTH_CLEAR));
    }

    #[test]
    fn test_provision_rejects_oversized() {
        let mut backend = SoftwareBackend::new(SceneGeometry::demo()).with_max_dimension(32);
        let err = backend.provision(&plan(ShadowAlgorithm::Standard)).err().unwrap();
        match err {
            ProvisionError::Incomplete { resource, status, .. } => {
                assert_eq!(resource, ResourceKind::DepthMap);
                assert_eq!(status, TargetStatus::ExceedsLimits);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_disabled_programs() {
        let backend = SoftwareBackend::new(SceneGeometry::demo())
            .with_disabled_programs(&[PassId::RenderScene]);
        assert!(!backend.has_program(PassId::RenderScene));
        assert!(backend.has_program(PassId::ShadowTest));
    }

    #[test]
    fn test_node_buffer_has_no_image() {
        let mut backend = SoftwareBackend::new(SceneGeometry::demo());
        let res = backend.provision(&plan(ShadowAlgorithm::AliasFree)).unwrap();
        assert!(backend.read_target(&res, ResourceKind::NodeBuffer).is_err());
        let heads = backend.read_target(&res, ResourceKind::HeadPointerImage).unwrap();
        assert_eq!(heads.bytes.len(), 64 * 64 * 4);
        assert!(backend.read_target(&res, ResourceKind::DepthMap).is_err());
    }
}
