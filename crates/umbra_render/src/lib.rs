//! # umbra_render - Shadow Pipeline Orchestration
//!
//! Backend-agnostic driver for two shadow algorithms:
//! - Standard shadow mapping (light-view depth map plus depth comparison)
//! - Alias-free shadow mapping (irregular z-buffer: per-texel lists of the
//!   exact screen samples, tested against every occluding triangle)
//!
//! ## Architecture
//!
//! 1. **Resource plans**: what each algorithm allocates at a given
//!    shadow-map and window resolution
//! 2. **Lifecycle**: keeps exactly one live resource set, reprovisioning only
//!    when the plan changes
//! 3. **Pipeline**: runs the passes of the active algorithm against a
//!    [`ShadowBackend`]
//! 4. **Software backend**: the same passes on the CPU
//!
//! ## Example
//!
//! ```ignore
//! use umbra_render::prelude::*;
//!
//! let backend = SoftwareBackend::new(SceneGeometry::demo());
//! let window = Extent2d::new(640, 360);
//! let mut pipeline = ShadowPipeline::new(backend, ShadowConfig::alias_free(), window);
//!
//! let camera = Camera::default().matrices(window);
//! let report = pipeline.render_frame(&camera)?;
//! for line in pipeline.timings().report(pipeline.algorithm()) {
//!     println!("{}", line);
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod light;
pub mod list;
pub mod orchestrator;
pub mod pass;
pub mod resource;
pub mod scene;
pub mod software;
pub mod timing;

pub use backend::{FrameStats, ShadowBackend, TargetImage};
pub use config::{LightFrustum, PolygonOffset, ShadowAlgorithm, ShadowConfig, ShadowMapResolution};
pub use error::{PassError, PipelineError, ProvisionError, TargetStatus};
pub use frame::{Camera, CameraMatrices, FrameUniforms, GpuFrameUniforms};
pub use lifecycle::{EnsureOutcome, LifecycleStats, ResourceLifecycle};
pub use light::{light_texel, off_center_perspective, shadow_transform, LightRig, LightTexel};
pub use list::{ListBuffer, ListError, ListRecord, NODE_WORDS};
pub use orchestrator::{AlgorithmStateMachine, FrameReport, ResourceRequest, ShadowPipeline, ShadowPipelineContext};
pub use pass::PassId;
pub use resource::{
    BufferDesc, BufferUsage, PlannedResource, ResourceDesc, ResourceKind, ResourcePlan,
    ResourceSpace, TextureDesc, TextureFormat, TextureUsage, DEPTH_CLEAR, NODE_STRIDE,
};
pub use scene::{SceneGeometry, SceneVertex, Triangle};
pub use software::{SoftwareBackend, SoftwareResources};
pub use timing::{PassTimings, SpanTiming};

/// Prelude
pub mod prelude {
    pub use crate::backend::ShadowBackend;
    pub use crate::config::{ShadowAlgorithm, ShadowConfig, ShadowMapResolution};
    pub use crate::frame::{Camera, CameraMatrices};
    pub use crate::orchestrator::{FrameReport, ShadowPipeline};
    pub use crate::pass::PassId;
    pub use crate::resource::ResourceKind;
    pub use crate::scene::SceneGeometry;
    pub use crate::software::SoftwareBackend;
    pub use umbra_core::Extent2d;
}
