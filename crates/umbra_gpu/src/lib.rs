//! # umbra_gpu - wgpu Shadow Backend
//!
//! Runs the passes of both shadow algorithms on a wgpu device:
//! - Standard: light depth map and a depth-comparison scene pass
//! - Alias-free: visibility map, per-texel lists built by a compute pass
//!   with atomic head exchange, and a light-space pass that tests each
//!   triangle against the exact samples of the texels it covers
//!
//! ## Example
//!
//! ```ignore
//! use umbra_gpu::{ContextOptions, GpuBackend, GpuContext};
//! use umbra_render::prelude::*;
//!
//! let ctx = GpuContext::headless(&ContextOptions::default())?;
//! let config = ShadowConfig::alias_free();
//! let backend = GpuBackend::new(ctx, &SceneGeometry::demo(), &config);
//! let mut pipeline = ShadowPipeline::new(backend, config, Extent2d::new(1280, 720));
//! ```

pub mod backend;
pub mod context;
pub mod error;
pub mod mesh;
pub mod programs;
pub mod shaders;
pub mod targets;
pub mod timer;

pub use backend::GpuBackend;
pub use context::{ContextOptions, GpuContext};
pub use error::{GpuError, Result};
pub use mesh::SceneBuffer;
pub use programs::{PassLayouts, Program, ProgramOptions, ProgramSet};
pub use shaders::ShaderSources;
pub use targets::{GpuBuffer, GpuResources, GpuTexture};
pub use timer::{PassTimer, ReadbackSlot, TimerResult};
