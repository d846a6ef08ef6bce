//! Pass identifiers and per-algorithm pass sequences

use core::fmt;

use crate::config::ShadowAlgorithm;

/// Identifies a GPU program and the pass that runs it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassId {
    /// Standard: light-view linear depth map
    DepthTextureGeneration,
    /// Standard: camera view compared against the depth map
    ShadowTest,
    /// Alias-free: light-view conservative raster walking the lists
    ShadowTestAliasFree,
    /// Alias-free: full-screen composite
    RenderScene,
    /// Alias-free: camera-view world positions and unshadowed lighting
    VisibilityMapGeneration,
    /// Alias-free: per-pixel sample insertion into the light-space lists
    ListBufferGeneration,
}

impl PassId {
    pub const COUNT: usize = 6;

    pub const ALL: [PassId; Self::COUNT] = [
        PassId::DepthTextureGeneration,
        PassId::ShadowTest,
        PassId::ShadowTestAliasFree,
        PassId::RenderScene,
        PassId::VisibilityMapGeneration,
        PassId::ListBufferGeneration,
    ];

    /// Slot in per-pass tables
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Snake-case label for GPU objects
    pub fn label(self) -> &'static str {
        match self {
            PassId::DepthTextureGeneration => "depth_texture_generation",
            PassId::ShadowTest => "shadow_test",
            PassId::ShadowTestAliasFree => "shadow_test_alias_free",
            PassId::RenderScene => "render_scene",
            PassId::VisibilityMapGeneration => "visibility_map_generation",
            PassId::ListBufferGeneration => "list_buffer_generation",
        }
    }

    /// Human-readable name used in timing reports
    pub fn title(self) -> &'static str {
        match self {
            PassId::DepthTextureGeneration => "Depth texture generation",
            PassId::ShadowTest | PassId::ShadowTestAliasFree => "Shadow test",
            PassId::RenderScene => "Render scene",
            PassId::VisibilityMapGeneration => "Visibility map generation",
            PassId::ListBufferGeneration => "List buffer generation",
        }
    }

    /// Algorithm that owns this pass
    pub fn algorithm(self) -> ShadowAlgorithm {
        match self {
            PassId::DepthTextureGeneration | PassId::ShadowTest => ShadowAlgorithm::Standard,
            _ => ShadowAlgorithm::AliasFree,
        }
    }

    /// Ordered passes of one frame
    pub fn sequence(algorithm: ShadowAlgorithm) -> &'static [PassId] {
        match algorithm {
            ShadowAlgorithm::Standard => &[PassId::DepthTextureGeneration, PassId::ShadowTest],
            ShadowAlgorithm::AliasFree => &[
                PassId::VisibilityMapGeneration,
                PassId::ListBufferGeneration,
                PassId::ShadowTestAliasFree,
                PassId::RenderScene,
            ],
        }
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
