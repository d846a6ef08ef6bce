//! Render Resources - backend-agnostic resource plans
//!
//! A [`ResourcePlan`] lists every texture and buffer one algorithm needs at a
//! given shadow-map and window resolution. Backends turn a plan into real
//! allocations; the lifecycle manager compares plans to decide whether
//! anything has to be reallocated at all.

use core::fmt;

use umbra_core::Extent2d;

use crate::config::{ShadowAlgorithm, ShadowMapResolution};

/// Texture format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    R32Uint,
    Rgba8Unorm,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    /// Check if this is a depth format
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth32Float)
    }

    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::R8Unorm => 1,
            Self::R32Uint | Self::Rgba8Unorm | Self::Depth32Float => 4,
            Self::Rgba32Float => 16,
        }
    }
}

/// Texture usage flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureUsage(pub u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const STORAGE: Self = Self(1 << 7);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Texture descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub extent: Extent2d,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

/// Buffer descriptor
///
/// `shape` is set for buffers that are addressed as 2D images
/// (one element per pixel, row-major).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    /// Bytes per element
    pub stride: u32,
    /// Element count
    pub elements: u64,
    pub shape: Option<Extent2d>,
    pub usage: BufferUsage,
}

impl BufferDesc {
    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.stride as u64 * self.elements
    }

    fn image(shape: Extent2d, stride: u32) -> Self {
        Self {
            stride,
            elements: shape.area(),
            shape: Some(shape),
            usage: BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
        }
    }

    fn array(elements: u64, stride: u32) -> Self {
        Self {
            stride,
            elements,
            shape: None,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
        }
    }
}

/// Resource descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceDesc {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}

impl ResourceDesc {
    /// Pixel extent of textures and image-shaped buffers
    pub fn extent(&self) -> Option<Extent2d> {
        match self {
            ResourceDesc::Texture(t) => Some(t.extent),
            ResourceDesc::Buffer(b) => b.shape,
        }
    }

    /// Allocation size in bytes
    pub fn size(&self) -> u64 {
        match self {
            ResourceDesc::Texture(t) => t.extent.area() * t.format.bytes_per_pixel() as u64,
            ResourceDesc::Buffer(b) => b.size(),
        }
    }
}

/// Which resolution a resource follows
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceSpace {
    /// Shadow-map resolution
    Light,
    /// Window resolution
    Screen,
    /// Fixed size
    Fixed,
}

/// Every resource the pipeline can own
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Linear light-space depth (standard)
    DepthMap,
    /// Hardware depth for the light pass (standard)
    ZBuffer,
    /// Final composited color
    FrameColor,
    /// Camera-view depth
    FrameDepth,
    /// World position per screen pixel, w = 1 where a surface is visible
    VisibilityMap,
    /// Unshadowed lit color per screen pixel
    LightingMap,
    /// Per-texel list heads
    HeadPointerImage,
    /// List node arena
    NodeBuffer,
    /// Node allocation counter
    AllocationCounter,
    /// Per-pixel occlusion count
    ShadowAccumulator,
    /// Light-space coverage written by the alias-free shadow test
    CoverageTarget,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::DepthMap => "depth_map",
            ResourceKind::ZBuffer => "z_buffer",
            ResourceKind::FrameColor => "frame_color",
            ResourceKind::FrameDepth => "frame_depth",
            ResourceKind::VisibilityMap => "visibility_map",
            ResourceKind::LightingMap => "lighting_map",
            ResourceKind::HeadPointerImage => "head_pointer_image",
            ResourceKind::NodeBuffer => "node_buffer",
            ResourceKind::AllocationCounter => "allocation_counter",
            ResourceKind::ShadowAccumulator => "shadow_accumulator",
            ResourceKind::CoverageTarget => "coverage_target",
        }
    }

    pub fn space(self) -> ResourceSpace {
        match self {
            ResourceKind::DepthMap
            | ResourceKind::ZBuffer
            | ResourceKind::HeadPointerImage
            | ResourceKind::CoverageTarget => ResourceSpace::Light,
            ResourceKind::AllocationCounter => ResourceSpace::Fixed,
            _ => ResourceSpace::Screen,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of a plan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedResource {
    pub kind: ResourceKind,
    pub desc: ResourceDesc,
}

/// Size of one list node: depth, packed pixel, next, padding
pub const NODE_STRIDE: u32 = 16;

/// Clear value of the linear depth map
pub const DEPTH_CLEAR: f32 = 1.0e30;

/// Complete resource set for one algorithm at one pair of resolutions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePlan {
    pub algorithm: ShadowAlgorithm,
    pub shadow_resolution: ShadowMapResolution,
    pub window: Extent2d,
    pub resources: Vec<PlannedResource>,
}

impl ResourcePlan {
    /// Build the plan for `algorithm`
    pub fn new(
        algorithm: ShadowAlgorithm,
        shadow_resolution: ShadowMapResolution,
        window: Extent2d,
    ) -> Self {
        let light = shadow_resolution.extent();
        let sampled = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_SRC;
        let texture = |kind, extent, format, usage| PlannedResource {
            kind,
            desc: ResourceDesc::Texture(TextureDesc { extent, format, usage }),
        };
        let buffer = |kind, desc| PlannedResource {
            kind,
            desc: ResourceDesc::Buffer(desc),
        };

        let mut resources = vec![
            texture(ResourceKind::FrameColor, window, TextureFormat::Rgba8Unorm, sampled),
            texture(
                ResourceKind::FrameDepth,
                window,
                TextureFormat::Depth32Float,
                TextureUsage::RENDER_ATTACHMENT,
            ),
        ];

        match algorithm {
            ShadowAlgorithm::Standard => {
                resources.push(texture(ResourceKind::DepthMap, light, TextureFormat::Rgba32Float, sampled));
                resources.push(texture(
                    ResourceKind::ZBuffer,
                    light,
                    TextureFormat::Depth32Float,
                    TextureUsage::RENDER_ATTACHMENT,
                ));
            }
            ShadowAlgorithm::AliasFree => {
                resources.push(texture(ResourceKind::VisibilityMap, window, TextureFormat::Rgba32Float, sampled));
                resources.push(texture(ResourceKind::LightingMap, window, TextureFormat::Rgba8Unorm, sampled));
                resources.push(buffer(ResourceKind::HeadPointerImage, BufferDesc::image(light, 4)));
                resources.push(buffer(ResourceKind::NodeBuffer, BufferDesc::array(window.area(), NODE_STRIDE)));
                resources.push(buffer(ResourceKind::AllocationCounter, BufferDesc::array(1, 4)));
                resources.push(buffer(ResourceKind::ShadowAccumulator, BufferDesc::image(window, 4)));
                resources.push(texture(ResourceKind::CoverageTarget, light, TextureFormat::R8Unorm, sampled));
            }
        }

        Self {
            algorithm,
            shadow_resolution,
            window,
            resources,
        }
    }

    /// Look up a planned resource
    pub fn get(&self, kind: ResourceKind) -> Option<&PlannedResource> {
        self.resources.iter().find(|r| r.kind == kind)
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn texture(&self, kind: ResourceKind) -> Option<&TextureDesc> {
        match self.get(kind).map(|r| &r.desc) {
            Some(ResourceDesc::Texture(t)) => Some(t),
            _ => None,
        }
    }

    pub fn buffer(&self, kind: ResourceKind) -> Option<&BufferDesc> {
        match self.get(kind).map(|r| &r.desc) {
            Some(ResourceDesc::Buffer(b)) => Some(b),
            _ => None,
        }
    }

    /// Pixel extent of a planned texture or image buffer
    pub fn extent_of(&self, kind: ResourceKind) -> Option<Extent2d> {
        self.get(kind).and_then(|r| r.desc.extent())
    }

    /// Number of list nodes the node buffer holds (0 when absent)
    pub fn node_capacity(&self) -> u32 {
        self.buffer(ResourceKind::NodeBuffer)
            .map(|b| b.elements.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    /// Sum of all allocation sizes
    pub fn total_bytes(&self) -> u64 {
        self.resources.iter().map(|r| r.desc.size()).sum()
    }

    /// Kinds in plan order
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.resources.iter().map(|r| r.kind)
    }
}

impl fmt::Display for ResourcePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} plan: shadow map {}, window {}, {} resources, {:.1} MiB",
            self.algorithm,
            self.shadow_resolution.extent(),
            self.window,
            self.resources.len(),
            self.total_bytes() as f64 / (1024.0 * 1024.0)
        )
    }
}
