//! Shadow Configuration
//!
//! Algorithm selection, shadow-map resolution and light settings, with
//! serde support so the runtime can load them from TOML.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use umbra_core::{Extent2d, ExtentError};

/// Which shadowing algorithm renders the frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowAlgorithm {
    /// Classic depth-map shadow mapping
    #[default]
    Standard,
    /// Irregular z-buffer built from per-pixel linked lists
    AliasFree,
}

impl ShadowAlgorithm {
    /// Numeric selection used by external controls (0 = standard, 1 = alias-free)
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Standard),
            1 => Some(Self::AliasFree),
            _ => None,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            Self::Standard => 0,
            Self::AliasFree => 1,
        }
    }

    /// The other algorithm
    pub fn toggled(self) -> Self {
        match self {
            Self::Standard => Self::AliasFree,
            Self::AliasFree => Self::Standard,
        }
    }

    /// State name used in logs
    pub fn state_name(self) -> &'static str {
        match self {
            Self::Standard => "StandardShadowMapping",
            Self::AliasFree => "AliasFreeShadowMapping",
        }
    }
}

impl fmt::Display for ShadowAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::AliasFree => write!(f, "alias-free"),
        }
    }
}

impl FromStr for ShadowAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" | "0" => Ok(Self::Standard),
            "alias-free" | "alias_free" | "aliasfree" | "1" => Ok(Self::AliasFree),
            _ => Err(format!("Unknown shadow algorithm: {}", s)),
        }
    }
}

/// Shadow-map resolution: a power of two in `[MIN, MAX]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ShadowMapResolution(u32);

impl ShadowMapResolution {
    pub const MIN: u32 = 32;
    pub const MAX: u32 = 2048;
    pub const DEFAULT: Self = Self(1024);

    /// Resolutions offered by the resolution picker
    pub const PRESETS: [u32; 5] = [128, 256, 512, 1024, 2048];

    /// Create a resolution, rejecting anything that is not a power of two in range
    pub fn new(size: u32) -> Result<Self, ExtentError> {
        if !(Self::MIN..=Self::MAX).contains(&size) {
            return Err(ExtentError::OutOfRange {
                value: size,
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        if !size.is_power_of_two() {
            return Err(ExtentError::NotPowerOfTwo(size));
        }
        Ok(Self(size))
    }

    /// Clamp into range and round up to the next power of two
    pub fn clamped(size: u32) -> Self {
        Self(size.clamp(Self::MIN, Self::MAX).next_power_of_two())
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Square extent of the light-space buffers
    #[inline]
    pub fn extent(self) -> Extent2d {
        Extent2d::square(self.0)
    }

    /// Next size up, wrapping from `MAX` to `MIN`
    pub fn doubled(self) -> Self {
        if self.0 >= Self::MAX {
            Self(Self::MIN)
        } else {
            Self(self.0 * 2)
        }
    }

    /// Next size down, wrapping from `MIN` to `MAX`
    pub fn halved(self) -> Self {
        if self.0 <= Self::MIN {
            Self(Self::MAX)
        } else {
            Self(self.0 / 2)
        }
    }

    /// Apply `steps` doublings (positive) or halvings (negative)
    pub fn stepped(self, steps: i32) -> Self {
        let mut r = self;
        for _ in 0..steps.unsigned_abs() {
            r = if steps > 0 { r.doubled() } else { r.halved() };
        }
        r
    }
}

impl Default for ShadowMapResolution {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for ShadowMapResolution {
    type Error = ExtentError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ShadowMapResolution> for u32 {
    fn from(r: ShadowMapResolution) -> Self {
        r.0
    }
}

impl fmt::Display for ShadowMapResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Off-center perspective frustum of the light
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightFrustum {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for LightFrustum {
    fn default() -> Self {
        Self {
            left: -1.0,
            right: 1.0,
            bottom: -1.0,
            top: 1.0,
            near: 1.0,
            far: 1000.0,
        }
    }
}

impl LightFrustum {
    pub fn is_valid(&self) -> bool {
        self.right > self.left
            && self.top > self.bottom
            && self.near > 0.0
            && self.far > self.near
            && [self.left, self.right, self.bottom, self.top, self.near, self.far]
                .iter()
                .all(|v| v.is_finite())
    }
}

/// Rasterizer depth offset for the light depth pass
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolygonOffset {
    /// Constant offset in depth-buffer units
    pub constant: i32,
    /// Offset scaled by the polygon's depth slope
    pub slope: f32,
}

impl Default for PolygonOffset {
    fn default() -> Self {
        Self {
            constant: 4,
            slope: 4.0,
        }
    }
}

/// Shadow pipeline configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Active algorithm
    pub algorithm: ShadowAlgorithm,

    /// Light-space buffer resolution (power of 2)
    pub shadow_map_resolution: ShadowMapResolution,

    /// World-space light position, each axis clamped to +-LIGHT_POSITION_LIMIT
    pub light_position: [f32; 3],

    /// Light projection frustum
    pub light_frustum: LightFrustum,

    /// Linear-depth bias applied by both shadow tests
    pub depth_bias: f32,

    /// Depth pass polygon offset (standard algorithm)
    pub polygon_offset: PolygonOffset,

    /// Light left in shadowed regions (0 = black, 1 = no shadow)
    pub ambient: f32,

    /// Safety bound on nodes visited per list during the alias-free shadow test
    pub max_list_traversal: u32,

    /// Request conservative rasterization for the alias-free shadow test
    pub conservative_rasterization: bool,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            algorithm: ShadowAlgorithm::Standard,
            shadow_map_resolution: ShadowMapResolution::DEFAULT,
            light_position: [0.0, 20.0, 0.0],
            light_frustum: LightFrustum::default(),
            depth_bias: 0.05,
            polygon_offset: PolygonOffset::default(),
            ambient: 0.3,
            max_list_traversal: 4096,
            conservative_rasterization: true,
        }
    }
}

impl ShadowConfig {
    /// Light position range on each axis
    pub const LIGHT_POSITION_LIMIT: f32 = 30.0;

    /// Largest accepted traversal bound
    pub const MAX_TRAVERSAL_LIMIT: u32 = 1 << 20;

    /// Start in alias-free mode
    pub fn alias_free() -> Self {
        Self {
            algorithm: ShadowAlgorithm::AliasFree,
            ..Default::default()
        }
    }

    /// Small buffers for quick previews and tests
    pub fn low_quality() -> Self {
        Self {
            shadow_map_resolution: ShadowMapResolution(256),
            max_list_traversal: 512,
            ..Default::default()
        }
    }

    /// Validate configuration and clamp values to valid ranges
    pub fn validate(&mut self) {
        let limit = Self::LIGHT_POSITION_LIMIT;
        for v in &mut self.light_position {
            *v = if v.is_finite() { v.clamp(-limit, limit) } else { 0.0 };
        }
        if !self.light_frustum.is_valid() {
            log::warn!("Invalid light frustum {:?}, using default", self.light_frustum);
            self.light_frustum = LightFrustum::default();
        }
        self.depth_bias = if self.depth_bias.is_finite() { self.depth_bias.max(0.0) } else { 0.0 };
        self.polygon_offset.constant = self.polygon_offset.constant.clamp(0, 1 << 16);
        self.polygon_offset.slope = self.polygon_offset.slope.clamp(0.0, 64.0);
        self.ambient = self.ambient.clamp(0.0, 1.0);
        self.max_list_traversal = self.max_list_traversal.clamp(1, Self::MAX_TRAVERSAL_LIMIT);
    }
}
