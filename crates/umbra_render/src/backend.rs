//! Backend abstraction
//!
//! The orchestrator only talks to a [`ShadowBackend`]. A backend owns the
//! compiled programs and the draw-scene primitive and knows how to realize
//! a [`ResourcePlan`] as real allocations.

use std::time::Duration;

use umbra_core::Extent2d;

use crate::error::{PassError, ProvisionError};
use crate::frame::FrameUniforms;
use crate::pass::PassId;
use crate::resource::{ResourceKind, ResourcePlan, TextureFormat};

/// What a backend observed about a finished frame
///
/// GPU backends report results as they become available, which may be a
/// few frames late; the values are never waited for.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Duration of each pass that was measured
    pub pass_times: Vec<(PassId, Duration)>,
    /// Whole-frame duration
    pub total: Option<Duration>,
    /// Allocation counter value after list building
    pub list_allocations: Option<u32>,
    /// Node capacity the counter is compared against
    pub node_capacity: u32,
}

impl FrameStats {
    /// Samples dropped because the node buffer was full
    pub fn overflowed_samples(&self) -> u32 {
        self.list_allocations
            .map(|n| n.saturating_sub(self.node_capacity))
            .unwrap_or(0)
    }
}

/// CPU copy of an intermediate resource for debug display
#[derive(Clone, Debug, PartialEq)]
pub struct TargetImage {
    pub kind: ResourceKind,
    pub extent: Extent2d,
    pub format: TextureFormat,
    /// Tightly packed rows
    pub bytes: Vec<u8>,
}

impl TargetImage {
    /// Convert to 8-bit RGBA for viewing
    ///
    /// Float and integer targets are normalized by their maximum value.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let pixels = self.extent.area() as usize;
        let mut out = Vec::with_capacity(pixels * 4);
        match self.format {
            TextureFormat::Rgba8Unorm => out.extend_from_slice(&self.bytes),
            TextureFormat::R8Unorm => {
                for v in &self.bytes {
                    out.extend_from_slice(&[*v, *v, *v, 255]);
                }
            }
            TextureFormat::R32Uint => {
                let values: Vec<u32> = self
                    .bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                let max = values
                    .iter()
                    .copied()
                    .filter(|v| *v != u32::MAX)
                    .max()
                    .unwrap_or(0)
                    .max(1) as f32;
                for v in values {
                    let g = if v == u32::MAX { 0 } else { (v as f32 / max * 255.0) as u8 };
                    out.extend_from_slice(&[g, g, g, 255]);
                }
            }
            TextureFormat::Rgba32Float | TextureFormat::Depth32Float => {
                let channels = self.format.bytes_per_pixel() / 4;
                let values: Vec<f32> = self
                    .bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                let max = values
                    .iter()
                    .copied()
                    .filter(|v| v.is_finite())
                    .fold(0.0f32, |m, v| m.max(v.abs()))
                    .max(f32::EPSILON);
                for px in values.chunks_exact(channels) {
                    let c = |v: f32| (v.abs() / max * 255.0).clamp(0.0, 255.0) as u8;
                    if channels == 1 {
                        let g = c(px[0]);
                        out.extend_from_slice(&[g, g, g, 255]);
                    } else {
                        out.extend_from_slice(&[c(px[0]), c(px[1]), c(px[2]), 255]);
                    }
                }
            }
        }
        out.resize(pixels * 4, 0);
        out
    }
}

/// A device that can run the shadow passes
pub trait ShadowBackend {
    /// Allocations for one [`ResourcePlan`]
    type Resources;

    /// Backend name for logs
    fn name(&self) -> &str;

    /// Allocate every resource of `plan` and check it is complete
    fn provision(&mut self, plan: &ResourcePlan) -> Result<Self::Resources, ProvisionError>;

    /// Free a resource set
    fn release(&mut self, resources: Self::Resources);

    /// Whether a valid program exists for `pass`
    fn has_program(&self, pass: PassId) -> bool;

    /// Rebuild programs; returns how many passes have a valid program
    fn recompile(&mut self) -> usize;

    /// Start recording a frame
    fn begin_frame(&mut self, frame: &FrameUniforms);

    /// Clear list heads to the sentinel and the accumulator and counter to zero
    fn reset_lists(&mut self, resources: &mut Self::Resources);

    /// Run one pass
    fn execute(
        &mut self,
        pass: PassId,
        resources: &mut Self::Resources,
        frame: &FrameUniforms,
    ) -> Result<(), PassError>;

    /// Finish the frame and report whatever results are available
    fn end_frame(&mut self, resources: &mut Self::Resources) -> FrameStats;

    /// Copy an intermediate resource back to the CPU (blocking, debug only)
    fn read_target(
        &mut self,
        resources: &Self::Resources,
        kind: ResourceKind,
    ) -> Result<TargetImage, PassError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflowed_samples() {
        let stats = FrameStats {
            list_allocations: Some(120),
            node_capacity: 100,
            ..Default::default()
        };
        assert_eq!(stats.overflowed_samples(), 20);
        assert_eq!(FrameStats::default().overflowed_samples(), 0);
    }

    #[test]
    fn test_head_image_to_rgba8_hides_sentinel() {
        let values = [u32::MAX, 0, 2, 4];
        let image = TargetImage {
            kind: ResourceKind::HeadPointerImage,
            extent: Extent2d::new(2, 2),
            format: TextureFormat::R32Uint,
            bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        };
        let rgba = image.to_rgba8();
        assert_eq!(rgba.len(), 16);
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
        assert_eq!(&rgba[12..16], &[255, 255, 255, 255]);
        assert_eq!(rgba[8], 127);
    }
}
