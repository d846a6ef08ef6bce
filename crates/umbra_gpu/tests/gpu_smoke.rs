//! Both algorithms on a real adapter
//!
//! Ignored by default; run with `--ignored` on a machine with a GPU.

use glam::Vec3;
use umbra_gpu::{ContextOptions, GpuBackend, GpuContext};
use umbra_render::prelude::*;
use umbra_render::ShadowPipeline;

const WINDOW: Extent2d = Extent2d {
    width: 64,
    height: 64,
};

fn occluded_scene() -> SceneGeometry {
    let mut scene = SceneGeometry::new();
    scene.add_quad_y(0.0, 50.0, true);
    scene.add_quad_y(10.0, 15.0, true);
    scene
}

fn low_camera() -> CameraMatrices {
    Camera {
        eye: Vec3::new(0.0, 5.0, 0.0),
        target: Vec3::ZERO,
        up: Vec3::NEG_Z,
        ..Default::default()
    }
    .matrices(WINDOW)
}

fn pipeline(algorithm: ShadowAlgorithm) -> ShadowPipeline<GpuBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = GpuContext::headless(&ContextOptions::default()).expect("adapter");
    let config = ShadowConfig {
        algorithm,
        shadow_map_resolution: ShadowMapResolution::clamped(128),
        ..Default::default()
    };
    let backend = GpuBackend::new(ctx, &occluded_scene(), &config);
    ShadowPipeline::new(backend, config, WINDOW)
}

/// Fraction of frame pixels darker than the unshadowed ground
fn shadowed_fraction(p: &mut ShadowPipeline<GpuBackend>) -> f32 {
    let image = p.read_target(ResourceKind::FrameColor).unwrap();
    let rgba = image.to_rgba8();
    let dark = rgba.chunks_exact(4).filter(|px| px[0] < 100).count();
    dark as f32 / WINDOW.area() as f32
}

#[test]
#[ignore]
fn test_standard_frame_on_gpu() {
    let mut p = pipeline(ShadowAlgorithm::Standard);
    let report = p.render_frame(&low_camera()).unwrap();
    assert_eq!(report.executed.len(), 2);
    assert!(shadowed_fraction(&mut p) > 0.9);
}

#[test]
#[ignore]
fn test_alias_free_frame_on_gpu() {
    let mut p = pipeline(ShadowAlgorithm::AliasFree);
    let camera = low_camera();
    let mut allocations = None;
    for _ in 0..8 {
        let report = p.render_frame(&camera).unwrap();
        assert!(report.skipped.is_empty());
        allocations = allocations.or(report.stats.list_allocations);
    }
    assert_eq!(allocations, Some(WINDOW.area() as u32));
    assert!(shadowed_fraction(&mut p) > 0.9);
}

#[test]
#[ignore]
fn test_toggle_on_gpu() {
    let mut p = pipeline(ShadowAlgorithm::Standard);
    let camera = low_camera();
    p.render_frame(&camera).unwrap();
    p.toggle_algorithm();
    let report = p.render_frame(&camera).unwrap();
    assert!(report.reprovisioned);
    assert_eq!(report.algorithm, ShadowAlgorithm::AliasFree);
}
