//! End-to-end properties of the shadow pipeline on the CPU backend

use std::collections::HashSet;

use glam::Vec3;
use umbra_core::{Extent2d, PackedPixel};
use umbra_render::prelude::*;
use umbra_render::ListBuffer;

const WINDOW: Extent2d = Extent2d {
    width: 32,
    height: 32,
};

/// Ground plane under a large occluder, both lit from straight above
fn covered_scene(with_occluder: bool) -> SceneGeometry {
    // Quads are shifted so their diagonal edges stay clear of the sample footprint
    let quad = |scene: &mut SceneGeometry, y: f32, half: f32, shift: f32| {
        let p = |x: f32, z: f32| Vec3::new(x + shift, y, z);
        scene.add_quad([p(-half, half), p(half, half), p(half, -half), p(-half, -half)]);
    };
    let mut scene = SceneGeometry::new();
    quad(&mut scene, 0.0, 50.0, 7.0);
    if with_occluder {
        quad(&mut scene, 10.0, 15.0, 3.0);
    }
    scene
}

/// Camera between the occluder and the ground, looking straight down
fn low_camera() -> CameraMatrices {
    Camera {
        eye: Vec3::new(0.0, 5.0, 0.0),
        target: Vec3::ZERO,
        up: Vec3::NEG_Z,
        ..Default::default()
    }
    .matrices(WINDOW)
}

fn config(algorithm: ShadowAlgorithm) -> ShadowConfig {
    ShadowConfig {
        algorithm,
        shadow_map_resolution: ShadowMapResolution::clamped(64),
        ..Default::default()
    }
}

fn pipeline(scene: SceneGeometry, algorithm: ShadowAlgorithm) -> ShadowPipeline<SoftwareBackend> {
    let backend = SoftwareBackend::new(scene).with_threads(4);
    ShadowPipeline::new(backend, config(algorithm), WINDOW)
}

fn visible_pixels(p: &ShadowPipeline<SoftwareBackend>) -> Vec<(u32, u32)> {
    let vis = p.resources().and_then(|r| r.visibility()).unwrap();
    let mut out = Vec::new();
    for y in 0..WINDOW.height {
        for x in 0..WINDOW.width {
            if vis.get(x, y).unwrap()[3] > 0.0 {
                out.push((x, y));
            }
        }
    }
    out
}

#[test]
fn test_same_state_does_not_reprovision() {
    let mut p = pipeline(SceneGeometry::demo(), ShadowAlgorithm::AliasFree);
    let camera = Camera::default().matrices(WINDOW);
    assert!(p.render_frame(&camera).unwrap().reprovisioned);
    for _ in 0..3 {
        assert!(!p.render_frame(&camera).unwrap().reprovisioned);
    }
    assert_eq!(p.lifecycle_stats().provisions, 1);
    assert_eq!(p.lifecycle_stats().releases, 0);
}

#[test]
fn test_toggle_round_trip_reprovisions_twice() {
    let mut p = pipeline(SceneGeometry::demo(), ShadowAlgorithm::Standard);
    let camera = Camera::default().matrices(WINDOW);
    p.render_frame(&camera).unwrap();

    assert_eq!(p.toggle_algorithm(), ShadowAlgorithm::AliasFree);
    assert!(p.render_frame(&camera).unwrap().reprovisioned);
    assert_eq!(p.toggle_algorithm(), ShadowAlgorithm::Standard);
    assert!(p.render_frame(&camera).unwrap().reprovisioned);

    let stats = p.lifecycle_stats();
    assert_eq!(stats.provisions, 3);
    assert_eq!(stats.releases, 2);
    assert_eq!(p.state().transitions(), 2);
}

#[test]
fn test_plan_tracks_window_and_resolution() {
    let mut p = pipeline(SceneGeometry::demo(), ShadowAlgorithm::AliasFree);
    let window = Extent2d::new(48, 20);
    assert!(p.resize(window));
    assert!(!p.resize(window));
    assert!(!p.resize(Extent2d::new(0, 20)));
    p.set_shadow_map_resolution(ShadowMapResolution::clamped(128));

    let report = p.render_frame(&Camera::default().matrices(window)).unwrap();
    assert!(report.reprovisioned);

    let plan = p.plan().unwrap();
    assert_eq!(plan.window, window);
    assert_eq!(plan.node_capacity(), 48 * 20);
    assert_eq!(plan.extent_of(ResourceKind::HeadPointerImage), Some(Extent2d::square(128)));
    assert_eq!(plan.extent_of(ResourceKind::ShadowAccumulator), Some(window));
    assert_eq!(p.resources().unwrap().lists().unwrap().capacity(), 48 * 20);
}

#[test]
fn test_lists_hold_every_sample_once() {
    let mut p = pipeline(covered_scene(true), ShadowAlgorithm::AliasFree);
    p.render_frame(&low_camera()).unwrap();

    let visible = visible_pixels(&p);
    let lists = p.resources().and_then(|r| r.lists()).unwrap();
    assert_eq!(lists.allocated() as usize, visible.len());
    assert_eq!(lists.overflowed(), 0);

    let mut indices = HashSet::new();
    let mut pixels = HashSet::new();
    let r = lists.head_extent();
    for ty in 0..r.height {
        for tx in 0..r.width {
            for (index, record) in lists.iter(tx, ty, u32::MAX) {
                assert!(indices.insert(index), "node {:?} reached twice", index);
                pixels.insert((record.pixel.x(), record.pixel.y()));
            }
        }
    }
    assert_eq!(indices.len(), visible.len());
    assert_eq!(pixels, visible.into_iter().collect());
}

#[test]
fn test_concurrent_inserts_count_every_request() {
    let capacity = 1000;
    let list = ListBuffer::new(Extent2d::square(8), capacity);
    crossbeam_utils::thread::scope(|s| {
        for t in 0..8u32 {
            let list = &list;
            s.spawn(move |_| {
                for i in 0..200u32 {
                    let _ = list.insert(i % 8, t, i as f32, PackedPixel::new(i, t));
                }
            });
        }
    })
    .unwrap();

    assert_eq!(list.allocated(), 1600);
    assert_eq!(list.stored(), capacity);
    assert_eq!(list.overflowed(), 600);

    let mut seen = HashSet::new();
    for y in 0..8 {
        for x in 0..8 {
            for (index, _) in list.iter(x, y, u32::MAX) {
                assert!(seen.insert(index));
            }
        }
    }
    assert_eq!(seen.len(), capacity as usize);
}

#[test]
fn test_unoccluded_ground_is_never_shadowed() {
    let mut p = pipeline(covered_scene(false), ShadowAlgorithm::AliasFree);
    let report = p.render_frame(&low_camera()).unwrap();
    assert_eq!(report.executed.len(), 4);

    let acc = p.resources().and_then(|r| r.accumulator()).unwrap();
    assert!(acc.snapshot().iter().all(|v| *v == 0));
}

#[test]
fn test_occluded_ground_is_fully_shadowed() {
    let mut p = pipeline(covered_scene(true), ShadowAlgorithm::AliasFree);
    p.render_frame(&low_camera()).unwrap();

    let visible = visible_pixels(&p);
    assert_eq!(visible.len(), WINDOW.area() as usize);
    let acc = p.resources().and_then(|r| r.accumulator()).unwrap();
    for (x, y) in visible {
        assert!(acc.get(x, y).unwrap() > 0, "pixel ({}, {}) lit", x, y);
    }
}

#[test]
fn test_both_algorithms_agree_on_a_hard_shadow() {
    let camera = low_camera();
    let mut standard = pipeline(covered_scene(true), ShadowAlgorithm::Standard);
    let mut alias_free = pipeline(covered_scene(true), ShadowAlgorithm::AliasFree);
    standard.render_frame(&camera).unwrap();
    alias_free.render_frame(&camera).unwrap();

    let a = standard.read_target(ResourceKind::FrameColor).unwrap();
    let b = alias_free.read_target(ResourceKind::FrameColor).unwrap();
    assert_eq!(a.extent, b.extent);
    for (x, y) in a.bytes.iter().zip(&b.bytes) {
        assert!((*x as i32 - *y as i32).abs() <= 2);
    }
}

#[test]
fn test_missing_program_is_skipped() {
    let backend = SoftwareBackend::new(SceneGeometry::demo()).with_disabled_programs(&[PassId::RenderScene]);
    let mut p = ShadowPipeline::new(backend, config(ShadowAlgorithm::AliasFree), WINDOW);
    let camera = Camera::default().matrices(WINDOW);

    let report = p.render_frame(&camera).unwrap();
    assert_eq!(report.skipped, vec![PassId::RenderScene]);
    assert_eq!(
        report.executed,
        vec![
            PassId::VisibilityMapGeneration,
            PassId::ListBufferGeneration,
            PassId::ShadowTestAliasFree
        ]
    );

    // Still broken after a recompile
    assert!(!p.backend().has_program(PassId::RenderScene));
    assert_eq!(p.recompile(), PassId::COUNT - 1);
}

#[test]
fn test_rejected_resolution_rolls_back() {
    let backend = SoftwareBackend::new(SceneGeometry::demo()).with_max_dimension(128);
    let mut p = ShadowPipeline::new(backend, config(ShadowAlgorithm::AliasFree), WINDOW);
    let camera = Camera::default().matrices(WINDOW);
    p.render_frame(&camera).unwrap();

    p.set_shadow_map_resolution(ShadowMapResolution::clamped(256));
    let report = p.render_frame(&camera).unwrap();
    assert_eq!(report.rejected_resolution(), Some(ShadowMapResolution::clamped(256)));
    assert_eq!(report.shadow_resolution, ShadowMapResolution::clamped(64));
    assert!(!report.reprovisioned);
    assert_eq!(p.shadow_map_resolution(), ShadowMapResolution::clamped(64));
    assert_eq!(p.plan().unwrap().shadow_resolution, ShadowMapResolution::clamped(64));
    assert_eq!(p.lifecycle_stats().failures, 1);
}

#[test]
fn test_rejected_resize_keeps_last_good_state() {
    let backend = SoftwareBackend::new(SceneGeometry::demo()).with_max_dimension(64);
    let mut p = ShadowPipeline::new(backend, config(ShadowAlgorithm::Standard), WINDOW);
    let camera = Camera::default().matrices(WINDOW);
    assert!(p.render_frame(&camera).unwrap().reprovisioned);

    let wide = Extent2d::new(100, 32);
    assert!(p.resize(wide));
    assert_eq!(p.toggle_algorithm(), ShadowAlgorithm::AliasFree);
    let report = p.render_frame(&camera).unwrap();

    let rejected = report.rejected.unwrap();
    assert_eq!(rejected.window, wide);
    assert_eq!(rejected.algorithm, ShadowAlgorithm::AliasFree);
    assert_eq!(report.rejected_resolution(), None);
    assert!(!report.reprovisioned);
    assert_eq!(report.algorithm, ShadowAlgorithm::Standard);
    assert_eq!(report.window, WINDOW);
    assert_eq!(p.window(), WINDOW);
    assert_eq!(p.algorithm(), ShadowAlgorithm::Standard);
    assert_eq!(p.config().algorithm, ShadowAlgorithm::Standard);
    assert_eq!(p.lifecycle_stats().provisions, 1);
    assert_eq!(p.lifecycle_stats().failures, 1);

    for _ in 0..2 {
        let report = p.render_frame(&camera).unwrap();
        assert!(report.rejected.is_none());
        assert!(!report.reprovisioned);
    }

    let narrow = Extent2d::new(48, 32);
    assert!(p.resize(narrow));
    let report = p.render_frame(&Camera::default().matrices(narrow)).unwrap();
    assert!(report.reprovisioned);
    assert_eq!(p.plan().unwrap().window, narrow);
}

#[test]
fn test_standard_resize_keeps_light_space_extents() {
    let mut p = pipeline(SceneGeometry::demo(), ShadowAlgorithm::Standard);
    p.render_frame(&Camera::default().matrices(WINDOW)).unwrap();

    let window = Extent2d::new(40, 24);
    assert!(p.resize(window));
    assert!(p.render_frame(&Camera::default().matrices(window)).unwrap().reprovisioned);

    let light = Some(Extent2d::square(64));
    let plan = p.plan().unwrap();
    assert_eq!(plan.extent_of(ResourceKind::DepthMap), light);
    assert_eq!(plan.extent_of(ResourceKind::ZBuffer), light);
    assert_eq!(plan.extent_of(ResourceKind::FrameColor), Some(window));
    assert_eq!(plan.extent_of(ResourceKind::FrameDepth), Some(window));
    assert_eq!(p.read_target(ResourceKind::FrameColor).unwrap().extent, window);
    assert_eq!(p.read_target(ResourceKind::DepthMap).unwrap().extent, Extent2d::square(64));
}

#[test]
fn test_timing_report_lists_passes() {
    let mut p = pipeline(SceneGeometry::demo(), ShadowAlgorithm::AliasFree);
    p.render_frame(&Camera::default().matrices(WINDOW)).unwrap();
    let lines = p.timings().report(p.algorithm());
    assert!(lines[0].starts_with("Total time [ms]"));
    assert!(lines[1].starts_with("1. Visibility map generation [ms]"));
    assert_eq!(lines.len(), 5);
}
