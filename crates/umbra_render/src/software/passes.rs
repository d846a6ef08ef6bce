//! Pass bodies of the CPU backend
//!
//! Screen-space passes split the image into row bands; the list builder
//! and the alias-free shadow test run on scoped worker threads and race on
//! the same atomics the GPU shaders use.

use glam::{Mat4, Vec3};
use umbra_core::{Extent2d, PackedPixel};

use super::image::{AtomicImage, Image};
use super::raster::{intersect, segment_blocked, CullMode, Hit, ScreenTriangle, ViewRays};
use crate::error::PassError;
use crate::frame::FrameUniforms;
use crate::light::light_texel;
use crate::list::ListBuffer;
use crate::pass::PassId;
use crate::scene::{SceneGeometry, Triangle};

/// Segment ends excluded from occlusion tests, in segment parameter units
pub const SEGMENT_EPSILON: f32 = 1e-3;

/// Color of pixels without geometry
pub const BACKGROUND: [f32; 3] = [0.08, 0.08, 0.1];

/// Surface color under direct light, without shadowing
pub fn shade(position: Vec3, normal: Vec3, light: Vec3) -> Vec3 {
    let base = if normal.y > 0.9 {
        let c = (position.x * 0.5).floor() + (position.z * 0.5).floor();
        if c - 2.0 * (c * 0.5).floor() < 0.5 {
            Vec3::new(0.85, 0.85, 0.8)
        } else {
            Vec3::new(0.6, 0.62, 0.65)
        }
    } else {
        Vec3::new(0.8, 0.55, 0.35)
    };
    let l = (light - position).normalize_or_zero();
    base * (0.15 + 0.85 * normal.dot(l).max(0.0))
}

pub fn to_rgba8(c: Vec3) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    [q(c.x), q(c.y), q(c.z), 255]
}

pub fn from_rgba8(c: [u8; 4]) -> Vec3 {
    Vec3::new(c[0] as f32, c[1] as f32, c[2] as f32) / 255.0
}

/// Nearest hit per pixel of a view
pub fn cast_view(
    pass: PassId,
    scene: &SceneGeometry,
    view_projection: Mat4,
    extent: Extent2d,
    cull: CullMode,
    threads: usize,
) -> Result<Image<Hit>, PassError> {
    let mut hits = Image::new(extent, Hit::MISS);
    if extent.is_empty() {
        return Ok(hits);
    }
    let rays = ViewRays::new(view_projection, extent);
    let tris: Vec<(Triangle, ScreenTriangle)> = scene
        .triangles()
        .map(|t| (t, ScreenTriangle::project(&view_projection, &t, extent)))
        .collect();

    let width = extent.width as usize;
    let band_rows = (extent.height as usize + threads - 1) / threads.max(1);
    let band_rows = band_rows.max(1);

    crossbeam_utils::thread::scope(|s| {
        for (band, chunk) in hits.pixels_mut().chunks_mut(width * band_rows).enumerate() {
            let tris = &tris;
            let rays = &rays;
            s.spawn(move |_| {
                let y0 = (band * band_rows) as u32;
                let y1 = y0 + (chunk.len() / width) as u32 - 1;
                for (i, (tri, screen)) in tris.iter().enumerate() {
                    let Some((bx0, by0, bx1, by1)) = screen.bounds(extent) else {
                        continue;
                    };
                    let (lo, hi) = (by0.max(y0), by1.min(y1));
                    if lo > hi {
                        continue;
                    }
                    for y in lo..=hi {
                        let row = (y - y0) as usize * width;
                        for x in bx0..=bx1 {
                            let (origin, dir) = rays.ray(x, y);
                            if let Some(t) = intersect(origin, dir, tri, cull) {
                                let slot = &mut chunk[row + x as usize];
                                if t > 0.0 && t < slot.t {
                                    *slot = Hit { t, triangle: i as u32 };
                                }
                            }
                        }
                    }
                }
            });
        }
    })
    .map_err(|_| PassError::WorkerPanicked(pass))?;

    Ok(hits)
}

/// World position of a hit
fn hit_position(rays: &ViewRays, x: u32, y: u32, hit: &Hit) -> Vec3 {
    let (origin, dir) = rays.ray(x, y);
    origin + dir * hit.t
}

/// Light-view linear depth and hardware depth
pub fn depth_map(
    scene: &SceneGeometry,
    frame: &FrameUniforms,
    cull: CullMode,
    threads: usize,
    depth: &mut Image<f32>,
    z_buffer: &mut Image<f32>,
) -> Result<(), PassError> {
    let extent = depth.extent();
    let vp = frame.light_view_projection;
    let hits = cast_view(PassId::DepthTextureGeneration, scene, vp, extent, cull, threads)?;
    let rays = ViewRays::new(vp, extent);
    for y in 0..extent.height {
        for x in 0..extent.width {
            let Some(hit) = hits.get(x, y).filter(Hit::is_hit) else {
                continue;
            };
            let p = hit_position(&rays, x, y, &hit);
            depth.set(x, y, -frame.light_view.transform_point3(p).z);
            z_buffer.set(x, y, vp.project_point3(p).z);
        }
    }
    Ok(())
}

/// Standard shadow test straight into the frame color
pub fn standard_shadow_test(
    scene: &SceneGeometry,
    frame: &FrameUniforms,
    threads: usize,
    depth: &Image<f32>,
    color: &mut Image<[u8; 4]>,
    frame_depth: &mut Image<f32>,
) -> Result<(), PassError> {
    let extent = color.extent();
    let vp = frame.camera.view_projection();
    let hits = cast_view(PassId::ShadowTest, scene, vp, extent, CullMode::Back, threads)?;
    let rays = ViewRays::new(vp, extent);
    let resolution = depth.extent().width;
    for y in 0..extent.height {
        for x in 0..extent.width {
            let Some(hit) = hits.get(x, y).filter(Hit::is_hit) else {
                color.set(x, y, to_rgba8(Vec3::from_array(BACKGROUND)));
                frame_depth.set(x, y, 1.0);
                continue;
            };
            let p = hit_position(&rays, x, y, &hit);
            let normal = scene.triangle(hit.triangle as usize).normal;
            let lit = shade(p, normal, frame.light_position);
            let shadowed = light_texel(&frame.light_view_projection, p, resolution)
                .and_then(|t| depth.get(t.x, t.y).map(|stored| t.linear_depth - frame.depth_bias > stored))
                .unwrap_or(false);
            let c = if shadowed { lit * frame.ambient } else { lit };
            color.set(x, y, to_rgba8(c));
            frame_depth.set(x, y, vp.project_point3(p).z);
        }
    }
    Ok(())
}

/// World positions and unshadowed lighting per screen pixel
pub fn visibility_map(
    scene: &SceneGeometry,
    frame: &FrameUniforms,
    threads: usize,
    visibility: &mut Image<[f32; 4]>,
    lighting: &mut Image<[u8; 4]>,
    frame_depth: &mut Image<f32>,
) -> Result<(), PassError> {
    let extent = visibility.extent();
    let vp = frame.camera.view_projection();
    let hits = cast_view(PassId::VisibilityMapGeneration, scene, vp, extent, CullMode::Back, threads)?;
    let rays = ViewRays::new(vp, extent);
    for y in 0..extent.height {
        for x in 0..extent.width {
            match hits.get(x, y).filter(Hit::is_hit) {
                Some(hit) => {
                    let p = hit_position(&rays, x, y, &hit);
                    let normal = scene.triangle(hit.triangle as usize).normal;
                    visibility.set(x, y, p.extend(1.0).to_array());
                    lighting.set(x, y, to_rgba8(shade(p, normal, frame.light_position)));
                    frame_depth.set(x, y, vp.project_point3(p).z);
                }
                None => {
                    visibility.set(x, y, [0.0; 4]);
                    lighting.set(x, y, to_rgba8(Vec3::from_array(BACKGROUND)));
                    frame_depth.set(x, y, 1.0);
                }
            }
        }
    }
    Ok(())
}

/// Insert every visible screen sample into its light texel's list
pub fn build_lists(
    frame: &FrameUniforms,
    threads: usize,
    visibility: &Image<[f32; 4]>,
    lists: &ListBuffer,
) -> Result<(), PassError> {
    let extent = visibility.extent();
    let resolution = lists.head_extent().width;
    let rows_per_worker = ((extent.height as usize + threads - 1) / threads.max(1)).max(1) as u32;

    crossbeam_utils::thread::scope(|s| {
        let mut y0 = 0;
        while y0 < extent.height {
            let y1 = (y0 + rows_per_worker).min(extent.height);
            s.spawn(move |_| {
                for y in y0..y1 {
                    for x in 0..extent.width {
                        let Some(v) = visibility.get(x, y).filter(|v| v[3] > 0.0) else {
                            continue;
                        };
                        let p = Vec3::new(v[0], v[1], v[2]);
                        if let Some(t) = light_texel(&frame.light_view_projection, p, resolution) {
                            // Overflow is counted by the allocation counter
                            let _ = lists.insert(t.x, t.y, t.linear_depth, PackedPixel::new(x, y));
                        }
                    }
                }
            });
            y0 = y1;
        }
    })
    .map_err(|_| PassError::WorkerPanicked(PassId::ListBufferGeneration))
}

/// Alias-free shadow test: every triangle against the samples of every texel it touches
#[allow(clippy::too_many_arguments)]
pub fn alias_free_shadow_test(
    scene: &SceneGeometry,
    frame: &FrameUniforms,
    threads: usize,
    conservative: bool,
    visibility: &Image<[f32; 4]>,
    lists: &ListBuffer,
    accumulator: &AtomicImage,
    coverage: &AtomicImage,
) -> Result<(), PassError> {
    let map = lists.head_extent();
    let vp = frame.light_view_projection;
    let light = frame.light_position;
    let max_nodes = frame.max_traversal;

    let tris: Vec<(Triangle, ScreenTriangle, f32)> = scene
        .triangles()
        .map(|t| {
            let screen = ScreenTriangle::project(&vp, &t, map);
            let nearest = t
                .v
                .iter()
                .map(|v| (vp * v.extend(1.0)).w)
                .fold(f32::INFINITY, f32::min);
            (t, screen, nearest)
        })
        .collect();
    let per_worker = ((tris.len() + threads - 1) / threads.max(1)).max(1);

    crossbeam_utils::thread::scope(|s| {
        for chunk in tris.chunks(per_worker) {
            s.spawn(move |_| {
                for (tri, screen, nearest) in chunk {
                    let Some((x0, y0, x1, y1)) = screen.bounds(map) else {
                        continue;
                    };
                    for ty in y0..=y1 {
                        for tx in x0..=x1 {
                            let covered = if conservative {
                                screen.overlaps_texel(tx, ty)
                            } else {
                                screen.covers_center(tx, ty)
                            };
                            if !covered {
                                continue;
                            }
                            coverage.add(tx, ty, 1);
                            for (_, node) in lists.iter(tx, ty, max_nodes) {
                                // Triangle entirely behind the sample as seen from the light
                                if node.depth <= *nearest {
                                    continue;
                                }
                                let (px, py) = (node.pixel.x(), node.pixel.y());
                                let Some(v) = visibility.get(px, py) else {
                                    continue;
                                };
                                let sample = Vec3::new(v[0], v[1], v[2]);
                                if segment_blocked(sample, light, tri, SEGMENT_EPSILON) {
                                    accumulator.add(px, py, 1);
                                }
                            }
                        }
                    }
                }
            });
        }
    })
    .map_err(|_| PassError::WorkerPanicked(PassId::ShadowTestAliasFree))
}

/// Full-screen composite of lighting, visibility and the accumulator
pub fn composite(
    frame: &FrameUniforms,
    visibility: &Image<[f32; 4]>,
    lighting: &Image<[u8; 4]>,
    accumulator: &AtomicImage,
    color: &mut Image<[u8; 4]>,
) {
    let extent = color.extent();
    for y in 0..extent.height {
        for x in 0..extent.width {
            let visible = visibility.get(x, y).map(|v| v[3] > 0.0).unwrap_or(false);
            let c = if visible {
                let lit = lighting.get(x, y).map(from_rgba8).unwrap_or(Vec3::ZERO);
                if accumulator.get(x, y).unwrap_or(0) > 0 {
                    lit * frame.ambient
                } else {
                    lit
                }
            } else {
                Vec3::from_array(BACKGROUND)
            };
            color.set(x, y, to_rgba8(c));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shade_faces_light() {
        let lit = shade(Vec3::ZERO, Vec3::Y, Vec3::new(0.0, 20.0, 0.0));
        let grazing = shade(Vec3::ZERO, Vec3::X, Vec3::new(0.0, 20.0, 0.0));
        assert!(lit.x > grazing.x);
        assert!((grazing / lit).x < 0.2);
    }

    #[test]
    fn test_rgba8_round_trip_is_close() {
        let c = Vec3::new(0.25, 0.5, 1.0);
        let back = from_rgba8(to_rgba8(c));
        assert!((back - c).abs().max_element() < 1.0 / 255.0);
    }
}
