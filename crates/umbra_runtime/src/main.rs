//! Umbra headless runtime
//!
//! Renders the demo scene with the configured shadow algorithm, optionally
//! switching algorithm and shadow-map resolution as it goes, logs pass
//! timings and writes the final composite.
//!
//! Run with: cargo run --bin umbra -- --algorithm alias-free --output frame.png

mod boot_config;

use std::path::{Path, PathBuf};

use glam::Vec3;
use thiserror::Error;
use umbra_gpu::{ContextOptions, GpuBackend, GpuContext, GpuError, ShaderSources};
use umbra_render::prelude::*;
use umbra_render::{PipelineError, TargetImage};

use crate::boot_config::{Backend, ConfigError, RuntimeConfig};

/// Runtime errors
#[derive(Debug, Error)]
enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("failed to write {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<(), RuntimeError> {
    let config = RuntimeConfig::load(args)?;
    config.print_summary();

    let scene = SceneGeometry::demo();
    match config.backend {
        Backend::Software => drive(software_backend(scene, &config), &config),
        Backend::Gpu => drive(gpu_backend(&scene, &config)?, &config),
        Backend::Auto => match gpu_backend(&scene, &config) {
            Ok(backend) => drive(backend, &config),
            Err(e) => {
                log::warn!("GPU backend unavailable ({}), falling back to software", e);
                drive(software_backend(scene, &config), &config)
            }
        },
    }
}

fn software_backend(scene: SceneGeometry, config: &RuntimeConfig) -> SoftwareBackend {
    let mut backend = SoftwareBackend::new(scene);
    backend.set_conservative(config.shadows.conservative_rasterization);
    backend
}

fn gpu_backend(scene: &SceneGeometry, config: &RuntimeConfig) -> Result<GpuBackend, RuntimeError> {
    let ctx = GpuContext::headless(&ContextOptions::default())?;
    let backend = GpuBackend::new(ctx, scene, &config.shadows);
    Ok(match &config.shader_dir {
        Some(dir) => backend.with_sources(ShaderSources::from_dir(dir)?),
        None => backend,
    })
}

/// Frame loop
fn drive<B: ShadowBackend>(backend: B, config: &RuntimeConfig) -> Result<(), RuntimeError> {
    let window = config.window();
    let mut pipeline = ShadowPipeline::new(backend, config.shadows.clone(), window);
    log::info!("Rendering {} frames on the {} backend", config.run.frames, pipeline.backend().name());

    let mut camera = Camera::default();
    if let Some(eye) = config.run.camera_eye {
        camera.eye = Vec3::from_array(eye);
    }
    let matrices = camera.matrices(window);

    let run = &config.run;
    let mut dropped: u64 = 0;
    for frame in 0..run.frames {
        if run.toggle_every > 0 && frame > 0 && frame % run.toggle_every == 0 {
            let next = pipeline.toggle_algorithm();
            log::info!("Frame {}: switching to {}", frame, next);
            if run.resolution_step != 0 {
                let resolution = pipeline.step_shadow_map_resolution(run.resolution_step);
                log::info!("Frame {}: shadow map resolution {}", frame, resolution);
            }
        }

        let report = pipeline.render_frame(&matrices)?;
        dropped += report.overflowed_samples() as u64;
        if let Some(rejected) = report.rejected {
            log::warn!(
                "Frame {}: {} at shadow map {} rejected, kept {} at {}",
                frame,
                rejected.algorithm,
                rejected.resolution,
                report.algorithm,
                report.shadow_resolution
            );
        }
        if run.report_every > 0 && (frame + 1) % run.report_every == 0 {
            log_timings(&pipeline, report.algorithm);
        }
    }

    if run.report_every == 0 || run.frames % run.report_every != 0 {
        log_timings(&pipeline, pipeline.algorithm());
    }
    let stats = pipeline.lifecycle_stats();
    log::info!(
        "Done: {} provisions, {} releases, {} failures, {} samples dropped",
        stats.provisions,
        stats.releases,
        stats.failures,
        dropped
    );

    if let Some(path) = &config.output.image {
        write_png(&pipeline.read_target(ResourceKind::FrameColor)?, path)?;
        log::info!("Wrote {}", path.display());
        if config.output.dump_targets {
            dump_targets(&mut pipeline, path)?;
        }
    }
    Ok(())
}

fn log_timings<B: ShadowBackend>(pipeline: &ShadowPipeline<B>, algorithm: ShadowAlgorithm) {
    for line in pipeline.timings().report(algorithm) {
        log::info!("{}", line);
    }
}

/// Write every readable target of the live plan next to `path`
fn dump_targets<B: ShadowBackend>(pipeline: &mut ShadowPipeline<B>, path: &Path) -> Result<(), RuntimeError> {
    let kinds: Vec<ResourceKind> = match pipeline.plan() {
        Some(plan) => plan
            .kinds()
            .filter(|k| *k != ResourceKind::FrameColor && *k != ResourceKind::NodeBuffer)
            .collect(),
        None => return Ok(()),
    };
    for kind in kinds {
        match pipeline.read_target(kind) {
            Ok(image) => {
                let target = sibling(path, kind.label());
                write_png(&image, &target)?;
                log::debug!("Wrote {}", target.display());
            }
            Err(e) => log::warn!("Skipping {}: {}", kind, e),
        }
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
    path.with_file_name(format!("{}_{}.png", stem, suffix))
}

fn write_png(target: &TargetImage, path: &Path) -> Result<(), RuntimeError> {
    image::save_buffer(
        path,
        &target.to_rgba8(),
        target.extent.width,
        target.extent.height,
        image::ExtendedColorType::Rgba8,
    )
    .map_err(|source| RuntimeError::Image {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_names() {
        let p = sibling(Path::new("out/frame.png"), "visibility_map");
        assert_eq!(p, PathBuf::from("out/frame_visibility_map.png"));
    }

    #[test]
    fn test_software_run_writes_nothing_without_output() {
        let config = RuntimeConfig {
            backend: Backend::Software,
            run: boot_config::RunConfig {
                width: 32,
                height: 24,
                frames: 4,
                toggle_every: 2,
                resolution_step: -1,
                report_every: 0,
                camera_eye: None,
            },
            shadows: ShadowConfig::low_quality(),
            ..Default::default()
        };
        let backend = software_backend(SceneGeometry::demo(), &config);
        drive(backend, &config).unwrap();
    }
}
