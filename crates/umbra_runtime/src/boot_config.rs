//! Runtime Configuration
//!
//! Decides which backend runs the pipeline and what a headless run does.
//!
//! # Configuration Sources (later sources win)
//!
//! 1. Config file: `--config <path>`, `UMBRA_CONFIG`, or `./umbra.toml`
//! 2. Environment variables: `UMBRA_BACKEND`, `UMBRA_ALGORITHM`,
//!    `UMBRA_RESOLUTION`, `UMBRA_FRAMES`, `UMBRA_OUTPUT`, `UMBRA_SHADERS`
//! 3. Command-line flags
//!
//! # Example Config File
//!
//! ```toml
//! backend = "auto"        # gpu, software, auto
//! shader_dir = "shaders"  # optional WGSL overrides
//!
//! [run]
//! width = 1280
//! height = 720
//! frames = 120
//! toggle_every = 30       # 0 = never switch algorithm
//! resolution_step = 1     # applied at every switch
//! report_every = 60
//!
//! [output]
//! image = "frame.png"
//! dump_targets = false
//!
//! [shadows]
//! algorithm = "alias_free"
//! shadow_map_resolution = 1024
//! light_position = [0.0, 20.0, 0.0]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use umbra_core::Extent2d;
use umbra_render::{ShadowConfig, ShadowMapResolution};

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "umbra.toml";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Value { key: String, reason: String },
}

fn invalid(key: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Value {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Device that runs the passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// wgpu device; fails when no adapter exists
    Gpu,
    /// CPU reference backend
    Software,
    /// GPU, falling back to software
    #[default]
    Auto,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gpu => write!(f, "gpu"),
            Self::Software => write!(f, "software"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gpu" | "wgpu" => Ok(Self::Gpu),
            "software" | "cpu" => Ok(Self::Software),
            "auto" | "" => Ok(Self::Auto),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// What a headless run does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    /// Switch algorithm every N frames (0 = never)
    pub toggle_every: u32,
    /// Shadow-map resolution steps applied at every switch
    pub resolution_step: i32,
    /// Log pass timings every N frames (0 = only at the end)
    pub report_every: u32,
    /// Camera position, looking at the origin
    pub camera_eye: Option<[f32; 3]>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames: 60,
            toggle_every: 0,
            resolution_step: 0,
            report_every: 30,
            camera_eye: None,
        }
    }
}

/// Files written after the last frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Final composite as PNG
    pub image: Option<PathBuf>,
    /// Also write every intermediate target next to `image`
    pub dump_targets: bool,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub backend: Backend,
    /// Directory of WGSL overrides for the GPU backend
    pub shader_dir: Option<PathBuf>,
    pub run: RunConfig,
    pub output: OutputConfig,
    pub shadows: ShadowConfig,
    /// Config file path (for the summary)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Load configuration from all sources
    pub fn load(args: &[String]) -> Result<Self, ConfigError> {
        let explicit = flag_value(args, "--config")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("UMBRA_CONFIG").map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::load_from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_args(args)?;
        config.shadows.validate();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.config_path = Some(path.to_path_buf());
        log::info!("Loaded runtime config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override with `UMBRA_*` variables
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("UMBRA_BACKEND") {
            self.backend = v.parse().map_err(|e: String| invalid("UMBRA_BACKEND", e))?;
            log::info!("Backend from env: {}", self.backend);
        }
        if let Some(v) = var("UMBRA_ALGORITHM") {
            self.shadows.algorithm = v.parse().map_err(|e: String| invalid("UMBRA_ALGORITHM", e))?;
        }
        if let Some(v) = var("UMBRA_RESOLUTION") {
            self.shadows.shadow_map_resolution = parse_resolution("UMBRA_RESOLUTION", &v)?;
        }
        if let Some(v) = var("UMBRA_FRAMES") {
            self.run.frames = v.parse().map_err(|e| invalid("UMBRA_FRAMES", e))?;
        }
        if let Some(v) = var("UMBRA_OUTPUT").filter(|v| !v.is_empty()) {
            self.output.image = Some(PathBuf::from(v));
        }
        if let Some(v) = var("UMBRA_SHADERS").filter(|v| !v.is_empty()) {
            self.shader_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Override with command-line flags
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), ConfigError> {
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = || iter.next().cloned().ok_or_else(|| invalid(arg, "missing value"));
            match arg.as_str() {
                "--config" => {
                    value()?;
                }
                "--backend" => self.backend = value()?.parse().map_err(|e: String| invalid(arg, e))?,
                "--algorithm" => self.shadows.algorithm = value()?.parse().map_err(|e: String| invalid(arg, e))?,
                "--resolution" => self.shadows.shadow_map_resolution = parse_resolution(arg, &value()?)?,
                "--window" => {
                    let (w, h) = parse_window(arg, &value()?)?;
                    self.run.width = w;
                    self.run.height = h;
                }
                "--frames" => self.run.frames = value()?.parse().map_err(|e| invalid(arg, e))?,
                "--toggle-every" => self.run.toggle_every = value()?.parse().map_err(|e| invalid(arg, e))?,
                "--resolution-step" => self.run.resolution_step = value()?.parse().map_err(|e| invalid(arg, e))?,
                "--output" => self.output.image = Some(PathBuf::from(value()?)),
                "--shaders" => self.shader_dir = Some(PathBuf::from(value()?)),
                "--dump" => self.output.dump_targets = true,
                "--software" => self.backend = Backend::Software,
                other => log::warn!("Ignoring unknown argument: {}", other),
            }
        }
        Ok(())
    }

    /// Window extent of the run
    pub fn window(&self) -> Extent2d {
        Extent2d::new(self.run.width.max(1), self.run.height.max(1))
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        log::info!("Runtime Configuration:");
        log::info!("  Backend: {}", self.backend);
        log::info!(
            "  Algorithm: {}, shadow map {}, window {}",
            self.shadows.algorithm,
            self.shadows.shadow_map_resolution,
            self.window()
        );
        log::info!(
            "  Frames: {}, toggle every {}, resolution step {}",
            self.run.frames,
            self.run.toggle_every,
            self.run.resolution_step
        );
        if let Some(path) = &self.output.image {
            log::info!("  Output: {} (dump targets: {})", path.display(), self.output.dump_targets);
        }
        if let Some(dir) = &self.shader_dir {
            log::info!("  Shaders: {}", dir.display());
        }
        if let Some(path) = &self.config_path {
            log::info!("  Config: {}", path.display());
        }
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_resolution(key: &str, value: &str) -> Result<ShadowMapResolution, ConfigError> {
    let size: u32 = value.parse().map_err(|e| invalid(key, e))?;
    ShadowMapResolution::new(size).map_err(|e| invalid(key, e))
}

fn parse_window(key: &str, value: &str) -> Result<(u32, u32), ConfigError> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| invalid(key, "expected WIDTHxHEIGHT"))?;
    let w: u32 = w.trim().parse().map_err(|e| invalid(key, e))?;
    let h: u32 = h.trim().parse().map_err(|e| invalid(key, e))?;
    if w == 0 || h == 0 || w > 0xFFFF || h > 0xFFFF {
        return Err(invalid(key, "window edges must be in 1..=65535"));
    }
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_render::ShadowAlgorithm;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("gpu".parse::<Backend>().unwrap(), Backend::Gpu);
        assert_eq!("CPU".parse::<Backend>().unwrap(), Backend::Software);
        assert_eq!("auto".parse::<Backend>().unwrap(), Backend::Auto);
        assert!("vulkan".parse::<Backend>().is_err());
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Gpu.to_string(), "gpu");
        assert_eq!(Backend::Software.to_string(), "software");
    }

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.backend, Backend::Auto);
        assert_eq!(config.window(), Extent2d::new(1280, 720));
        assert_eq!(config.run.toggle_every, 0);
        assert!(config.output.image.is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = RuntimeConfig::from_toml(
            r#"
            backend = "software"

            [run]
            width = 320
            height = 200
            toggle_every = 10

            [output]
            image = "out.png"

            [shadows]
            algorithm = "alias_free"
            shadow_map_resolution = 512
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Software);
        assert_eq!(config.window(), Extent2d::new(320, 200));
        assert_eq!(config.run.toggle_every, 10);
        assert_eq!(config.run.frames, RunConfig::default().frames);
        assert_eq!(config.output.image, Some(PathBuf::from("out.png")));
        assert_eq!(config.shadows.algorithm, ShadowAlgorithm::AliasFree);
        assert_eq!(config.shadows.shadow_map_resolution.get(), 512);
    }

    #[test]
    fn test_toml_rejects_bad_resolution() {
        assert!(RuntimeConfig::from_toml("[shadows]\nshadow_map_resolution = 300\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RuntimeConfig::default();
        config
            .apply_env(|key| match key {
                "UMBRA_BACKEND" => Some("gpu".into()),
                "UMBRA_RESOLUTION" => Some("256".into()),
                "UMBRA_FRAMES" => Some("5".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.backend, Backend::Gpu);
        assert_eq!(config.shadows.shadow_map_resolution.get(), 256);
        assert_eq!(config.run.frames, 5);
    }

    #[test]
    fn test_env_rejects_bad_value() {
        let mut config = RuntimeConfig::default();
        let err = config.apply_env(|key| (key == "UMBRA_RESOLUTION").then(|| "100".into()));
        assert!(matches!(err, Err(ConfigError::Value { .. })));
    }

    #[test]
    fn test_args_override() {
        let mut config = RuntimeConfig::default();
        config
            .apply_args(&args(&[
                "--config",
                "ignored.toml",
                "--algorithm",
                "alias-free",
                "--window",
                "640x360",
                "--toggle-every",
                "4",
                "--resolution-step",
                "-1",
                "--dump",
            ]))
            .unwrap();
        assert_eq!(config.shadows.algorithm, ShadowAlgorithm::AliasFree);
        assert_eq!(config.window(), Extent2d::new(640, 360));
        assert_eq!(config.run.toggle_every, 4);
        assert_eq!(config.run.resolution_step, -1);
        assert!(config.output.dump_targets);
    }

    #[test]
    fn test_args_missing_value() {
        let mut config = RuntimeConfig::default();
        assert!(config.apply_args(&args(&["--frames"])).is_err());
        assert!(config.apply_args(&args(&["--window", "640"])).is_err());
    }

    #[test]
    fn test_flag_value() {
        let list = args(&["--frames", "3", "--config", "a.toml"]);
        assert_eq!(flag_value(&list, "--config"), Some("a.toml".to_string()));
        assert_eq!(flag_value(&list, "--output"), None);
    }
}
