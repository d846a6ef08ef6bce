//! Shader sources
//!
//! Every pass shader is compiled together with `common.wgsl`, which holds the
//! frame uniform block and the helpers both algorithms share. Sources are
//! built in, and can be overridden from a directory so edits are picked up
//! by a recompile.

use std::path::{Path, PathBuf};

use umbra_render::PassId;

use crate::error::{GpuError, Result};

pub const COMMON: &str = include_str!("../shaders/common.wgsl");
pub const CLEAR_HEADS: &str = include_str!("../shaders/clear_heads.wgsl");

/// Built-in source of the shader that runs `pass`
pub fn builtin(pass: PassId) -> &'static str {
    match pass {
        PassId::DepthTextureGeneration => include_str!("../shaders/depth_map.wgsl"),
        PassId::ShadowTest => include_str!("../shaders/shadow_test.wgsl"),
        PassId::ShadowTestAliasFree => include_str!("../shaders/shadow_test_af.wgsl"),
        PassId::RenderScene => include_str!("../shaders/composite.wgsl"),
        PassId::VisibilityMapGeneration => include_str!("../shaders/visibility.wgsl"),
        PassId::ListBufferGeneration => include_str!("../shaders/list_build.wgsl"),
    }
}

/// File name of the shader that runs `pass`
pub fn file_name(pass: PassId) -> &'static str {
    match pass {
        PassId::DepthTextureGeneration => "depth_map.wgsl",
        PassId::ShadowTest => "shadow_test.wgsl",
        PassId::ShadowTestAliasFree => "shadow_test_af.wgsl",
        PassId::RenderScene => "composite.wgsl",
        PassId::VisibilityMapGeneration => "visibility.wgsl",
        PassId::ListBufferGeneration => "list_build.wgsl",
    }
}

/// Complete WGSL for each pass
#[derive(Debug, Clone)]
pub struct ShaderSources {
    common: String,
    passes: Vec<String>,
    clear_heads: String,
    dir: Option<PathBuf>,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ShaderSources {
    pub fn builtin() -> Self {
        Self {
            common: COMMON.to_string(),
            passes: PassId::ALL.iter().map(|p| builtin(*p).to_string()).collect(),
            clear_heads: CLEAR_HEADS.to_string(),
            dir: None,
        }
    }

    /// Built-ins overridden by any matching file found in `dir`
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut sources = Self::builtin();
        sources.dir = Some(dir.into());
        sources.reload()?;
        Ok(sources)
    }

    /// Re-read the override directory, if any
    pub fn reload(&mut self) -> Result<usize> {
        let Some(dir) = self.dir.clone() else {
            return Ok(0);
        };
        let mut loaded = 0;
        if let Some(s) = read_if_present(&dir, "common.wgsl")? {
            self.common = s;
            loaded += 1;
        }
        if let Some(s) = read_if_present(&dir, "clear_heads.wgsl")? {
            self.clear_heads = s;
            loaded += 1;
        }
        for pass in PassId::ALL {
            if let Some(s) = read_if_present(&dir, file_name(pass))? {
                self.passes[pass.index()] = s;
                loaded += 1;
            }
        }
        log::debug!("Loaded {} shader overrides from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Source for `pass`, with the shared declarations prepended
    pub fn pass(&self, pass: PassId) -> String {
        format!("{}\n{}", self.common, self.passes[pass.index()])
    }

    pub fn clear_heads(&self) -> String {
        format!("{}\n{}", self.common, self.clear_heads)
    }

    /// Replace the source of one pass
    pub fn set_pass(&mut self, pass: PassId, source: impl Into<String>) {
        self.passes[pass.index()] = source.into();
    }
}

fn read_if_present(dir: &Path, name: &str) -> Result<Option<String>> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|source| GpuError::ShaderIo {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_source_includes_common() {
        let sources = ShaderSources::builtin();
        let src = sources.pass(PassId::ListBufferGeneration);
        assert!(src.contains("struct Frame"));
        assert!(src.contains("atomicExchange"));
    }

    #[test]
    fn test_missing_dir_keeps_builtins() {
        let sources = ShaderSources::from_dir("/nonexistent/umbra/shaders").unwrap();
        assert_eq!(sources.pass(PassId::RenderScene), ShaderSources::builtin().pass(PassId::RenderScene));
    }

    #[test]
    fn test_set_pass() {
        let mut sources = ShaderSources::builtin();
        sources.set_pass(PassId::ShadowTest, "broken");
        assert!(sources.pass(PassId::ShadowTest).ends_with("broken"));
    }
}
