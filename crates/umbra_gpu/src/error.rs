//! GPU backend errors

use thiserror::Error;

/// Device setup and shader loading errors
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable adapter found")]
    NoAdapter,

    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("failed to read shader {path}: {source}")]
    ShaderIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GpuError>;
