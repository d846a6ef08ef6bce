//! Headless device setup

use crate::error::{GpuError, Result};

/// Adapter selection
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub power_preference: wgpu::PowerPreference,
    pub backends: wgpu::Backends,
    /// Accept a software adapter
    pub force_fallback_adapter: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            backends: wgpu::Backends::all(),
            force_fallback_adapter: false,
        }
    }
}

/// Device, queue and what the adapter granted
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Open a device without a surface
    ///
    /// Timestamp queries and conservative rasterization are requested only
    /// when the adapter offers them.
    pub fn headless(options: &ContextOptions) -> Result<Self> {
        pollster::block_on(Self::headless_async(options))
    }

    pub async fn headless_async(options: &ContextOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("Using adapter: {} ({:?})", info.name, info.backend);

        let optional = wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::CONSERVATIVE_RASTERIZATION;
        let features = adapter.features() & optional;
        if !features.contains(wgpu::Features::CONSERVATIVE_RASTERIZATION) {
            log::warn!("Conservative rasterization unavailable, alias-free shadows may miss thin occluders");
        }
        if !features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            log::warn!("Timestamp queries unavailable, pass timings disabled");
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("umbra_device"),
                    required_features: features,
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        Ok(Self {
            adapter,
            device,
            queue,
            info,
        })
    }

    #[inline]
    pub fn features(&self) -> wgpu::Features {
        self.device.features()
    }

    #[inline]
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    pub fn supports_timestamps(&self) -> bool {
        self.features().contains(wgpu::Features::TIMESTAMP_QUERY)
    }

    pub fn supports_conservative(&self) -> bool {
        self.features().contains(wgpu::Features::CONSERVATIVE_RASTERIZATION)
    }
}
