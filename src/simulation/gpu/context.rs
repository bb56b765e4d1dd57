//! wgpu device acquisition

use log::info;

use crate::error::{SimError, SimResult};

/// Storage buffers the mass kernel binds at once.
pub const REQUIRED_STORAGE_BUFFERS: u32 = 8;

/// A headless wgpu device and its queue.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_name: String,
}

impl GpuContext {
    /// Blocking wrapper around [`GpuContext::request`].
    pub fn new() -> SimResult<Self> {
        pollster::block_on(Self::request())
    }

    /// Pick a high-performance adapter and open a compute-capable device.
    pub async fn request() -> SimResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SimError::DeviceUnavailable(format!("no GPU adapter: {e}")))?;

        let adapter_limits = adapter.limits();
        if adapter_limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(SimError::DeviceUnavailable(format!(
                "adapter supports {} storage buffers per stage, {REQUIRED_STORAGE_BUFFERS} needed",
                adapter_limits.max_storage_buffers_per_shader_stage
            )));
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("flexsim compute device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits {
                    max_storage_buffers_per_shader_stage: REQUIRED_STORAGE_BUFFERS,
                    max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                    max_buffer_size: adapter_limits.max_buffer_size,
                    ..wgpu::Limits::downlevel_defaults()
                },
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| SimError::DeviceUnavailable(format!("device request failed: {e}")))?;

        let info = adapter.get_info();
        info!("GPU device: {} ({:?})", info.name, info.backend);
        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
        })
    }

    /// Block until all submitted work has finished.
    pub fn wait(&self) -> SimResult<()> {
        self.device
            .poll(wgpu::MaintainBase::Wait)
            .map(|_| ())
            .map_err(|e| SimError::Device(format!("device poll failed: {e}")))
    }
}
