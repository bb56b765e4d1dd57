//! Simulation system
//!
//! [`Simulation`] is the controller callers talk to. It owns the host mirror
//! of the body and hands stepping off to a background worker, which in turn
//! owns a [`ComputeDevice`] (CPU or GPU) holding the device copy.

pub mod controller;
pub mod cpu;
pub mod gpu;
pub mod traits;
pub mod worker;

pub use controller::{Phase, Simulation};
pub use cpu::CpuDevice;
pub use gpu::GpuDevice;
pub use traits::ComputeDevice;

use log::{info, warn};

use crate::config::{Backend, SimConfig};
use crate::error::SimResult;
use crate::state::BodyShape;

/// Create the compute device selected by `config.backend`.
pub fn create_device(
    config: &SimConfig,
    shape: BodyShape,
) -> SimResult<Box<dyn ComputeDevice + Send>> {
    let device: Box<dyn ComputeDevice + Send> = match config.backend {
        Backend::Cpu => Box::new(CpuDevice::new(shape, config)?),
        Backend::Gpu => Box::new(GpuDevice::new(shape, config)?),
        Backend::Auto => match GpuDevice::new(shape, config) {
            Ok(gpu) => Box::new(gpu),
            Err(e) => {
                warn!("GPU unavailable ({e}), falling back to the CPU device");
                Box::new(CpuDevice::new(shape, config)?)
            }
        },
    };
    info!("Compute device: {}", device.name());
    Ok(device)
}
