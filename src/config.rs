//! Simulation configuration
//!
//! [`SimConfig`] collects the scalar knobs of the engine. It has sensible
//! defaults and a fluent builder so callers only spell out what they change:
//!
//! ```
//! use flexsim::config::{Backend, SimConfig};
//!
//! let config = SimConfig::default()
//!     .with_dt(1e-4)
//!     .with_gravity([0.0, 0.0, -9.81])
//!     .with_queue_depth(32)
//!     .with_backend(Backend::Cpu);
//! assert!(config.validate().is_ok());
//! ```

use crate::engine::Integrator;
use crate::error::{SimError, SimResult};

/// Number of steps queued per batch unless configured otherwise.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Which compute device executes the step passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Data-parallel CPU device, double precision.
    #[default]
    Cpu,
    /// wgpu compute device. Everything on the device is single precision,
    /// force accumulation included, so it does not give the double precision
    /// accumulation of [`Backend::Cpu`]. Fails if no adapter is found.
    Gpu,
    /// GPU when available, CPU otherwise.
    Auto,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Fixed integration step in seconds.
    pub dt: f64,
    /// Acceleration applied to every free mass (e.g. gravity).
    pub global_acc: [f64; 3],
    /// Steps launched per batch between host-visible synchronization points.
    pub queue_depth: usize,
    /// Shrink the batch near a pending breakpoint so it is reached at step
    /// granularity. When false a breakpoint may overshoot by a whole batch.
    pub exact_breakpoints: bool,
    /// Batches between background refreshes of the host mirror while
    /// running. Zero disables periodic refresh.
    pub sync_interval: usize,
    /// Upper bound on commanded joint speed, rad/s.
    pub max_joint_speed: f64,
    /// Time-stepping scheme used by the mass pass.
    pub integrator: Integrator,
    /// Penalty stiffness of plane/ball contacts, N/m.
    pub contact_stiffness: f64,
    /// Tangential speed below which a contact counts as sticking.
    pub contact_epsilon: f64,
    /// Compute device selection.
    pub backend: Backend,
    /// Worker threads of the CPU device. Zero means one per logical CPU.
    pub threads: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt: 0.001,
            global_acc: [0.0, 0.0, 0.0],
            queue_depth: DEFAULT_QUEUE_DEPTH,
            exact_breakpoints: true,
            sync_interval: 8,
            max_joint_speed: std::f64::consts::TAU,
            integrator: Integrator::SemiImplicitEuler,
            contact_stiffness: 1.0e5,
            contact_epsilon: 1.0e-4,
            backend: Backend::Cpu,
            threads: 0,
        }
    }
}

impl SimConfig {
    /// Set the integration step
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Set the global acceleration
    pub fn with_gravity(mut self, acceleration: [f64; 3]) -> Self {
        self.global_acc = acceleration;
        self
    }

    /// Set the number of steps per batch
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Toggle step-exact breakpoint arrival
    pub fn with_exact_breakpoints(mut self, exact: bool) -> Self {
        self.exact_breakpoints = exact;
        self
    }

    /// Set how many batches pass between background host-mirror refreshes
    pub fn with_sync_interval(mut self, batches: usize) -> Self {
        self.sync_interval = batches;
        self
    }

    /// Set the joint speed clamp
    pub fn with_max_joint_speed(mut self, speed: f64) -> Self {
        self.max_joint_speed = speed;
        self
    }

    /// Select the integrator
    pub fn with_integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = integrator;
        self
    }

    /// Set contact penalty stiffness
    pub fn with_contact_stiffness(mut self, stiffness: f64) -> Self {
        self.contact_stiffness = stiffness;
        self
    }

    /// Select the compute device
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the CPU device thread count
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Thread count actually used by the CPU device.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }

    /// Check that every knob is usable.
    pub fn validate(&self) -> SimResult<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "dt must be positive and finite, got {}",
                self.dt
            )));
        }
        if self.queue_depth == 0 {
            return Err(SimError::InvalidConfig(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if self.global_acc.iter().any(|a| !a.is_finite()) {
            return Err(SimError::InvalidConfig(
                "global acceleration must be finite".to_string(),
            ));
        }
        if !(self.max_joint_speed.is_finite() && self.max_joint_speed >= 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "max_joint_speed must be non-negative, got {}",
                self.max_joint_speed
            )));
        }
        if !(self.contact_stiffness.is_finite() && self.contact_stiffness >= 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "contact_stiffness must be non-negative, got {}",
                self.contact_stiffness
            )));
        }
        Ok(())
    }
}
