//! Error types for the simulation engine.

/// Errors reported by containers, devices and the simulation controller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum SimError {
    /// Reserving storage for a container field failed.
    #[error("failed to allocate {len} elements for `{field}`")]
    Allocation {
        /// Name of the field being allocated.
        field: &'static str,
        /// Requested element count.
        len: usize,
    },

    /// Source and destination of a copy have different shapes.
    #[error("{container} shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Container being copied.
        container: &'static str,
        /// Element count of the destination.
        expected: usize,
        /// Element count of the source.
        found: usize,
    },

    /// Spring/joint/frame indices or mass parameters are inconsistent.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Configuration rejected by [`SimConfig::validate`](crate::config::SimConfig::validate).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Host-side state cannot be touched while the device is stepping.
    #[error("simulation is running; pause it before mutating host state")]
    Running,

    /// The operation needs a started simulation.
    #[error("simulation has not been started")]
    NotStarted,

    /// The simulation has been ended and its device released.
    #[error("simulation has ended")]
    Ended,

    /// The requested compute device could not be created.
    #[error("compute device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A device operation (dispatch, copy, readback) failed.
    #[error("device operation failed: {0}")]
    Device(String),

    /// The background loop stopped after a device failure.
    #[error("simulation stopped after a device fault: {0}")]
    DeviceFault(String),

    /// The background loop is gone.
    #[error("background worker disconnected")]
    WorkerDisconnected,
}

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;
