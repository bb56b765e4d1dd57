//! # flexsim Prelude
//!
//! Commonly used types in one import:
//!
//! ```rust
//! use flexsim::prelude::*;
//!
//! let config = SimConfig::default().with_backend(Backend::Cpu);
//! assert!(config.validate().is_ok());
//! ```

pub use crate::body::{BodyDescription, BodyParams, JointDescription};
pub use crate::config::{Backend, SimConfig};
pub use crate::constraint::{Ball, Constraint, ConstraintSet, ContactPlane};
pub use crate::engine::Integrator;
pub use crate::error::{SimError, SimResult};
pub use crate::math::{IndexPair, Packed3, Vec3};
pub use crate::performance::ThroughputMetrics;
pub use crate::report::BodyReport;
pub use crate::simulation::{ComputeDevice, Phase, Simulation};
pub use crate::snapshot::RenderSnapshot;
pub use crate::state::{BodyShape, BodyState, JointShape, Side};
