// src/lib.rs
//! flexsim
//!
//! A parallel mass/spring/joint physics engine. Bodies are point masses
//! connected by damped springs and actuated by rotational joints; they react
//! to global plane and sphere constraints with penalty contact and friction.
//!
//! The caller drives a [`Simulation`](simulation::Simulation) controller,
//! which keeps a host mirror of the body and steps a device copy in the
//! background on a data-parallel CPU device or a wgpu compute device.

pub mod body;
pub mod config;
pub mod constraint;
pub mod engine;
pub mod error;
pub mod math;
pub mod performance;
pub mod prelude;
pub mod report;
pub mod simulation;
pub mod snapshot;
pub mod state;

pub use error::{SimError, SimResult};
pub use simulation::Simulation;
