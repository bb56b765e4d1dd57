//! Simulation state containers
//!
//! Masses, springs and joints are stored structure-of-arrays. Each simulation
//! holds two instances of [`BodyState`]: a host mirror owned by the controller
//! and a device copy owned by the compute device. They are only ever
//! synchronized through [`BodyState::copy_from`].

pub mod joint;
pub mod mass;
pub mod memory;
pub mod spring;

pub use joint::{JointAnchors, JointPoints, JointShape, Joints, Side};
pub use mass::Masses;
pub use memory::{Allocator, DeviceAllocator, HostAllocator, MemorySpace, Stream};
pub use spring::Springs;

use crate::error::{SimError, SimResult};

/// Entity counts of a body. Fixed for the lifetime of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodyShape {
    pub masses: usize,
    pub springs: usize,
    pub joints: JointShape,
}

impl BodyShape {
    pub fn new(masses: usize, springs: usize) -> Self {
        Self {
            masses,
            springs,
            joints: JointShape::NONE,
        }
    }

    pub fn with_joints(mut self, joints: JointShape) -> Self {
        self.joints = joints;
        self
    }
}

/// One complete copy of the simulated body plus its clock.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyState {
    pub masses: Masses,
    pub springs: Springs,
    pub joints: Joints,
    /// Simulated time `T` in seconds.
    pub time: f64,
}

impl BodyState {
    /// Allocate a zeroed state of the given shape.
    pub fn zeroed<A: Allocator>(shape: BodyShape, alloc: &A) -> SimResult<Self> {
        Ok(Self {
            masses: Masses::new(shape.masses, alloc)?,
            springs: Springs::new(shape.springs, alloc)?,
            joints: Joints::new(shape.joints, alloc)?,
            time: 0.0,
        })
    }

    pub fn shape(&self) -> BodyShape {
        BodyShape {
            masses: self.masses.len(),
            springs: self.springs.len(),
            joints: self.joints.shape(),
        }
    }

    pub fn space(&self) -> MemorySpace {
        self.masses.space()
    }

    /// Copy every container from `other` on `stream`. Returns once all field
    /// copies have landed.
    pub fn copy_from(&mut self, other: &BodyState, stream: &Stream) -> SimResult<()> {
        self.masses.copy_from(&other.masses, stream)?;
        self.springs.copy_from(&other.springs, stream)?;
        self.joints.copy_from(&other.joints, stream)?;
        self.time = other.time;
        Ok(())
    }

    /// Reject topologies the step passes cannot run on.
    pub fn validate(&self) -> SimResult<()> {
        let num = self.masses.len();
        if let Some(i) = (0..num).find(|&i| !self.masses.fixed[i] && !(self.masses.m[i] > 0.0)) {
            return Err(SimError::InvalidTopology(format!(
                "free mass {i} has non-positive mass {}",
                self.masses.m[i]
            )));
        }
        self.springs.validate(num)?;
        self.joints.validate(num)
    }

    /// Kinetic plus spring potential energy.
    pub fn mechanical_energy(&self) -> f64 {
        self.masses.kinetic_energy() + self.springs.potential_energy(&self.masses)
    }
}
