//! Point-mass storage
//!
//! Structure-of-arrays container: every per-mass quantity lives in its own
//! buffer so the mass pass walks each field contiguously.

use cgmath::InnerSpace;

use super::memory::{check_shape, copy_field, Allocator, MemorySpace, Stream};
use crate::error::SimResult;
use crate::math::{vec3, Packed3, Vec3};

/// All point masses of a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Masses {
    space: MemorySpace,
    /// Mass in kg.
    pub m: Vec<f64>,
    pub pos: Vec<Packed3>,
    pub vel: Vec<Packed3>,
    pub acc: Vec<Packed3>,
    /// Accumulated internal (spring + contact) force of the current step.
    pub force: Vec<Packed3>,
    /// Force applied by the caller, kept across steps.
    pub force_extern: Vec<Packed3>,
    /// Display color, RGB in [0, 1].
    pub color: Vec<Packed3>,
    /// Fixed masses are never moved by the integrator.
    pub fixed: Vec<bool>,
    /// Only flagged masses react to global constraints.
    pub constrain: Vec<bool>,
}

impl Masses {
    /// Allocate `num` zeroed masses in the allocator's memory space.
    pub fn new<A: Allocator>(num: usize, alloc: &A) -> SimResult<Self> {
        Ok(Self {
            space: alloc.space(),
            m: alloc.zeroed("mass.m", num)?,
            pos: alloc.zeroed("mass.pos", num)?,
            vel: alloc.zeroed("mass.vel", num)?,
            acc: alloc.zeroed("mass.acc", num)?,
            force: alloc.zeroed("mass.force", num)?,
            force_extern: alloc.zeroed("mass.force_extern", num)?,
            color: alloc.zeroed("mass.color", num)?,
            fixed: alloc.zeroed("mass.fixed", num)?,
            constrain: alloc.zeroed("mass.constrain", num)?,
        })
    }

    pub fn space(&self) -> MemorySpace {
        self.space
    }

    pub fn len(&self) -> usize {
        self.m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    /// Copy every field from `other`, each field as its own task on `stream`.
    pub fn copy_from(&mut self, other: &Masses, stream: &Stream) -> SimResult<()> {
        check_shape("masses", self.len(), other.len())?;
        let Masses {
            m,
            pos,
            vel,
            acc,
            force,
            force_extern,
            color,
            fixed,
            constrain,
            ..
        } = self;
        stream.scope(move |s| {
            copy_field(s, m, &other.m);
            copy_field(s, pos, &other.pos);
            copy_field(s, vel, &other.vel);
            copy_field(s, acc, &other.acc);
            copy_field(s, force, &other.force);
            copy_field(s, force_extern, &other.force_extern);
            copy_field(s, color, &other.color);
            copy_field(s, fixed, &other.fixed);
            copy_field(s, constrain, &other.constrain);
        });
        Ok(())
    }

    pub fn position(&self, i: usize) -> Vec3 {
        vec3(self.pos[i])
    }

    pub fn velocity(&self, i: usize) -> Vec3 {
        vec3(self.vel[i])
    }

    /// Set up mass `i` in one call; velocity and forces are left untouched.
    pub fn set(&mut self, i: usize, m: f64, pos: Packed3) {
        self.m[i] = m;
        self.pos[i] = pos;
    }

    /// Total kinetic energy of the free masses.
    pub fn kinetic_energy(&self) -> f64 {
        (0..self.len())
            .filter(|&i| !self.fixed[i])
            .map(|i| 0.5 * self.m[i] * self.velocity(i).magnitude2())
            .sum()
    }

    /// Mass-weighted centroid of all masses, `None` when total mass is zero.
    pub fn center_of_mass(&self) -> Option<Vec3> {
        self.mass_weighted(&self.pos)
    }

    /// Velocity of the center of mass.
    pub fn center_of_mass_velocity(&self) -> Option<Vec3> {
        self.mass_weighted(&self.vel)
    }

    /// Acceleration of the center of mass as of the last step.
    pub fn center_of_mass_acceleration(&self) -> Option<Vec3> {
        self.mass_weighted(&self.acc)
    }

    fn mass_weighted(&self, field: &[Packed3]) -> Option<Vec3> {
        let total: f64 = self.m.iter().sum();
        if total <= 0.0 {
            return None;
        }
        let weighted = field
            .iter()
            .zip(&self.m)
            .fold(Vec3::new(0.0, 0.0, 0.0), |acc, (&p, &m)| acc + vec3(p) * m);
        Some(weighted / total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::memory::HostAllocator;

    #[test]
    fn test_new_is_zeroed() {
        let masses = Masses::new(4, &HostAllocator).unwrap();
        assert_eq!(masses.len(), 4);
        assert_eq!(masses.space(), MemorySpace::Host);
        assert!(masses.vel.iter().all(|v| *v == [0.0; 3]));
        assert!(masses.acc.iter().all(|a| *a == [0.0; 3]));
        assert!(masses.fixed.iter().all(|f| !f));
    }

    #[test]
    fn test_copy_from_is_bitwise() {
        let stream = Stream::new("copy", 2).unwrap();
        let mut src = Masses::new(3, &HostAllocator).unwrap();
        src.set(0, 1.0, [0.1, 0.2, 0.3]);
        src.set(2, 2.5, [-1.0, 1e-300, f64::MAX]);
        src.vel[1] = [3.0, -3.0, 0.5];
        src.fixed[2] = true;
        src.constrain[0] = true;

        let mut dst = Masses::new(3, &HostAllocator).unwrap();
        dst.copy_from(&src, &stream).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_copy_from_rejects_mismatch() {
        let stream = Stream::new("copy", 1).unwrap();
        let src = Masses::new(3, &HostAllocator).unwrap();
        let mut dst = Masses::new(2, &HostAllocator).unwrap();
        assert!(dst.copy_from(&src, &stream).is_err());
    }

    #[test]
    fn test_energy_and_centroid() {
        let mut masses = Masses::new(2, &HostAllocator).unwrap();
        masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        masses.set(1, 3.0, [4.0, 0.0, 0.0]);
        masses.vel[0] = [2.0, 0.0, 0.0];
        masses.vel[1] = [0.0, 1.0, 0.0];
        assert!((masses.kinetic_energy() - 3.5).abs() < 1e-12);
        masses.fixed[1] = true;
        assert!((masses.kinetic_energy() - 2.0).abs() < 1e-12);
        let com = masses.center_of_mass().unwrap();
        assert!((com.x - 3.0).abs() < 1e-12);
        let com_vel = masses.center_of_mass_velocity().unwrap();
        assert!((com_vel.x - 0.5).abs() < 1e-12);
        assert!((com_vel.y - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_massless_body_has_no_centroid() {
        let masses = Masses::new(2, &HostAllocator).unwrap();
        assert_eq!(masses.center_of_mass(), None);
        assert_eq!(masses.center_of_mass_acceleration(), None);
    }
}
