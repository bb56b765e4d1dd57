//! Spring pass
//!
//! Every spring computes its axial force independently. Instead of scattering
//! into both endpoints with atomics, each mass later gathers the forces of its
//! incident springs through a [`SpringIncidence`] index, which keeps the sum
//! order fixed and the result deterministic.

use cgmath::InnerSpace;
use rayon::prelude::*;

use crate::math::{pack, vec3, Packed3, Vec3, ZERO3};
use crate::state::{Masses, Springs};

/// Hooke plus axial damping. Returns the force on the right endpoint; the
/// left endpoint receives its negation.
#[inline]
pub fn spring_force(
    left_pos: Vec3,
    right_pos: Vec3,
    left_vel: Vec3,
    right_vel: Vec3,
    k: f64,
    rest: f64,
    damping: f64,
) -> Vec3 {
    let delta = right_pos - left_pos;
    let len = delta.magnitude();
    if len <= f64::EPSILON {
        return Vec3::new(0.0, 0.0, 0.0);
    }
    let axis = delta / len;
    let closing = (right_vel - left_vel).dot(axis);
    -axis * (k * (len - rest) + damping * closing)
}

/// Compressed mass → spring incidence lists.
///
/// `entries[offsets[i]..offsets[i + 1]]` are the springs touching mass `i`,
/// encoded as `spring << 1 | side` where side 1 means the mass is the right
/// endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpringIncidence {
    pub offsets: Vec<u32>,
    pub entries: Vec<u32>,
}

impl SpringIncidence {
    /// Build the index. Spring endpoints must already be validated.
    pub fn build(springs: &Springs, num_masses: usize) -> Self {
        let mut counts = vec![0u32; num_masses + 1];
        for pair in &springs.ends {
            counts[pair.left as usize + 1] += 1;
            counts[pair.right as usize + 1] += 1;
        }
        for i in 0..num_masses {
            counts[i + 1] += counts[i];
        }
        let offsets = counts;
        let mut cursor = offsets.clone();
        let mut entries = vec![0u32; springs.len() * 2];
        for (s, pair) in springs.ends.iter().enumerate() {
            let s = s as u32;
            let (l, r) = pair.get();
            entries[cursor[l] as usize] = s << 1;
            cursor[l] += 1;
            entries[cursor[r] as usize] = s << 1 | 1;
            cursor[r] += 1;
        }
        Self { offsets, entries }
    }

    pub fn num_masses(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Net spring force on mass `i`.
    #[inline]
    pub fn gather(&self, i: usize, spring_force: &[Packed3]) -> Vec3 {
        let (start, end) = (self.offsets[i] as usize, self.offsets[i + 1] as usize);
        self.entries[start..end]
            .iter()
            .fold(Vec3::new(0.0, 0.0, 0.0), |acc, &entry| {
                let f = vec3(spring_force[(entry >> 1) as usize]);
                if entry & 1 == 1 {
                    acc + f
                } else {
                    acc - f
                }
            })
    }
}

/// Compute every spring's right-endpoint force into `out`.
pub fn spring_pass(springs: &Springs, masses: &Masses, out: &mut [Packed3]) {
    out.par_iter_mut().enumerate().for_each(|(s, f)| {
        let (l, r) = springs.ends[s].get();
        *f = if springs.k[s] == 0.0 && springs.damping[s] == 0.0 {
            ZERO3
        } else {
            pack(spring_force(
                masses.position(l),
                masses.position(r),
                masses.velocity(l),
                masses.velocity(r),
                springs.k[s],
                springs.rest[s],
                springs.damping[s],
            ))
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HostAllocator;

    #[test]
    fn test_force_at_rest_is_zero() {
        let f = spring_force(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            100.0,
            1.0,
            0.0,
        );
        assert_eq!(f, Vec3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_stretched_spring_pulls_in() {
        let f = spring_force(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            100.0,
            1.0,
            0.0,
        );
        assert!((f - Vec3::new(-100.0, 0.0, 0.0)).magnitude() < 1e-12);
    }

    #[test]
    fn test_damping_resists_separation() {
        let f = spring_force(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(3.0, 1.0, 0.0),
            0.0,
            1.0,
            2.0,
        );
        assert!((f - Vec3::new(-6.0, 0.0, 0.0)).magnitude() < 1e-12);
    }

    #[test]
    fn test_incidence_gathers_with_sign() {
        let mut masses = Masses::new(3, &HostAllocator).unwrap();
        masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        masses.set(1, 1.0, [2.0, 0.0, 0.0]);
        masses.set(2, 1.0, [2.0, 2.0, 0.0]);
        let mut springs = Springs::new(2, &HostAllocator).unwrap();
        springs.set(0, [0, 1], 10.0, 1.0, 0.0);
        springs.set(1, [1, 2], 10.0, 1.0, 0.0);

        let incidence = SpringIncidence::build(&springs, 3);
        assert_eq!(incidence.offsets, vec![0, 1, 3, 4]);

        let mut forces = vec![ZERO3; 2];
        spring_pass(&springs, &masses, &mut forces);
        let net: Vec<Vec3> = (0..3).map(|i| incidence.gather(i, &forces)).collect();
        assert!((net[0] - Vec3::new(10.0, 0.0, 0.0)).magnitude() < 1e-12);
        assert!((net[1] - Vec3::new(-10.0, 10.0, 0.0)).magnitude() < 1e-12);
        assert!((net[2] - Vec3::new(0.0, -10.0, 0.0)).magnitude() < 1e-12);
        let total = net.iter().fold(Vec3::new(0.0, 0.0, 0.0), |a, b| a + b);
        assert!(total.magnitude() < 1e-12);
    }
}
