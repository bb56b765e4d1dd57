//! Mass pass: force totals, contact reactions and time integration

use rayon::prelude::*;

use super::spring::SpringIncidence;
use super::StepParams;
use crate::constraint::{ConstraintTable, ContactProbe};
use crate::math::{pack, vec3, Packed3, Vec3, ZERO3};
use crate::state::Masses;

/// Time-stepping scheme of the mass pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrator {
    /// `v += a·dt; x += v·dt`
    #[default]
    SemiImplicitEuler,
    /// Velocity Verlet using the acceleration stored by the previous step.
    VelocityVerlet,
}

impl Integrator {
    /// Shader-side discriminant.
    pub fn code(self) -> u32 {
        match self {
            Integrator::SemiImplicitEuler => 0,
            Integrator::VelocityVerlet => 1,
        }
    }

    /// Advance one mass. `prev_acc` is the acceleration from the last step.
    #[inline]
    pub fn advance(self, pos: Vec3, vel: Vec3, prev_acc: Vec3, acc: Vec3, dt: f64) -> (Vec3, Vec3) {
        match self {
            Integrator::SemiImplicitEuler => {
                let vel = vel + acc * dt;
                (pos + vel * dt, vel)
            }
            Integrator::VelocityVerlet => {
                let vel = vel + (prev_acc + acc) * (0.5 * dt);
                (pos + vel * dt + acc * (0.5 * dt * dt), vel)
            }
        }
    }
}

/// Sum forces on every mass, apply contact reactions, integrate free masses
/// and clear the force accumulators.
pub fn mass_pass(
    masses: &mut Masses,
    incidence: &SpringIncidence,
    spring_force: &[Packed3],
    table: &ConstraintTable,
    params: &StepParams,
) {
    let Masses {
        m,
        pos,
        vel,
        acc,
        force,
        force_extern,
        fixed,
        constrain,
        ..
    } = masses;
    let (m, force_extern, fixed, constrain) = (&*m, &*force_extern, &*fixed, &*constrain);
    let gravity = vec3(params.global_acc);
    let contacts = !table.is_empty();

    pos.par_iter_mut()
        .zip(vel.par_iter_mut())
        .zip(acc.par_iter_mut())
        .zip(force.par_iter_mut())
        .enumerate()
        .for_each(|(i, (((x, v), a), f))| {
            let mass = m[i];
            let mut total =
                vec3(*f) + incidence.gather(i, spring_force) + gravity * mass + vec3(force_extern[i]);
            if contacts && constrain[i] {
                let probe = ContactProbe {
                    pos: vec3(*x),
                    vel: vec3(*v),
                    force: total,
                    m: mass,
                };
                total += table.reaction(&probe, &params.contact);
            }
            *f = ZERO3;
            if fixed[i] {
                return;
            }
            let accel = total / mass;
            let (new_pos, new_vel) =
                params
                    .integrator
                    .advance(vec3(*x), vec3(*v), vec3(*a), accel, params.dt());
            *x = pack(new_pos);
            *v = pack(new_vel);
            *a = pack(accel);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ContactParams;
    use crate::state::{HostAllocator, Springs};
    use cgmath::InnerSpace;

    fn params(dt: f64, integrator: Integrator) -> StepParams {
        StepParams {
            global_acc: [0.0, 0.0, -10.0],
            integrator,
            contact: ContactParams {
                stiffness: 1e4,
                epsilon: 1e-6,
                dt,
            },
        }
    }

    #[test]
    fn test_semi_implicit_euler() {
        let (x, v) = Integrator::SemiImplicitEuler.advance(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
            0.5,
        );
        assert_eq!(v, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(x, Vec3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn test_velocity_verlet_from_rest() {
        let g = Vec3::new(0.0, 0.0, -10.0);
        let zero = Vec3::new(0.0, 0.0, 0.0);
        let (x, v) = Integrator::VelocityVerlet.advance(zero, zero, zero, g, 0.1);
        assert!((v.z + 0.5).abs() < 1e-12);
        assert!((x.z + 0.1).abs() < 1e-12);

        // steady state: the velocity kick uses both accelerations
        let (x, v) = Integrator::VelocityVerlet.advance(x, v, g, g, 0.1);
        assert!((v.z + 1.5).abs() < 1e-12);
        assert!((x.z + 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_mass_is_untouched() {
        let mut masses = Masses::new(2, &HostAllocator).unwrap();
        masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        masses.set(1, 1.0, [0.0, 0.0, 3.0]);
        masses.fixed[0] = true;
        masses.force_extern[0] = [5.0, 5.0, 5.0];
        let springs = Springs::new(0, &HostAllocator).unwrap();
        let incidence = SpringIncidence::build(&springs, 2);

        let table = ConstraintTable::default();
        mass_pass(&mut masses, &incidence, &[], &table, &params(0.01, Integrator::SemiImplicitEuler));
        assert_eq!(masses.pos[0], [0.0, 0.0, 0.0]);
        assert_eq!(masses.vel[0], [0.0, 0.0, 0.0]);
        assert_eq!(masses.force[0], ZERO3);
        assert!(masses.vel[1][2] < 0.0);
    }

    #[test]
    fn test_unflagged_mass_ignores_constraints() {
        let mut masses = Masses::new(2, &HostAllocator).unwrap();
        masses.set(0, 1.0, [0.0, 0.0, -0.1]);
        masses.set(1, 1.0, [1.0, 0.0, -0.1]);
        masses.constrain[1] = true;
        let springs = Springs::new(0, &HostAllocator).unwrap();
        let incidence = SpringIncidence::build(&springs, 2);
        let mut set = crate::constraint::ConstraintSet::new();
        set.create_plane([0.0, 0.0, 1.0], 0.0, 0.0, 0.0).unwrap();
        let table = set.projection();

        mass_pass(&mut masses, &incidence, &[], &table, &params(0.001, Integrator::SemiImplicitEuler));
        assert!(masses.vel[0][2] < 0.0);
        assert!(masses.vel[1][2] > 0.0);
        assert!(vec3(masses.acc[1]).magnitude() > 100.0);
    }
}
