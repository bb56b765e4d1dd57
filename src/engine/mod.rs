//! Force and integration engine
//!
//! One simulation step is three data-parallel passes with a strict order:
//!
//! 1. [`spring::spring_pass`] computes the axial force of every spring.
//! 2. [`joint::anchor_pass`] and [`joint::point_pass`] rotate joint groups.
//! 3. [`integrate::mass_pass`] gathers forces per mass and integrates.
//!
//! Within a pass entities are independent. The passes run on whatever rayon
//! pool the caller installs them in.

pub mod integrate;
pub mod joint;
pub mod spring;

pub use integrate::{mass_pass, Integrator};
pub use joint::{anchor_pass, joint_increment, point_pass, target_increment};
pub use spring::{spring_force, spring_pass, SpringIncidence};

use crate::config::SimConfig;
use crate::constraint::{ConstraintTable, ContactParams};
use crate::math::{Packed3, ZERO3};
use crate::state::BodyState;

/// Scalars every pass of a step needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub global_acc: Packed3,
    pub integrator: Integrator,
    /// Contact scalars, including the step size.
    pub contact: ContactParams,
}

impl StepParams {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            global_acc: config.global_acc,
            integrator: config.integrator,
            contact: ContactParams {
                stiffness: config.contact_stiffness,
                epsilon: config.contact_epsilon,
                dt: config.dt,
            },
        }
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        self.contact.dt
    }
}

/// Simulated time as a whole number of steps past an origin.
///
/// Counting steps instead of summing `dt` keeps `T` free of accumulated
/// rounding, so one step from zero lands exactly on `dt`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clock {
    origin: f64,
    steps: u64,
    dt: f64,
}

impl Clock {
    pub fn new(origin: f64, dt: f64) -> Self {
        Self { origin, steps: 0, dt }
    }

    pub fn now(&self) -> f64 {
        self.origin + self.steps as f64 * self.dt
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Steps taken since the origin was last set.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn advance(&mut self, steps: u64) {
        self.steps += steps;
    }

    /// Restart counting from `origin`.
    pub fn reset(&mut self, origin: f64) {
        self.origin = origin;
        self.steps = 0;
    }

    /// Whole steps needed to reach `target`, at least one.
    pub fn steps_until(&self, target: f64) -> u64 {
        let remaining = (target - self.now()) / self.dt;
        if remaining.is_finite() && remaining > 1.0 {
            // tolerate rounding just above an integer step count
            (remaining - 1e-9).ceil() as u64
        } else {
            1
        }
    }
}

/// Per-device scratch reused by every step.
#[derive(Debug, Clone, Default)]
pub struct StepWorkspace {
    pub incidence: SpringIncidence,
    pub spring_force: Vec<Packed3>,
}

impl StepWorkspace {
    /// Size the scratch for `state`'s topology.
    pub fn for_state(state: &BodyState) -> Self {
        Self {
            incidence: SpringIncidence::build(&state.springs, state.masses.len()),
            spring_force: vec![ZERO3; state.springs.len()],
        }
    }
}

/// Advance `state` by one step. Does not touch `state.time`.
pub fn step(
    state: &mut BodyState,
    work: &mut StepWorkspace,
    table: &ConstraintTable,
    params: &StepParams,
) {
    spring_pass(&state.springs, &state.masses, &mut work.spring_force);
    if !state.joints.is_empty() {
        anchor_pass(&mut state.joints, &state.masses);
        point_pass(&state.joints, &mut state.masses);
    }
    mass_pass(
        &mut state.masses,
        &work.incidence,
        &work.spring_force,
        table,
        params,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BodyShape, HostAllocator};

    #[test]
    fn test_clock_is_exact_after_one_step() {
        let mut clock = Clock::new(0.0, 1e-4);
        clock.advance(1);
        assert_eq!(clock.now(), 1e-4);
        clock.reset(2.0);
        assert_eq!(clock.now(), 2.0);
        assert_eq!(clock.steps(), 0);
    }

    #[test]
    fn test_steps_until() {
        let clock = Clock::new(0.0, 0.1);
        assert_eq!(clock.steps_until(0.3), 3);
        assert_eq!(clock.steps_until(0.25), 3);
        assert_eq!(clock.steps_until(0.05), 1);
        assert_eq!(clock.steps_until(-1.0), 1);
    }

    #[test]
    fn test_two_masses_at_rest_stay_at_rest() {
        let mut state = BodyState::zeroed(BodyShape::new(2, 1), &HostAllocator).unwrap();
        state.masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        state.masses.set(1, 1.0, [1.0, 0.0, 0.0]);
        state.springs.set(0, [0, 1], 100.0, 1.0, 0.0);
        let params = StepParams::from_config(&SimConfig::default().with_dt(1e-4));
        let mut work = StepWorkspace::for_state(&state);

        step(&mut state, &mut work, &ConstraintTable::default(), &params);
        assert_eq!(state.masses.pos[0], [0.0, 0.0, 0.0]);
        assert_eq!(state.masses.pos[1], [1.0, 0.0, 0.0]);
        assert_eq!(state.masses.vel, vec![[0.0; 3]; 2]);
    }
}
