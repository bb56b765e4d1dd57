//! Joint pass
//!
//! Joints move their masses kinematically: positions are set directly by a
//! rotation about the anchor axis and never go through force integration.

use rayon::prelude::*;

use crate::math::{normalize_or_zero, pack, rotate_about_axis, vec3, Packed3};
use crate::state::{Joints, Masses};

/// Per-step angle increment for a commanded joint speed, clamped to
/// `±max_speed`.
#[inline]
pub fn joint_increment(command: f64, max_speed: f64, dt: f64) -> f64 {
    if command.is_nan() {
        return 0.0;
    }
    command.clamp(-max_speed, max_speed) * dt
}

/// Per-step increment that drives a joint from `angle` to `target` within
/// `steps` steps, or as far as the speed limit allows.
#[inline]
pub fn target_increment(target: f64, angle: f64, steps: u64, max_speed: f64, dt: f64) -> f64 {
    let span = steps.max(1) as f64 * dt;
    joint_increment((target - angle) / span, max_speed, dt)
}

/// Refresh every anchor's axis direction and advance its angle.
pub fn anchor_pass(joints: &mut Joints, masses: &Masses) {
    let anchors = &mut joints.anchors;
    let ends = &anchors.ends;
    let theta = &anchors.theta;
    anchors
        .dir
        .par_iter_mut()
        .zip(anchors.angle.par_iter_mut())
        .enumerate()
        .for_each(|(j, (dir, angle))| {
            let (l, r) = ends[j].get();
            *dir = pack(normalize_or_zero(masses.position(r) - masses.position(l)));
            *angle += theta[j];
        });
}

/// Rotate every joint point about its anchor axis by the signed increment.
///
/// Joint points are distinct masses and never anchors, so new positions can be
/// computed in parallel from a consistent snapshot and written back.
pub fn point_pass(joints: &Joints, masses: &mut Masses) {
    let anchors = &joints.anchors;
    let points = &joints.points;
    let pos = &masses.pos;
    let moved: Vec<Packed3> = (0..points.mass.len())
        .into_par_iter()
        .map(|p| {
            let a = points.anchor[p] as usize;
            let mass = points.mass[p] as usize;
            let angle = f64::from(points.side[p]) * anchors.theta[a];
            let origin = vec3(pos[anchors.ends[a].left as usize]);
            pack(rotate_about_axis(vec3(pos[mass]), origin, vec3(anchors.dir[a]), angle))
        })
        .collect();
    for (p, new_pos) in moved.into_iter().enumerate() {
        masses.pos[points.mass[p] as usize] = new_pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{HostAllocator, JointShape, Side};
    use cgmath::InnerSpace;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_increment_is_clamped() {
        assert_eq!(joint_increment(1.0, 2.0, 0.5), 0.5);
        assert_eq!(joint_increment(10.0, 2.0, 0.5), 1.0);
        assert_eq!(joint_increment(-10.0, 2.0, 0.5), -1.0);
        assert_eq!(joint_increment(f64::NAN, 2.0, 0.5), 0.0);
    }

    #[test]
    fn test_target_increment() {
        // reachable within the batch: arrive exactly on the last step
        let theta = target_increment(0.3, 0.1, 4, 10.0, 0.01);
        assert!((theta * 4.0 - 0.2).abs() < 1e-12);
        // too far: move at the speed limit
        assert_eq!(target_increment(5.0, 0.0, 4, 2.0, 0.01), 0.02);
        assert_eq!(target_increment(-5.0, 0.0, 4, 2.0, 0.01), -0.02);
        assert_eq!(target_increment(1.0, 1.0, 4, 2.0, 0.01), 0.0);
    }

    #[test]
    fn test_points_rotate_in_opposite_directions() {
        let mut masses = Masses::new(4, &HostAllocator).unwrap();
        masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        masses.set(1, 1.0, [0.0, 0.0, 1.0]);
        masses.set(2, 1.0, [1.0, 0.0, 0.5]);
        masses.set(3, 1.0, [1.0, 0.0, 0.5]);

        let shape = JointShape {
            anchors: 1,
            points: 2,
            frames: 0,
        };
        let mut joints = Joints::new(shape, &HostAllocator).unwrap();
        joints.set_anchor(0, [0, 1], [0, 0]);
        joints.set_point(0, 2, 0, Side::Left);
        joints.set_point(1, 3, 0, Side::Right);
        joints.anchors.theta[0] = FRAC_PI_2;

        anchor_pass(&mut joints, &masses);
        point_pass(&joints, &mut masses);

        assert_eq!(joints.anchors.dir[0], [0.0, 0.0, 1.0]);
        assert!((joints.anchors.angle[0] - FRAC_PI_2).abs() < 1e-12);
        assert!((masses.position(2) - vec3([0.0, -1.0, 0.5])).magnitude() < 1e-12);
        assert!((masses.position(3) - vec3([0.0, 1.0, 0.5])).magnitude() < 1e-12);
        // anchors stay put
        assert_eq!(masses.pos[1], [0.0, 0.0, 1.0]);
    }
}
