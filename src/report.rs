//! Body state report
//!
//! A [`BodyReport`] condenses the host mirror into what a controller of the
//! body needs each cycle: joint angles and speeds, plus the pose and motion of
//! the base. The base is the first local coordinate frame of the body; bodies
//! without frames report no orientation or angular velocity.

use cgmath::{InnerSpace, Matrix3, Zero};

use crate::math::{pack, Packed3, Vec3, ZERO3};
use crate::state::BodyState;

#[derive(Debug, Clone, PartialEq)]
pub struct BodyReport {
    /// Simulated time of the mirror the report was taken from.
    pub time: f64,
    /// Joint angles in rad, measured from the local frames when the body has
    /// them, accumulated otherwise.
    pub joint_pos: Vec<f64>,
    /// Joint speeds in rad/s.
    pub joint_vel: Vec<f64>,
    /// Base rotation, columns are the base x, y and z axes in world space.
    pub orientation: Option<Matrix3<f64>>,
    /// Base angular velocity in rad/s, world space.
    pub ang_vel: Option<Packed3>,
    /// Center of mass; zero for a massless body, like the two below.
    pub com_pos: Packed3,
    pub com_vel: Packed3,
    pub com_acc: Packed3,
}

impl BodyReport {
    /// Build a report from `state` with the given joint speeds.
    pub fn capture(state: &BodyState, joint_vel: Vec<f64>) -> Self {
        let masses = &state.masses;
        let joints = &state.joints;
        let base = joints.frames.first().copied();
        let or_zero = |v: Option<Vec3>| v.map(pack).unwrap_or(ZERO3);
        Self {
            time: state.time,
            joint_pos: joints
                .measured_angles(masses)
                .unwrap_or_else(|| joints.angles().to_vec()),
            joint_vel,
            orientation: base.and_then(|frame| base_orientation(state, frame)),
            ang_vel: base.map(|frame| pack(base_angular_velocity(state, frame))),
            com_pos: or_zero(masses.center_of_mass()),
            com_vel: or_zero(masses.center_of_mass_velocity()),
            com_acc: or_zero(masses.center_of_mass_acceleration()),
        }
    }

    /// World-space up axis of the base, `None` without frames.
    pub fn base_up(&self) -> Option<Packed3> {
        self.orientation.map(|m| pack(m.z))
    }
}

/// Orthonormal frame from the frame's x axis and the xy plane. `None` when
/// the frame points are degenerate.
fn base_orientation(state: &BodyState, [origin, x, y, _]: [u32; 4]) -> Option<Matrix3<f64>> {
    let masses = &state.masses;
    let o = masses.position(origin as usize);
    let x_axis = masses.position(x as usize) - o;
    let y_axis = masses.position(y as usize) - o;
    let z_axis = x_axis.cross(y_axis);
    if x_axis.magnitude2() == 0.0 || z_axis.magnitude2() == 0.0 {
        return None;
    }
    let (x_axis, z_axis) = (x_axis.normalize(), z_axis.normalize());
    Some(Matrix3::from_cols(x_axis, z_axis.cross(x_axis), z_axis))
}

/// Angular velocity of the frame treated as rigid: for unit axes `e` moving
/// as `ė = ω × e`, the sum of `e × ė` over three orthogonal axes is `2ω`.
fn base_angular_velocity(state: &BodyState, frame: [u32; 4]) -> Vec3 {
    let masses = &state.masses;
    let origin = frame[0] as usize;
    let (o, v_o) = (masses.position(origin), masses.velocity(origin));
    let sum = frame[1..].iter().fold(Vec3::zero(), |acc, &point| {
        let r = masses.position(point as usize) - o;
        let len = r.magnitude();
        if len == 0.0 {
            return acc;
        }
        let dv = masses.velocity(point as usize) - v_o;
        acc + (r / len).cross(dv / len)
    });
    sum * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BodyShape, HostAllocator, JointShape};
    use cgmath::SquareMatrix;

    /// Unit frame at the origin spinning at 2 rad/s about z while drifting
    /// along x.
    fn spinning_frame() -> BodyState {
        let shape = BodyShape::new(4, 0).with_joints(JointShape {
            anchors: 0,
            points: 0,
            frames: 1,
        });
        let mut state = BodyState::zeroed(shape, &HostAllocator).unwrap();
        state.masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        state.masses.set(1, 1.0, [1.0, 0.0, 0.0]);
        state.masses.set(2, 1.0, [0.0, 1.0, 0.0]);
        state.masses.set(3, 1.0, [0.0, 0.0, 1.0]);
        state.masses.vel = vec![
            [1.0, 0.0, 0.0],
            [1.0, 2.0, 0.0],
            [-1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
        ];
        state.masses.acc = vec![[0.0, 0.0, -9.81]; 4];
        state.joints.frames[0] = [0, 1, 2, 3];
        state.time = 0.25;
        state
    }

    #[test]
    fn test_base_motion() {
        let report = BodyReport::capture(&spinning_frame(), Vec::new());
        assert_eq!(report.time, 0.25);
        assert_eq!(report.orientation, Some(Matrix3::identity()));
        assert_eq!(report.base_up(), Some([0.0, 0.0, 1.0]));
        let w = report.ang_vel.unwrap();
        assert!((w[0]).abs() < 1e-12 && (w[1]).abs() < 1e-12);
        assert!((w[2] - 2.0).abs() < 1e-12);
        assert_eq!(report.com_pos, [0.25, 0.25, 0.25]);
        assert_eq!(report.com_vel, [0.5, 0.5, 0.0]);
        assert!((report.com_acc[2] + 9.81).abs() < 1e-12);
        assert!(report.joint_pos.is_empty());
    }

    #[test]
    fn test_tilted_base() {
        let mut state = spinning_frame();
        // pitched a quarter turn: x axis up, z axis along -x
        state.masses.pos[1] = [0.0, 0.0, 1.0];
        state.masses.pos[3] = [-1.0, 0.0, 0.0];
        let up = BodyReport::capture(&state, Vec::new()).base_up().unwrap();
        assert!((up[0] + 1.0).abs() < 1e-12);
        assert!(up[2].abs() < 1e-12);
    }

    #[test]
    fn test_no_frames_no_base() {
        let mut state = BodyState::zeroed(BodyShape::new(1, 0), &HostAllocator).unwrap();
        state.masses.set(0, 2.0, [1.0, 2.0, 3.0]);
        let report = BodyReport::capture(&state, Vec::new());
        assert_eq!(report.orientation, None);
        assert_eq!(report.ang_vel, None);
        assert_eq!(report.com_pos, [1.0, 2.0, 3.0]);
    }
}
