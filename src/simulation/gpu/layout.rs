//! Host-side mirrors of the WGSL data layout
//!
//! The GPU works in single precision: vectors are padded to `vec4<f32>` and
//! scalars narrowed on upload, widened again on readback.

use bytemuck::{Pod, Zeroable};

use crate::constraint::ConstraintTable;
use crate::engine::StepParams;
use crate::math::Packed3;
use crate::state::BodyShape;

pub const WORKGROUP_SIZE: u32 = 64;

pub const FLAG_FIXED: u32 = 1;
pub const FLAG_CONSTRAIN: u32 = 2;

pub const CONSTRAINT_PLANE: u32 = 0;
pub const CONSTRAINT_BALL: u32 = 1;

/// `Params` uniform.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuParams {
    pub gravity: [f32; 4],
    pub dt: f32,
    pub num_masses: u32,
    pub num_springs: u32,
    pub num_anchors: u32,
    pub num_points: u32,
    pub num_constraints: u32,
    pub integrator: u32,
    pub contact_stiffness: f32,
    pub contact_epsilon: f32,
    pub _pad: [u32; 3],
}

impl GpuParams {
    pub fn new(params: &StepParams, shape: &BodyShape, num_constraints: usize) -> Self {
        let [x, y, z] = params.global_acc;
        Self {
            gravity: [x as f32, y as f32, z as f32, 0.0],
            dt: params.dt() as f32,
            num_masses: shape.masses as u32,
            num_springs: shape.springs as u32,
            num_anchors: shape.joints.anchors as u32,
            num_points: shape.joints.points as u32,
            num_constraints: num_constraints as u32,
            integrator: params.integrator.code(),
            contact_stiffness: params.contact.stiffness as f32,
            contact_epsilon: params.contact.epsilon as f32,
            _pad: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMassInfo {
    pub m: f32,
    pub flags: u32,
}

impl GpuMassInfo {
    pub fn new(m: f64, fixed: bool, constrain: bool) -> Self {
        let mut flags = 0;
        if fixed {
            flags |= FLAG_FIXED;
        }
        if constrain {
            flags |= FLAG_CONSTRAIN;
        }
        Self { m: m as f32, flags }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuConstraint {
    pub kind: u32,
    pub _pad: [u32; 3],
    pub a: [f32; 4],
    pub b: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuJointPoint {
    pub mass: u32,
    pub anchor: u32,
    pub side: i32,
    pub _pad: u32,
}

/// Narrow a stored vector into a padded `vec4<f32>`.
#[inline]
pub fn to_vec4(p: Packed3) -> [f32; 4] {
    [p[0] as f32, p[1] as f32, p[2] as f32, 0.0]
}

/// Widen a `vec4<f32>` back to storage form.
#[inline]
pub fn from_vec4(v: [f32; 4]) -> Packed3 {
    [f64::from(v[0]), f64::from(v[1]), f64::from(v[2])]
}

/// Narrow a whole field.
pub fn to_vec4s(field: &[Packed3]) -> Vec<[f32; 4]> {
    field.iter().copied().map(to_vec4).collect()
}

/// Widen read-back data into an existing field.
pub fn widen_into(out: &mut [Packed3], data: &[[f32; 4]]) {
    for (dst, src) in out.iter_mut().zip(data) {
        *dst = from_vec4(*src);
    }
}

/// Flatten a constraint table into shader records, planes first.
pub fn constraint_records(table: &ConstraintTable) -> Vec<GpuConstraint> {
    let planes = table.planes.iter().map(|p| GpuConstraint {
        kind: CONSTRAINT_PLANE,
        _pad: [0; 3],
        a: [
            p.normal.x as f32,
            p.normal.y as f32,
            p.normal.z as f32,
            p.offset as f32,
        ],
        b: [p.friction_kinetic as f32, p.friction_static as f32, 0.0, 0.0],
    });
    let balls = table.balls.iter().map(|b| GpuConstraint {
        kind: CONSTRAINT_BALL,
        _pad: [0; 3],
        a: [
            b.center.x as f32,
            b.center.y as f32,
            b.center.z as f32,
            b.radius as f32,
        ],
        b: [0.0; 4],
    });
    planes.chain(balls).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::constraint::ConstraintSet;

    #[test]
    fn test_struct_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<GpuParams>(), 64);
        assert_eq!(std::mem::size_of::<GpuMassInfo>(), 8);
        assert_eq!(std::mem::size_of::<GpuConstraint>(), 48);
        assert_eq!(std::mem::size_of::<GpuJointPoint>(), 16);
    }

    #[test]
    fn test_mass_flags() {
        assert_eq!(GpuMassInfo::new(2.0, true, false).flags, FLAG_FIXED);
        assert_eq!(GpuMassInfo::new(2.0, true, true).flags, FLAG_FIXED | FLAG_CONSTRAIN);
        assert_eq!(GpuMassInfo::new(2.0, false, false).m, 2.0);
    }

    #[test]
    fn test_constraint_records() {
        let mut set = ConstraintSet::new();
        set.create_ball([1.0, 2.0, 3.0], 0.5).unwrap();
        set.create_plane([0.0, 0.0, 2.0], 4.0, 0.25, 0.5).unwrap();
        let records = constraint_records(&set.projection());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, CONSTRAINT_PLANE);
        assert_eq!(records[0].a, [0.0, 0.0, 1.0, 2.0]);
        assert_eq!(records[0].b[..2], [0.25, 0.5]);
        assert_eq!(records[1].kind, CONSTRAINT_BALL);
        assert_eq!(records[1].a, [1.0, 2.0, 3.0, 0.5]);
    }

    #[test]
    fn test_params_from_config() {
        let config = SimConfig::default().with_dt(0.5).with_gravity([0.0, 0.0, -9.5]);
        let shape = BodyShape::new(3, 2);
        let params = GpuParams::new(&StepParams::from_config(&config), &shape, 4);
        assert_eq!(params.gravity, [0.0, 0.0, -9.5, 0.0]);
        assert_eq!(params.dt, 0.5);
        assert_eq!(params.num_masses, 3);
        assert_eq!(params.num_constraints, 4);
        assert_eq!(from_vec4(to_vec4([1.5, -2.0, 0.25])), [1.5, -2.0, 0.25]);
    }
}
