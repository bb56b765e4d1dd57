//! Rotational joint storage
//!
//! A joint rotates two groups of masses ("left" and "right") in opposite
//! directions about the axis through its two anchor masses. Storage is split
//! in two structure-of-arrays blocks:
//!
//! - [`JointAnchors`]: one entry per joint (axis endpoints, axis direction,
//!   per-step increment, accumulated angle, local frame indices).
//! - [`JointPoints`]: one entry per rotating mass over all joints, naming the
//!   mass, its owning anchor and its side.
//!
//! Local coordinate frames are stored flattened as four mass indices each
//! (origin, +x, +y, +z) and are only used to measure joint angles.

use std::collections::HashSet;

use super::mass::Masses;
use super::memory::{check_shape, copy_field, Allocator, MemorySpace, Stream};
use crate::error::{SimError, SimResult};
use crate::math::{signed_angle_about, IndexPair, Packed3};

/// Side of a joint a rotating mass belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Rotation sign: left turns negatively, right positively.
    pub const fn sign(self) -> i8 {
        match self {
            Side::Left => -1,
            Side::Right => 1,
        }
    }

    pub fn from_sign(sign: i8) -> Option<Self> {
        match sign {
            -1 => Some(Side::Left),
            1 => Some(Side::Right),
            _ => None,
        }
    }
}

/// Sizes of the joint blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JointShape {
    pub anchors: usize,
    pub points: usize,
    pub frames: usize,
}

impl JointShape {
    pub const NONE: JointShape = JointShape {
        anchors: 0,
        points: 0,
        frames: 0,
    };
}

/// Per-joint axis data.
#[derive(Debug, Clone, PartialEq)]
pub struct JointAnchors {
    /// Mass indices of the two axis endpoints.
    pub ends: Vec<IndexPair>,
    /// Normalized axis direction, left anchor to right anchor.
    pub dir: Vec<Packed3>,
    /// Angle increment applied per step, rad.
    pub theta: Vec<f64>,
    /// Accumulated angle, rad.
    pub angle: Vec<f64>,
    /// Indices into the frame table for the left/right local frames.
    pub coords: Vec<IndexPair>,
}

/// Flattened list of rotating masses over all joints.
#[derive(Debug, Clone, PartialEq)]
pub struct JointPoints {
    pub mass: Vec<u32>,
    pub anchor: Vec<u32>,
    /// -1 for left, +1 for right.
    pub side: Vec<i8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Joints {
    space: MemorySpace,
    pub anchors: JointAnchors,
    pub points: JointPoints,
    /// Local frames: origin, +x, +y, +z mass indices.
    pub frames: Vec<[u32; 4]>,
}

impl Joints {
    pub fn new<A: Allocator>(shape: JointShape, alloc: &A) -> SimResult<Self> {
        Ok(Self {
            space: alloc.space(),
            anchors: JointAnchors {
                ends: alloc.zeroed("joint.anchor.ends", shape.anchors)?,
                dir: alloc.zeroed("joint.anchor.dir", shape.anchors)?,
                theta: alloc.zeroed("joint.anchor.theta", shape.anchors)?,
                angle: alloc.zeroed("joint.anchor.angle", shape.anchors)?,
                coords: alloc.zeroed("joint.anchor.coords", shape.anchors)?,
            },
            points: JointPoints {
                mass: alloc.zeroed("joint.point.mass", shape.points)?,
                anchor: alloc.zeroed("joint.point.anchor", shape.points)?,
                side: alloc.zeroed("joint.point.side", shape.points)?,
            },
            frames: alloc.zeroed("joint.frames", shape.frames)?,
        })
    }

    pub fn space(&self) -> MemorySpace {
        self.space
    }

    pub fn shape(&self) -> JointShape {
        JointShape {
            anchors: self.anchors.ends.len(),
            points: self.points.mass.len(),
            frames: self.frames.len(),
        }
    }

    /// Number of joints.
    pub fn len(&self) -> usize {
        self.anchors.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.ends.is_empty()
    }

    pub fn copy_from(&mut self, other: &Joints, stream: &Stream) -> SimResult<()> {
        let (mine, theirs) = (self.shape(), other.shape());
        check_shape("joint anchors", mine.anchors, theirs.anchors)?;
        check_shape("joint points", mine.points, theirs.points)?;
        check_shape("joint frames", mine.frames, theirs.frames)?;
        let Joints {
            anchors:
                JointAnchors {
                    ends,
                    dir,
                    theta,
                    angle,
                    coords,
                },
            points: JointPoints { mass, anchor, side },
            frames,
            ..
        } = self;
        let (from_anchors, from_points) = (&other.anchors, &other.points);
        stream.scope(move |s| {
            copy_field(s, ends, &from_anchors.ends);
            copy_field(s, dir, &from_anchors.dir);
            copy_field(s, theta, &from_anchors.theta);
            copy_field(s, angle, &from_anchors.angle);
            copy_field(s, coords, &from_anchors.coords);
            copy_field(s, mass, &from_points.mass);
            copy_field(s, anchor, &from_points.anchor);
            copy_field(s, side, &from_points.side);
            copy_field(s, frames, &other.frames);
        });
        Ok(())
    }

    /// Set joint `j`'s axis endpoints and local frame indices.
    pub fn set_anchor(&mut self, j: usize, ends: impl Into<IndexPair>, coords: impl Into<IndexPair>) {
        self.anchors.ends[j] = ends.into();
        self.anchors.coords[j] = coords.into();
    }

    /// Register mass `mass` as point `p`, rotating with joint `joint`.
    pub fn set_point(&mut self, p: usize, mass: u32, joint: u32, side: Side) {
        self.points.mass[p] = mass;
        self.points.anchor[p] = joint;
        self.points.side[p] = side.sign();
    }

    /// Accumulated angle of every joint.
    pub fn angles(&self) -> &[f64] {
        &self.anchors.angle
    }

    /// Joint angles measured from the left and right local frames: the angle
    /// from the left frame's x axis to the right frame's x axis about the
    /// joint axis. `None` when no frames were supplied.
    pub fn measured_angles(&self, masses: &Masses) -> Option<Vec<f64>> {
        if self.frames.is_empty() {
            return None;
        }
        let x_axis = |frame: u32| {
            let [origin, x, _, _] = self.frames[frame as usize];
            masses.position(x as usize) - masses.position(origin as usize)
        };
        Some(
            (0..self.len())
                .map(|j| {
                    let (l, r) = self.anchors.ends[j].get();
                    let axis = masses.position(r) - masses.position(l);
                    let coords = self.anchors.coords[j];
                    signed_angle_about(x_axis(coords.left), x_axis(coords.right), axis)
                })
                .collect(),
        )
    }

    /// Check every index against `num_masses` and the joint tables.
    ///
    /// Besides range checks this enforces that each rotating mass appears in
    /// exactly one point entry and is not itself an anchor of any joint, so
    /// the point pass can move masses independently of each other.
    pub fn validate(&self, num_masses: usize) -> SimResult<()> {
        let invalid = |msg: String| Err(SimError::InvalidTopology(msg));
        let mut anchor_masses = HashSet::new();
        for (j, ends) in self.anchors.ends.iter().enumerate() {
            if !ends.within(num_masses) {
                return invalid(format!(
                    "joint {j} anchors ({}, {}) exceed {num_masses} masses",
                    ends.left, ends.right
                ));
            }
            if ends.left == ends.right {
                return invalid(format!("joint {j} has a degenerate axis"));
            }
            anchor_masses.insert(ends.left);
            anchor_masses.insert(ends.right);
            if !self.frames.is_empty() && !self.anchors.coords[j].within(self.frames.len()) {
                return invalid(format!("joint {j} references a missing local frame"));
            }
        }
        for (f, frame) in self.frames.iter().enumerate() {
            if frame.iter().any(|&m| m as usize >= num_masses) {
                return invalid(format!("frame {f} references a missing mass"));
            }
        }
        let mut seen = HashSet::new();
        for p in 0..self.points.mass.len() {
            let mass = self.points.mass[p];
            if mass as usize >= num_masses {
                return invalid(format!("joint point {p} references missing mass {mass}"));
            }
            if self.points.anchor[p] as usize >= self.len() {
                return invalid(format!(
                    "joint point {p} references missing joint {}",
                    self.points.anchor[p]
                ));
            }
            if Side::from_sign(self.points.side[p]).is_none() {
                return invalid(format!(
                    "joint point {p} has side {} (expected -1 or 1)",
                    self.points.side[p]
                ));
            }
            if !seen.insert(mass) {
                return invalid(format!("mass {mass} rotates with more than one joint point"));
            }
            if anchor_masses.contains(&mass) {
                return invalid(format!("mass {mass} is both a joint anchor and a rotating point"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::memory::HostAllocator;
    use std::f64::consts::FRAC_PI_2;

    fn single_joint() -> Joints {
        let shape = JointShape {
            anchors: 1,
            points: 2,
            frames: 0,
        };
        let mut joints = Joints::new(shape, &HostAllocator).unwrap();
        joints.set_anchor(0, [0, 1], [0, 0]);
        joints.set_point(0, 2, 0, Side::Left);
        joints.set_point(1, 3, 0, Side::Right);
        joints
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Left.sign(), -1);
        assert_eq!(Side::from_sign(1), Some(Side::Right));
        assert_eq!(Side::from_sign(0), None);
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(single_joint().validate(4).is_ok());
    }

    #[test]
    fn test_validate_rejects_anchor_as_point() {
        let mut joints = single_joint();
        joints.points.mass[1] = 1;
        assert!(joints.validate(4).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_point() {
        let mut joints = single_joint();
        joints.points.mass[1] = 2;
        assert!(joints.validate(4).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_mass() {
        assert!(single_joint().validate(3).is_err());
    }

    #[test]
    fn test_measured_angle_between_frames() {
        let mut masses = Masses::new(6, &HostAllocator).unwrap();
        masses.set(0, 1.0, [0.0, 0.0, 0.0]);
        masses.set(1, 1.0, [0.0, 0.0, 1.0]);
        // left frame x axis along +x, right frame x axis along +y
        masses.set(2, 1.0, [0.0, 0.0, 0.5]);
        masses.set(3, 1.0, [1.0, 0.0, 0.5]);
        masses.set(4, 1.0, [0.0, 0.0, 0.5]);
        masses.set(5, 1.0, [0.0, 1.0, 0.5]);

        let shape = JointShape {
            anchors: 1,
            points: 0,
            frames: 2,
        };
        let mut joints = Joints::new(shape, &HostAllocator).unwrap();
        joints.set_anchor(0, [0, 1], [0, 1]);
        joints.frames[0] = [2, 3, 2, 2];
        joints.frames[1] = [4, 5, 4, 4];
        let angles = joints.measured_angles(&masses).unwrap();
        assert!((angles[0] - FRAC_PI_2).abs() < 1e-12);
    }
}
