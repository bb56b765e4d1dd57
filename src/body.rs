//! Body topology description
//!
//! A [`BodyDescription`] is the exchange format bodies are authored in:
//! vertex positions, edges (one spring each), optional per-vertex color and
//! surface flags, joints, and local coordinate frames. [`BodyDescription::build`]
//! checks every index and turns the description into a host [`BodyState`].
//!
//! ```rust
//! use flexsim::body::{BodyDescription, BodyParams};
//!
//! let body = BodyDescription {
//!     vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
//!     edges: vec![[0, 1]],
//!     ..Default::default()
//! };
//! let state = body.build(&BodyParams::default())?;
//! assert_eq!(state.springs.rest[0], 1.0);
//! # Ok::<(), flexsim::error::SimError>(())
//! ```

use std::collections::HashMap;

use crate::error::{SimError, SimResult};
use crate::math::{normalize_or_zero, pack, vec3, Packed3};
use crate::state::{BodyShape, BodyState, HostAllocator, JointShape, Side};

/// One rotational joint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointDescription {
    /// Vertices rotating negatively about the axis.
    pub left: Vec<u32>,
    /// Vertices rotating positively about the axis.
    pub right: Vec<u32>,
    /// The two vertices spanning the rotation axis, left to right.
    pub anchor: [u32; 2],
    /// Indices into [`BodyDescription::frames`] of the left and right local
    /// frames. Ignored when the body has no frames.
    pub frames: [u32; 2],
}

/// Vertices, edges, joints and frames of a body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BodyDescription {
    pub vertices: Vec<Packed3>,
    /// Spring endpoints.
    pub edges: Vec<[u32; 2]>,
    /// Per-vertex RGB color, or empty.
    pub colors: Vec<Packed3>,
    /// Per-vertex surface flag, or empty. Surface vertices collide with
    /// global constraints.
    pub surface: Vec<bool>,
    pub joints: Vec<JointDescription>,
    /// Local coordinate frames as (origin, +x, +y, +z) vertex indices.
    pub frames: Vec<[u32; 4]>,
}

/// Material parameters applied uniformly when building a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyParams {
    /// Mass of every vertex, kg.
    pub mass: f64,
    /// Spring stiffness, N/m.
    pub stiffness: f64,
    /// Spring axial damping, N·s/m.
    pub damping: f64,
}

impl Default for BodyParams {
    fn default() -> Self {
        Self {
            mass: 0.1,
            stiffness: 1.0e4,
            damping: 1.0,
        }
    }
}

/// Half of the 26-neighborhood, so each lattice edge is emitted once.
const NEIGHBOR_OFFSETS: [(i64, i64, i64); 13] = [
    (1, 0, 0),
    (0, 1, 0),
    (0, 0, 1),
    (1, 1, 0),
    (1, -1, 0),
    (1, 0, 1),
    (1, 0, -1),
    (0, 1, 1),
    (0, 1, -1),
    (1, 1, 1),
    (1, 1, -1),
    (1, -1, 1),
    (1, -1, -1),
];

fn invalid(message: String) -> SimError {
    SimError::InvalidTopology(message)
}

impl BodyDescription {
    /// A box lattice of `counts` vertices per axis, `spacing` apart, with its
    /// lowest corner at `origin`. Every vertex is joined to its 26 neighbors,
    /// boundary vertices are surface vertices, and colors fade with height.
    pub fn lattice(counts: [u32; 3], spacing: f64, origin: Packed3) -> Self {
        let [nx, ny, nz] = counts;
        let index = |x: u32, y: u32, z: u32| (z * ny + y) * nx + x;
        let mut body = BodyDescription::default();
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    body.vertices.push([
                        origin[0] + f64::from(x) * spacing,
                        origin[1] + f64::from(y) * spacing,
                        origin[2] + f64::from(z) * spacing,
                    ]);
                    let edge = |i: u32, n: u32| i == 0 || i + 1 == n;
                    body.surface.push(edge(x, nx) || edge(y, ny) || edge(z, nz));
                    let h = if nz > 1 { f64::from(z) / f64::from(nz - 1) } else { 0.0 };
                    body.colors.push([1.0 - h, 0.4, h]);
                }
            }
        }
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    for (dx, dy, dz) in NEIGHBOR_OFFSETS {
                        let (tx, ty, tz) = (x as i64 + dx, y as i64 + dy, z as i64 + dz);
                        let inside = (0..i64::from(nx)).contains(&tx)
                            && (0..i64::from(ny)).contains(&ty)
                            && (0..i64::from(nz)).contains(&tz);
                        if inside {
                            body.edges.push([
                                index(x, y, z),
                                index(tx as u32, ty as u32, tz as u32),
                            ]);
                        }
                    }
                }
            }
        }
        body
    }

    pub fn shape(&self) -> BodyShape {
        BodyShape::new(self.vertices.len(), self.edges.len()).with_joints(JointShape {
            anchors: self.joints.len(),
            points: self
                .joints
                .iter()
                .map(|j| j.left.len() + j.right.len())
                .sum(),
            frames: self.frames.len(),
        })
    }

    /// Check per-vertex table lengths and every index.
    pub fn validate(&self) -> SimResult<()> {
        let n = self.vertices.len();
        let in_range = |v: u32| (v as usize) < n;
        if !self.colors.is_empty() && self.colors.len() != n {
            return Err(invalid(format!(
                "{} colors for {n} vertices",
                self.colors.len()
            )));
        }
        if !self.surface.is_empty() && self.surface.len() != n {
            return Err(invalid(format!(
                "{} surface flags for {n} vertices",
                self.surface.len()
            )));
        }
        if let Some((e, edge)) = self
            .edges
            .iter()
            .enumerate()
            .find(|(_, edge)| !edge.iter().all(|&v| in_range(v)))
        {
            return Err(invalid(format!("edge {e} {edge:?} out of range")));
        }
        if let Some(f) = self
            .frames
            .iter()
            .position(|frame| !frame.iter().all(|&v| in_range(v)))
        {
            return Err(invalid(format!("frame {f} references a missing vertex")));
        }
        for (j, joint) in self.joints.iter().enumerate() {
            if !joint.anchor.iter().all(|&v| in_range(v)) {
                return Err(invalid(format!("joint {j} anchor {:?} out of range", joint.anchor)));
            }
            if let Some(v) = joint.left.iter().chain(&joint.right).find(|&&v| !in_range(v)) {
                return Err(invalid(format!("joint {j} moves missing vertex {v}")));
            }
            if !self.frames.is_empty()
                && !joint.frames.iter().all(|&f| (f as usize) < self.frames.len())
            {
                return Err(invalid(format!("joint {j} frames {:?} out of range", joint.frames)));
            }
        }
        Ok(())
    }

    /// Build the host state: one mass per vertex, one spring per edge with
    /// its current length as rest length, one anchor per joint.
    ///
    /// Springs connecting the two sides of the same joint are marked
    /// resetable, since rotating the joint changes their length.
    pub fn build(&self, params: &BodyParams) -> SimResult<BodyState> {
        self.validate()?;
        let mut state = BodyState::zeroed(self.shape(), &HostAllocator)?;

        for (i, &pos) in self.vertices.iter().enumerate() {
            state.masses.set(i, params.mass, pos);
            if let Some(&color) = self.colors.get(i) {
                state.masses.color[i] = color;
            }
            state.masses.constrain[i] = self.surface.get(i).copied().unwrap_or(false);
        }

        let mut side_of: HashMap<u32, (usize, Side)> = HashMap::new();
        let mut p = 0;
        for (j, joint) in self.joints.iter().enumerate() {
            let coords = if self.frames.is_empty() { [0, 0] } else { joint.frames };
            state.joints.set_anchor(j, joint.anchor, coords);
            let [l, r] = joint.anchor;
            state.joints.anchors.dir[j] = pack(normalize_or_zero(
                vec3(self.vertices[r as usize]) - vec3(self.vertices[l as usize]),
            ));
            let sides = joint
                .left
                .iter()
                .map(|&v| (v, Side::Left))
                .chain(joint.right.iter().map(|&v| (v, Side::Right)));
            for (v, side) in sides {
                state.joints.set_point(p, v, j as u32, side);
                side_of.insert(v, (j, side));
                p += 1;
            }
        }
        state.joints.frames.copy_from_slice(&self.frames);

        for (s, &[a, b]) in self.edges.iter().enumerate() {
            state
                .springs
                .set(s, [a, b], params.stiffness, 0.0, params.damping);
            let rest = state.springs.length(s, &state.masses);
            state.springs.rest[s] = rest;
            state.springs.resetable[s] = match (side_of.get(&a), side_of.get(&b)) {
                (Some((ja, sa)), Some((jb, sb))) => ja == jb && sa != sb,
                _ => false,
            };
        }

        state.validate()?;
        Ok(state)
    }
}
