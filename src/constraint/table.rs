//! Flat, read-only projection of a constraint set

use super::contact::{Ball, ContactParams, ContactPlane, ContactProbe};
use crate::math::Vec3;

/// Device-side view of the constraint set at a given version.
///
/// Devices keep the last table they uploaded and compare `version` before a
/// launch; a mismatch means the host set changed and must be re-uploaded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstraintTable {
    pub version: u64,
    pub planes: Vec<ContactPlane>,
    pub balls: Vec<Ball>,
}

impl ConstraintTable {
    pub fn len(&self) -> usize {
        self.planes.len() + self.balls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty() && self.balls.is_empty()
    }

    /// Sum of all contact forces acting on `probe`.
    pub fn reaction(&self, probe: &ContactProbe, params: &ContactParams) -> Vec3 {
        let planes = self
            .planes
            .iter()
            .fold(Vec3::new(0.0, 0.0, 0.0), |acc, p| acc + p.reaction(probe, params));
        self.balls
            .iter()
            .fold(planes, |acc, b| acc + b.reaction(probe, params))
    }
}
