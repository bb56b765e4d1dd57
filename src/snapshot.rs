//! Read-only render snapshot
//!
//! A renderer never touches simulation state. It gets a [`RenderSnapshot`]
//! copied from the host mirror at a pause or sync point, already narrowed to
//! the `f32` precision vertex buffers use.

use crate::math::to_f32;
use crate::state::BodyState;

/// Mass positions, colors and spring endpoints at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderSnapshot {
    /// Simulated time the snapshot was taken at.
    pub time: f64,
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 3]>,
    /// Spring endpoint pairs, indices into `positions`.
    pub edges: Vec<[u32; 2]>,
}

impl RenderSnapshot {
    pub fn capture(state: &BodyState) -> Self {
        Self {
            time: state.time,
            positions: state.masses.pos.iter().copied().map(to_f32).collect(),
            colors: state.masses.color.iter().copied().map(to_f32).collect(),
            edges: state
                .springs
                .ends
                .iter()
                .map(|e| [e.left, e.right])
                .collect(),
        }
    }

    /// Axis-aligned bounds of all positions, `None` when empty.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.positions.first()?;
        Some(self.positions.iter().fold((first, first), |(mut lo, mut hi), p| {
            for k in 0..3 {
                lo[k] = lo[k].min(p[k]);
                hi[k] = hi[k].max(p[k]);
            }
            (lo, hi)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BodyShape, HostAllocator};

    #[test]
    fn test_capture() {
        let mut state = BodyState::zeroed(BodyShape::new(2, 1), &HostAllocator).unwrap();
        state.masses.set(0, 1.0, [0.0, -1.0, 0.5]);
        state.masses.set(1, 1.0, [2.0, 1.0, 0.0]);
        state.masses.color[1] = [1.0, 0.5, 0.0];
        state.springs.set(0, [0, 1], 10.0, 1.0, 0.0);
        state.time = 1.5;

        let snapshot = RenderSnapshot::capture(&state);
        assert_eq!(snapshot.time, 1.5);
        assert_eq!(snapshot.positions[1], [2.0, 1.0, 0.0]);
        assert_eq!(snapshot.colors[1], [1.0, 0.5, 0.0]);
        assert_eq!(snapshot.edges, vec![[0, 1]]);
        assert_eq!(snapshot.bounds(), Some(([0.0, -1.0, 0.0], [2.0, 1.0, 0.5])));
    }

    #[test]
    fn test_empty_bounds() {
        assert_eq!(RenderSnapshot::default().bounds(), None);
    }
}
