//! Global constraints
//!
//! Static planes and balls that masses flagged `constrain` collide with. The
//! host keeps a [`ConstraintSet`] whose version counter bumps on every change;
//! devices consume the immutable [`ConstraintTable`] projection and re-upload
//! only when the version they hold is stale.

pub mod contact;
pub mod table;

use std::sync::Arc;

pub use contact::{Ball, ContactParams, ContactPlane, ContactProbe};
pub use table::ConstraintTable;

use crate::error::{SimError, SimResult};
use crate::math::{vec3, Packed3};

/// A single global constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    Plane(ContactPlane),
    Ball(Ball),
}

/// Host-side list of constraints with a generation counter.
#[derive(Debug, Default)]
pub struct ConstraintSet {
    items: Vec<Constraint>,
    version: u64,
    projection: Option<Arc<ConstraintTable>>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a half-space `normal·x < offset`. Returns its index.
    pub fn create_plane(
        &mut self,
        normal: Packed3,
        offset: f64,
        friction_kinetic: f64,
        friction_static: f64,
    ) -> SimResult<usize> {
        if friction_kinetic < 0.0 || friction_static < 0.0 {
            return Err(SimError::InvalidConfig(
                "friction coefficients must be non-negative".to_string(),
            ));
        }
        let plane = ContactPlane::new(vec3(normal), offset, friction_kinetic, friction_static)
            .ok_or_else(|| SimError::InvalidConfig(format!("plane normal {normal:?} is degenerate")))?;
        Ok(self.push(Constraint::Plane(plane)))
    }

    /// Append a solid sphere. Returns its index.
    pub fn create_ball(&mut self, center: Packed3, radius: f64) -> SimResult<usize> {
        let ball = Ball::new(vec3(center), radius)
            .ok_or_else(|| SimError::InvalidConfig(format!("ball radius {radius} is invalid")))?;
        Ok(self.push(Constraint::Ball(ball)))
    }

    fn push(&mut self, constraint: Constraint) -> usize {
        self.items.push(constraint);
        self.version += 1;
        self.items.len() - 1
    }

    /// Remove every constraint.
    pub fn clear(&mut self) {
        self.items.clear();
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.items.iter()
    }

    /// The table for the current version, rebuilt only after a change.
    pub fn projection(&mut self) -> Arc<ConstraintTable> {
        match &self.projection {
            Some(table) if table.version == self.version => table.clone(),
            _ => {
                let mut table = ConstraintTable {
                    version: self.version,
                    ..Default::default()
                };
                for item in self.iter() {
                    match *item {
                        Constraint::Plane(plane) => table.planes.push(plane),
                        Constraint::Ball(ball) => table.balls.push(ball),
                    }
                }
                let table = Arc::new(table);
                self.projection = Some(table.clone());
                table
            }
        }
    }
}
