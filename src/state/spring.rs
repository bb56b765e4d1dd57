//! Linear spring storage

use cgmath::InnerSpace;

use super::mass::Masses;
use super::memory::{check_shape, copy_field, Allocator, MemorySpace, Stream};
use crate::error::{SimError, SimResult};
use crate::math::IndexPair;

/// All springs of a simulation, structure-of-arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Springs {
    space: MemorySpace,
    /// Stiffness, N/m.
    pub k: Vec<f64>,
    /// Rest length, m.
    pub rest: Vec<f64>,
    /// Damping along the spring axis, N·s/m.
    pub damping: Vec<f64>,
    /// Endpoint mass indices.
    pub ends: Vec<IndexPair>,
    /// Springs whose rest length may be reset when the body reconfigures.
    pub resetable: Vec<bool>,
}

impl Springs {
    pub fn new<A: Allocator>(num: usize, alloc: &A) -> SimResult<Self> {
        Ok(Self {
            space: alloc.space(),
            k: alloc.zeroed("spring.k", num)?,
            rest: alloc.zeroed("spring.rest", num)?,
            damping: alloc.zeroed("spring.damping", num)?,
            ends: alloc.zeroed("spring.ends", num)?,
            resetable: alloc.zeroed("spring.resetable", num)?,
        })
    }

    pub fn space(&self) -> MemorySpace {
        self.space
    }

    pub fn len(&self) -> usize {
        self.k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }

    pub fn copy_from(&mut self, other: &Springs, stream: &Stream) -> SimResult<()> {
        check_shape("springs", self.len(), other.len())?;
        let Springs {
            k,
            rest,
            damping,
            ends,
            resetable,
            ..
        } = self;
        stream.scope(move |s| {
            copy_field(s, k, &other.k);
            copy_field(s, rest, &other.rest);
            copy_field(s, damping, &other.damping);
            copy_field(s, ends, &other.ends);
            copy_field(s, resetable, &other.resetable);
        });
        Ok(())
    }

    /// Configure spring `i` in one call.
    pub fn set(&mut self, i: usize, ends: impl Into<IndexPair>, k: f64, rest: f64, damping: f64) {
        self.ends[i] = ends.into();
        self.k[i] = k;
        self.rest[i] = rest;
        self.damping[i] = damping;
    }

    /// Current distance between the endpoints of spring `i`.
    pub fn length(&self, i: usize, masses: &Masses) -> f64 {
        let (l, r) = self.ends[i].get();
        (masses.position(r) - masses.position(l)).magnitude()
    }

    /// Reset the rest length of every resetable spring to its current
    /// length. Returns how many springs changed.
    pub fn reset_rest_lengths(&mut self, masses: &Masses) -> usize {
        let mut changed = 0;
        for i in 0..self.len() {
            if self.resetable[i] {
                self.rest[i] = self.length(i, masses);
                changed += 1;
            }
        }
        changed
    }

    /// Elastic energy stored in all springs.
    pub fn potential_energy(&self, masses: &Masses) -> f64 {
        (0..self.len())
            .map(|i| {
                let stretch = self.length(i, masses) - self.rest[i];
                0.5 * self.k[i] * stretch * stretch
            })
            .sum()
    }

    /// Every endpoint must address an existing mass.
    pub fn validate(&self, num_masses: usize) -> SimResult<()> {
        if let Some((i, pair)) = self
            .ends
            .iter()
            .enumerate()
            .find(|(_, pair)| !pair.within(num_masses))
        {
            return Err(SimError::InvalidTopology(format!(
                "spring {i} connects masses ({}, {}) but only {num_masses} exist",
                pair.left, pair.right
            )));
        }
        if let Some(i) = (0..self.len()).find(|&i| !(self.k[i] >= 0.0 && self.rest[i] >= 0.0)) {
            return Err(SimError::InvalidTopology(format!(
                "spring {i} has negative stiffness or rest length"
            )));
        }
        Ok(())
    }
}
