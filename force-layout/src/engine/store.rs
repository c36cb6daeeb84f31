// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Structure-of-arrays body storage
//!
//! # Memory Layout
//!
//! Instead of one `Body` struct per element, every field lives in its own
//! dense array indexed by the body's dense index:
//!
//! ```text
//! positions:  [p0, p1, p2, ...]
//! velocities: [v0, v1, v2, ...]
//! forces:     [f0, f1, f2, ...]
//! charges:    [q0, q1, q2, ...]
//! ```
//!
//! The octree build reads only `positions` and `charges`, and the integrator
//! streams through `positions`, `velocities` and `forces` in order.

use super::body::{Body, BodyId, Pin};
use crate::error::LayoutError;
use crate::math::{Axis, Vec3};
use std::collections::HashMap;

/// Dense per-body state with a stable id to index mapping
///
/// # Example
///
/// ```
/// use force_layout::engine::{Body, BodyId, BodyStore};
/// use force_layout::math::Vec3;
///
/// let store = BodyStore::from_bodies(&[
///     Body::new(10, Vec3::ZERO),
///     Body::new(20, Vec3::new(1.0, 0.0, 0.0)),
/// ]).unwrap();
///
/// assert_eq!(store.index_of(BodyId(20)), Some(1));
/// assert_eq!(store.id_at(0), Some(BodyId(10)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BodyStore {
    /// Mapping from id to dense index
    id_to_index: HashMap<BodyId, usize>,
    /// Mapping from dense index back to id
    index_to_id: Vec<BodyId>,
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    forces: Vec<Vec3>,
    charges: Vec<f64>,
    pins: Vec<Pin>,
}

impl BodyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty store with room for `capacity` bodies
    pub fn with_capacity(capacity: usize) -> Self {
        BodyStore {
            id_to_index: HashMap::with_capacity(capacity),
            index_to_id: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
            forces: Vec::with_capacity(capacity),
            charges: Vec::with_capacity(capacity),
            pins: Vec::with_capacity(capacity),
        }
    }

    /// Validate and store every body in list order
    pub fn from_bodies(bodies: &[Body]) -> Result<Self, LayoutError> {
        let mut store = Self::with_capacity(bodies.len());
        for body in bodies {
            store.insert(*body)?;
        }
        Ok(store)
    }

    /// Append a body, returning its dense index
    pub fn insert(&mut self, body: Body) -> Result<usize, LayoutError> {
        body.validate()?;
        if self.id_to_index.contains_key(&body.id) {
            return Err(LayoutError::DuplicateBody(body.id));
        }

        let index = self.positions.len();
        self.id_to_index.insert(body.id, index);
        self.index_to_id.push(body.id);
        self.positions.push(apply_pin(body.position, &body.pin));
        self.velocities.push(body.velocity);
        self.forces.push(Vec3::ZERO);
        self.charges.push(body.charge);
        self.pins.push(body.pin);

        debug_assert_eq!(self.id_to_index.len(), self.index_to_id.len());
        debug_assert_eq!(self.index_to_id.len(), self.positions.len());
        Ok(index)
    }

    /// Number of bodies
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if the store holds no bodies
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Dense index of a body
    pub fn index_of(&self, id: BodyId) -> Option<usize> {
        self.id_to_index.get(&id).copied()
    }

    /// Id of the body at a dense index
    pub fn id_at(&self, index: usize) -> Option<BodyId> {
        self.index_to_id.get(index).copied()
    }

    /// Ids in dense index order
    pub fn ids(&self) -> &[BodyId] {
        &self.index_to_id
    }

    /// Check if a body is stored
    pub fn contains(&self, id: BodyId) -> bool {
        self.id_to_index.contains_key(&id)
    }

    /// Reassemble the body at a dense index
    pub fn body(&self, index: usize) -> Option<Body> {
        let id = self.id_at(index)?;
        Some(Body {
            id,
            position: self.positions[index],
            velocity: self.velocities[index],
            charge: self.charges[index],
            pin: self.pins[index],
        })
    }

    /// Reassemble a body by id
    pub fn get(&self, id: BodyId) -> Option<Body> {
        self.body(self.index_of(id)?)
    }

    /// Positions in dense order
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Mutable positions in dense order
    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        &mut self.positions
    }

    /// Velocities in dense order
    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    /// Mutable velocities in dense order
    pub fn velocities_mut(&mut self) -> &mut [Vec3] {
        &mut self.velocities
    }

    /// Forces accumulated during the current tick
    pub fn forces(&self) -> &[Vec3] {
        &self.forces
    }

    /// Mutable forces
    pub fn forces_mut(&mut self) -> &mut [Vec3] {
        &mut self.forces
    }

    /// Charges in dense order
    pub fn charges(&self) -> &[f64] {
        &self.charges
    }

    /// Pins in dense order
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Positions alongside mutable forces, for accumulating force terms
    pub(crate) fn forces_from_positions(&mut self) -> (&[Vec3], &mut [Vec3]) {
        (&self.positions, &mut self.forces)
    }

    /// Split borrow used by the integrator
    pub(crate) fn motion_mut(&mut self) -> (&mut [Vec3], &mut [Vec3], &[Vec3], &[Pin]) {
        (
            &mut self.positions,
            &mut self.velocities,
            &self.forces,
            &self.pins,
        )
    }

    /// Pin or release one axis of the body at `index`
    ///
    /// Pinning moves the coordinate to the pin value immediately and zeroes
    /// the velocity along that axis.
    pub fn set_pin(&mut self, index: usize, axis: Axis, value: Option<f64>) {
        self.pins[index][axis.index()] = value;
        if let Some(v) = value {
            self.positions[index].set(axis, v);
            self.velocities[index].set(axis, 0.0);
        }
    }

    /// Zero every accumulated force
    pub fn clear_forces(&mut self) {
        self.forces.iter_mut().for_each(|f| *f = Vec3::ZERO);
    }
}

fn apply_pin(mut position: Vec3, pin: &Pin) -> Vec3 {
    for axis in Axis::ALL {
        if let Some(v) = pin[axis.index()] {
            position.set(axis, v);
        }
    }
    position
}
