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
//! Octree cells and their cubic bounds

use crate::math::Vec3;
use crate::pool::{ObjectPool, PoolConfig};

/// Index of a cell inside an octree's arena
pub type CellId = u32;

/// Axis-aligned cube described by its minimum corner and edge length
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum corner
    pub origin: Vec3,
    /// Edge length
    pub edge: f64,
}

impl Bounds {
    /// Create a cube from its minimum corner and edge length
    pub fn new(origin: Vec3, edge: f64) -> Self {
        Bounds { origin, edge }
    }

    /// Center point of the cube
    pub fn center(&self) -> Vec3 {
        let half = self.edge * 0.5;
        self.origin + Vec3::new(half, half, half)
    }

    /// Check whether a point lies inside the cube (inclusive)
    pub fn contains(&self, p: Vec3) -> bool {
        let max = self.origin + Vec3::new(self.edge, self.edge, self.edge);
        p.x >= self.origin.x
            && p.x <= max.x
            && p.y >= self.origin.y
            && p.y <= max.y
            && p.z >= self.origin.z
            && p.z <= max.z
    }

    /// Octant a point falls into
    ///
    /// Bit 0 selects the upper x half, bit 1 the upper y half and bit 2 the
    /// upper z half. Points on a split plane go to the upper half.
    pub fn octant(&self, p: Vec3) -> usize {
        let c = self.center();
        let mut idx = 0;
        if p.x >= c.x {
            idx |= 1;
        }
        if p.y >= c.y {
            idx |= 2;
        }
        if p.z >= c.z {
            idx |= 4;
        }
        idx
    }

    /// Bounds of one of the eight child octants
    pub fn child(&self, octant: usize) -> Bounds {
        let half = self.edge * 0.5;
        let offset = Vec3::new(
            if octant & 1 != 0 { half } else { 0.0 },
            if octant & 2 != 0 { half } else { 0.0 },
            if octant & 4 != 0 { half } else { 0.0 },
        );
        Bounds::new(self.origin + offset, half)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds::new(Vec3::ZERO, 0.0)
    }
}

/// What a cell holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellContent {
    /// No body
    #[default]
    Empty,
    /// Exactly one body (plus any bodies coincident with it)
    Leaf(usize),
    /// Eight children
    Internal([CellId; 8]),
}

/// A single octree cell
#[derive(Debug, Clone, Default)]
pub struct Cell {
    /// Cubic region covered by this cell
    pub bounds: Bounds,
    /// Sum of the charges of every body below this cell
    pub mass: f64,
    /// Sum of the absolute charges, used to weight the centroid
    pub weight: f64,
    /// Charge-weighted center of the bodies below this cell
    pub centroid: Vec3,
    /// Leaf, internal or empty
    pub content: CellContent,
    /// Depth below the root
    pub depth: u32,
}

impl Cell {
    /// Prepare a pooled cell for a new region
    pub fn init(&mut self, bounds: Bounds, depth: u32) {
        self.bounds = bounds;
        self.depth = depth;
    }

    /// Clear every field so the cell can go back to the pool
    pub fn reset(&mut self) {
        *self = Cell::default();
    }

    /// True when the cell carries no state from a previous build
    pub fn is_pristine(&self) -> bool {
        self.content == CellContent::Empty
            && self.mass == 0.0
            && self.weight == 0.0
            && self.depth == 0
    }

    /// True for cells without children
    pub fn is_leaf(&self) -> bool {
        !matches!(self.content, CellContent::Internal(_))
    }

    /// True for cells that hold no body at all
    pub fn is_empty(&self) -> bool {
        self.weight == 0.0 && !matches!(self.content, CellContent::Leaf(_))
    }
}

/// Object pool specialised for octree cells
pub type CellPool = ObjectPool<Cell>;

/// Create a cell pool that resets released cells and rejects dirty ones
pub fn cell_pool(config: PoolConfig) -> CellPool {
    ObjectPool::new("octree cell", config, Cell::default)
        .with_reset(|cell: &mut Cell| {
            cell.reset();
            Ok(())
        })
        .with_validator(Cell::is_pristine)
}
