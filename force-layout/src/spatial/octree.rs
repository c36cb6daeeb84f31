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
//! Pooled Barnes-Hut octree
//!
//! The tree is rebuilt from scratch every tick. Cells live in an arena
//! (`Vec<Cell>`) and refer to their children by index; every cell is taken
//! from a [`CellPool`] during the build and handed back before the next one,
//! so a steady-state simulation allocates no cells at all.
//!
//! # Lifecycle
//!
//! 1. [`Octree::build`] releases the previous tree and inserts every body
//! 2. [`Octree::aggregate`] fills in mass and centroid bottom-up
//! 3. [`Octree::force`] may then be called concurrently from many threads
//! 4. [`Octree::release`] (or the next build) returns all cells to the pool
//!
//! # Opening criterion
//!
//! An internal cell of edge length `s` whose centroid lies at distance `d`
//! from the body is treated as a single point charge when `s / d < theta`
//! and the body lies outside the cell. Smaller `theta` opens more cells and
//! converges to the exact pairwise sum.

use super::cell::{Bounds, Cell, CellContent, CellId, CellPool};
use super::law::{jiggle, ForceLaw};
use crate::math::{Aabb, Vec3};
use std::cell::RefCell;
use std::fmt;
use tracing::warn;

/// Deepest level a cell may be subdivided to; bodies closer than the cell
/// size at this depth share a leaf.
pub const MAX_DEPTH: u32 = 32;

/// Relative padding added around the bounding cube of all bodies
const BOUNDS_PADDING: f64 = 1e-3;

const ROOT: usize = 0;

thread_local! {
    /// Traversal stack reused by every force query on this thread
    static SCRATCH: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// A cell whose mass disagrees with the sum of its children
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateViolation {
    /// Offending cell
    pub cell: CellId,
    /// Mass stored on the cell
    pub stored: f64,
    /// Sum over the cell's children
    pub expected: f64,
}

impl fmt::Display for AggregateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cell {} stores mass {} but its children sum to {}",
            self.cell, self.stored, self.expected
        )
    }
}

impl std::error::Error for AggregateViolation {}

/// Barnes-Hut octree over a set of charged bodies
#[derive(Debug, Default)]
pub struct Octree {
    cells: Vec<Cell>,
    positions: Vec<Vec3>,
    charges: Vec<f64>,
    /// Next body sharing the same leaf, per body
    coincident: Vec<Option<usize>>,
    skipped: usize,
    aggregated: bool,
}

impl Octree {
    /// Create an empty tree
    pub fn new() -> Self {
        Octree::default()
    }

    /// Insert every body into a fresh tree
    ///
    /// Cells from the previous build are returned to `pool` first. Bodies
    /// with non-finite positions are left out of the tree and receive no
    /// repulsion.
    ///
    /// # Panics
    ///
    /// Panics if `positions` and `charges` differ in length.
    pub fn build(&mut self, positions: &[Vec3], charges: &[f64], pool: &mut CellPool) {
        assert_eq!(
            positions.len(),
            charges.len(),
            "positions and charges must have the same length"
        );
        self.release(pool);

        self.positions.clear();
        self.positions.extend_from_slice(positions);
        self.charges.clear();
        self.charges.extend_from_slice(charges);
        self.coincident.clear();
        self.coincident.resize(positions.len(), None);
        self.skipped = 0;

        let finite: Vec<Vec3> = positions.iter().copied().filter(|p| p.is_finite()).collect();
        let Some(bounds) = bounding_cube(&finite) else {
            return;
        };

        let mut root = pool.acquire();
        root.init(bounds, 0);
        self.cells.push(root);

        for body in 0..positions.len() {
            if positions[body].is_finite() {
                self.insert(body, pool);
            } else {
                self.skipped += 1;
            }
        }
        if self.skipped > 0 {
            warn!(skipped = self.skipped, "bodies with non-finite positions left out of octree");
        }
    }

    /// Compute mass and centroid of every cell, bottom-up
    ///
    /// Children are always allocated after their parent, so walking the
    /// arena backwards visits every child before its parent.
    pub fn aggregate(&mut self) {
        for idx in (0..self.cells.len()).rev() {
            let (mass, weight, weighted) = match self.cells[idx].content {
                CellContent::Empty => (0.0, 0.0, Vec3::ZERO),
                CellContent::Leaf(body) => {
                    let mut mass = 0.0;
                    let mut weight = 0.0;
                    let mut weighted = Vec3::ZERO;
                    for b in self.chain(body) {
                        let w = self.charges[b].abs();
                        mass += self.charges[b];
                        weight += w;
                        weighted += self.positions[b] * w;
                    }
                    (mass, weight, weighted)
                }
                CellContent::Internal(children) => {
                    let mut mass = 0.0;
                    let mut weight = 0.0;
                    let mut weighted = Vec3::ZERO;
                    for child in children {
                        let c = &self.cells[child as usize];
                        mass += c.mass;
                        weight += c.weight;
                        weighted += c.centroid * c.weight;
                    }
                    (mass, weight, weighted)
                }
            };

            let cell = &mut self.cells[idx];
            cell.mass = mass;
            cell.weight = weight;
            cell.centroid = if weight > 0.0 {
                weighted * (1.0 / weight)
            } else {
                cell.bounds.center()
            };
        }
        self.aggregated = true;
    }

    /// Build and aggregate in one call
    pub fn rebuild(&mut self, positions: &[Vec3], charges: &[f64], pool: &mut CellPool) {
        self.build(positions, charges, pool);
        self.aggregate();
    }

    /// Approximate repulsion on `body` from every other body in the tree
    ///
    /// Returns zero for an empty tree or a body that was left out of it.
    pub fn force(&self, body: usize, theta: f64, law: &ForceLaw) -> Vec3 {
        debug_assert!(self.aggregated, "octree must be aggregated before force queries");
        if self.cells.is_empty() || body >= self.positions.len() {
            return Vec3::ZERO;
        }
        let target = self.positions[body];
        if !target.is_finite() {
            return Vec3::ZERO;
        }
        self.force_at(body, target, self.charges[body], theta, law)
    }

    /// [`Octree::force`] walking the tree with a caller-owned stack
    ///
    /// `stack` is left empty but keeps its capacity for the next query.
    pub fn force_with(&self, body: usize, theta: f64, law: &ForceLaw, stack: &mut Vec<usize>) -> Vec3 {
        debug_assert!(self.aggregated, "octree must be aggregated before force queries");
        if self.cells.is_empty() || body >= self.positions.len() {
            return Vec3::ZERO;
        }
        let target = self.positions[body];
        if !target.is_finite() {
            return Vec3::ZERO;
        }
        self.walk(body, target, self.charges[body], theta, law, stack)
    }

    /// Approximate repulsion on a charge at an arbitrary point
    ///
    /// `body` identifies the charge for self-exclusion and may be out of
    /// range for a probe that is not part of the tree.
    pub fn force_at(&self, body: usize, target: Vec3, q: f64, theta: f64, law: &ForceLaw) -> Vec3 {
        if self.cells.is_empty() {
            return Vec3::ZERO;
        }
        SCRATCH.with(|scratch| match scratch.try_borrow_mut() {
            Ok(mut stack) => self.walk(body, target, q, theta, law, &mut stack),
            Err(_) => self.walk(body, target, q, theta, law, &mut Vec::new()),
        })
    }

    fn walk(
        &self,
        body: usize,
        target: Vec3,
        q: f64,
        theta: f64,
        law: &ForceLaw,
        stack: &mut Vec<usize>,
    ) -> Vec3 {
        let mut total = Vec3::ZERO;
        stack.clear();
        stack.push(ROOT);

        while let Some(idx) = stack.pop() {
            let cell = &self.cells[idx];
            match cell.content {
                CellContent::Empty => {}
                CellContent::Leaf(head) => {
                    for other in self.chain(head) {
                        if other == body {
                            continue;
                        }
                        total += law.point(
                            target,
                            self.positions[other],
                            q,
                            self.charges[other],
                            jiggle(body, other),
                        );
                    }
                }
                CellContent::Internal(children) => {
                    if cell.weight == 0.0 {
                        continue;
                    }
                    let distance = target.distance(cell.centroid);
                    let far = distance > 0.0
                        && !cell.bounds.contains(target)
                        && cell.bounds.edge / distance < theta;
                    if far {
                        total += law.point(target, cell.centroid, q, cell.mass, Vec3::ZERO);
                    } else {
                        stack.extend(children.iter().map(|&c| c as usize));
                    }
                }
            }
        }
        total
    }

    /// Return every cell to the pool, children before parents
    pub fn release(&mut self, pool: &mut CellPool) {
        while let Some(cell) = self.cells.pop() {
            pool.release(cell);
        }
        self.aggregated = false;
    }

    /// Check that every internal cell's mass equals the sum of its children
    pub fn verify_aggregates(&self) -> Result<(), AggregateViolation> {
        if self.cells.is_empty() {
            return Ok(());
        }
        self.verify_cell(ROOT)
    }

    fn verify_cell(&self, idx: usize) -> Result<(), AggregateViolation> {
        let cell = &self.cells[idx];
        if let CellContent::Internal(children) = cell.content {
            let expected: f64 = children
                .iter()
                .map(|&c| self.cells[c as usize].mass)
                .sum();
            let tolerance = 1e-9 * expected.abs().max(1.0);
            if (cell.mass - expected).abs() > tolerance {
                return Err(AggregateViolation {
                    cell: idx as CellId,
                    stored: cell.mass,
                    expected,
                });
            }
            for &child in &children {
                self.verify_cell(child as usize)?;
            }
        }
        Ok(())
    }

    /// Number of cells in the current tree
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Root cell, if the tree is non-empty
    pub fn root(&self) -> Option<&Cell> {
        self.cells.first()
    }

    /// Look up a cell by id
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id as usize)
    }

    /// Deepest level reached by the current tree
    pub fn depth(&self) -> u32 {
        self.cells.iter().map(|c| c.depth).max().unwrap_or(0)
    }

    /// Number of bodies left out of the last build
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Whether [`Octree::aggregate`] has run since the last build
    pub fn is_aggregated(&self) -> bool {
        self.aggregated
    }

    fn insert(&mut self, body: usize, pool: &mut CellPool) {
        let pos = self.positions[body];
        let mut idx = ROOT;

        loop {
            match self.cells[idx].content {
                CellContent::Empty => {
                    self.cells[idx].content = CellContent::Leaf(body);
                    return;
                }
                CellContent::Internal(children) => {
                    let octant = self.cells[idx].bounds.octant(pos);
                    idx = children[octant] as usize;
                }
                CellContent::Leaf(existing) => {
                    let cell = &self.cells[idx];
                    if cell.depth >= MAX_DEPTH || self.positions[existing] == pos {
                        // Chain the body onto the occupant instead of splitting forever
                        self.coincident[body] = self.coincident[existing];
                        self.coincident[existing] = Some(body);
                        return;
                    }
                    self.subdivide(idx, pool);
                    let displaced_octant = self.cells[idx].bounds.octant(self.positions[existing]);
                    if let CellContent::Internal(children) = self.cells[idx].content {
                        self.cells[children[displaced_octant] as usize].content =
                            CellContent::Leaf(existing);
                    }
                }
            }
        }
    }

    fn subdivide(&mut self, idx: usize, pool: &mut CellPool) {
        let bounds = self.cells[idx].bounds;
        let depth = self.cells[idx].depth + 1;
        let mut children = [0 as CellId; 8];
        for (octant, slot) in children.iter_mut().enumerate() {
            let mut child = pool.acquire();
            child.init(bounds.child(octant), depth);
            *slot = self.cells.len() as CellId;
            self.cells.push(child);
        }
        self.cells[idx].content = CellContent::Internal(children);
    }

    fn chain(&self, head: usize) -> Chain<'_> {
        Chain {
            next: Some(head),
            links: &self.coincident,
        }
    }
}

/// Iterator over the bodies sharing one leaf
struct Chain<'a> {
    next: Option<usize>,
    links: &'a [Option<usize>],
}

impl Iterator for Chain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = self.links[current];
        Some(current)
    }
}

/// Padded cube enclosing every point
fn bounding_cube(points: &[Vec3]) -> Option<Bounds> {
    let aabb = Aabb::from_points(points)?;
    let center = aabb.center();
    let side = aabb.longest_side();
    let edge = if side > 0.0 {
        side * (1.0 + 2.0 * BOUNDS_PADDING)
    } else {
        1.0
    };
    let half = edge * 0.5;
    Some(Bounds::new(center - Vec3::new(half, half, half), edge))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::spatial::cell::cell_pool;
    use crate::spatial::law::brute_force;

    fn grid(n: usize) -> (Vec<Vec3>, Vec<f64>) {
        let mut positions = Vec::new();
        for i in 0..n {
            let f = i as f64;
            positions.push(Vec3::new(
                (f * 1.7).sin() * 10.0 + f * 0.1,
                (f * 0.3).cos() * 8.0,
                (f * 2.3).sin() * 6.0 - f * 0.05,
            ));
        }
        (positions, vec![-1.0; n])
    }

    #[test]
    fn test_empty_tree() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        tree.rebuild(&[], &[], &mut pool);
        assert_eq!(tree.cell_count(), 0);
        assert!(tree.root().is_none());
        assert_eq!(tree.force(0, 0.5, &ForceLaw::default()), Vec3::ZERO);
        assert!(tree.verify_aggregates().is_ok());
    }

    #[test]
    fn test_single_body_has_no_self_force() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        tree.rebuild(&[Vec3::new(3.0, -2.0, 1.0)], &[-1.0], &mut pool);

        assert_eq!(tree.cell_count(), 1);
        assert_eq!(tree.force(0, 0.5, &ForceLaw::default()), Vec3::ZERO);
        let root = tree.root().unwrap();
        assert_eq!(root.mass, -1.0);
        assert_eq!(root.centroid, Vec3::new(3.0, -2.0, 1.0));
    }

    #[test]
    fn test_second_occupant_subdivides() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        let positions = [Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0)];
        tree.rebuild(&positions, &[-1.0, -2.0], &mut pool);

        assert_eq!(tree.cell_count(), 9);
        let root = tree.root().unwrap();
        assert!(!root.is_leaf());
        assert_eq!(root.mass, -3.0);
        // Centroid weighted toward the heavier charge
        assert!(root.centroid.x > 0.0);
        assert!(tree.verify_aggregates().is_ok());
    }

    #[test]
    fn test_aggregate_invariant_holds() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        let (positions, mut charges) = grid(500);
        for (i, c) in charges.iter_mut().enumerate() {
            *c = -1.0 - (i % 7) as f64;
        }
        tree.rebuild(&positions, &charges, &mut pool);

        assert!(tree.verify_aggregates().is_ok());
        let total: f64 = charges.iter().sum();
        assert!((tree.root().unwrap().mass - total).abs() < 1e-9);
    }

    #[test]
    fn test_coincident_bodies_share_leaf() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        let p = Vec3::new(2.0, 2.0, 2.0);
        let positions = [p, p, p, Vec3::ZERO];
        tree.rebuild(&positions, &[-1.0; 4], &mut pool);

        assert!(tree.depth() < MAX_DEPTH);
        let law = ForceLaw::new(1.0, 0.5, 1e6);
        let f0 = tree.force(0, 0.5, &law);
        assert!(f0.is_finite());
        assert!(f0.length() > 0.0);
        assert!(tree.verify_aggregates().is_ok());
    }

    #[test]
    fn test_caller_stack_is_reused() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        let (positions, charges) = grid(300);
        tree.rebuild(&positions, &charges, &mut pool);
        let law = ForceLaw::default();

        let mut stack = Vec::new();
        tree.force_with(0, 0.5, &law, &mut stack);
        assert!(stack.is_empty());
        let capacity = stack.capacity();
        assert!(capacity > 0);

        for body in 0..positions.len() {
            let f = tree.force_with(body, 0.5, &law, &mut stack);
            assert_eq!(f, tree.force(body, 0.5, &law));
            assert!(stack.is_empty());
        }
        // Queries over the same tree never shrink the stack
        assert!(stack.capacity() >= capacity);
        assert_eq!(tree.force_with(positions.len(), 0.5, &law, &mut stack), Vec3::ZERO);
    }

    #[test]
    fn test_force_matches_brute_force_at_small_theta() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        let (positions, charges) = grid(200);
        tree.rebuild(&positions, &charges, &mut pool);

        let law = ForceLaw::new(30.0, 0.5, 1e6);
        for body in (0..200).step_by(17) {
            let approx = tree.force(body, 1e-6, &law);
            let exact = brute_force(&positions, &charges, body, &law);
            let err = (approx - exact).length();
            assert!(err <= 1e-9 * exact.length().max(1.0), "body {} error {}", body, err);
        }
    }

    #[test]
    fn test_release_returns_cells_to_pool() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        let (positions, charges) = grid(100);

        tree.rebuild(&positions, &charges, &mut pool);
        let cells = tree.cell_count();
        assert_eq!(pool.stats().in_use, cells);

        tree.release(&mut pool);
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(pool.len(), cells);
        assert!(!tree.is_aggregated());

        // Rebuilding the same layout reuses every cell
        let created = pool.stats().total_created;
        tree.rebuild(&positions, &charges, &mut pool);
        assert_eq!(pool.stats().total_created, created);
    }

    #[test]
    fn test_non_finite_positions_are_skipped() {
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        let positions = [Vec3::ZERO, Vec3::new(f64::NAN, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        tree.rebuild(&positions, &[-1.0; 3], &mut pool);

        assert_eq!(tree.skipped(), 1);
        assert_eq!(tree.force(1, 0.5, &ForceLaw::default()), Vec3::ZERO);
        assert!(tree.force(0, 0.5, &ForceLaw::default()).is_finite());
    }
}
